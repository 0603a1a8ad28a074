use std::{collections::HashMap, sync::Arc};

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Path, State},
    http::{HeaderMap, Uri, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::{StreamExt, stream};
use serde::Serialize;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    engine::EngineArgs,
    error::ServiceError,
    handler::{CompletionHandler, Context, RequestItem, ResponseSink},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub handler: Arc<CompletionHandler>,
}

#[derive(Serialize)]
struct ModelDescription {
    model_name: String,
    engine_args: EngineArgs,
    adapters: Vec<String>,
}

enum Emission {
    Chunk(String),
    Failed(ServiceError),
}

/// Forwards intermediate responses into the HTTP body of the request.
struct ChannelSink {
    tx: mpsc::UnboundedSender<Emission>,
}

impl ResponseSink for ChannelSink {
    fn send_intermediate(
        &self,
        request_id: &str,
        body: String,
        message: &str,
        status: u16,
    ) -> Result<(), ServiceError> {
        debug!(request_id, message, status, "intermediate response");
        self.tx
            .send(Emission::Chunk(body))
            .map_err(|_| ServiceError::Cancelled(request_id.to_string()))
    }
}

pub fn build_router(config: Arc<AppConfig>, handler: Arc<CompletionHandler>) -> Router {
    let state = AppState { config, handler };

    Router::new()
        .route("/ping", get(ping))
        .route("/models/:model_name", get(describe_model))
        .route("/predictions/:model_name", post(predict))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn ping() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "Healthy" }))
}

async fn describe_model(
    State(state): State<AppState>,
    Path(model_name): Path<String>,
) -> Result<Json<ModelDescription>, ServiceError> {
    if model_name != state.config.model_name {
        return Err(ServiceError::ModelNotFound(model_name));
    }

    Ok(Json(ModelDescription {
        model_name,
        engine_args: state.handler.engine_args().clone(),
        adapters: state.handler.adapter_names(),
    }))
}

/// Runs one request through the handler. Intermediate responses and the final
/// outputs are written to the body as newline-terminated JSON documents.
async fn predict(
    State(state): State<AppState>,
    Path(model_name): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ServiceError> {
    if model_name != state.config.model_name {
        return Err(ServiceError::ModelNotFound(model_name));
    }

    let request_id = Uuid::new_v4().to_string();
    let mut item_headers: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();
    item_headers.insert(
        "url_path".to_string(),
        uri.path().trim_start_matches('/').to_string(),
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let ctx = Context::new(
        vec![request_id.clone()],
        Arc::new(ChannelSink { tx: tx.clone() }),
    )
    .with_headers(vec![item_headers]);
    let batch = vec![RequestItem::from_body(body.to_vec())];
    let handler = state.handler.clone();

    tokio::spawn(async move {
        match handler.handle(&batch, &ctx).await {
            Ok(outputs) => {
                for output in outputs {
                    if tx.send(Emission::Chunk(output)).is_err() {
                        break;
                    }
                }
            }
            Err(ServiceError::Cancelled(id)) => {
                debug!(request_id = %id, "client went away; generation abandoned");
            }
            Err(err) => {
                warn!(%request_id, error = %err, "request failed");
                let _ = tx.send(Emission::Failed(err));
            }
        }
        for metric in ctx.metrics.snapshot() {
            info!(
                %request_id,
                metric = %metric.name,
                value = metric.value,
                unit = %metric.unit,
                "handler metric"
            );
        }
    });

    let first = match rx.recv().await {
        Some(Emission::Chunk(chunk)) => chunk,
        Some(Emission::Failed(err)) => return Err(err),
        None => {
            return Err(ServiceError::Other(
                "handler finished without a response".into(),
            ));
        }
    };

    let rest = stream::unfold(rx, |mut rx| async move {
        match rx.recv().await? {
            Emission::Chunk(chunk) => Some((Ok(chunk), rx)),
            Emission::Failed(err) => Some((Err(err), rx)),
        }
    });
    let chunks = stream::once(async move { Ok::<_, ServiceError>(first) })
        .chain(rest)
        .map(|chunk| chunk.map(|mut body| {
            body.push('\n');
            body
        }));

    Ok((
        [(header::CONTENT_TYPE, "application/json")],
        Body::from_stream(chunks),
    )
        .into_response())
}
