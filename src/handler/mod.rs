//! Request handler sitting between the serving host and the inference engine.
//!
//! Each invocation takes a batch of exactly one request item, translates it into
//! a prompt, [`SamplingParams`](crate::engine::SamplingParams) and an optional
//! adapter, runs one generation on the engine and relays the result either as
//! intermediate chunks or as a single completion envelope.

mod adapters;
mod context;
mod request;
mod response;

use std::{path::Path, sync::Arc, time::Instant};

use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    config::HandlerConfig,
    engine::{EngineArgs, InferenceEngine, merge_fields},
    error::ServiceError,
};

pub use adapters::AdapterTable;
pub use context::{Context, Metric, Metrics, ResponseSink};
pub use request::{
    CompletionRequest, Payload, RequestItem, decode_payload, prepare_completion_request,
};
pub use response::{
    CompletionChoice, CompletionResponse, MODEL_NAME_PLACEHOLDER, ResponseEmitter, StreamChunk,
    UsageInfo,
};

pub struct CompletionHandler {
    engine: Arc<dyn InferenceEngine>,
    engine_args: EngineArgs,
    adapters: AdapterTable,
}

impl CompletionHandler {
    /// Resolves the engine arguments and builds the engine through `load`,
    /// which runs exactly once.
    pub fn initialize<F>(
        model_dir: &Path,
        config: &HandlerConfig,
        load: F,
    ) -> Result<Self, ServiceError>
    where
        F: FnOnce(EngineArgs) -> Result<Arc<dyn InferenceEngine>, ServiceError>,
    {
        let engine_args = engine_args_from_config(model_dir, config)?;
        let adapters = AdapterTable::new(model_dir, config.adapters.clone());

        info!(
            model = %engine_args.model,
            adapters = config.adapters.len(),
            "instantiating inference engine"
        );
        let engine = load(engine_args.clone())?;

        Ok(Self {
            engine,
            engine_args,
            adapters,
        })
    }

    pub fn engine_args(&self) -> &EngineArgs {
        &self.engine_args
    }

    pub fn adapter_names(&self) -> Vec<String> {
        self.adapters.names()
    }

    pub async fn handle(
        &self,
        requests: &[RequestItem],
        ctx: &Context,
    ) -> Result<Vec<String>, ServiceError> {
        let start = Instant::now();

        let inputs = self.preprocess(requests, ctx).await?;
        let outputs = self.inference(inputs, ctx).await?;
        let outputs = self.postprocess(outputs).await;

        let elapsed_ms = (start.elapsed().as_secs_f64() * 100_000.0).round() / 100.0;
        ctx.metrics.add_time("HandlerTime", elapsed_ms, "ms");
        Ok(outputs)
    }

    pub async fn preprocess(
        &self,
        requests: &[RequestItem],
        ctx: &Context,
    ) -> Result<Vec<CompletionRequest>, ServiceError> {
        if requests.len() != 1 {
            return Err(ServiceError::Precondition(format!(
                "Expecting batch_size = 1, got {}",
                requests.len()
            )));
        }
        if let Some(url_path) = ctx.request_header(0, "url_path") {
            info!(url_path, "preprocessing request");
        }

        let payload = decode_payload(&requests[0])?;
        Ok(vec![prepare_completion_request(&payload, &self.adapters)?])
    }

    pub async fn inference(
        &self,
        inputs: Vec<CompletionRequest>,
        ctx: &Context,
    ) -> Result<Vec<String>, ServiceError> {
        let request = inputs
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::Precondition("no request to run".into()))?;
        let request_id = ctx
            .request_ids
            .first()
            .cloned()
            .ok_or_else(|| ServiceError::Precondition("missing request id".into()))?;
        debug!(?request, "inputs");

        let mut emitter = ResponseEmitter::new(request.stream);
        let mut events = self
            .engine
            .generate(
                request.prompt,
                request.params,
                request_id.clone(),
                request.lora,
            )
            .await?;

        while let Some(event) = events.next().await {
            let event = event?;
            let finished = event.finished;
            if let Some(chunk) = emitter.observe(event)? {
                ctx.send_intermediate(&[serde_json::to_string(&chunk)?], "Result", 200)?;
            }
            if finished {
                break;
            }
        }

        Ok(vec![emitter.finish(&request_id)?])
    }

    pub async fn postprocess(&self, outputs: Vec<String>) -> Vec<String> {
        outputs
    }
}

/// Picks the model from `vllm_engine_config.model`, falling back to
/// `model_path` under `model_dir` (or `model_path` as given when that path
/// does not exist locally), then applies the remaining engine overrides.
pub fn engine_args_from_config(
    model_dir: &Path,
    config: &HandlerConfig,
) -> Result<EngineArgs, ServiceError> {
    let explicit = config
        .vllm_engine_config
        .get("model")
        .and_then(Value::as_str)
        .filter(|model| !model.is_empty());

    let model = match explicit {
        Some(model) => model.to_string(),
        None => {
            let relative = config
                .model_path
                .as_deref()
                .filter(|path| !path.is_empty())
                .ok_or_else(|| {
                    ServiceError::Config(
                        "please define model in vllm_engine_config or model_path in handler"
                            .into(),
                    )
                })?;
            let resolved = model_dir.join(relative);
            if resolved.exists() {
                resolved.to_string_lossy().into_owned()
            } else {
                debug!(
                    path = %resolved.display(),
                    "model path does not exist locally; passing it through without model_dir"
                );
                relative.to_string()
            }
        }
    };
    debug!(%model, "engine model");

    let mut overrides = config.vllm_engine_config.clone();
    overrides.remove("model");
    merge_fields(&EngineArgs::new(model), &overrides)
        .map_err(|e| ServiceError::Config(format!("invalid vllm_engine_config: {e}")))
}
