mod common;

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use vllm_handler_service::{AppConfig, build_router};

use common::{ScriptedEngine, handler_with};

fn app(engine: Arc<ScriptedEngine>) -> Router {
    let config = AppConfig {
        listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        model_name: "llama".to_string(),
        model_dir: PathBuf::from("/srv/model"),
        model_config_path: PathBuf::from("/srv/model/model-config.yaml"),
        #[cfg(feature = "tch-backend")]
        device: tch::Device::Cpu,
    };
    let handler = handler_with(engine, &[("A", "adapters/a")]);
    build_router(Arc::new(config), Arc::new(handler))
}

fn predict(model: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/predictions/{model}"))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

async fn body_lines(resp: axum::response::Response) -> Vec<Value> {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec())
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn ping_reports_healthy() {
    let resp = app(Arc::new(ScriptedEngine::new(&["ok"])))
        .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let lines = body_lines(resp).await;
    assert_eq!(lines[0]["status"], "Healthy");
}

#[tokio::test]
async fn non_streaming_prediction_returns_envelope() {
    let engine = Arc::new(ScriptedEngine::new(&["Hello", " there"]));
    let resp = app(engine.clone())
        .oneshot(predict("llama", json!({"prompt": "Hi", "max_tokens": 2})))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let lines = body_lines(resp).await;
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["choices"][0]["text"], "Hello there");
    assert_eq!(lines[0]["object"], "text_completion");

    let calls = engine.calls.lock();
    assert_eq!(calls[0].params.max_tokens, Some(2));
    assert_eq!(lines[0]["id"], calls[0].request_id.as_str());
}

#[tokio::test]
async fn streaming_prediction_writes_chunks_in_order() {
    let engine = Arc::new(ScriptedEngine::new(&["one", " two", " three"]));
    let resp = app(engine.clone())
        .oneshot(predict("llama", json!({"prompt": "count", "stream": true})))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let lines = body_lines(resp).await;
    let texts: Vec<&str> = lines.iter().map(|l| l["text"].as_str().unwrap()).collect();
    assert_eq!(texts, vec!["one", " two", " three"]);
    assert_eq!(texts.concat(), engine.full_text());
}

#[tokio::test]
async fn unknown_adapter_is_a_bad_request() {
    let engine = Arc::new(ScriptedEngine::new(&["ok"]));
    let resp = app(engine.clone())
        .oneshot(predict("llama", json!({"prompt": "p", "lora_adapter": "missing"})))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let lines = body_lines(resp).await;
    assert!(lines[0]["error"].as_str().unwrap().contains("missing"));
    assert_eq!(engine.call_count(), 0);
}

#[tokio::test]
async fn engine_failure_before_output_is_a_server_error() {
    let engine = Arc::new(ScriptedEngine::new(&["a"]).failing_after(0));
    let resp = app(engine)
        .oneshot(predict("llama", json!({"prompt": "p"})))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn unknown_model_is_not_found() {
    let resp = app(Arc::new(ScriptedEngine::new(&["ok"])))
        .oneshot(predict("mistral", json!({"prompt": "p"})))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn describe_model_lists_engine_args_and_adapters() {
    let resp = app(Arc::new(ScriptedEngine::new(&["ok"])))
        .oneshot(
            Request::builder()
                .uri("/models/llama")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let lines = body_lines(resp).await;
    assert_eq!(lines[0]["model_name"], "llama");
    assert_eq!(lines[0]["engine_args"]["model"], "test/tiny-llama");
    assert_eq!(lines[0]["adapters"], json!(["A"]));
}

#[tokio::test]
async fn engine_failure_mid_stream_terminates_the_body() {
    let engine = Arc::new(ScriptedEngine::new(&["a", "b", "c"]).failing_after(1));
    let resp = app(engine)
        .oneshot(predict("llama", json!({"prompt": "p", "stream": true})))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let mut body = resp.into_body();

    let first = body.frame().await.unwrap().unwrap().into_data().unwrap();
    let line: Value = serde_json::from_slice(&first).unwrap();
    assert_eq!(line["text"], "a");

    assert!(body.frame().await.unwrap().is_err());
}
