#![allow(dead_code)]

use std::{collections::HashMap, path::Path, sync::Arc};

use async_trait::async_trait;
use futures::{StreamExt, stream};
use parking_lot::Mutex;
use vllm_handler_service::{
    CompletionHandler, HandlerConfig, InferenceEngine, LoraRequest, RequestOutput, ResponseSink,
    SamplingParams, ServiceError,
    engine::{CompletionOutput, OutputStream},
};

#[derive(Debug, Clone)]
pub struct GenerateCall {
    pub prompt: String,
    pub params: SamplingParams,
    pub request_id: String,
    pub lora: Option<LoraRequest>,
}

/// Replays a fixed token script as cumulative engine events.
pub struct ScriptedEngine {
    pieces: Vec<String>,
    trailing_final: bool,
    fail_after: Option<usize>,
    pub calls: Mutex<Vec<GenerateCall>>,
}

impl ScriptedEngine {
    /// The last piece arrives with the final event.
    pub fn new(pieces: &[&str]) -> Self {
        Self {
            pieces: pieces.iter().map(|p| p.to_string()).collect(),
            trailing_final: false,
            fail_after: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every piece arrives as a non-final event and the final event adds nothing.
    pub fn with_trailing_final(mut self) -> Self {
        self.trailing_final = true;
        self
    }

    /// Fails the stream after `events` events.
    pub fn failing_after(mut self, events: usize) -> Self {
        self.fail_after = Some(events);
        self
    }

    pub fn full_text(&self) -> String {
        self.pieces.concat()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn events(&self, request_id: &str, prompt: &str) -> Vec<RequestOutput> {
        let mut events = Vec::new();
        let mut text = String::new();
        let mut token_ids = Vec::new();
        let count = self.pieces.len();

        for (idx, piece) in self.pieces.iter().enumerate() {
            text.push_str(piece);
            token_ids.push(100 + idx as u32);
            let finished = !self.trailing_final && idx + 1 == count;
            events.push(event(request_id, prompt, &text, &token_ids, finished));
        }
        if self.trailing_final || count == 0 {
            events.push(event(request_id, prompt, &text, &token_ids, true));
        }
        events
    }
}

fn event(
    request_id: &str,
    prompt: &str,
    text: &str,
    token_ids: &[u32],
    finished: bool,
) -> RequestOutput {
    RequestOutput {
        request_id: request_id.to_string(),
        prompt: prompt.to_string(),
        outputs: vec![CompletionOutput {
            index: 0,
            text: text.to_string(),
            token_ids: token_ids.to_vec(),
            finish_reason: finished.then(|| "stop".to_string()),
        }],
        finished,
    }
}

#[async_trait]
impl InferenceEngine for ScriptedEngine {
    async fn generate(
        &self,
        prompt: String,
        params: SamplingParams,
        request_id: String,
        lora: Option<LoraRequest>,
    ) -> Result<OutputStream, ServiceError> {
        let events = self.events(&request_id, &prompt);
        self.calls.lock().push(GenerateCall {
            prompt,
            params,
            request_id,
            lora,
        });

        let mut items: Vec<Result<RequestOutput, ServiceError>> =
            events.into_iter().map(Ok).collect();
        if let Some(limit) = self.fail_after {
            items.truncate(limit);
            items.push(Err(ServiceError::Inference("device lost".into())));
        }
        Ok(stream::iter(items).boxed())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub sent: Mutex<Vec<(String, String, String, u16)>>,
}

impl RecordingSink {
    pub fn bodies(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(_, body, _, _)| body.clone()).collect()
    }
}

impl ResponseSink for RecordingSink {
    fn send_intermediate(
        &self,
        request_id: &str,
        body: String,
        message: &str,
        status: u16,
    ) -> Result<(), ServiceError> {
        self.sent
            .lock()
            .push((request_id.to_string(), body, message.to_string(), status));
        Ok(())
    }
}

pub fn handler_config(adapters: &[(&str, &str)]) -> HandlerConfig {
    HandlerConfig {
        vllm_engine_config: serde_json::Map::from_iter([(
            "model".to_string(),
            serde_json::Value::String("test/tiny-llama".to_string()),
        )]),
        model_path: None,
        adapters: adapters
            .iter()
            .map(|(name, path)| (name.to_string(), path.to_string()))
            .collect::<HashMap<_, _>>(),
    }
}

pub fn handler_with(engine: Arc<ScriptedEngine>, adapters: &[(&str, &str)]) -> CompletionHandler {
    CompletionHandler::initialize(Path::new("/srv/model"), &handler_config(adapters), |_| {
        Ok(engine as Arc<dyn InferenceEngine>)
    })
    .unwrap()
}
