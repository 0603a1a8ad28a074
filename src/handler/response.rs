use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    engine::{CompletionOutput, RequestOutput, TokenId},
    error::ServiceError,
};

/// Reported as `model` in completion envelopes.
pub const MODEL_NAME_PLACEHOLDER: &str = "model_name";

/// Body of one streamed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub text: String,
    pub tokens: Option<TokenId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
    pub usage: UsageInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionChoice {
    pub index: u32,
    pub text: String,
    pub logprobs: Option<Value>,
    pub finish_reason: Option<String>,
}

/// Token accounting is not wired to the engine; every count stays zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageInfo {
    pub prompt_tokens: u32,
    pub total_tokens: u32,
    pub completion_tokens: u32,
}

impl CompletionResponse {
    fn from_output(request_id: &str, output: &CompletionOutput) -> Self {
        Self {
            id: request_id.to_string(),
            object: "text_completion".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: MODEL_NAME_PLACEHOLDER.to_string(),
            choices: vec![CompletionChoice {
                index: 0,
                text: output.text.clone(),
                logprobs: None,
                finish_reason: output.finish_reason.clone(),
            }],
            usage: UsageInfo::default(),
        }
    }
}

/// Turns the engine event sequence of one request into handler responses.
///
/// In streaming mode every non-final event yields the text appended since the
/// previous chunk; the final event's remainder becomes the returned response.
/// Otherwise intermediate events are dropped and the final event becomes a
/// completion envelope.
pub struct ResponseEmitter {
    stream: bool,
    emitted: usize,
    last: Option<RequestOutput>,
}

impl ResponseEmitter {
    pub fn new(stream: bool) -> Self {
        Self {
            stream,
            emitted: 0,
            last: None,
        }
    }

    /// Records an event; returns the chunk to push as an intermediate
    /// response, if any.
    pub fn observe(&mut self, output: RequestOutput) -> Result<Option<StreamChunk>, ServiceError> {
        let chunk = if self.stream && !output.finished {
            let first = first_output(&output)?;
            Some(self.advance(first))
        } else {
            None
        };
        self.last = Some(output);
        Ok(chunk)
    }

    /// Serializes the final response from the last observed event.
    pub fn finish(mut self, request_id: &str) -> Result<String, ServiceError> {
        let last = self.last.take().ok_or_else(|| {
            ServiceError::Inference(format!("engine produced no output for {request_id}"))
        })?;
        let output = first_output(&last)?;

        let body = if self.stream {
            serde_json::to_string(&self.advance(output))?
        } else {
            serde_json::to_string(&CompletionResponse::from_output(request_id, output))?
        };
        Ok(body)
    }

    fn advance(&mut self, output: &CompletionOutput) -> StreamChunk {
        // Engine text is cumulative; emit only the unseen suffix.
        let text = output.text.get(self.emitted..).unwrap_or_default().to_string();
        self.emitted = self.emitted.max(output.text.len());
        StreamChunk {
            text,
            tokens: output.token_ids.last().copied(),
        }
    }
}

fn first_output(output: &RequestOutput) -> Result<&CompletionOutput, ServiceError> {
    output.outputs.first().ok_or_else(|| {
        ServiceError::Inference(format!(
            "engine event for {} carries no completion",
            output.request_id
        ))
    })
}
