use serde_json::{Map, Value};

use crate::{
    engine::{LoraRequest, SamplingParams, merge_fields},
    error::ServiceError,
    handler::adapters::AdapterTable,
};

/// Request payload as delivered by the host: raw bytes or an already decoded
/// JSON object.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Bytes(Vec<u8>),
    Json(Map<String, Value>),
}

impl Payload {
    fn is_empty(&self) -> bool {
        match self {
            Payload::Bytes(bytes) => bytes.is_empty(),
            Payload::Json(map) => map.is_empty(),
        }
    }
}

/// One entry of a host request batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestItem {
    pub data: Option<Payload>,
    pub body: Option<Payload>,
}

impl RequestItem {
    pub fn from_body(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            data: None,
            body: Some(Payload::Bytes(bytes.into())),
        }
    }

    pub fn from_json(fields: Map<String, Value>) -> Self {
        Self {
            data: Some(Payload::Json(fields)),
            body: None,
        }
    }

    /// `data` wins unless it is missing or empty, then `body`.
    pub fn payload(&self) -> Option<&Payload> {
        self.data
            .as_ref()
            .filter(|p| !p.is_empty())
            .or(self.body.as_ref())
    }
}

/// A request translated into engine terms.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub stream: bool,
    pub params: SamplingParams,
    pub lora: Option<LoraRequest>,
}

pub fn decode_payload(item: &RequestItem) -> Result<Map<String, Value>, ServiceError> {
    let payload = item
        .payload()
        .ok_or_else(|| ServiceError::BadRequest("request carries neither data nor body".into()))?;

    match payload {
        Payload::Json(fields) => Ok(fields.clone()),
        Payload::Bytes(bytes) => {
            let text = std::str::from_utf8(bytes)?;
            match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(fields)) => Ok(fields),
                Ok(_) => Err(ServiceError::BadRequest(
                    "request body must be a JSON object".into(),
                )),
                Err(e) => Err(ServiceError::BadRequest(format!(
                    "request body is not valid JSON: {e}"
                ))),
            }
        }
    }
}

pub fn prepare_completion_request(
    request: &Map<String, Value>,
    adapters: &AdapterTable,
) -> Result<CompletionRequest, ServiceError> {
    let prompt = request
        .get("prompt")
        .and_then(Value::as_str)
        .ok_or_else(|| ServiceError::BadRequest("missing string field 'prompt'".into()))?
        .to_string();

    let stream = match request.get("stream") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(stream)) => *stream,
        Some(other) => {
            return Err(ServiceError::BadRequest(format!(
                "'stream' must be a boolean, got {other}"
            )));
        }
    };

    let params = merge_fields(&SamplingParams::default(), request)
        .map_err(|e| ServiceError::BadRequest(format!("invalid sampling parameters: {e}")))?;

    let adapter_name = match request.get("lora_adapter") {
        None | Some(Value::Null) => "",
        Some(Value::String(name)) => name.as_str(),
        Some(other) => {
            return Err(ServiceError::BadRequest(format!(
                "'lora_adapter' must be a string, got {other}"
            )));
        }
    };
    let lora = adapters.resolve(adapter_name)?;

    Ok(CompletionRequest {
        prompt,
        stream,
        params,
        lora,
    })
}
