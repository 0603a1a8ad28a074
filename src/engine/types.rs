use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

pub type TokenId = u32;

/// Constructor arguments for the inference engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineArgs {
    pub model: String,
    pub tokenizer: Option<String>,
    pub revision: Option<String>,
    pub dtype: String,
    pub seed: u64,
    pub max_model_len: Option<usize>,
    pub tensor_parallel_size: usize,
    pub gpu_memory_utilization: f64,
    pub max_num_seqs: usize,
    pub enable_lora: bool,
    pub max_loras: usize,
    pub max_lora_rank: usize,
    pub trust_remote_code: bool,
    pub disable_log_requests: bool,
}

impl Default for EngineArgs {
    fn default() -> Self {
        Self {
            model: String::new(),
            tokenizer: None,
            revision: None,
            dtype: "auto".to_string(),
            seed: 0,
            max_model_len: None,
            tensor_parallel_size: 1,
            gpu_memory_utilization: 0.9,
            max_num_seqs: 256,
            enable_lora: false,
            max_loras: 1,
            max_lora_rank: 16,
            trust_remote_code: false,
            disable_log_requests: false,
        }
    }
}

impl EngineArgs {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }
}

/// Per-request generation controls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub n: usize,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub repetition_penalty: f32,
    pub temperature: f32,
    pub top_p: f32,
    /// `-1` disables top-k filtering.
    pub top_k: i32,
    pub min_p: f32,
    pub seed: Option<u64>,
    #[serde(deserialize_with = "one_or_many")]
    pub stop: Vec<String>,
    pub stop_token_ids: Vec<TokenId>,
    pub ignore_eos: bool,
    pub max_tokens: Option<usize>,
    pub min_tokens: usize,
    pub skip_special_tokens: bool,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            n: 1,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            repetition_penalty: 1.0,
            temperature: 1.0,
            top_p: 1.0,
            top_k: -1,
            min_p: 0.0,
            seed: None,
            stop: Vec::new(),
            stop_token_ids: Vec::new(),
            ignore_eos: false,
            max_tokens: Some(16),
            min_tokens: 0,
            skip_special_tokens: true,
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Nothing(()),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
        OneOrMany::Nothing(()) => Vec::new(),
    })
}

/// An adapter selected for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoraRequest {
    pub name: String,
    pub id: u32,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionOutput {
    pub index: usize,
    /// Cumulative text generated so far.
    pub text: String,
    /// Cumulative generated token ids.
    pub token_ids: Vec<TokenId>,
    pub finish_reason: Option<String>,
}

/// One event of an engine generation stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestOutput {
    pub request_id: String,
    pub prompt: String,
    pub outputs: Vec<CompletionOutput>,
    pub finished: bool,
}

/// Returns a copy of `target` where every field named in `overrides` takes the
/// override value. Keys that are not fields of `T` are skipped.
pub fn merge_fields<T>(target: &T, overrides: &Map<String, Value>) -> Result<T, serde_json::Error>
where
    T: Serialize + DeserializeOwned,
{
    let mut fields = match serde_json::to_value(target)? {
        Value::Object(fields) => fields,
        other => {
            return Err(serde::de::Error::custom(format!(
                "expected a struct with named fields, got {other}"
            )));
        }
    };

    for (key, value) in overrides {
        if let Some(slot) = fields.get_mut(key) {
            *slot = value.clone();
        }
    }

    serde_json::from_value(Value::Object(fields))
}
