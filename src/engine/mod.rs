pub mod decoding;
mod types;

#[cfg(feature = "tch-backend")]
pub mod torchscript;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{config::AppConfig, error::ServiceError};

pub use types::{
    CompletionOutput, EngineArgs, LoraRequest, RequestOutput, SamplingParams, TokenId,
    merge_fields,
};

/// Events for one request, ending with an output whose `finished` flag is set.
pub type OutputStream = BoxStream<'static, Result<RequestOutput, ServiceError>>;

/// Asynchronous text generation backend. Implementations own scheduling,
/// batching and adapter loading; callers only consume the event stream.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    async fn generate(
        &self,
        prompt: String,
        params: SamplingParams,
        request_id: String,
        lora: Option<LoraRequest>,
    ) -> Result<OutputStream, ServiceError>;
}

/// Builds the backend compiled into this binary.
#[cfg(feature = "tch-backend")]
pub fn load_engine(
    args: EngineArgs,
    config: &AppConfig,
) -> Result<Arc<dyn InferenceEngine>, ServiceError> {
    let engine = torchscript::TorchScriptEngine::from_engine_args(args, config.device)?;
    Ok(Arc::new(engine))
}

#[cfg(not(feature = "tch-backend"))]
pub fn load_engine(
    args: EngineArgs,
    _config: &AppConfig,
) -> Result<Arc<dyn InferenceEngine>, ServiceError> {
    Err(ServiceError::Config(format!(
        "no inference backend compiled in for model {}; rebuild with --features tch-backend",
        args.model
    )))
}
