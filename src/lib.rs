pub mod config;
pub mod engine;
pub mod error;
pub mod handler;
pub mod server;

pub use config::{AppConfig, HandlerConfig, ModelConfig};
pub use engine::{EngineArgs, InferenceEngine, LoraRequest, RequestOutput, SamplingParams};
pub use error::ServiceError;
pub use handler::{CompletionHandler, Context, RequestItem, ResponseSink};
pub use server::build_router;
