use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("request body is not valid utf-8: {0}")]
    Decode(#[from] std::str::Utf8Error),
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("model execution failed: {0}")]
    Inference(String),
    #[error("client stopped listening for request {0}")]
    Cancelled(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("other: {0}")]
    Other(String),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::Precondition(_)
            | ServiceError::BadRequest(_)
            | ServiceError::Decode(_) => StatusCode::BAD_REQUEST,
            ServiceError::ModelNotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Cancelled(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Config(_)
            | ServiceError::Tokenizer(_)
            | ServiceError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Serialization(_) | ServiceError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ServiceError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
