use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failure taxonomy of the conversation engine
#[derive(Error, Debug)]
pub enum RagError {
    /// Missing or invalid settings; the process refuses to start
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Retrieval backend could not be constructed
    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    /// Transient backend error during a query
    #[error("Retrieval failed: {0}")]
    RetrievalFailure(String),

    #[error("Generation failed: {0}")]
    GenerationFailure(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<config::ConfigError> for RagError {
    fn from(err: config::ConfigError) -> Self {
        RagError::Configuration(err.to_string())
    }
}

/// Boundary error, rendered as a JSON body with a status code
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Message shown to callers for every internal failure
pub const GENERIC_CHAT_FAILURE: &str = "Error processing chat";

impl From<RagError> for ApiError {
    fn from(err: RagError) -> Self {
        match err {
            RagError::InvalidInput(msg) => ApiError::BadRequest(msg),
            other => {
                // Detail stays in the logs
                tracing::error!("Chat error: {}", other);
                ApiError::InternalError(GENERIC_CHAT_FAILURE.to_string())
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::BadRequest(msg) => {
                tracing::warn!("Bad request: {}", msg);
                (StatusCode::BAD_REQUEST, "BadRequest", msg)
            }
            ApiError::NotFound(msg) => {
                tracing::warn!("Not found: {}", msg);
                (StatusCode::NOT_FOUND, "NotFound", msg)
            }
            ApiError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError", msg),
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        (status, body).into_response()
    }
}
