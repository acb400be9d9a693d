//! Error types for the churn server.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use churn_training::TrainingError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::queue::QueueError;

/// Startup and runtime errors of the service.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Address parsing errors
    #[error("Invalid address: {0}")]
    InvalidAddress(#[from] std::net::AddrParseError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Model registry or training errors
    #[error("Training error: {0}")]
    Training(#[from] TrainingError),

    /// Job queue errors
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors surfaced to HTTP callers as `{"error": "..."}`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("No file")]
    NoFile,

    #[error("No data")]
    NoData,

    #[error("Model not trained yet")]
    ModelNotTrained,

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("File too large")]
    PayloadTooLarge,

    #[error("Job not found")]
    JobNotFound,

    /// Like `ModelNotTrained`, for routes that look up the model as a resource.
    #[error("Model not trained yet")]
    NoPublishedModel,

    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NoFile | Self::NoData | Self::ModelNotTrained | Self::InvalidData(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::JobNotFound | Self::NoPublishedModel => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<TrainingError> for ApiError {
    fn from(e: TrainingError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(detail) = &self {
            error!(error = %detail, "Request failed");
        }
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
