//! Error types and handling
//!
//! Common error types used across the crate. Recording failures inside the
//! asynchronous start path never surface here; they become `Cancelled`
//! events. Only problems at the bridge boundary are returned as errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParams { name: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Recorder service is not running")]
    ServiceUnavailable,
}

/// Error response for the host bridge
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        let code = match &error {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::UnknownOperation(_) => "UNKNOWN_OPERATION",
            AppError::InvalidParams { .. } => "INVALID_PARAMS",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
