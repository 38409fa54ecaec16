/// Unified error types for the STUN resolver
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the resolver
#[derive(Error, Debug)]
pub enum ResolverError {
    /// Invalid backend kind or unusable backend parameters
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Machine identity could not be established
    #[error("Identity error: {0}")]
    Identity(String),

    /// External discovery call failed or timed out
    #[error("Failed to retrieve STUN info: {0}")]
    Resolution(String),

    /// Invalid record or input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Backend storage errors (file document, Redis)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// JSON error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Convert ResolverError to HTTP response
impl IntoResponse for ResolverError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ResolverError::Resolution(_) => (
                StatusCode::BAD_GATEWAY,
                "StunResolutionFailed",
                self.to_string(),
            ),
            ResolverError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "InvalidRequest",
                self.to_string(),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                "Internal server error".to_string(), // Don't leak details
            ),
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for resolver operations
pub type ResolverResult<T> = Result<T, ResolverError>;
