//! Error handling module
//!
//! Provides unified error types and handling for the entire application.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Wrong arity or an argument that does not parse
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Caller metadata or the stored administrator credential could not be read
    #[error("Identity unavailable: {0}")]
    IdentityUnavailable(String),

    /// Caller does not match the stored administrator credential
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Proposal [{0}] does not exist")]
    ProposalNotFound(String),

    /// Table creation failed during reset
    #[error("Store initialization failed: {0}")]
    StoreInit(String),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// Never propagated out of the mutation protocol; logged and reported as a diagnostic
    #[error("Notification failed: {0}")]
    NotificationFailed(String),

    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl AppError {
    /// Stable machine-readable code for the error
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidArgument(_) => "INVALID_ARGUMENT",
            AppError::IdentityUnavailable(_) => "IDENTITY_UNAVAILABLE",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::ProposalNotFound(_) => "PROPOSAL_NOT_FOUND",
            AppError::StoreInit(_) => "STORE_INIT_ERROR",
            AppError::UnknownOperation(_) => "UNKNOWN_OPERATION",
            AppError::NotificationFailed(_) => "NOTIFICATION_FAILED",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Pool(_) => "POOL_EXHAUSTED",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, message, details) = match &self {
            AppError::InvalidArgument(_)
            | AppError::UnknownOperation(_)
            | AppError::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string(), None),
            AppError::IdentityUnavailable(_) => {
                (StatusCode::UNAUTHORIZED, self.to_string(), None)
            }
            AppError::Unauthorized(_) => (StatusCode::FORBIDDEN, self.to_string(), None),
            AppError::ProposalNotFound(_) => (StatusCode::NOT_FOUND, self.to_string(), None),
            AppError::StoreInit(msg) => {
                error!("Store initialization error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to initialize the proposal table".to_string(),
                    Some(msg.clone()),
                )
            }
            AppError::NotificationFailed(msg) => (
                StatusCode::BAD_GATEWAY,
                "Notification endpoint could not be reached".to_string(),
                Some(msg.clone()),
            ),
            AppError::Database(e) => {
                error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A database error occurred".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::Pool(e) => {
                error!("Pool error: {:?}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Database connection pool exhausted".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                    Some(msg.clone()),
                )
            }
            AppError::Config(msg) => {
                error!("Configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A configuration error occurred".to_string(),
                    Some(msg.clone()),
                )
            }
        };

        let body = Json(ErrorResponse {
            success: false,
            message,
            error: details,
            code: Some(code.to_string()),
        });

        (status, body).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, AppError>;

/// Helper function to create a validation error
pub fn validation_error(msg: impl Into<String>) -> AppError {
    AppError::Validation(msg.into())
}

/// Helper function to create an invalid argument error
pub fn invalid_argument(msg: impl Into<String>) -> AppError {
    AppError::InvalidArgument(msg.into())
}
