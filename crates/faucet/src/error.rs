//! Error types for the faucet service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Faucet service errors
#[derive(Error, Debug)]
pub enum FaucetError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("{message}")]
    RateLimitDenied { message: String, retry_after: u64 },

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures talking to the chain
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Invalid RPC response: {0}")]
    InvalidResponse(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Timed out after {0} seconds")]
    Timeout(u64),
}

/// Failures persisting the rate-limit snapshot
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<tempfile::PersistError> for StoreError {
    fn from(err: tempfile::PersistError) -> Self {
        StoreError::Io(err.error)
    }
}

impl IntoResponse for FaucetError {
    fn into_response(self) -> Response {
        let mut retry_after = None;
        let (status, error_message, error_code) = match self {
            FaucetError::Configuration(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Faucet is not configured. Please try again later.".to_string(),
                "CONFIGURATION_ERROR",
            ),
            FaucetError::Validation(msg) => (StatusCode::BAD_REQUEST, msg, "INVALID_REQUEST"),
            FaucetError::RateLimitDenied { message, retry_after: minutes } => {
                retry_after = Some(minutes);
                (StatusCode::TOO_MANY_REQUESTS, message, "RATE_LIMITED")
            }
            FaucetError::TransactionFailed(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, msg, "TRANSACTION_FAILED")
            }
            // Ledger and store details stay in the logs
            FaucetError::Ledger(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Transaction failed. Please try again later.".to_string(),
                "TRANSACTION_FAILED",
            ),
            FaucetError::Store(_) | FaucetError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error. Please try again later.".to_string(),
                "INTERNAL_ERROR",
            ),
        };

        let body = Json(json!({
            "success": false,
            "error": error_code,
            "message": error_message,
            "retryAfter": retry_after,
            "timestamp": chrono::Utc::now().to_rfc3339()
        }));

        (status, body).into_response()
    }
}

pub type FaucetResult<T> = Result<T, FaucetError>;
