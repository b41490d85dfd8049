//! Error types for the sync engine

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Remote returned {status}: {message}")]
    RemoteStatus { status: u16, message: String },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Operation {operation} not supported for {table}")]
    UnsupportedMutation { table: String, operation: String },

    #[error("Sync already in progress")]
    SyncInProgress,

    #[error("Too soon since last sync, retry in {}s", retry_after.as_secs())]
    Throttled { retry_after: Duration },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Whether a later attempt of the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Network(_) | SyncError::Timeout(_) => true,
            SyncError::RemoteStatus { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout(err.to_string())
        } else if err.is_decode() {
            SyncError::Serialization(err.to_string())
        } else if let Some(status) = err.status() {
            SyncError::RemoteStatus {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            SyncError::Network(err.to_string())
        }
    }
}

impl From<config::ConfigError> for SyncError {
    fn from(err: config::ConfigError) -> Self {
        SyncError::Config(err.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
