//! Log error types

use axum::http::StatusCode;
use thiserror::Error;

/// Main error type for the log write path
#[derive(Debug, Error)]
pub enum LogError {
    /// Rejected input (empty entry, malformed path, bad parameters)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Requested tile, bundle or checkpoint does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Checkpoint note could not be parsed or created
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Persisted state contradicts the tree invariants
    #[error("state corruption: {0}")]
    Corruption(String),

    /// Storage operation failed
    #[error("storage error: {0}")]
    Storage(StorageError),

    /// Pool is shut down or cannot accept work
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Batch failed; every submitter of the batch observes this error
    #[error("batch failed: {0}")]
    Batch(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

/// Storage-specific errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database could not be opened or the connection is unusable
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Row lookup found nothing
    #[error("not found: {0}")]
    NotFound(String),

    /// SQLite error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type alias for the log
pub type LogResult<T> = Result<T, LogError>;

impl LogError {
    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            LogError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            LogError::NotFound(_) | LogError::Storage(StorageError::NotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            LogError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            LogError::Checkpoint(_)
            | LogError::Corruption(_)
            | LogError::Storage(_)
            | LogError::Batch(_)
            | LogError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            LogError::InvalidArgument(_) => "INVALID_ARGUMENT",
            LogError::NotFound(_) => "NOT_FOUND",
            LogError::Checkpoint(_) => "CHECKPOINT_ERROR",
            LogError::Corruption(_) => "STATE_CORRUPTION",
            LogError::Storage(StorageError::NotFound(_)) => "NOT_FOUND",
            LogError::Storage(_) => "STORAGE_ERROR",
            LogError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            LogError::Batch(_) => "BATCH_FAILED",
            LogError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True when retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            LogError::Storage(e) => e.is_transient(),
            LogError::ServiceUnavailable(_) => true,
            _ => false,
        }
    }
}

impl StorageError {
    /// Busy/locked/connection failures resolve on retry; the rest do not
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::ConnectionFailed(_) => true,
            StorageError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for LogError {
    fn from(e: rusqlite::Error) -> Self {
        LogError::Storage(StorageError::Sqlite(e))
    }
}

impl From<StorageError> for LogError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(what) => LogError::NotFound(what),
            other => LogError::Storage(other),
        }
    }
}

impl From<hex::FromHexError> for LogError {
    fn from(e: hex::FromHexError) -> Self {
        LogError::InvalidArgument(format!("hex decode: {}", e))
    }
}

impl From<base64::DecodeError> for LogError {
    fn from(e: base64::DecodeError) -> Self {
        LogError::InvalidArgument(format!("base64 decode: {}", e))
    }
}
