//! Error types for storage operations

use std::fmt;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations
#[derive(Debug)]
pub enum StorageError {
    /// Database connection failed
    ConnectionFailed(String),

    /// Database query failed
    QueryFailed(String),

    /// Schema bootstrap or teardown failed
    SchemaFailed(String),

    /// Invalid configuration
    InvalidConfig(String),
}

impl StorageError {
    /// Connection and query failures are transient from the pipeline's
    /// point of view and retried with backoff; the rest are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::ConnectionFailed(_) | StorageError::QueryFailed(_)
        )
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed(msg) => {
                write!(f, "failed to connect to storage backend: {msg}")
            }
            StorageError::QueryFailed(msg) => write!(f, "storage query failed: {msg}"),
            StorageError::SchemaFailed(msg) => write!(f, "schema change failed: {msg}"),
            StorageError::InvalidConfig(msg) => write!(f, "invalid storage configuration: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {}

#[cfg(feature = "storage-postgres")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                StorageError::ConnectionFailed(err.to_string())
            }
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}
