use crate::core::CoreError;
use thiserror::Error;
use uuid::Uuid;

/// Storage layer error type for the telos orchestration engine.
///
/// This error type wraps underlying database and serialization errors
/// while preserving the full error chain for debugging.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// A database operation failed.
    #[cfg(feature = "sqlite")]
    #[error("database operation failed")]
    Database(#[from] sqlx::Error),

    /// Failed to reach or configure the underlying store.
    #[error("connection error: {0}")]
    Connection(String),

    /// A core serialization or deserialization error occurred.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// The requested workflow instance does not exist.
    #[error("instance not found: {0}")]
    InstanceNotFound(Uuid),

    /// An append was attempted on an instance whose history already ended.
    #[error("instance already terminal: {0}")]
    InstanceTerminal(Uuid),

    /// A caller-supplied value was outside the accepted range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;
