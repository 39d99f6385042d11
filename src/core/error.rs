use thiserror::Error;

/// Core error type for the telos orchestration engine.
///
/// This error type uses `thiserror` with proper `#[source]` annotations
/// to preserve error chains for debugging and error handling.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Serialization failed when encoding a value to bytes.
    #[error("serialization failed")]
    Serialization(#[source] serde_json::Error),

    /// Deserialization failed when decoding bytes to a value.
    #[error("deserialization failed")]
    Deserialization(#[source] serde_json::Error),

    /// An invalid status string was encountered during parsing.
    #[error("invalid workflow status: {0}")]
    InvalidStatus(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
