use crate::core::CoreError;
use crate::storage::StorageError;
use thiserror::Error;

/// Execution layer error type for the telos orchestration engine.
///
/// This error type wraps storage and core errors while also providing
/// execution-specific variants for workflow management. Nested errors are
/// flattened to strings so the type stays `Clone` and can be folded into
/// history event payloads.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum ExecutionError {
    /// A storage operation failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// A core serialization or deserialization error occurred.
    #[error("core error: {0}")]
    Core(String),

    /// Workflow execution failed with the given reason.
    #[error("execution failed: {0}")]
    Failed(String),

    /// An activity exhausted its retry budget or failed with a permanent
    /// (business) error.
    #[error("activity {activity} failed permanently on attempt {attempt}: {reason}")]
    ActivityFailed {
        activity: String,
        attempt: u32,
        reason: String,
    },

    /// A child workflow reached a terminal failure.
    #[error("child workflow {workflow_type} failed: {reason}")]
    ChildFailed {
        workflow_type: String,
        reason: String,
    },

    /// A wait point's deadline fired before its signal arrived. Mapped to
    /// the `TimedOut` terminal status, distinct from activity failure.
    #[error("deadline '{wait}' elapsed before a signal arrived")]
    DeadlineElapsed { wait: String },

    /// The instance was canceled from outside.
    #[error("instance canceled: {0}")]
    Canceled(String),

    /// The engine is shutting down; the instance stays incomplete and will
    /// be resumed by recovery.
    #[error("engine shutting down")]
    ShuttingDown,

    /// The workflow body diverged from its persisted history: the code asked
    /// for a different step than the one replay found. This is a deployment
    /// error, not a runtime condition.
    #[error("replay diverged from history: {0}")]
    Nondeterminism(String),

    /// The workflow type is not present in the registry.
    #[error("unknown workflow type: {0}")]
    UnknownWorkflowType(String),
}

// Manual From implementations to convert nested errors to strings
impl From<StorageError> for ExecutionError {
    fn from(e: StorageError) -> Self {
        ExecutionError::Storage(e.to_string())
    }
}

impl From<CoreError> for ExecutionError {
    fn from(e: CoreError) -> Self {
        ExecutionError::Core(e.to_string())
    }
}

impl From<String> for ExecutionError {
    fn from(s: String) -> Self {
        ExecutionError::Failed(s)
    }
}

pub type Result<T> = std::result::Result<T, ExecutionError>;

// =============================================================================
// RETRYABLE ERROR TRAIT
// =============================================================================

/// Trait for error types to specify whether they should trigger a retry.
///
/// Implement this trait on your error types to get fine-grained control over
/// which errors are retried vs. treated as permanent failures.
///
/// # Example
///
/// ```
/// use telos::executor::Retryable;
///
/// #[derive(Debug)]
/// enum PaymentError {
///     // Transient errors - should retry
///     NetworkTimeout,
///     ServiceUnavailable,
///     RateLimited,
///
///     // Permanent errors - should NOT retry
///     InsufficientFunds,
///     InvalidCard,
///     FraudDetected,
/// }
///
/// impl Retryable for PaymentError {
///     fn is_retryable(&self) -> bool {
///         matches!(self,
///             PaymentError::NetworkTimeout |
///             PaymentError::ServiceUnavailable |
///             PaymentError::RateLimited
///         )
///     }
/// }
/// ```
///
/// The classification lives with the error type, not scattered across call
/// sites: the retry policy evaluator consults it through
/// [`RetryPolicy::decide`](crate::core::RetryPolicy::decide).
pub trait Retryable {
    /// Returns true if this error is transient and the operation should be
    /// retried.
    ///
    /// - `true`: transient (network timeout, service unavailable). Another
    ///   attempt may be scheduled, subject to the retry policy's budget.
    /// - `false`: permanent (invalid input, not found, business rule
    ///   violation). Retries are short-circuited and the failure escalates.
    fn is_retryable(&self) -> bool;
}

// Implement Retryable for common error types

impl Retryable for std::io::Error {
    fn is_retryable(&self) -> bool {
        use std::io::ErrorKind;
        matches!(
            self.kind(),
            ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::NotConnected
                | ErrorKind::TimedOut
                | ErrorKind::Interrupted
                | ErrorKind::WouldBlock
        )
    }
}

impl<T: Retryable> Retryable for Box<T> {
    fn is_retryable(&self) -> bool {
        (**self).is_retryable()
    }
}

impl<T: Retryable> Retryable for std::sync::Arc<T> {
    fn is_retryable(&self) -> bool {
        (**self).is_retryable()
    }
}

/// ExecutionError distinguishes transient infrastructure errors (retryable)
/// from permanent orchestration errors (non-retryable).
impl Retryable for ExecutionError {
    fn is_retryable(&self) -> bool {
        match self {
            // Infrastructure errors - transient, should retry
            ExecutionError::Storage(_) => true,
            ExecutionError::Core(_) => true,
            ExecutionError::Failed(_) => true,

            // Everything else is a settled outcome - should NOT retry
            ExecutionError::ActivityFailed { .. } => false,
            ExecutionError::ChildFailed { .. } => false,
            ExecutionError::DeadlineElapsed { .. } => false,
            ExecutionError::Canceled(_) => false,
            ExecutionError::ShuttingDown => false,
            ExecutionError::Nondeterminism(_) => false,
            ExecutionError::UnknownWorkflowType(_) => false,
        }
    }
}
