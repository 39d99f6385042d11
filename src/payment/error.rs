use crate::executor::{ActivityError, Retryable};
use thiserror::Error;

/// Payment layer error type.
///
/// Variants carry their retry classification: transport trouble and 5xx
/// responses are transient, explicit rejections and malformed payloads are
/// permanent. Activities built on this layer inherit the classification
/// through the [`Retryable`] impl.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PaymentError {
    /// Could not reach the provider (DNS, TLS, connect, body read).
    #[error("provider transport error")]
    Transport(#[from] reqwest::Error),

    /// The provider answered with a non-success HTTP status.
    #[error("provider returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    /// The provider explicitly declined the request. Never retried.
    #[error("payment rejected: {0}")]
    Rejected(String),

    /// The provider's response did not have the documented shape.
    #[error("malformed provider response: {0}")]
    Malformed(String),

    /// This provider offers no server-side verification API.
    #[error("verification not supported by {0}")]
    VerificationUnsupported(&'static str),
}

impl Retryable for PaymentError {
    fn is_retryable(&self) -> bool {
        match self {
            PaymentError::Transport(_) => true,
            // 5xx and throttling are the provider's problem; 4xx is ours.
            PaymentError::Api { status, .. } => *status >= 500 || *status == 429,
            PaymentError::Rejected(_) => false,
            PaymentError::Malformed(_) => false,
            PaymentError::VerificationUnsupported(_) => false,
        }
    }
}

impl From<PaymentError> for ActivityError {
    fn from(e: PaymentError) -> Self {
        if e.is_retryable() {
            ActivityError::Transient(e.to_string())
        } else {
            ActivityError::Rejected(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;
