//! Capability interfaces the filing activities depend on.
//!
//! These are boundaries, not implementations: the outbound message sender,
//! the keyed record store, document extraction, the submission channel, and
//! the operations escalation sink all live outside this crate. Activities
//! hold them as trait objects so deployments (and tests) wire in whatever
//! they have.

use super::types::{EscalationNotice, ExtractedData};
use crate::executor::ActivityError;
use async_trait::async_trait;

/// Outbound notification sender: deliver a text to a recipient.
///
/// Failures are the caller's to interpret: for best-effort notices they are
/// logged and swallowed, for the timeout notice they fail the activity.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipient: &str, body: &str) -> Result<(), ActivityError>;
}

/// Simple keyed counter store (the persistent record collaborator).
///
/// The engine treats this as an opaque activity dependency; it is not part
/// of workflow state.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Increment the named counter and return its new value.
    async fn increment(&self, key: &str) -> Result<i64, ActivityError>;

    /// Read the named counter, if it exists.
    async fn read(&self, key: &str) -> Result<Option<i64>, ActivityError>;
}

/// Pulls structured fields out of uploaded documents.
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(&self, documents: &[String]) -> Result<ExtractedData, ActivityError>;
}

/// Submits a filing to the registrar and returns its reference.
#[async_trait]
pub trait FilingSubmitter: Send + Sync {
    /// `idempotency_key` identifies the logical attempt; submitting the same
    /// key twice must not file twice.
    async fn submit(
        &self,
        idempotency_key: &str,
        company_reg_num: &str,
        service_type: &str,
        extracted: &ExtractedData,
        otp: &str,
    ) -> Result<String, ActivityError>;
}

/// Looks up a company's standing with the registrar.
#[async_trait]
pub trait ComplianceChecker: Send + Sync {
    async fn check(&self, company_reg_num: &str) -> Result<super::types::ComplianceStatus, ActivityError>;
}

/// Hands unrecoverable failures to a human/operations process.
#[async_trait]
pub trait EscalationSink: Send + Sync {
    async fn escalate(&self, notice: &EscalationNotice) -> Result<(), ActivityError>;
}
