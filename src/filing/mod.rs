//! The concrete filing process built on the orchestration engine.
//!
//! A filing instance survives process restarts, waits (bounded) for the
//! user's one-time pin, retries payment and submission hiccups with
//! backoff, and escalates unrecoverable failures to an operations channel.
//! The engine does the surviving; this module supplies the steps.

mod activities;
mod collaborators;
mod types;
mod workflow;

pub use activities::{
    CheckComplianceActivity, EscalateFailureActivity, ExtractDataActivity, ExtractInput,
    NotifyOutcomeActivity, OutcomeNotice, SendTimeoutNoticeActivity, SubmitFilingActivity,
    TimeoutNotice, VerifyPaymentActivity, VerifyPaymentInput,
};
pub use collaborators::{
    ComplianceChecker, DocumentExtractor, EscalationSink, FilingSubmitter, Notifier, RecordStore,
};
pub use types::{
    ComplianceStatus, EscalationNotice, ExtractedData, FilingReceipt, FilingRequest,
    PaymentVerified, SubmissionInput,
};
pub use workflow::{
    ComplianceCheckWorkflow, FilingDeps, FilingWorkflow, DEFAULT_OTP_DEADLINE, OTP_SIGNAL,
};
