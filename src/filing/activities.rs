//! Activities of the filing process.
//!
//! Each activity wraps exactly one collaborator call and owns its retry
//! classification: provider/transport trouble is transient, explicit
//! rejections are permanent. Long-running activities heartbeat and honor
//! cooperative cancellation.

use super::collaborators::{
    ComplianceChecker, DocumentExtractor, EscalationSink, FilingSubmitter, Notifier, RecordStore,
};
use super::types::{
    ComplianceStatus, EscalationNotice, ExtractedData, FilingReceipt, PaymentVerified,
    SubmissionInput,
};
use crate::core::RetryPolicy;
use crate::executor::{Activity, ActivityContext, ActivityError};
use crate::payment::{PaymentStatus, ProviderRegistry};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Counter key for successfully submitted filings.
const FILINGS_SUBMITTED_KEY: &str = "filings_submitted";

// =============================================================================
// verify_payment
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyPaymentInput {
    pub provider: String,
    pub provider_txn_id: String,
}

/// Confirms the user's checkout actually settled, via the named provider
/// adapter. A still-pending payment is a transient failure so the retry
/// policy keeps polling; a failed payment is a business rejection.
pub struct VerifyPaymentActivity {
    pub providers: ProviderRegistry,
}

#[async_trait]
impl Activity for VerifyPaymentActivity {
    type Input = VerifyPaymentInput;
    type Output = PaymentVerified;

    const NAME: &'static str = "verify_payment";

    fn retry_policy(&self) -> RetryPolicy {
        // Settlement can lag the redirect by a few seconds.
        RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: VerifyPaymentInput,
    ) -> Result<PaymentVerified, ActivityError> {
        let Some(adapter) = self.providers.get(&input.provider) else {
            return Err(ActivityError::Rejected(format!(
                "unknown payment provider: {}",
                input.provider
            )));
        };

        let result = adapter.verify(&input.provider_txn_id).await?;
        ctx.heartbeat();

        match result.status {
            PaymentStatus::Succeeded => {
                info!(
                    provider = %result.provider,
                    txn = %result.provider_txn_id,
                    "payment verified"
                );
                Ok(PaymentVerified {
                    provider: result.provider,
                    provider_txn_id: result.provider_txn_id,
                })
            }
            PaymentStatus::Failed => Err(ActivityError::Rejected(
                result
                    .failure_reason
                    .unwrap_or_else(|| "payment failed".to_string()),
            )),
            PaymentStatus::Pending => Err(ActivityError::Transient(
                "payment not settled yet".to_string(),
            )),
        }
    }
}

// =============================================================================
// extract_data
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractInput {
    pub documents: Vec<String>,
}

/// Runs document extraction over the uploaded files.
pub struct ExtractDataActivity {
    pub extractor: Arc<dyn DocumentExtractor>,
}

#[async_trait]
impl Activity for ExtractDataActivity {
    type Input = ExtractInput;
    type Output = ExtractedData;

    const NAME: &'static str = "extract_data";

    fn timeout(&self) -> Duration {
        Duration::from_secs(300)
    }

    fn heartbeat_timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(30))
    }

    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: ExtractInput,
    ) -> Result<ExtractedData, ActivityError> {
        if ctx.is_canceled() {
            return Err(ActivityError::Canceled);
        }
        ctx.heartbeat();
        let extracted = self.extractor.extract(&input.documents).await?;
        ctx.heartbeat();
        debug!(fields = extracted.fields.len(), "document extraction finished");
        Ok(extracted)
    }
}

// =============================================================================
// check_compliance
// =============================================================================

/// Looks up the company's standing with the registrar. Runs inside the
/// compliance check child workflow.
pub struct CheckComplianceActivity {
    pub checker: Arc<dyn ComplianceChecker>,
}

#[async_trait]
impl Activity for CheckComplianceActivity {
    type Input = String;
    type Output = ComplianceStatus;

    const NAME: &'static str = "check_compliance";

    fn timeout(&self) -> Duration {
        Duration::from_secs(60)
    }

    async fn execute(
        &self,
        ctx: &ActivityContext,
        company_reg_num: String,
    ) -> Result<ComplianceStatus, ActivityError> {
        ctx.heartbeat();
        self.checker.check(&company_reg_num).await
    }
}

// =============================================================================
// submit_filing
// =============================================================================

/// Submits the filing through the registrar channel.
///
/// The submission carries the attempt's idempotency key, so a crash-forced
/// re-invocation of the same attempt cannot file twice. The returned
/// reference is opaque.
pub struct SubmitFilingActivity {
    pub submitter: Arc<dyn FilingSubmitter>,
    pub records: Arc<dyn RecordStore>,
}

#[async_trait]
impl Activity for SubmitFilingActivity {
    type Input = SubmissionInput;
    type Output = FilingReceipt;

    const NAME: &'static str = "submit_filing";

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::STANDARD
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(300)
    }

    fn heartbeat_timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(30))
    }

    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: SubmissionInput,
    ) -> Result<FilingReceipt, ActivityError> {
        if ctx.is_canceled() {
            return Err(ActivityError::Canceled);
        }
        ctx.heartbeat();

        let reference = self
            .submitter
            .submit(
                &ctx.idempotency_key(),
                &input.company_reg_num,
                &input.service_type,
                &input.extracted,
                &input.otp,
            )
            .await?;
        ctx.heartbeat();

        let total = self.records.increment(FILINGS_SUBMITTED_KEY).await?;
        info!(
            company = %input.company_reg_num,
            reference = %reference,
            total_filings = total,
            "filing submitted"
        );

        Ok(FilingReceipt { reference })
    }
}

// =============================================================================
// Notices
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutNotice {
    pub recipient: String,
    pub company_reg_num: String,
}

/// Tells the user their passcode window lapsed and what to do next. This is
/// the one notification whose failure matters: it IS the required outcome of
/// the timed-out path.
pub struct SendTimeoutNoticeActivity {
    pub notifier: Arc<dyn Notifier>,
}

#[async_trait]
impl Activity for SendTimeoutNoticeActivity {
    type Input = TimeoutNotice;
    type Output = ();

    const NAME: &'static str = "send_timeout_notice";

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::STANDARD
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        notice: TimeoutNotice,
    ) -> Result<(), ActivityError> {
        let body = format!(
            "We did not receive your one-time pin in time, so the filing for {} was paused. \
             Reply START to begin again.",
            notice.company_reg_num
        );
        self.notifier.send(&notice.recipient, &body).await
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeNotice {
    pub recipient: String,
    pub body: String,
}

/// Best-effort outcome message. Bounded retry; the workflow logs and moves
/// on if it still fails, never an untracked background send.
pub struct NotifyOutcomeActivity {
    pub notifier: Arc<dyn Notifier>,
}

#[async_trait]
impl Activity for NotifyOutcomeActivity {
    type Input = OutcomeNotice;
    type Output = ();

    const NAME: &'static str = "notify_outcome";

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_max_attempts(2)
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        notice: OutcomeNotice,
    ) -> Result<(), ActivityError> {
        self.notifier.send(&notice.recipient, &notice.body).await
    }
}

// =============================================================================
// escalate_failure
// =============================================================================

/// Hands an unrecoverable failure to the operations channel, carrying the
/// instance id and the original failure reason.
pub struct EscalateFailureActivity {
    pub sink: Arc<dyn EscalationSink>,
}

#[async_trait]
impl Activity for EscalateFailureActivity {
    type Input = EscalationNotice;
    type Output = ();

    const NAME: &'static str = "escalate_failure";

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::STANDARD
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        notice: EscalationNotice,
    ) -> Result<(), ActivityError> {
        self.sink.escalate(&notice).await
    }
}
