//! The filing process state machine.
//!
//! `ValidatingPayment → ExtractingData → AwaitingOTP → Submitting →
//! Completed`, with failure edges from every state to `Failed` (plus one
//! escalation), and a `TimedOut` edge from `AwaitingOTP` when the deadline
//! beats the signal (plus one timeout notice instead of submission).

use super::activities::{
    CheckComplianceActivity, EscalateFailureActivity, ExtractDataActivity, ExtractInput,
    NotifyOutcomeActivity, OutcomeNotice, SendTimeoutNoticeActivity, SubmitFilingActivity,
    TimeoutNotice, VerifyPaymentActivity, VerifyPaymentInput,
};
use super::collaborators::{
    ComplianceChecker, DocumentExtractor, EscalationSink, FilingSubmitter, Notifier, RecordStore,
};
use super::types::{ComplianceStatus, EscalationNotice, FilingReceipt, FilingRequest, SubmissionInput};
use crate::core::deserialize_value;
use crate::executor::{
    ExecutionError, Result, WaitOutcome, Workflow, WorkflowContext,
};
use crate::payment::ProviderRegistry;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Signal name the gateway delivers the user's passcode under.
pub const OTP_SIGNAL: &str = "otp";

/// Default window for the user to supply their passcode.
pub const DEFAULT_OTP_DEADLINE: Duration = Duration::from_secs(600);

/// Everything the filing workflows need from the outside world.
#[derive(Clone)]
pub struct FilingDeps {
    pub providers: ProviderRegistry,
    pub extractor: Arc<dyn DocumentExtractor>,
    pub submitter: Arc<dyn FilingSubmitter>,
    pub records: Arc<dyn RecordStore>,
    pub notifier: Arc<dyn Notifier>,
    pub checker: Arc<dyn ComplianceChecker>,
    pub escalations: Arc<dyn EscalationSink>,
}

/// The main filing workflow.
pub struct FilingWorkflow {
    verify_payment: VerifyPaymentActivity,
    extract_data: ExtractDataActivity,
    submit_filing: SubmitFilingActivity,
    send_timeout_notice: SendTimeoutNoticeActivity,
    notify_outcome: NotifyOutcomeActivity,
    escalate_failure: EscalateFailureActivity,
    otp_deadline: Duration,
}

impl FilingWorkflow {
    pub fn new(deps: &FilingDeps) -> Self {
        Self {
            verify_payment: VerifyPaymentActivity {
                providers: deps.providers.clone(),
            },
            extract_data: ExtractDataActivity {
                extractor: Arc::clone(&deps.extractor),
            },
            submit_filing: SubmitFilingActivity {
                submitter: Arc::clone(&deps.submitter),
                records: Arc::clone(&deps.records),
            },
            send_timeout_notice: SendTimeoutNoticeActivity {
                notifier: Arc::clone(&deps.notifier),
            },
            notify_outcome: NotifyOutcomeActivity {
                notifier: Arc::clone(&deps.notifier),
            },
            escalate_failure: EscalateFailureActivity {
                sink: Arc::clone(&deps.escalations),
            },
            otp_deadline: DEFAULT_OTP_DEADLINE,
        }
    }

    /// Override the OTP window (tests use short ones).
    pub fn with_otp_deadline(mut self, deadline: Duration) -> Self {
        self.otp_deadline = deadline;
        self
    }

    /// Failures that warrant a human: settled business outcomes, not
    /// infrastructure hiccups (those keep the instance incomplete and are
    /// invisible to the user) and not timeouts (those have their own
    /// notice).
    fn should_escalate(error: &ExecutionError) -> bool {
        matches!(
            error,
            ExecutionError::ActivityFailed { .. } | ExecutionError::ChildFailed { .. }
        )
    }

    async fn file(&self, ctx: &WorkflowContext, input: &FilingRequest) -> Result<FilingReceipt> {
        // ValidatingPayment
        let _payment = ctx
            .execute(
                &self.verify_payment,
                VerifyPaymentInput {
                    provider: input.payment_provider.clone(),
                    provider_txn_id: input.payment_txn_id.clone(),
                },
            )
            .await?;

        // Registrar standing as a child workflow; advisory, not gating.
        if !input.company_reg_num.is_empty() {
            let compliance: ComplianceStatus = ctx
                .child::<ComplianceCheckWorkflow>(&input.company_reg_num)
                .await?;
            if !compliance.in_good_standing {
                warn!(
                    company = %input.company_reg_num,
                    "company not in good standing: {}", compliance.detail
                );
            }
        }

        // ExtractingData
        let extracted = ctx
            .execute(
                &self.extract_data,
                ExtractInput {
                    documents: input.documents.clone(),
                },
            )
            .await?;

        // AwaitingOTP: first of {signal "otp", deadline} wins, the loser is
        // canceled with the wait registration.
        let otp: String = match ctx.wait_signal(OTP_SIGNAL, self.otp_deadline).await? {
            WaitOutcome::Signal(payload) => deserialize_value(&payload)?,
            WaitOutcome::Deadline => {
                // Exactly one timeout notice instead of Submitting.
                if let Err(e) = ctx
                    .execute(
                        &self.send_timeout_notice,
                        TimeoutNotice {
                            recipient: input.user_contact.clone(),
                            company_reg_num: input.company_reg_num.clone(),
                        },
                    )
                    .await
                {
                    error!("timeout notice failed: {}", e);
                }
                return Err(ExecutionError::DeadlineElapsed {
                    wait: OTP_SIGNAL.to_string(),
                });
            }
        };

        // Submitting
        let receipt = ctx
            .execute(
                &self.submit_filing,
                SubmissionInput {
                    company_reg_num: input.company_reg_num.clone(),
                    service_type: input.service_type.clone(),
                    extracted,
                    otp,
                },
            )
            .await?;

        // Best-effort completion notice; bounded retry, never fatal.
        if let Err(e) = ctx
            .execute(
                &self.notify_outcome,
                OutcomeNotice {
                    recipient: input.user_contact.clone(),
                    body: format!(
                        "Your {} filing for {} is complete. Reference: {}",
                        input.service_type, input.company_reg_num, receipt.reference
                    ),
                },
            )
            .await
        {
            warn!("completion notice failed: {}", e);
        }

        Ok(receipt)
    }
}

#[async_trait]
impl Workflow for FilingWorkflow {
    type Input = FilingRequest;
    type Output = FilingReceipt;

    const TYPE: &'static str = "filing";

    async fn run(&self, ctx: &WorkflowContext, input: FilingRequest) -> Result<FilingReceipt> {
        match self.file(ctx, &input).await {
            Ok(receipt) => Ok(receipt),
            Err(e) if Self::should_escalate(&e) => {
                let notice = EscalationNotice {
                    instance_id: ctx.instance_id(),
                    company_reg_num: input.company_reg_num.clone(),
                    reason: e.to_string(),
                };
                if let Err(escalation_error) = ctx.execute(&self.escalate_failure, notice).await {
                    error!("escalation failed: {}", escalation_error);
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

/// Compliance lookup as a child workflow, so the parent survives a crash
/// mid-check without repeating it and other workflow types can reuse it.
pub struct ComplianceCheckWorkflow {
    check: CheckComplianceActivity,
}

impl ComplianceCheckWorkflow {
    pub fn new(deps: &FilingDeps) -> Self {
        Self {
            check: CheckComplianceActivity {
                checker: Arc::clone(&deps.checker),
            },
        }
    }
}

#[async_trait]
impl Workflow for ComplianceCheckWorkflow {
    type Input = String;
    type Output = ComplianceStatus;

    const TYPE: &'static str = "compliance_check";

    async fn run(&self, ctx: &WorkflowContext, company_reg_num: String) -> Result<ComplianceStatus> {
        ctx.execute(&self.check, company_reg_num).await
    }
}
