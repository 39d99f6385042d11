use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Input starting a filing instance. Produced by the inbound gateway from a
/// normalized user conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilingRequest {
    /// Where notices go (phone number in the production deployment).
    pub user_contact: String,
    /// Company registration number, e.g. "2019/123456/07".
    pub company_reg_num: String,
    /// Service being filed, e.g. "annual_return".
    pub service_type: String,
    /// Document URLs uploaded by the user.
    pub documents: Vec<String>,
    /// Payment provider name the user paid through.
    pub payment_provider: String,
    /// Provider transaction id (or reference) for the checkout to verify.
    pub payment_txn_id: String,
}

/// Confirmation of a settled payment, normalized away from the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentVerified {
    pub provider: String,
    pub provider_txn_id: String,
}

/// Structured fields pulled out of the uploaded documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedData {
    pub fields: BTreeMap<String, String>,
}

/// Result of the compliance check child workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceStatus {
    pub in_good_standing: bool,
    pub detail: String,
}

/// Everything the submission needs in one payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionInput {
    pub company_reg_num: String,
    pub service_type: String,
    pub extracted: ExtractedData,
    /// User-entered one-time passcode, forwarded verbatim.
    pub otp: String,
}

/// Terminal success payload of a filing instance.
///
/// `reference` is an opaque string issued by the submission collaborator;
/// nothing here parses or assumes its structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilingReceipt {
    pub reference: String,
}

/// Handed to the operations channel when an instance fails unrecoverably.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationNotice {
    pub instance_id: Uuid,
    pub company_reg_num: String,
    pub reason: String,
}
