use serde::{Deserialize, Serialize};

/// Normalized payment state every adapter maps its provider's vocabulary
/// into. The orchestration core branches on this and never on provider
/// identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Checkout created or verification not yet conclusive.
    Pending,
    Succeeded,
    Failed,
}

/// Provider-agnostic checkout request.
///
/// Amounts are integer minor-currency units (cents), never floating point:
/// money must not accumulate rounding drift across retries and replays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    /// Amount in minor units of `currency` (e.g. cents).
    pub amount_minor: i64,
    /// ISO 4217 code, e.g. "ZAR".
    pub currency: String,
    /// Idempotency reference for this checkout attempt. Reusing the same
    /// reference must not create a second checkout session.
    pub reference: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    /// Human-readable line item shown on the provider's checkout page.
    pub description: String,
    /// Provider-specific metadata passed through verbatim.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl PaymentRequest {
    /// Major-unit decimal string ("149.50") for providers that refuse minor
    /// units. Pure integer arithmetic.
    pub fn amount_decimal(&self) -> String {
        format!("{}.{:02}", self.amount_minor / 100, (self.amount_minor % 100).abs())
    }
}

/// Normalized provider response, immutable once the provider has answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentResult {
    pub status: PaymentStatus,
    /// Adapter name that produced this result.
    pub provider: String,
    /// Provider's transaction identifier (or our reference where the
    /// provider echoes it back).
    pub provider_txn_id: String,
    /// Where to send the payer, present on freshly created checkouts.
    pub checkout_url: Option<String>,
    pub failure_reason: Option<String>,
    /// Raw provider payload, retained for audit.
    pub raw: serde_json::Value,
}

/// Verdict on an inbound webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookValidation {
    Accepted,
    Rejected(String),
}

impl WebhookValidation {
    pub fn is_accepted(&self) -> bool {
        matches!(self, WebhookValidation::Accepted)
    }
}
