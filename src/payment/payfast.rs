//! PayFast adapter: form-redirect checkout with an MD5 field signature.
//!
//! PayFast has no checkout REST call. The merchant builds a signed form,
//! redirects the payer to the process endpoint, and learns the outcome from
//! the ITN webhook. The signature scheme is the provider's, not ours:
//! fields sorted lexicographically, concatenated as `key=value&` with the
//! trailing separator stripped, optional `&passphrase=…` appended, MD5 hex
//! digest of the result.

use super::error::{PaymentError, Result};
use super::types::{PaymentRequest, PaymentResult, PaymentStatus, WebhookValidation};
use super::PaymentProvider;
use async_trait::async_trait;
use md5::{Digest, Md5};
use std::collections::BTreeMap;
use std::net::IpAddr;
use tracing::debug;

const DEFAULT_PROCESS_URL: &str = "https://www.payfast.co.za/eng/process";

/// Merchant credentials and redirect endpoints.
#[derive(Debug, Clone)]
pub struct PayFastConfig {
    pub merchant_id: String,
    pub merchant_key: String,
    /// Optional shared passphrase appended to the signature base.
    pub passphrase: Option<String>,
    pub return_url: String,
    pub cancel_url: String,
    pub notify_url: String,
    /// Checkout process endpoint; overridable for the sandbox.
    pub process_url: String,
}

impl PayFastConfig {
    pub fn new(merchant_id: impl Into<String>, merchant_key: impl Into<String>) -> Self {
        Self {
            merchant_id: merchant_id.into(),
            merchant_key: merchant_key.into(),
            passphrase: None,
            return_url: String::new(),
            cancel_url: String::new(),
            notify_url: String::new(),
            process_url: DEFAULT_PROCESS_URL.to_string(),
        }
    }
}

pub struct PayFast {
    config: PayFastConfig,
}

impl PayFast {
    pub fn new(config: PayFastConfig) -> Self {
        Self { config }
    }

    /// MD5 digest over the sorted `key=value&` concatenation, trailing
    /// separator stripped, optional passphrase appended URL-encoded.
    fn sign(&self, fields: &BTreeMap<String, String>) -> String {
        let mut base = String::new();
        for (key, value) in fields {
            base.push_str(key);
            base.push('=');
            base.push_str(value);
            base.push('&');
        }
        base.pop(); // trailing '&'

        if let Some(passphrase) = &self.config.passphrase {
            base.push_str("&passphrase=");
            base.push_str(&urlencode(passphrase));
        }

        hex::encode(Md5::digest(base.as_bytes()))
    }

    fn checkout_fields(&self, request: &PaymentRequest) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        let mut put = |key: &str, value: &str| {
            // PayFast rejects empty fields; they are omitted, not blanked.
            if !value.is_empty() {
                fields.insert(key.to_string(), value.to_string());
            }
        };

        put("merchant_id", &self.config.merchant_id);
        put("merchant_key", &self.config.merchant_key);
        put("return_url", &self.config.return_url);
        put("cancel_url", &self.config.cancel_url);
        put("notify_url", &self.config.notify_url);
        put("email_address", &request.customer_email);
        if let Some(phone) = &request.customer_phone {
            put("cell_number", phone);
        }
        put("m_payment_id", &request.reference);
        put("amount", &request.amount_decimal());
        put("item_name", &request.description);

        fields
    }
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[async_trait]
impl PaymentProvider for PayFast {
    fn name(&self) -> &'static str {
        "payfast"
    }

    /// Builds the signed redirect. No network call: the "checkout" is the
    /// URL itself, so this is idempotent by construction: the same request
    /// always yields the same URL.
    async fn create_checkout(&self, request: &PaymentRequest) -> Result<PaymentResult> {
        let mut fields = self.checkout_fields(request);
        let signature = self.sign(&fields);
        fields.insert("signature".to_string(), signature);

        let mut query = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in &fields {
            query.append_pair(key, value);
        }
        let checkout_url = format!("{}?{}", self.config.process_url, query.finish());

        debug!(reference = %request.reference, "built payfast checkout redirect");

        Ok(PaymentResult {
            status: PaymentStatus::Pending,
            provider: "payfast".to_string(),
            provider_txn_id: request.reference.clone(),
            checkout_url: Some(checkout_url),
            failure_reason: None,
            raw: serde_json::to_value(&fields)
                .map_err(|e| PaymentError::Malformed(e.to_string()))?,
        })
    }

    /// PayFast offers no transaction lookup API; settlement state arrives
    /// only through the ITN webhook. Claiming otherwise would be a lie, so
    /// this is a permanent error.
    async fn verify(&self, _provider_txn_id: &str) -> Result<PaymentResult> {
        Err(PaymentError::VerificationUnsupported("payfast"))
    }

    /// Validates an ITN post by recomputing the field signature over the
    /// received form body (minus the `signature` field itself).
    fn validate_webhook(
        &self,
        raw_body: &[u8],
        _signature_header: Option<&str>,
        _remote_addr: Option<IpAddr>,
    ) -> WebhookValidation {
        let mut fields = BTreeMap::new();
        let mut received_signature = None;
        for (key, value) in url::form_urlencoded::parse(raw_body) {
            if key == "signature" {
                received_signature = Some(value.into_owned());
            } else {
                fields.insert(key.into_owned(), value.into_owned());
            }
        }

        let Some(received) = received_signature else {
            return WebhookValidation::Rejected("missing signature field".to_string());
        };
        if fields.is_empty() {
            return WebhookValidation::Rejected("empty notification body".to_string());
        }

        let expected = self.sign(&fields);
        if expected == received {
            WebhookValidation::Accepted
        } else {
            WebhookValidation::Rejected("signature mismatch".to_string())
        }
    }
}
