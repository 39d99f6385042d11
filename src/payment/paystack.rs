//! Paystack adapter: bearer-token REST with HMAC-SHA512 signed webhooks.

use super::error::{PaymentError, Result};
use super::types::{PaymentRequest, PaymentResult, PaymentStatus, WebhookValidation};
use super::PaymentProvider;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha512;
use std::net::IpAddr;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.paystack.co";

type HmacSha512 = Hmac<Sha512>;

#[derive(Debug, Clone)]
pub struct PaystackConfig {
    pub secret_key: String,
    /// Where the payer lands after checkout.
    pub callback_url: String,
    /// API base; overridable for tests and mocks.
    pub base_url: String,
}

impl PaystackConfig {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            callback_url: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

pub struct Paystack {
    config: PaystackConfig,
    http: reqwest::Client,
}

impl Paystack {
    pub fn new(config: PaystackConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let response = self
            .http
            .get(format!("{}{}", self.config.base_url, path))
            .bearer_auth(&self.config.secret_key)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(PaymentError::Api { status, body });
        }
        serde_json::from_str(&body).map_err(|e| PaymentError::Malformed(e.to_string()))
    }

    async fn post_json(&self, path: &str, payload: &Value) -> Result<Value> {
        let response = self
            .http
            .post(format!("{}{}", self.config.base_url, path))
            .bearer_auth(&self.config.secret_key)
            .json(payload)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(PaymentError::Api { status, body });
        }
        serde_json::from_str(&body).map_err(|e| PaymentError::Malformed(e.to_string()))
    }
}

/// Normalize `GET /transaction/verify/{reference}` into the shared result.
/// Split out so the mapping is testable without a live endpoint.
fn normalize_verify(raw: Value) -> Result<PaymentResult> {
    let data = raw
        .get("data")
        .and_then(Value::as_object)
        .ok_or_else(|| PaymentError::Malformed("verify response missing data".to_string()))?;

    let provider_status = data.get("status").and_then(Value::as_str).unwrap_or("");
    let status = match provider_status {
        "success" => PaymentStatus::Succeeded,
        "failed" | "abandoned" | "reversed" => PaymentStatus::Failed,
        _ => PaymentStatus::Pending,
    };

    let reference = data
        .get("reference")
        .and_then(Value::as_str)
        .ok_or_else(|| PaymentError::Malformed("verify response missing reference".to_string()))?
        .to_string();

    let failure_reason = if status == PaymentStatus::Failed {
        data.get("gateway_response")
            .and_then(Value::as_str)
            .map(str::to_string)
    } else {
        None
    };

    Ok(PaymentResult {
        status,
        provider: "paystack".to_string(),
        provider_txn_id: reference,
        checkout_url: None,
        failure_reason,
        raw,
    })
}

#[async_trait]
impl PaymentProvider for Paystack {
    fn name(&self) -> &'static str {
        "paystack"
    }

    async fn create_checkout(&self, request: &PaymentRequest) -> Result<PaymentResult> {
        debug!(reference = %request.reference, "initializing paystack transaction");

        let payload = json!({
            "email": request.customer_email,
            // Paystack takes the amount in minor units (kobo/cents).
            "amount": request.amount_minor,
            "currency": request.currency,
            "reference": request.reference,
            "callback_url": self.config.callback_url,
            "metadata": request.metadata,
        });

        let raw = self.post_json("/transaction/initialize", &payload).await?;

        if !raw.get("status").and_then(Value::as_bool).unwrap_or(false) {
            let message = raw
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("initialization refused")
                .to_string();
            return Err(PaymentError::Rejected(message));
        }

        let data = raw
            .get("data")
            .and_then(Value::as_object)
            .ok_or_else(|| PaymentError::Malformed("initialize response missing data".to_string()))?;
        let authorization_url = data
            .get("authorization_url")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                PaymentError::Malformed("initialize response missing authorization_url".to_string())
            })?
            .to_string();
        let reference = data
            .get("reference")
            .and_then(Value::as_str)
            .unwrap_or(&request.reference)
            .to_string();

        Ok(PaymentResult {
            status: PaymentStatus::Pending,
            provider: "paystack".to_string(),
            provider_txn_id: reference,
            checkout_url: Some(authorization_url),
            failure_reason: None,
            raw,
        })
    }

    async fn verify(&self, provider_txn_id: &str) -> Result<PaymentResult> {
        debug!(reference = provider_txn_id, "verifying paystack transaction");
        let raw = self
            .get_json(&format!("/transaction/verify/{}", provider_txn_id))
            .await?;
        normalize_verify(raw)
    }

    /// HMAC-SHA512 over the raw body against the hex signature header.
    ///
    /// The comparison goes through `Mac::verify_slice`, which is constant
    /// time; comparing hex strings with `==` would leak how many leading
    /// bytes matched.
    fn validate_webhook(
        &self,
        raw_body: &[u8],
        signature_header: Option<&str>,
        _remote_addr: Option<IpAddr>,
    ) -> WebhookValidation {
        let Some(header) = signature_header else {
            return WebhookValidation::Rejected("missing signature header".to_string());
        };
        let Ok(signature) = hex::decode(header.trim()) else {
            return WebhookValidation::Rejected("signature header is not hex".to_string());
        };

        let mut mac = HmacSha512::new_from_slice(self.config.secret_key.as_bytes())
            .expect("hmac accepts keys of any length");
        mac.update(raw_body);

        match mac.verify_slice(&signature) {
            Ok(()) => WebhookValidation::Accepted,
            Err(_) => WebhookValidation::Rejected("signature mismatch".to_string()),
        }
    }
}
