//! Yoco adapter: bearer-token REST checkout with unsigned webhooks.

use super::error::{PaymentError, Result};
use super::types::{PaymentRequest, PaymentResult, PaymentStatus, WebhookValidation};
use super::PaymentProvider;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::net::IpAddr;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://online.yoco.com/v1";

#[derive(Debug, Clone)]
pub struct YocoConfig {
    pub secret_key: String,
    pub success_url: String,
    pub cancel_url: String,
    pub failure_url: String,
    /// API base; overridable for tests and mocks.
    pub base_url: String,
    /// Source addresses allowed to post webhooks. Empty means transport
    /// trust only.
    pub webhook_allowlist: Vec<IpAddr>,
}

impl YocoConfig {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            success_url: String::new(),
            cancel_url: String::new(),
            failure_url: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            webhook_allowlist: Vec::new(),
        }
    }
}

pub struct Yoco {
    config: YocoConfig,
    http: reqwest::Client,
}

impl Yoco {
    pub fn new(config: YocoConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }
}

/// Normalize `GET /charges/{id}` into the shared result.
fn normalize_charge(raw: Value) -> Result<PaymentResult> {
    let id = raw
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| PaymentError::Malformed("charge response missing id".to_string()))?
        .to_string();

    let provider_status = raw.get("status").and_then(Value::as_str).unwrap_or("");
    let status = match provider_status {
        "successful" | "succeeded" => PaymentStatus::Succeeded,
        "failed" | "declined" => PaymentStatus::Failed,
        _ => PaymentStatus::Pending,
    };

    let failure_reason = raw
        .get("errorMessage")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(PaymentResult {
        status,
        provider: "yoco".to_string(),
        provider_txn_id: id,
        checkout_url: None,
        failure_reason,
        raw,
    })
}

#[async_trait]
impl PaymentProvider for Yoco {
    fn name(&self) -> &'static str {
        "yoco"
    }

    async fn create_checkout(&self, request: &PaymentRequest) -> Result<PaymentResult> {
        debug!(reference = %request.reference, "creating yoco checkout");

        let mut metadata = request.metadata.clone();
        // Yoco has no first-class reference field; it rides in metadata so
        // webhooks can be correlated back to the filing instance.
        metadata.insert("reference".to_string(), json!(request.reference));

        let payload = json!({
            "amount": request.amount_minor,
            "currency": request.currency,
            "successUrl": self.config.success_url,
            "cancelUrl": self.config.cancel_url,
            "failureUrl": self.config.failure_url,
            "metadata": metadata,
        });

        let response = self
            .http
            .post(format!("{}/checkout", self.config.base_url))
            .bearer_auth(&self.config.secret_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(PaymentError::Api { status, body });
        }
        let raw: Value =
            serde_json::from_str(&body).map_err(|e| PaymentError::Malformed(e.to_string()))?;

        let id = raw
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| PaymentError::Malformed("checkout response missing id".to_string()))?
            .to_string();
        let redirect_url = raw
            .get("redirectUrl")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                PaymentError::Malformed("checkout response missing redirectUrl".to_string())
            })?
            .to_string();

        Ok(PaymentResult {
            status: PaymentStatus::Pending,
            provider: "yoco".to_string(),
            // Yoco issues its own id; that id is the handle for verify().
            provider_txn_id: id,
            checkout_url: Some(redirect_url),
            failure_reason: None,
            raw,
        })
    }

    async fn verify(&self, provider_txn_id: &str) -> Result<PaymentResult> {
        debug!(charge = provider_txn_id, "verifying yoco charge");

        let response = self
            .http
            .get(format!("{}/charges/{}", self.config.base_url, provider_txn_id))
            .bearer_auth(&self.config.secret_key)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(PaymentError::Api { status, body });
        }
        let raw: Value =
            serde_json::from_str(&body).map_err(|e| PaymentError::Malformed(e.to_string()))?;
        normalize_charge(raw)
    }

    /// Yoco webhooks carry no signature. Authenticity rests on transport
    /// security plus the optional source-address allow-list; this adapter
    /// performs no cryptographic check and does not claim one.
    fn validate_webhook(
        &self,
        raw_body: &[u8],
        _signature_header: Option<&str>,
        remote_addr: Option<IpAddr>,
    ) -> WebhookValidation {
        if serde_json::from_slice::<Value>(raw_body).is_err() {
            return WebhookValidation::Rejected("body is not JSON".to_string());
        }

        if self.config.webhook_allowlist.is_empty() {
            warn!("accepting unsigned yoco webhook on transport trust alone");
            return WebhookValidation::Accepted;
        }

        match remote_addr {
            Some(addr) if self.config.webhook_allowlist.contains(&addr) => {
                WebhookValidation::Accepted
            }
            Some(addr) => {
                WebhookValidation::Rejected(format!("source address {} not allow-listed", addr))
            }
            None => WebhookValidation::Rejected("source address unknown".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_with_allowlist(allowlist: Vec<IpAddr>) -> Yoco {
        let mut config = YocoConfig::new("sk_test_yoco");
        config.webhook_allowlist = allowlist;
        Yoco::new(config)
    }

    #[test]
    fn test_normalize_charge_succeeded() {
        let raw = json!({
            "id": "ch_Wm2PNQGkxwySRy3ObWV51xen",
            "status": "successful",
            "amount": 19900,
            "currency": "ZAR"
        });
        let result = normalize_charge(raw).unwrap();
        assert_eq!(result.status, PaymentStatus::Succeeded);
        assert_eq!(result.provider_txn_id, "ch_Wm2PNQGkxwySRy3ObWV51xen");
    }

    #[test]
    fn test_normalize_charge_failure_carries_error_message() {
        let raw = json!({
            "id": "ch_x",
            "status": "failed",
            "errorMessage": "Card declined"
        });
        let result = normalize_charge(raw).unwrap();
        assert_eq!(result.status, PaymentStatus::Failed);
        assert_eq!(result.failure_reason.as_deref(), Some("Card declined"));
    }

    #[test]
    fn test_webhook_transport_trust_when_no_allowlist() {
        let provider = provider_with_allowlist(Vec::new());
        assert_eq!(
            provider.validate_webhook(br#"{"type":"payment.succeeded"}"#, None, None),
            WebhookValidation::Accepted
        );
    }

    #[test]
    fn test_webhook_allowlist_enforced() {
        let allowed: IpAddr = "196.10.10.1".parse().unwrap();
        let other: IpAddr = "203.0.113.9".parse().unwrap();
        let provider = provider_with_allowlist(vec![allowed]);

        let body = br#"{"type":"payment.succeeded"}"#;
        assert_eq!(
            provider.validate_webhook(body, None, Some(allowed)),
            WebhookValidation::Accepted
        );
        assert!(matches!(
            provider.validate_webhook(body, None, Some(other)),
            WebhookValidation::Rejected(_)
        ));
        assert!(matches!(
            provider.validate_webhook(body, None, None),
            WebhookValidation::Rejected(_)
        ));
    }

    #[test]
    fn test_webhook_rejects_non_json_body() {
        let provider = provider_with_allowlist(Vec::new());
        assert!(matches!(
            provider.validate_webhook(b"not json", None, None),
            WebhookValidation::Rejected(_)
        ));
    }
}
