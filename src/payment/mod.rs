//! Payment provider adapters.
//!
//! Three providers share one contract (create a checkout, verify a
//! transaction, validate an inbound webhook) behind which their
//! authentication schemes differ completely:
//!
//! - [`PayFast`]: form-redirect checkout signed with an MD5 digest over the
//!   lexicographically sorted fields (plus an optional passphrase); webhooks
//!   are validated by recomputing the same digest.
//! - [`Paystack`]: bearer-token REST; webhooks carry an HMAC-SHA512 of the
//!   raw body, compared in constant time.
//! - [`Yoco`]: bearer-token REST; webhooks are unsigned, so validation is
//!   transport trust plus an optional source-address allow-list; the
//!   adapter never pretends to a cryptographic check it cannot perform.
//!
//! Every adapter normalizes its provider's response shape into
//! [`PaymentResult`], so nothing outside this module branches on provider
//! identity.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

mod error;
mod payfast;
mod paystack;
mod types;
mod yoco;

pub use error::{PaymentError, Result};
pub use payfast::{PayFast, PayFastConfig};
pub use paystack::{Paystack, PaystackConfig};
pub use types::{PaymentRequest, PaymentResult, PaymentStatus, WebhookValidation};
pub use yoco::{Yoco, YocoConfig};

/// The shared provider contract.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Stable provider name used for webhook routing and audit.
    fn name(&self) -> &'static str;

    /// Create a checkout session for the payer. Returns a `Pending` result
    /// carrying the checkout URL. Must be idempotent per
    /// `request.reference`.
    async fn create_checkout(&self, request: &PaymentRequest) -> Result<PaymentResult>;

    /// Look up a transaction's settled state by the provider's id.
    async fn verify(&self, provider_txn_id: &str) -> Result<PaymentResult>;

    /// Authenticate an inbound webhook. Pure: no network access, so the
    /// decision depends only on the request as received.
    fn validate_webhook(
        &self,
        raw_body: &[u8],
        signature_header: Option<&str>,
        remote_addr: Option<IpAddr>,
    ) -> WebhookValidation;
}

/// Routing table from provider name to adapter, for the
/// `POST /webhook?provider={name}` boundary.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<&'static str, Arc<dyn PaymentProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, provider: Arc<dyn PaymentProvider>) -> Self {
        self.providers.insert(provider.name(), provider);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PaymentProvider>> {
        self.providers.get(name).cloned()
    }

    /// Validate an inbound webhook against the named provider. Unknown
    /// provider names are rejected outright.
    pub fn validate_webhook(
        &self,
        provider: &str,
        raw_body: &[u8],
        signature_header: Option<&str>,
        remote_addr: Option<IpAddr>,
    ) -> WebhookValidation {
        match self.get(provider) {
            Some(adapter) => adapter.validate_webhook(raw_body, signature_header, remote_addr),
            None => WebhookValidation::Rejected(format!("unknown provider: {}", provider)),
        }
    }
}
