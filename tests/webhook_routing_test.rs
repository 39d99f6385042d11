//! The payment webhook boundary: raw body + signature header routed to the
//! matching adapter, and only an accepted webhook may become a signal.
//!
//! Scenario from the wire: a Paystack webhook with a tampered body but an
//! unmodified signature header must be rejected by validation and must never
//! reach a workflow instance as a signal.

mod common;

use common::*;
use hmac::{Hmac, Mac};
use sha2::Sha512;
use std::time::Duration;
use telos::payment::{Paystack, PaystackConfig};
use telos::prelude::*;

const SECRET: &str = "sk_test_webhook_route";

fn sign(body: &[u8]) -> String {
    let mut mac = Hmac::<Sha512>::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// What the inbound gateway does with `POST /webhook?provider=paystack`:
/// validate against the adapter, and only on acceptance forward the payload
/// into the instance as a signal.
async fn route_webhook(
    registry: &ProviderRegistry,
    engine: &WorkflowEngine,
    instance_id: Uuid,
    provider: &str,
    body: &[u8],
    signature: Option<&str>,
) -> bool {
    match registry.validate_webhook(provider, body, signature, None) {
        WebhookValidation::Accepted => {
            engine
                .signal(instance_id, "otp", body.to_vec())
                .await
                .unwrap();
            true
        }
        WebhookValidation::Rejected(_) => false,
    }
}

#[tokio::test]
async fn test_tampered_webhook_never_reaches_instance() {
    let env = TestEnv::new(ScriptedProvider::succeeding());
    let engine = env.engine(Duration::from_secs(30));
    let id = Uuid::new_v4();

    engine
        .start::<FilingWorkflow>(id, filing_request())
        .await
        .unwrap();

    // Let the instance park on the OTP wait.
    for _ in 0..200 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if engine.status(id).await.unwrap().unwrap().status == WorkflowStatus::AwaitingSignal {
            break;
        }
    }

    let webhook_registry =
        ProviderRegistry::new().register(Arc::new(Paystack::new(PaystackConfig::new(SECRET))));

    let genuine = br#""123456""#.to_vec();
    let signature = sign(&genuine);

    // Tampered body, unmodified signature: rejected, no signal delivered.
    let tampered = br#""999999""#.to_vec();
    let forwarded = route_webhook(
        &webhook_registry,
        &engine,
        id,
        "paystack",
        &tampered,
        Some(&signature),
    )
    .await;
    assert!(!forwarded, "tampered webhook must be rejected");

    // An unknown provider name is rejected the same way.
    let forwarded = route_webhook(
        &webhook_registry,
        &engine,
        id,
        "paystrack",
        &genuine,
        Some(&signature),
    )
    .await;
    assert!(!forwarded, "unknown provider must be rejected");

    // The instance is still waiting; no SignalReceived was appended.
    let status = engine.status(id).await.unwrap().unwrap().status;
    assert_eq!(status, WorkflowStatus::AwaitingSignal);
    let history = env.storage.load_history(id).await.unwrap();
    assert!(
        !history
            .iter()
            .any(|e| matches!(e.kind, EventKind::SignalReceived { .. })),
        "rejected webhooks must not become signals"
    );

    // The genuine webhook goes through and completes the filing.
    let forwarded = route_webhook(
        &webhook_registry,
        &engine,
        id,
        "paystack",
        &genuine,
        Some(&signature),
    )
    .await;
    assert!(forwarded);

    let snapshot = engine
        .wait_for_completion(id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(snapshot.status, WorkflowStatus::Completed);

    engine.shutdown().await;
}
