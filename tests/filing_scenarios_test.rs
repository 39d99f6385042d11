//! End-to-end filing scenarios against the in-memory store:
//!
//! 1. Happy path: payment verifies, data extracts, OTP arrives in time,
//!    submission completes with a non-empty reference
//! 2. OTP timeout: deadline beats the signal, exactly one timeout notice
//! 3. Permanent business failure: no retries, exactly one escalation with
//!    the original reason
//! 4. Duplicate starts, early (buffered) signals, and late signals

mod common;

use common::*;
use std::time::Duration;
use telos::executor::{SignalOutcome, StartOutcome};
use telos::prelude::*;

const TEST_WAIT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_happy_path_completes_with_reference() {
    let env = TestEnv::new(ScriptedProvider::succeeding());
    let engine = env.engine(Duration::from_secs(30));
    let id = Uuid::new_v4();

    let outcome = engine
        .start::<FilingWorkflow>(id, filing_request())
        .await
        .unwrap();
    assert_eq!(outcome, StartOutcome::Accepted);

    // Give the instance time to reach the OTP wait, then answer it.
    let mut delivered = SignalOutcome::Buffered;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let status = engine.status(id).await.unwrap().unwrap().status;
        if status == WorkflowStatus::AwaitingSignal {
            delivered = engine.signal(id, "otp", otp_payload("123456")).await.unwrap();
            break;
        }
    }
    assert_eq!(delivered, SignalOutcome::Accepted);

    let snapshot = engine.wait_for_completion(id, TEST_WAIT).await.unwrap();
    assert_eq!(snapshot.status, WorkflowStatus::Completed);

    // The receipt's reference is opaque but must be non-empty.
    let receipt: FilingReceipt = serde_json::from_slice(&snapshot.result.unwrap()).unwrap();
    assert!(!receipt.reference.is_empty());

    // One verification, one extraction, one submission.
    assert_eq!(env.provider.calls(), 1);
    assert_eq!(env.extractor.calls(), 1);
    assert_eq!(env.submitter.submissions(), 1);
    assert!(env.escalations.notices().is_empty());

    // Completion notice went out.
    let messages = env.notifier.messages();
    assert!(messages.iter().any(|(_, body)| body.contains(&receipt.reference)));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_otp_timeout_sends_exactly_one_notice() {
    let env = TestEnv::new(ScriptedProvider::succeeding());
    let engine = env.engine(Duration::from_millis(200));
    let id = Uuid::new_v4();

    engine
        .start::<FilingWorkflow>(id, filing_request())
        .await
        .unwrap();

    // Never send the signal.
    let snapshot = engine.wait_for_completion(id, TEST_WAIT).await.unwrap();
    assert_eq!(snapshot.status, WorkflowStatus::TimedOut);

    assert_eq!(env.notifier.timeout_notices(), 1, "exactly one timeout notice");
    assert_eq!(env.submitter.submissions(), 0, "nothing was submitted");
    assert!(env.escalations.notices().is_empty(), "timeout is not escalated");

    // History holds the timer resolution, never a signal.
    let history = env.storage.load_history(id).await.unwrap();
    let timer_fired = history
        .iter()
        .filter(|e| matches!(e.kind, EventKind::TimerFired { .. }))
        .count();
    let signal_received = history
        .iter()
        .filter(|e| matches!(e.kind, EventKind::SignalReceived { .. }))
        .count();
    assert_eq!((timer_fired, signal_received), (1, 0));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_permanent_business_failure_escalates_once() {
    let env = TestEnv::new(ScriptedProvider::rejecting("invalid documentation"));
    let engine = env.engine(Duration::from_secs(30));
    let id = Uuid::new_v4();

    engine
        .start::<FilingWorkflow>(id, filing_request())
        .await
        .unwrap();

    let snapshot = engine.wait_for_completion(id, TEST_WAIT).await.unwrap();
    assert_eq!(snapshot.status, WorkflowStatus::Failed);

    // The rejection short-circuited the 5-attempt policy.
    assert_eq!(env.provider.calls(), 1, "no retries after a business rejection");
    assert_eq!(env.extractor.calls(), 0, "the process never advanced");

    // Exactly one escalation, carrying the original reason and instance id.
    let notices = env.escalations.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].instance_id, id);
    assert!(notices[0].reason.contains("invalid documentation"));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_start_is_rejected() {
    let env = TestEnv::new(ScriptedProvider::succeeding());
    let engine = env.engine(Duration::from_secs(30));
    let id = Uuid::new_v4();

    let first = engine
        .start::<FilingWorkflow>(id, filing_request())
        .await
        .unwrap();
    let second = engine
        .start::<FilingWorkflow>(id, filing_request())
        .await
        .unwrap();

    assert_eq!(first, StartOutcome::Accepted);
    assert_eq!(second, StartOutcome::AlreadyExists);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_early_signal_is_buffered_and_consumed() {
    let env = TestEnv::new(ScriptedProvider::succeeding());
    let engine = env.engine(Duration::from_secs(30));
    let id = Uuid::new_v4();

    engine
        .start::<FilingWorkflow>(id, filing_request())
        .await
        .unwrap();

    // Race the instance: the signal may land before the wait exists. Either
    // way it must reach the first compatible wait.
    let outcome = engine.signal(id, "otp", otp_payload("654321")).await.unwrap();
    assert!(matches!(
        outcome,
        SignalOutcome::Accepted | SignalOutcome::Buffered
    ));

    let snapshot = engine.wait_for_completion(id, TEST_WAIT).await.unwrap();
    assert_eq!(snapshot.status, WorkflowStatus::Completed);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_signals_after_termination_are_dropped() {
    let env = TestEnv::new(ScriptedProvider::rejecting("card declined"));
    let engine = env.engine(Duration::from_secs(30));
    let id = Uuid::new_v4();

    engine
        .start::<FilingWorkflow>(id, filing_request())
        .await
        .unwrap();
    engine.wait_for_completion(id, TEST_WAIT).await.unwrap();

    let outcome = engine.signal(id, "otp", otp_payload("123456")).await.unwrap();
    assert_eq!(outcome, SignalOutcome::NotAwaitingSignal);

    // And an unknown instance is NotFound, not an error.
    let outcome = engine
        .signal(Uuid::new_v4(), "otp", otp_payload("123456"))
        .await
        .unwrap();
    assert_eq!(outcome, SignalOutcome::NotFound);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_cancel_terminates_instance() {
    let env = TestEnv::new(ScriptedProvider::succeeding());
    let engine = env.engine(Duration::from_secs(30));
    let id = Uuid::new_v4();

    engine
        .start::<FilingWorkflow>(id, filing_request())
        .await
        .unwrap();

    // Wait until it parks on the OTP.
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if engine.status(id).await.unwrap().unwrap().status == WorkflowStatus::AwaitingSignal {
            break;
        }
    }

    assert!(engine.cancel(id, "operator request").await.unwrap());
    let snapshot = engine.wait_for_completion(id, TEST_WAIT).await.unwrap();
    assert_eq!(snapshot.status, WorkflowStatus::Canceled);

    // Canceling again is a no-op.
    assert!(!engine.cancel(id, "again").await.unwrap());

    engine.shutdown().await;
}
