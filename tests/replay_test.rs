//! Replay and durability properties:
//!
//! 1. Replay determinism: folding the persisted history from empty state
//!    reproduces an identical snapshot, every time
//! 2. At-most-once side effects: resuming an instance in a fresh engine
//!    never re-invokes completed activities
//! 3. Signal/timer race exclusivity: exactly one resolution event per wait
//! 4. Idempotent retry: the same instance+attempt key cannot file twice

mod common;

use common::*;
use std::time::Duration;
use telos::executor::{ActivityContext, SignalOutcome};
use telos::filing::{ExtractedData, SubmissionInput, SubmitFilingActivity};
use telos::prelude::*;
use tokio_util::sync::CancellationToken;

const TEST_WAIT: Duration = Duration::from_secs(10);

async fn run_to_awaiting_otp(engine: &WorkflowEngine, id: Uuid) {
    for _ in 0..200 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if let Some(snapshot) = engine.status(id).await.unwrap() {
            if snapshot.status == WorkflowStatus::AwaitingSignal {
                return;
            }
        }
    }
    panic!("instance never reached the OTP wait");
}

#[tokio::test]
async fn test_replay_reproduces_identical_snapshot() {
    let env = TestEnv::new(ScriptedProvider::succeeding());
    let engine = env.engine(Duration::from_secs(30));
    let id = Uuid::new_v4();

    engine
        .start::<FilingWorkflow>(id, filing_request())
        .await
        .unwrap();
    run_to_awaiting_otp(&engine, id).await;
    engine.signal(id, "otp", otp_payload("123456")).await.unwrap();
    engine.wait_for_completion(id, TEST_WAIT).await.unwrap();

    let record = env.storage.get_instance(id).await.unwrap().unwrap();
    let history = env.storage.load_history(id).await.unwrap();
    assert!(!history.is_empty());

    // Sequence numbers are gap-free from 1.
    for (index, event) in history.iter().enumerate() {
        assert_eq!(event.seq, index as u64 + 1);
    }

    let first = WorkflowInstance::replay(
        record.workflow_type.clone(),
        id,
        record.created_at,
        &history,
    );
    let second = WorkflowInstance::replay(
        record.workflow_type.clone(),
        id,
        record.created_at,
        &history,
    );

    assert_eq!(first, second, "replay must be deterministic");
    assert_eq!(first.status, WorkflowStatus::Completed);
    assert!(first.step_results.contains_key("verify_payment"));
    assert!(first.step_results.contains_key("submit_filing"));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_resume_never_reexecutes_completed_activities() {
    let env = TestEnv::new(ScriptedProvider::succeeding());
    let id = Uuid::new_v4();

    // First engine drives the instance up to the OTP wait, then the
    // "process" dies.
    let first_engine = env.engine(Duration::from_secs(30));
    first_engine
        .start::<FilingWorkflow>(id, filing_request())
        .await
        .unwrap();
    run_to_awaiting_otp(&first_engine, id).await;

    assert_eq!(env.provider.calls(), 1);
    assert_eq!(env.extractor.calls(), 1);

    first_engine.shutdown().await;

    // A fresh engine over the same storage resumes by replay.
    let second_engine = env.engine(Duration::from_secs(30));
    let resumed = second_engine.recover().await.unwrap();
    assert_eq!(resumed, 1, "one incomplete instance to resume");

    run_to_awaiting_otp(&second_engine, id).await;
    let outcome = second_engine
        .signal(id, "otp", otp_payload("123456"))
        .await
        .unwrap();
    assert_eq!(outcome, SignalOutcome::Accepted);

    let snapshot = second_engine.wait_for_completion(id, TEST_WAIT).await.unwrap();
    assert_eq!(snapshot.status, WorkflowStatus::Completed);

    // Completed side effects ran exactly once across both lives.
    assert_eq!(env.provider.calls(), 1, "payment verified once");
    assert_eq!(env.extractor.calls(), 1, "documents extracted once");
    assert_eq!(env.submitter.submissions(), 1, "filed once");

    second_engine.shutdown().await;
}

#[tokio::test]
async fn test_signal_timer_race_resolves_exactly_once() {
    // Deadline and signal land close together; whichever is appended first
    // wins and the other must leave no trace.
    let env = TestEnv::new(ScriptedProvider::succeeding());
    let engine = env.engine(Duration::from_millis(150));
    let id = Uuid::new_v4();

    engine
        .start::<FilingWorkflow>(id, filing_request())
        .await
        .unwrap();

    run_to_awaiting_otp(&engine, id).await;
    tokio::time::sleep(Duration::from_millis(130)).await;
    let _ = engine.signal(id, "otp", otp_payload("123456")).await.unwrap();

    let snapshot = engine.wait_for_completion(id, TEST_WAIT).await.unwrap();

    let history = env.storage.load_history(id).await.unwrap();
    let signals = history
        .iter()
        .filter(|e| matches!(e.kind, EventKind::SignalReceived { .. }))
        .count();
    let timers = history
        .iter()
        .filter(|e| matches!(e.kind, EventKind::TimerFired { .. }))
        .count();

    assert_eq!(signals + timers, 1, "exactly one wait resolution, never both");
    match snapshot.status {
        WorkflowStatus::Completed => assert_eq!((signals, timers), (1, 0)),
        WorkflowStatus::TimedOut => {
            assert_eq!((signals, timers), (0, 1));
            assert_eq!(env.notifier.timeout_notices(), 1);
        }
        other => panic!("unexpected terminal status {:?}", other),
    }

    engine.shutdown().await;
}

#[tokio::test]
async fn test_same_attempt_key_cannot_file_twice() {
    // A crash between "activity succeeded" and "completion event persisted"
    // forces a re-invocation of the same logical attempt. The submitter must
    // see the same idempotency key and refuse to file again.
    let env = TestEnv::new(ScriptedProvider::succeeding());
    let activity = SubmitFilingActivity {
        submitter: env.submitter.clone(),
        records: env.records.clone(),
    };

    let instance_id = Uuid::new_v4();
    let input = SubmissionInput {
        company_reg_num: "2019/123456/07".to_string(),
        service_type: "annual_return".to_string(),
        extracted: ExtractedData {
            fields: Default::default(),
        },
        otp: "123456".to_string(),
    };

    let first_ctx =
        ActivityContext::new(instance_id, "submit_filing", 1, CancellationToken::new());
    let second_ctx =
        ActivityContext::new(instance_id, "submit_filing", 1, CancellationToken::new());

    let first = activity.execute(&first_ctx, input.clone()).await.unwrap();
    let second = activity.execute(&second_ctx, input).await.unwrap();

    assert_eq!(first.reference, second.reference, "same attempt, same filing");
    assert_eq!(env.submitter.submissions(), 1, "one filing despite two invocations");
}
