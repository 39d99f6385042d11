//! Durability against the SQLite backend: an instance driven to its OTP
//! wait by one engine survives that engine's death on disk, and a second
//! engine over the same database file resumes it by replay.

#![cfg(feature = "sqlite")]

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use telos::prelude::*;
use telos::storage::HistoryStore;
use telos::SqliteHistoryStore;

const TEST_WAIT: Duration = Duration::from_secs(10);

async fn await_status(
    engine: &WorkflowEngine,
    id: Uuid,
    wanted: WorkflowStatus,
) -> WorkflowInstance {
    for _ in 0..400 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if let Some(snapshot) = engine.status(id).await.unwrap() {
            if snapshot.status == wanted {
                return snapshot;
            }
        }
    }
    panic!("instance never reached {:?}", wanted);
}

#[tokio::test]
async fn test_instance_survives_engine_restart_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("telos.db");

    let env = TestEnv::new(ScriptedProvider::succeeding());
    let id = Uuid::new_v4();

    // First life: drive to the OTP wait, then drop the engine.
    {
        let storage: Arc<dyn HistoryStore> =
            Arc::new(SqliteHistoryStore::new(&db_path).await.unwrap());
        let engine = env.engine_with_storage(storage, Duration::from_secs(30));

        engine
            .start::<FilingWorkflow>(id, filing_request())
            .await
            .unwrap();
        await_status(&engine, id, WorkflowStatus::AwaitingSignal).await;
        engine.shutdown().await;
    }

    assert_eq!(env.provider.calls(), 1);
    assert_eq!(env.extractor.calls(), 1);

    // Second life: a fresh pool over the same file, recovery, then the OTP.
    let storage: Arc<dyn HistoryStore> =
        Arc::new(SqliteHistoryStore::new(&db_path).await.unwrap());
    let engine = env.engine_with_storage(Arc::clone(&storage), Duration::from_secs(30));

    let resumed = engine.recover().await.unwrap();
    assert_eq!(resumed, 1);

    await_status(&engine, id, WorkflowStatus::AwaitingSignal).await;
    engine.signal(id, "otp", otp_payload("123456")).await.unwrap();

    let snapshot = engine.wait_for_completion(id, TEST_WAIT).await.unwrap();
    assert_eq!(snapshot.status, WorkflowStatus::Completed);

    // No side effect ran twice across the two lives.
    assert_eq!(env.provider.calls(), 1);
    assert_eq!(env.extractor.calls(), 1);
    assert_eq!(env.submitter.submissions(), 1);

    // The history on disk folds to the same snapshot the engine reported.
    let history = storage.load_history(id).await.unwrap();
    let record = storage.get_instance(id).await.unwrap().unwrap();
    let folded = WorkflowInstance::replay(record.workflow_type, id, record.created_at, &history);
    assert_eq!(folded.status, WorkflowStatus::Completed);
    assert_eq!(folded.result, snapshot.result);

    engine.shutdown().await;
}
