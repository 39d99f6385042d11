//! The workflow engine: instance lifecycle, signal delivery, status
//! queries, and crash recovery.
//!
//! Physically, many instances run concurrently as tokio tasks; logically,
//! each instance is single-threaded and advances only at its context's
//! suspension points. Signal delivery and deadline firing happen on other
//! tasks and funnel through the store's serialized per-instance append path,
//! which is what keeps history ordering sound.

use super::context::{ChildStarter, InstanceWakers, WorkflowContext};
use super::deadline::{DeadlineProcessor, DeadlineProcessorHandle};
use super::error::{ExecutionError, Result};
use super::registry::{Workflow, WorkflowRegistry};
use super::runner::ActivityRunner;
use crate::core::{
    serialize_value, EventKind, FailureKind, WorkflowInstance, WorkflowStatus,
};
use crate::storage::{
    CreateOutcome, HistoryStore, InstanceRecord, NewInstance, SignalEnvelope, StorageError,
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Engine tuning knobs. Builder-style with sensible defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on concurrently executing activity attempts.
    pub max_concurrent_activities: usize,
    /// How often the deadline processor compares fire times to the clock.
    pub deadline_poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_activities: 16,
            deadline_poll_interval: Duration::from_secs(1),
        }
    }
}

/// Outcome of [`WorkflowEngine::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Accepted,
    /// The `(workflow_type, instance_id)` identity already exists.
    AlreadyExists,
}

/// Outcome of [`WorkflowEngine::signal`].
///
/// Signals are fire-and-forget from the sender's point of view: none of
/// these variants is an error. `NotAwaitingSignal` means the instance has
/// terminated and the envelope was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// Delivered straight into an open, matching wait.
    Accepted,
    /// Queued in the inbox; will match the first compatible wait.
    Buffered,
    /// No such instance.
    NotFound,
    /// The instance already terminated; the envelope was discarded.
    NotAwaitingSignal,
}

struct EngineInner {
    me: Weak<EngineInner>,
    storage: Arc<dyn HistoryStore>,
    registry: WorkflowRegistry,
    runner: ActivityRunner,
    wakers: Arc<InstanceWakers>,
    /// Instances with a driving task in this process. Guards double-spawn.
    running: DashMap<Uuid, ()>,
    /// Cooperative cancellation tokens, one per running instance.
    cancels: DashMap<Uuid, CancellationToken>,
    shutdown: CancellationToken,
}

impl EngineInner {
    fn spawn_instance(&self, record: InstanceRecord) {
        if record.terminal {
            return;
        }
        let Some(inner) = self.me.upgrade() else {
            return;
        };
        if self.running.insert(record.instance_id, ()).is_some() {
            debug!(instance = %record.instance_id, "instance task already running");
            return;
        }

        let span = tracing::info_span!(
            "instance",
            id = %record.instance_id,
            workflow = %record.workflow_type,
        );
        tokio::spawn(
            async move {
                inner.run_instance(record).await;
            }
            .instrument(span),
        );
    }

    async fn run_instance(self: Arc<Self>, record: InstanceRecord) {
        let instance_id = record.instance_id;
        self.drive(&record).await;
        self.running.remove(&instance_id);
        self.cancels.remove(&instance_id);
        self.wakers.remove(instance_id);

        // One-shot hand-off: a parent parked on this child gets woken and
        // folds the outcome into its own history.
        if let Some(parent_id) = record.parent_id {
            self.wakers.wake(parent_id);
        }
    }

    async fn drive(&self, record: &InstanceRecord) {
        let instance_id = record.instance_id;

        // The context needs an owned handle on the engine for child starts.
        let Some(me) = self.me.upgrade() else {
            return;
        };

        let handler = match self.registry.get(&record.workflow_type) {
            Ok(handler) => handler,
            Err(e) => {
                error!("cannot drive instance: {}", e);
                return;
            }
        };

        // Infrastructure failure here is fatal to progress but not to
        // correctness: nothing was written, recovery retries later.
        let history = match self.storage.load_history(instance_id).await {
            Ok(history) => history,
            Err(e) => {
                error!("cannot load history: {}", e);
                return;
            }
        };

        let resumed = !history.is_empty();
        let cancel = self
            .cancels
            .entry(instance_id)
            .or_insert_with(CancellationToken::new)
            .clone();

        let ctx = WorkflowContext::new(
            instance_id,
            record.workflow_type.clone(),
            Arc::clone(&self.storage),
            self.runner.clone(),
            Arc::clone(&self.wakers),
            me as Arc<dyn ChildStarter>,
            history,
            self.shutdown.clone(),
            cancel,
        );

        if resumed {
            info!("resuming instance by replay");
        } else {
            info!("starting instance");
        }

        match handler.run(&ctx, &record.input).await {
            Ok(result) => {
                info!("instance completed");
                self.append_terminal(instance_id, EventKind::WorkflowCompleted { result })
                    .await;
            }
            Err(ExecutionError::ShuttingDown) => {
                info!("instance suspended by shutdown; recovery will resume it");
            }
            Err(ExecutionError::Canceled(reason)) => {
                // The canceling side already appended the terminal event.
                debug!("instance canceled: {}", reason);
            }
            Err(e) => {
                let kind = match e {
                    ExecutionError::DeadlineElapsed { .. } => FailureKind::Timeout,
                    _ => FailureKind::Failure,
                };
                warn!("instance failed: {}", e);
                self.append_terminal(
                    instance_id,
                    EventKind::WorkflowFailed {
                        kind,
                        reason: e.to_string(),
                    },
                )
                .await;
            }
        }
    }

    async fn append_terminal(&self, instance_id: Uuid, kind: EventKind) {
        match self.storage.append(instance_id, kind).await {
            Ok(_) => {}
            Err(StorageError::InstanceTerminal(_)) => {
                // Lost a race with an external cancel; the history already
                // ended and that ending wins.
                debug!("terminal event already present");
            }
            Err(e) => {
                // The instance stays incomplete; recovery replays it once
                // the store is healthy again.
                error!("failed to append terminal event: {}", e);
            }
        }
    }
}

#[async_trait]
impl ChildStarter for EngineInner {
    async fn start_child(
        &self,
        workflow_type: &str,
        child_id: Uuid,
        input: Vec<u8>,
        parent_id: Uuid,
    ) -> Result<()> {
        // Unknown child type is a configuration error surfaced to the parent.
        self.registry.get(workflow_type)?;

        let outcome = self
            .storage
            .create_instance(NewInstance {
                instance_id: child_id,
                workflow_type,
                input: &input,
                parent_id: Some(parent_id),
            })
            .await?;

        if outcome == CreateOutcome::Created {
            debug!(child = %child_id, workflow = workflow_type, "child instance created");
        }

        if let Some(record) = self.storage.get_instance(child_id).await? {
            self.spawn_instance(record);
        }
        Ok(())
    }
}

/// The durable orchestration engine.
///
/// Owns the workflow registry, the activity runner pool, the deadline
/// processor, and one driving task per live instance.
///
/// # Example
///
/// ```ignore
/// let storage: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
/// let registry = WorkflowRegistry::new().register(FilingWorkflow::new(deps));
/// let engine = WorkflowEngine::new(storage, registry);
///
/// engine.start::<FilingWorkflow>(instance_id, input).await?;
/// engine.signal(instance_id, "otp", b"\"123456\"".to_vec()).await?;
/// let snapshot = engine.wait_for_completion(instance_id, timeout).await?;
/// ```
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
    deadline: DeadlineProcessorHandle,
}

impl WorkflowEngine {
    /// Creates an engine with default configuration.
    pub fn new(storage: Arc<dyn HistoryStore>, registry: WorkflowRegistry) -> Self {
        Self::with_config(storage, registry, EngineConfig::default())
    }

    /// Creates an engine with custom configuration and starts its deadline
    /// processor.
    pub fn with_config(
        storage: Arc<dyn HistoryStore>,
        registry: WorkflowRegistry,
        config: EngineConfig,
    ) -> Self {
        let wakers = Arc::new(InstanceWakers::default());

        let inner = Arc::new_cyclic(|me| EngineInner {
            me: me.clone(),
            storage: Arc::clone(&storage),
            registry,
            runner: ActivityRunner::new(config.max_concurrent_activities),
            wakers: Arc::clone(&wakers),
            running: DashMap::new(),
            cancels: DashMap::new(),
            shutdown: CancellationToken::new(),
        });

        let deadline = DeadlineProcessor::new(storage, wakers)
            .with_poll_interval(config.deadline_poll_interval)
            .start();

        Self { inner, deadline }
    }

    /// Start a typed workflow instance.
    pub async fn start<W: Workflow>(
        &self,
        instance_id: Uuid,
        input: W::Input,
    ) -> Result<StartOutcome> {
        let input = serialize_value(&input)?;
        self.start_raw(W::TYPE, instance_id, input).await
    }

    /// Start an instance from serialized input, the shape the inbound
    /// gateway boundary calls with.
    pub async fn start_raw(
        &self,
        workflow_type: &str,
        instance_id: Uuid,
        input: Vec<u8>,
    ) -> Result<StartOutcome> {
        // Fail fast on unknown types rather than creating a stuck instance.
        self.inner.registry.get(workflow_type)?;

        let outcome = self
            .inner
            .storage
            .create_instance(NewInstance {
                instance_id,
                workflow_type,
                input: &input,
                parent_id: None,
            })
            .await?;

        match outcome {
            CreateOutcome::AlreadyExists => Ok(StartOutcome::AlreadyExists),
            CreateOutcome::Created => {
                info!(instance = %instance_id, workflow = workflow_type, "instance accepted");
                if let Some(record) = self.inner.storage.get_instance(instance_id).await? {
                    self.inner.spawn_instance(record);
                }
                Ok(StartOutcome::Accepted)
            }
        }
    }

    /// Deliver a named signal to an instance.
    ///
    /// Delivery is at-least-once and durable: an instance not yet waiting
    /// gets the envelope buffered for its first compatible wait; a
    /// terminated instance drops it with no error surfaced to the sender.
    pub async fn signal(
        &self,
        instance_id: Uuid,
        name: &str,
        payload: Vec<u8>,
    ) -> Result<SignalOutcome> {
        let Some(record) = self.inner.storage.get_instance(instance_id).await? else {
            return Ok(SignalOutcome::NotFound);
        };
        if record.terminal {
            debug!(instance = %instance_id, signal = name, "dropping signal for terminated instance");
            return Ok(SignalOutcome::NotAwaitingSignal);
        }

        // Try the open wait first; the store arbitrates against a racing
        // deadline.
        let resolved = self
            .inner
            .storage
            .resolve_wait(
                instance_id,
                EventKind::SignalReceived {
                    name: name.to_string(),
                    payload: payload.clone(),
                },
            )
            .await?;

        if resolved.is_some() {
            self.inner.wakers.wake(instance_id);
            debug!(instance = %instance_id, signal = name, "signal delivered to open wait");
            return Ok(SignalOutcome::Accepted);
        }

        self.inner
            .storage
            .buffer_signal(SignalEnvelope {
                instance_id,
                name: name.to_string(),
                payload,
                received_at: Utc::now(),
            })
            .await?;
        self.inner.wakers.wake(instance_id);
        debug!(instance = %instance_id, signal = name, "signal buffered");
        Ok(SignalOutcome::Buffered)
    }

    /// Snapshot an instance: the pure fold of its history, with
    /// `AwaitingSignal` overlaid from the open wait registration.
    pub async fn status(&self, instance_id: Uuid) -> Result<Option<WorkflowInstance>> {
        let Some(record) = self.inner.storage.get_instance(instance_id).await? else {
            return Ok(None);
        };

        let history = self.inner.storage.load_history(instance_id).await?;
        let mut instance = WorkflowInstance::replay(
            record.workflow_type,
            instance_id,
            record.created_at,
            &history,
        );

        if !instance.status.is_terminal() {
            if let Some(wait) = self.inner.storage.get_open_wait(instance_id).await? {
                if wait.signal_name.is_some() {
                    instance.status = WorkflowStatus::AwaitingSignal;
                }
            }
        }

        Ok(Some(instance))
    }

    /// Re-spawn every non-terminal instance found in storage. Call once at
    /// startup, after registering workflows. Returns how many instances
    /// were resumed.
    pub async fn recover(&self) -> Result<usize> {
        let records = self.inner.storage.list_incomplete().await?;
        let mut resumed = 0;
        for record in records {
            if self.inner.registry.get(&record.workflow_type).is_err() {
                warn!(
                    instance = %record.instance_id,
                    workflow = %record.workflow_type,
                    "skipping recovery of unknown workflow type"
                );
                continue;
            }
            self.inner.spawn_instance(record);
            resumed += 1;
        }
        if resumed > 0 {
            info!("recovered {} incomplete instances", resumed);
        }
        Ok(resumed)
    }

    /// Cancel a running instance. Appends the terminal event, cancels any
    /// in-flight activity attempt cooperatively, and wakes parked waits.
    /// Returns false if the instance was already terminal or unknown.
    pub async fn cancel(&self, instance_id: Uuid, reason: &str) -> Result<bool> {
        let appended = self
            .inner
            .storage
            .append(
                instance_id,
                EventKind::WorkflowFailed {
                    kind: FailureKind::Canceled,
                    reason: reason.to_string(),
                },
            )
            .await;

        match appended {
            Ok(_) => {
                if let Some(token) = self.inner.cancels.get(&instance_id) {
                    token.cancel();
                }
                self.inner.wakers.wake(instance_id);
                info!(instance = %instance_id, "instance canceled: {}", reason);
                Ok(true)
            }
            Err(StorageError::InstanceTerminal(_)) | Err(StorageError::InstanceNotFound(_)) => {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Block until the instance reaches a terminal status, or `timeout`
    /// elapses. Intended for tests and operational tooling.
    pub async fn wait_for_completion(
        &self,
        instance_id: Uuid,
        timeout: Duration,
    ) -> Result<WorkflowInstance> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(instance) = self.status(instance_id).await? {
                if instance.status.is_terminal() {
                    return Ok(instance);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ExecutionError::Failed(format!(
                    "instance {} did not complete within {:?}",
                    instance_id, timeout
                )));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Graceful shutdown: parked instances return to storage untouched and
    /// will be resumed by [`recover`](Self::recover) on the next start.
    pub async fn shutdown(self) {
        info!("shutting down workflow engine");
        self.inner.shutdown.cancel();
        self.deadline.shutdown().await;
    }
}
