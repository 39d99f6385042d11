//! The workflow context: replay-aware access to activities, waits, and
//! child workflows.
//!
//! Every operation here follows the same protocol:
//!
//! 1. **Replay phase**: consume the events this call produced in an earlier
//!    execution, if any. A completed activity returns its recorded result
//!    without re-invoking anything; a resolved wait returns its recorded
//!    outcome. Divergence between the code and the history is an error, not
//!    a guess.
//! 2. **Live phase**: persist an event before every side effect and before
//!    every suspension, so a crash at any point leaves enough history to
//!    resume from.
//!
//! The context is used from exactly one task; instances are logically
//! single-threaded and advance only at these operations.

use super::activity::{Activity, ActivityContext, ActivityError};
use super::error::{ExecutionError, Result};
use super::runner::ActivityRunner;
use crate::core::{
    deserialize_value, hash_input, serialize_value, ChildOutcome, EventKind, FailureKind,
    HistoryEvent, RetryDecision, RetryPolicy,
};
use crate::storage::{HistoryStore, StorageError, WaitRegistration};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Outcome of the "await first of {signal, timer}" primitive.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    /// The signal arrived first; payload is the envelope's serialized body.
    Signal(Vec<u8>),
    /// The deadline fired first.
    Deadline,
}

/// In-process wakeup registry: one `Notify` per parked instance task.
///
/// Purely an optimization over polling; durability always comes from the
/// store. Engine-owned, never global.
#[derive(Default)]
pub(super) struct InstanceWakers {
    notifiers: dashmap::DashMap<Uuid, Arc<Notify>>,
}

impl InstanceWakers {
    pub(super) fn subscribe(&self, instance_id: Uuid) -> Arc<Notify> {
        self.notifiers
            .entry(instance_id)
            .or_insert_with(|| Arc::new(Notify::new()))
            .value()
            .clone()
    }

    /// `notify_one` rather than `notify_waiters`: the stored permit covers
    /// a wake that lands between a park loop's storage check and its await.
    /// Each instance has at most one parked task, so one permit is enough.
    pub(super) fn wake(&self, instance_id: Uuid) {
        self.subscribe(instance_id).notify_one();
    }

    pub(super) fn remove(&self, instance_id: Uuid) {
        self.notifiers.remove(&instance_id);
    }
}

/// Engine capability the context uses to start child instances, kept as a
/// trait so the context does not depend on the engine type.
#[async_trait]
pub(super) trait ChildStarter: Send + Sync {
    async fn start_child(
        &self,
        workflow_type: &str,
        child_id: Uuid,
        input: Vec<u8>,
        parent_id: Uuid,
    ) -> Result<()>;
}

/// Replay position over the instance's loaded history. Local events always
/// mirror what the store holds; `pos` marks how much this execution has
/// consumed.
struct ReplayCursor {
    events: Vec<HistoryEvent>,
    pos: usize,
}

impl ReplayCursor {
    fn peek(&self) -> Option<HistoryEvent> {
        self.events.get(self.pos).cloned()
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    /// Record an event this execution just appended (or read back from the
    /// store) as already consumed.
    fn push_consumed(&mut self, event: HistoryEvent) {
        self.events.push(event);
        self.pos = self.events.len();
    }

    fn last_seq(&self) -> u64 {
        self.events.last().map(|e| e.seq).unwrap_or(0)
    }
}

pub struct WorkflowContext {
    instance_id: Uuid,
    workflow_type: String,
    storage: Arc<dyn HistoryStore>,
    runner: ActivityRunner,
    wakers: Arc<InstanceWakers>,
    starter: Arc<dyn ChildStarter>,
    cursor: Mutex<ReplayCursor>,
    /// Engine-wide shutdown: parks return `ShuttingDown`, instance stays
    /// incomplete for recovery.
    shutdown: CancellationToken,
    /// Per-instance cancellation: propagated into activity attempts.
    cancel: CancellationToken,
}

impl WorkflowContext {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        instance_id: Uuid,
        workflow_type: String,
        storage: Arc<dyn HistoryStore>,
        runner: ActivityRunner,
        wakers: Arc<InstanceWakers>,
        starter: Arc<dyn ChildStarter>,
        history: Vec<HistoryEvent>,
        shutdown: CancellationToken,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            instance_id,
            workflow_type,
            storage,
            runner,
            wakers,
            starter,
            cursor: Mutex::new(ReplayCursor {
                events: history,
                pos: 0,
            }),
            shutdown,
            cancel,
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn workflow_type(&self) -> &str {
        &self.workflow_type
    }

    fn peek(&self) -> Option<HistoryEvent> {
        self.cursor.lock().expect("cursor lock poisoned").peek()
    }

    fn advance(&self) {
        self.cursor.lock().expect("cursor lock poisoned").advance()
    }

    fn push_consumed(&self, event: HistoryEvent) {
        self.cursor
            .lock()
            .expect("cursor lock poisoned")
            .push_consumed(event)
    }

    fn last_seq(&self) -> u64 {
        self.cursor.lock().expect("cursor lock poisoned").last_seq()
    }

    /// Append through the store's serialized path and mark the event
    /// consumed locally. An append refused because the instance already
    /// terminated means an external cancel won; surface that as `Canceled`.
    async fn append(&self, kind: EventKind) -> Result<HistoryEvent> {
        match self.storage.append(self.instance_id, kind).await {
            Ok(event) => {
                self.push_consumed(event.clone());
                Ok(event)
            }
            Err(StorageError::InstanceTerminal(_)) => Err(ExecutionError::Canceled(
                "instance terminated while advancing".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn check_shutdown(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(ExecutionError::ShuttingDown);
        }
        Ok(())
    }

    // =========================================================================
    // Activity execution
    // =========================================================================

    /// Execute an activity with its own declared retry policy.
    pub async fn execute<A: Activity>(&self, activity: &A, input: A::Input) -> Result<A::Output> {
        let policy = activity.retry_policy();
        self.execute_with_policy(activity, input, policy).await
    }

    /// Execute an activity, overriding its retry policy.
    ///
    /// The attempt loop is fully recorded: `ActivityScheduled` before every
    /// invocation, `ActivityCompleted` or `ActivityFailed` after. On replay
    /// the recorded resolution is returned without touching the activity; a
    /// trailing `ActivityScheduled` with no resolution is the
    /// crash-between-effect-and-record case and is legitimately re-invoked,
    /// which is why activities must be idempotent per attempt key.
    pub async fn execute_with_policy<A: Activity>(
        &self,
        activity: &A,
        input: A::Input,
        policy: RetryPolicy,
    ) -> Result<A::Output> {
        let input_bytes = serialize_value(&input)?;
        let input_hash = hash_input(&input_bytes);

        let mut attempt: u32 = 1;
        let mut scheduled_pending = false;

        // Replay phase: consume this call's recorded events.
        while let Some(event) = self.peek() {
            match event.kind {
                EventKind::ActivityScheduled {
                    activity: ref name,
                    attempt: recorded_attempt,
                    input_hash: recorded_hash,
                } if name == A::NAME => {
                    if recorded_hash != input_hash {
                        return Err(ExecutionError::Nondeterminism(format!(
                            "activity '{}' scheduled with different input than history records",
                            A::NAME
                        )));
                    }
                    attempt = recorded_attempt;
                    scheduled_pending = true;
                    self.advance();
                }
                EventKind::ActivityCompleted {
                    activity: ref name,
                    ref result,
                } if name == A::NAME => {
                    self.advance();
                    return Ok(deserialize_value(result)?);
                }
                EventKind::ActivityFailed {
                    activity: ref name,
                    attempt: recorded_attempt,
                    ref error,
                    permanent,
                } if name == A::NAME => {
                    self.advance();
                    if permanent {
                        return Err(ExecutionError::ActivityFailed {
                            activity: A::NAME.to_string(),
                            attempt: recorded_attempt,
                            reason: error.clone(),
                        });
                    }
                    attempt = recorded_attempt + 1;
                    scheduled_pending = false;
                }
                EventKind::WorkflowFailed { kind: FailureKind::Canceled, ref reason } => {
                    return Err(ExecutionError::Canceled(reason.clone()));
                }
                ref other => {
                    return Err(ExecutionError::Nondeterminism(format!(
                        "expected events for activity '{}', history has {}",
                        A::NAME,
                        other.name()
                    )));
                }
            }
        }

        // Live phase: run attempts until resolution.
        loop {
            self.check_shutdown()?;

            if !scheduled_pending {
                self.append(EventKind::ActivityScheduled {
                    activity: A::NAME.to_string(),
                    attempt,
                    input_hash,
                })
                .await?;
            }
            scheduled_pending = false;

            let attempt_ctx = ActivityContext::new(
                self.instance_id,
                A::NAME,
                attempt,
                self.cancel.child_token(),
            );
            // Each attempt gets a fresh copy of the input through the same
            // serialization path replay uses.
            let attempt_input: A::Input = deserialize_value(&input_bytes)?;

            match self.runner.run(activity, &attempt_ctx, attempt_input).await {
                Ok(output) => {
                    let result = serialize_value(&output)?;
                    self.append(EventKind::ActivityCompleted {
                        activity: A::NAME.to_string(),
                        result,
                    })
                    .await?;
                    return Ok(output);
                }
                Err(ActivityError::Canceled) => {
                    // External cancel; the terminal event is appended by the
                    // canceling side, not here.
                    return Err(ExecutionError::Canceled(format!(
                        "activity '{}' canceled",
                        A::NAME
                    )));
                }
                Err(err) => match policy.decide(attempt, &err) {
                    RetryDecision::Retry { delay } => {
                        warn!(
                            instance = %self.instance_id,
                            activity = A::NAME,
                            attempt,
                            error = %err,
                            "activity attempt failed, retrying in {:?}", delay
                        );
                        self.append(EventKind::ActivityFailed {
                            activity: A::NAME.to_string(),
                            attempt,
                            error: err.to_string(),
                            permanent: false,
                        })
                        .await?;
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = self.shutdown.cancelled() => return Err(ExecutionError::ShuttingDown),
                        }
                        attempt += 1;
                    }
                    RetryDecision::Permanent => {
                        warn!(
                            instance = %self.instance_id,
                            activity = A::NAME,
                            attempt,
                            error = %err,
                            "activity failed permanently"
                        );
                        self.append(EventKind::ActivityFailed {
                            activity: A::NAME.to_string(),
                            attempt,
                            error: err.to_string(),
                            permanent: true,
                        })
                        .await?;
                        return Err(ExecutionError::ActivityFailed {
                            activity: A::NAME.to_string(),
                            attempt,
                            reason: err.to_string(),
                        });
                    }
                },
            }
        }
    }

    // =========================================================================
    // Signal / timer race
    // =========================================================================

    /// Await the first of: the named signal, or a deadline `timeout` from
    /// now. The single reusable race primitive every wait point goes
    /// through.
    ///
    /// A buffered envelope (signal sent before this wait) is consumed
    /// immediately. Otherwise the wait is registered durably (subscription
    /// plus persisted fire time) and exactly one of `SignalReceived` /
    /// `TimerFired` will ever be appended for it; the losing side's
    /// registration vanishes with the wait.
    pub async fn wait_signal(&self, name: &str, timeout: Duration) -> Result<WaitOutcome> {
        // Replay phase.
        if let Some(event) = self.peek() {
            return match event.kind {
                EventKind::SignalReceived { name: ref n, ref payload } if n == name => {
                    self.advance();
                    Ok(WaitOutcome::Signal(payload.clone()))
                }
                EventKind::TimerFired { name: ref n } if n == name => {
                    self.advance();
                    Ok(WaitOutcome::Deadline)
                }
                EventKind::WorkflowFailed { kind: FailureKind::Canceled, ref reason } => {
                    Err(ExecutionError::Canceled(reason.clone()))
                }
                ref other => Err(ExecutionError::Nondeterminism(format!(
                    "expected resolution of wait '{}', history has {}",
                    name,
                    other.name()
                ))),
            };
        }

        self.check_shutdown()?;

        // A registration for this wait may already exist: a resumed instance
        // inherits its persisted fire time rather than granting the user a
        // fresh window.
        let inherited = matches!(
            self.storage.get_open_wait(self.instance_id).await?,
            Some(ref wait) if wait.wait_name == name
        );

        if !inherited {
            // First arrival at this wait point. A signal that came early is
            // consumed from the inbox now; with no registration yet there is
            // no timer to race, so the plain append path is safe.
            if let Some(envelope) = self
                .storage
                .take_buffered_signal(self.instance_id, name)
                .await?
            {
                debug!(instance = %self.instance_id, signal = name, "consumed buffered signal");
                self.append(EventKind::SignalReceived {
                    name: name.to_string(),
                    payload: envelope.payload.clone(),
                })
                .await?;
                return Ok(WaitOutcome::Signal(envelope.payload));
            }

            let fire_at = chrono::Duration::from_std(timeout)
                .map(|d| Utc::now() + d)
                .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC);

            self.storage
                .register_wait(
                    self.instance_id,
                    WaitRegistration {
                        wait_name: name.to_string(),
                        signal_name: Some(name.to_string()),
                        fire_at: Some(fire_at),
                        registered_at: Utc::now(),
                    },
                )
                .await?;
        }

        // From here the registration is live and a deadline may be racing.
        // Any envelope still in the inbox (buffered while the instance was
        // down, or slipped in between the check and the registration) must
        // go through the arbitrated path; if the wait already resolved, the
        // late envelope is dropped, fire-and-forget.
        if let Some(envelope) = self
            .storage
            .take_buffered_signal(self.instance_id, name)
            .await?
        {
            let resolved = self
                .storage
                .resolve_wait(
                    self.instance_id,
                    EventKind::SignalReceived {
                        name: name.to_string(),
                        payload: envelope.payload,
                    },
                )
                .await?;
            if resolved.is_none() {
                debug!(instance = %self.instance_id, signal = name, "dropped late signal envelope");
            }
            // The resolution event (ours or the winner's) is picked up from
            // the history tail below.
        }

        self.park_for_wait(name).await
    }

    /// Park until the store shows this wait's resolution event.
    async fn park_for_wait(&self, name: &str) -> Result<WaitOutcome> {
        let notifier = self.wakers.subscribe(self.instance_id);
        loop {
            let notified = notifier.notified();

            let tail = self
                .storage
                .load_history_after(self.instance_id, self.last_seq())
                .await?;
            for event in tail {
                match event.kind {
                    EventKind::SignalReceived { name: ref n, ref payload } if n == name => {
                        let payload = payload.clone();
                        self.push_consumed(event);
                        return Ok(WaitOutcome::Signal(payload));
                    }
                    EventKind::TimerFired { name: ref n } if n == name => {
                        self.push_consumed(event);
                        return Ok(WaitOutcome::Deadline);
                    }
                    EventKind::WorkflowFailed { kind: FailureKind::Canceled, ref reason } => {
                        let reason = reason.clone();
                        self.push_consumed(event);
                        return Err(ExecutionError::Canceled(reason));
                    }
                    ref other => {
                        return Err(ExecutionError::Nondeterminism(format!(
                            "unexpected {} while awaiting wait '{}'",
                            other.name(),
                            name
                        )));
                    }
                }
            }

            tokio::select! {
                _ = notified => {}
                _ = self.shutdown.cancelled() => return Err(ExecutionError::ShuttingDown),
            }
        }
    }

    // =========================================================================
    // Child workflows
    // =========================================================================

    /// Spawn a child instance and await its result.
    ///
    /// The child id is derived deterministically from the parent, the call
    /// position, the child type, and the input, so replay converges on the
    /// same child instead of spawning a second one. Completion is folded
    /// into the parent's history by the parent itself: a one-shot,
    /// at-most-once hand-off from the child's terminal event.
    pub async fn child<W: super::registry::Workflow>(
        &self,
        input: &W::Input,
    ) -> Result<W::Output> {
        let input_bytes = serialize_value(input)?;
        let call_position = self.cursor.lock().expect("cursor lock poisoned").pos;

        let mut seed = Vec::new();
        seed.extend_from_slice(W::TYPE.as_bytes());
        seed.extend_from_slice(&hash_input(&input_bytes).to_le_bytes());
        seed.extend_from_slice(&(call_position as u64).to_le_bytes());
        let child_id = Uuid::new_v5(&self.instance_id, &seed);

        let mut started = false;

        // Replay phase.
        while let Some(event) = self.peek() {
            match event.kind {
                EventKind::ChildStarted {
                    child_id: recorded_id,
                    ref workflow_type,
                } if workflow_type == W::TYPE => {
                    if recorded_id != child_id {
                        return Err(ExecutionError::Nondeterminism(format!(
                            "child '{}' spawned with different identity than history records",
                            W::TYPE
                        )));
                    }
                    started = true;
                    self.advance();
                }
                EventKind::ChildCompleted {
                    child_id: recorded_id,
                    ref outcome,
                } if recorded_id == child_id => {
                    let outcome = outcome.clone();
                    self.advance();
                    return Self::child_outcome::<W>(outcome);
                }
                EventKind::WorkflowFailed { kind: FailureKind::Canceled, ref reason } => {
                    return Err(ExecutionError::Canceled(reason.clone()));
                }
                ref other if !started => {
                    return Err(ExecutionError::Nondeterminism(format!(
                        "expected child '{}' events, history has {}",
                        W::TYPE,
                        other.name()
                    )));
                }
                _ => break,
            }
        }

        self.check_shutdown()?;

        if !started {
            self.append(EventKind::ChildStarted {
                child_id,
                workflow_type: W::TYPE.to_string(),
            })
            .await?;
        }

        // Idempotent: an already-created child reports AlreadyExists and is
        // left to finish on its own.
        self.starter
            .start_child(W::TYPE, child_id, input_bytes, self.instance_id)
            .await?;

        // Park until the child's terminal event is visible, then fold it in.
        let notifier = self.wakers.subscribe(self.instance_id);
        loop {
            let notified = notifier.notified();

            // An external cancel surfaces as a terminal event in our tail.
            let tail = self
                .storage
                .load_history_after(self.instance_id, self.last_seq())
                .await?;
            for event in tail {
                if let EventKind::WorkflowFailed { kind: FailureKind::Canceled, ref reason } =
                    event.kind
                {
                    let reason = reason.clone();
                    self.push_consumed(event);
                    return Err(ExecutionError::Canceled(reason));
                }
            }

            if let Some(record) = self.storage.get_instance(child_id).await? {
                if record.terminal {
                    if let Some(outcome) = self.read_child_outcome(child_id).await? {
                        self.append(EventKind::ChildCompleted {
                            child_id,
                            outcome: outcome.clone(),
                        })
                        .await?;
                        return Self::child_outcome::<W>(outcome);
                    }
                }
            }

            tokio::select! {
                _ = notified => {}
                _ = self.shutdown.cancelled() => return Err(ExecutionError::ShuttingDown),
            }
        }
    }

    /// Derive the child's outcome from its terminal history event.
    async fn read_child_outcome(&self, child_id: Uuid) -> Result<Option<ChildOutcome>> {
        let history = self.storage.load_history(child_id).await?;
        Ok(history.iter().rev().find_map(|event| match &event.kind {
            EventKind::WorkflowCompleted { result } => Some(ChildOutcome::Completed {
                result: result.clone(),
            }),
            EventKind::WorkflowFailed { reason, .. } => Some(ChildOutcome::Failed {
                reason: reason.clone(),
                // The child already exhausted its own retries.
                permanent: true,
            }),
            _ => None,
        }))
    }

    fn child_outcome<W: super::registry::Workflow>(outcome: ChildOutcome) -> Result<W::Output> {
        match outcome {
            ChildOutcome::Completed { result } => Ok(deserialize_value(&result)?),
            ChildOutcome::Failed { reason, .. } => Err(ExecutionError::ChildFailed {
                workflow_type: W::TYPE.to_string(),
                reason,
            }),
        }
    }
}
