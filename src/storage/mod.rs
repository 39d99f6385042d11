//! Persistence layer for the telos orchestration engine.
//!
//! This module provides a trait-based interface over the three durable
//! components every workflow instance depends on:
//!
//! - the **history store**: the append-only per-instance event log that the
//!   replay-to-resume protocol reads;
//! - the **signal inbox**: a per-instance mailbox buffering named external
//!   events until a compatible wait consumes them;
//! - the **deadline timers**: persisted fire times attached to wait points,
//!   compared against the current clock rather than counted down in memory,
//!   so they still fire correctly after a process restart.
//!
//! Two backends are provided:
//!
//! - [`InMemoryHistoryStore`]: fast in-memory storage for tests and
//!   single-process development
//! - [`SqliteHistoryStore`]: persistent SQLite-based storage with connection
//!   pooling (feature `sqlite`)
//!
//! # Append serialization
//!
//! Implementations must serialize event appends per instance: sequence
//! numbers are assigned by the store, strictly increasing with no gaps, and
//! [`HistoryStore::resolve_wait`] closes an open wait and appends its
//! resolution event in one atomic step. That atomicity is what makes the
//! signal-versus-timer race produce exactly one resolution event, never both
//! and never neither. Unrelated instances may progress fully in parallel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

mod error;
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use error::{Result, StorageError};
pub use memory::InMemoryHistoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::{PoolConfig, SqliteHistoryStore};

use crate::core::{EventKind, HistoryEvent};

/// Durable record of a created workflow instance.
///
/// This is bookkeeping around the history, not instance state: the state
/// itself is always derived by replaying events. The `terminal` flag is a
/// denormalized index maintained by the store when a terminal event is
/// appended, so recovery can list resumable instances cheaply.
#[derive(Debug, Clone)]
pub struct InstanceRecord {
    pub instance_id: Uuid,
    pub workflow_type: String,
    /// Serialized workflow input, replayed into the body on resume.
    pub input: Vec<u8>,
    /// Parent instance, when this instance was spawned as a child.
    pub parent_id: Option<Uuid>,
    pub terminal: bool,
    pub created_at: DateTime<Utc>,
}

/// Outcome of [`HistoryStore::create_instance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// The `(workflow_type, instance_id)` identity is already taken.
    AlreadyExists,
}

/// Parameters for creating a workflow instance.
#[derive(Debug, Clone)]
pub struct NewInstance<'a> {
    pub instance_id: Uuid,
    pub workflow_type: &'a str,
    pub input: &'a [u8],
    pub parent_id: Option<Uuid>,
}

/// A named external event queued for an instance.
///
/// Envelopes sit in the inbox until the owning instance consumes them or
/// terminates, at which point unconsumed envelopes are discarded.
#[derive(Debug, Clone)]
pub struct SignalEnvelope {
    pub instance_id: Uuid,
    pub name: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

/// The durable registration of a blocking wait point.
///
/// At most one wait is open per instance at a time (instances are logically
/// single-threaded). A wait subscribes to an optional signal name and an
/// optional deadline; resolving it removes the whole registration, which is
/// how the losing side of the race gets canceled.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitRegistration {
    /// Name of the wait point, recorded in `TimerFired` when the deadline wins.
    pub wait_name: String,
    /// Signal name this wait consumes, if any.
    pub signal_name: Option<String>,
    /// Absolute deadline, if any. Persisted fire time, never a countdown.
    pub fire_at: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
}

/// An open wait whose deadline has passed, as seen by the deadline processor.
#[derive(Debug, Clone)]
pub struct ExpiredDeadline {
    pub instance_id: Uuid,
    pub wait_name: String,
    pub fire_at: DateTime<Utc>,
}

/// Trait for history store backends.
///
/// This trait defines the async interface for persisting and retrieving
/// workflow state. Implementations must be thread-safe, must serialize
/// appends per instance, and must never write a partial event: an append
/// either lands completely or not at all.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Create a workflow instance record, detecting duplicate identities.
    async fn create_instance(&self, new: NewInstance<'_>) -> Result<CreateOutcome>;

    /// Fetch one instance record.
    async fn get_instance(&self, instance_id: Uuid) -> Result<Option<InstanceRecord>>;

    /// List all instances whose history has not reached a terminal event.
    /// Used by recovery after a process restart.
    async fn list_incomplete(&self) -> Result<Vec<InstanceRecord>>;

    /// Append an event, assigning the next sequence number.
    ///
    /// Appending a terminal event also marks the instance record terminal,
    /// discards buffered signals, and removes any open wait.
    async fn append(&self, instance_id: Uuid, kind: EventKind) -> Result<HistoryEvent>;

    /// Load the full ordered history of an instance.
    async fn load_history(&self, instance_id: Uuid) -> Result<Vec<HistoryEvent>>;

    /// Load history events with `seq > after_seq`, in order.
    async fn load_history_after(&self, instance_id: Uuid, after_seq: u64)
        -> Result<Vec<HistoryEvent>>;

    /// Register the durable wait for the instance's current blocking point.
    /// Replaces any previous registration (there is at most one).
    async fn register_wait(&self, instance_id: Uuid, wait: WaitRegistration) -> Result<()>;

    /// Fetch the instance's open wait, if any.
    async fn get_open_wait(&self, instance_id: Uuid) -> Result<Option<WaitRegistration>>;

    /// Atomically close the open wait and append its resolution event.
    ///
    /// Returns `None` (and appends nothing) if no open wait matches the
    /// resolution: either there is no wait, a `SignalReceived` names a signal
    /// the wait is not subscribed to, or the race was already won by the
    /// other side. This is the single arbitration point for the
    /// signal-versus-timer race.
    async fn resolve_wait(
        &self,
        instance_id: Uuid,
        resolution: EventKind,
    ) -> Result<Option<HistoryEvent>>;

    /// Buffer a signal envelope for later consumption.
    async fn buffer_signal(&self, envelope: SignalEnvelope) -> Result<()>;

    /// Remove and return the oldest buffered envelope with the given name.
    async fn take_buffered_signal(
        &self,
        instance_id: Uuid,
        name: &str,
    ) -> Result<Option<SignalEnvelope>>;

    /// Open waits whose deadline is at or before `now`, oldest first.
    async fn expired_deadlines(&self, now: DateTime<Utc>) -> Result<Vec<ExpiredDeadline>>;

    /// Delete all stored state. Test and tooling hook.
    async fn reset(&self) -> Result<()>;

    /// Close the store, releasing pooled resources.
    async fn close(&self) -> Result<()>;
}
