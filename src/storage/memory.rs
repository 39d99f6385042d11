use super::{
    error::Result, error::StorageError, CreateOutcome, ExpiredDeadline, HistoryStore,
    InstanceRecord, NewInstance, SignalEnvelope, WaitRegistration,
};
use crate::core::{EventKind, HistoryEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use uuid::Uuid;

/// Everything the store holds for one instance. Kept in a single map entry
/// so the DashMap shard lock serializes all mutation per instance, which is
/// exactly the append-serialization contract.
struct InstanceState {
    record: InstanceRecord,
    events: Vec<HistoryEvent>,
    wait: Option<WaitRegistration>,
    inbox: VecDeque<SignalEnvelope>,
}

impl InstanceState {
    /// Append within the entry lock; also maintains the terminal index and
    /// the discard-on-termination rule for waits and buffered signals.
    fn append(&mut self, instance_id: Uuid, kind: EventKind) -> HistoryEvent {
        let seq = self.events.len() as u64 + 1;
        let event = HistoryEvent::new(instance_id, seq, Utc::now(), kind);
        if event.kind.is_terminal() {
            self.record.terminal = true;
            self.wait = None;
            self.inbox.clear();
        }
        self.events.push(event.clone());
        event
    }
}

/// In-memory history store using DashMap for concurrent access.
///
/// DashMap provides concurrent access through sharding: operations on
/// unrelated instances proceed in parallel, while the entry lock gives each
/// instance the single-writer append discipline the engine relies on.
/// Suitable for tests and single-process development; state does not survive
/// a restart.
///
/// Reference: <https://github.com/xacrimon/dashmap>
pub struct InMemoryHistoryStore {
    instances: dashmap::DashMap<Uuid, InstanceState>,
}

impl InMemoryHistoryStore {
    /// Creates a new in-memory history store.
    pub fn new() -> Self {
        Self {
            instances: dashmap::DashMap::new(),
        }
    }
}

impl Default for InMemoryHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn create_instance(&self, new: NewInstance<'_>) -> Result<CreateOutcome> {
        use dashmap::mapref::entry::Entry;

        match self.instances.entry(new.instance_id) {
            Entry::Occupied(_) => Ok(CreateOutcome::AlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(InstanceState {
                    record: InstanceRecord {
                        instance_id: new.instance_id,
                        workflow_type: new.workflow_type.to_string(),
                        input: new.input.to_vec(),
                        parent_id: new.parent_id,
                        terminal: false,
                        created_at: Utc::now(),
                    },
                    events: Vec::new(),
                    wait: None,
                    inbox: VecDeque::new(),
                });
                Ok(CreateOutcome::Created)
            }
        }
    }

    async fn get_instance(&self, instance_id: Uuid) -> Result<Option<InstanceRecord>> {
        Ok(self
            .instances
            .get(&instance_id)
            .map(|entry| entry.record.clone()))
    }

    async fn list_incomplete(&self) -> Result<Vec<InstanceRecord>> {
        let mut records: Vec<InstanceRecord> = self
            .instances
            .iter()
            .filter(|entry| !entry.record.terminal)
            .map(|entry| entry.record.clone())
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn append(&self, instance_id: Uuid, kind: EventKind) -> Result<HistoryEvent> {
        let mut entry = self
            .instances
            .get_mut(&instance_id)
            .ok_or(StorageError::InstanceNotFound(instance_id))?;
        if entry.record.terminal {
            return Err(StorageError::InstanceTerminal(instance_id));
        }
        Ok(entry.append(instance_id, kind))
    }

    async fn load_history(&self, instance_id: Uuid) -> Result<Vec<HistoryEvent>> {
        Ok(self
            .instances
            .get(&instance_id)
            .map(|entry| entry.events.clone())
            .unwrap_or_default())
    }

    async fn load_history_after(
        &self,
        instance_id: Uuid,
        after_seq: u64,
    ) -> Result<Vec<HistoryEvent>> {
        Ok(self
            .instances
            .get(&instance_id)
            .map(|entry| {
                entry
                    .events
                    .iter()
                    .filter(|e| e.seq > after_seq)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn register_wait(&self, instance_id: Uuid, wait: WaitRegistration) -> Result<()> {
        let mut entry = self
            .instances
            .get_mut(&instance_id)
            .ok_or(StorageError::InstanceNotFound(instance_id))?;
        if entry.record.terminal {
            return Err(StorageError::InstanceTerminal(instance_id));
        }
        entry.wait = Some(wait);
        Ok(())
    }

    async fn get_open_wait(&self, instance_id: Uuid) -> Result<Option<WaitRegistration>> {
        Ok(self
            .instances
            .get(&instance_id)
            .and_then(|entry| entry.wait.clone()))
    }

    async fn resolve_wait(
        &self,
        instance_id: Uuid,
        resolution: EventKind,
    ) -> Result<Option<HistoryEvent>> {
        let mut entry = self
            .instances
            .get_mut(&instance_id)
            .ok_or(StorageError::InstanceNotFound(instance_id))?;
        if entry.record.terminal {
            return Ok(None);
        }

        let matches = match (&entry.wait, &resolution) {
            (Some(wait), EventKind::SignalReceived { name, .. }) => {
                wait.signal_name.as_deref() == Some(name.as_str())
            }
            (Some(wait), EventKind::TimerFired { name }) => {
                wait.fire_at.is_some() && wait.wait_name == *name
            }
            _ => false,
        };

        if !matches {
            return Ok(None);
        }

        // Closing the wait and appending happen under the same entry lock,
        // so only one of a racing signal and timer can get here.
        entry.wait = None;
        Ok(Some(entry.append(instance_id, resolution)))
    }

    async fn buffer_signal(&self, envelope: SignalEnvelope) -> Result<()> {
        let mut entry = self
            .instances
            .get_mut(&envelope.instance_id)
            .ok_or(StorageError::InstanceNotFound(envelope.instance_id))?;
        if entry.record.terminal {
            // Terminated instances silently drop envelopes.
            return Ok(());
        }
        entry.inbox.push_back(envelope);
        Ok(())
    }

    async fn take_buffered_signal(
        &self,
        instance_id: Uuid,
        name: &str,
    ) -> Result<Option<SignalEnvelope>> {
        let mut entry = self
            .instances
            .get_mut(&instance_id)
            .ok_or(StorageError::InstanceNotFound(instance_id))?;
        let position = entry.inbox.iter().position(|env| env.name == name);
        Ok(position.and_then(|idx| entry.inbox.remove(idx)))
    }

    async fn expired_deadlines(&self, now: DateTime<Utc>) -> Result<Vec<ExpiredDeadline>> {
        let mut expired: Vec<ExpiredDeadline> = self
            .instances
            .iter()
            .filter_map(|entry| {
                let wait = entry.wait.as_ref()?;
                let fire_at = wait.fire_at?;
                (fire_at <= now).then(|| ExpiredDeadline {
                    instance_id: entry.record.instance_id,
                    wait_name: wait.wait_name.clone(),
                    fire_at,
                })
            })
            .collect();

        // Oldest first
        expired.sort_by_key(|d| d.fire_at);
        Ok(expired)
    }

    async fn reset(&self) -> Result<()> {
        self.instances.clear();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
