use super::error::CoreError;
use super::event::{EventKind, FailureKind, HistoryEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle state of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowStatus {
    Running,
    AwaitingSignal,
    Completed,
    Failed,
    TimedOut,
    Canceled,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Running => "RUNNING",
            WorkflowStatus::AwaitingSignal => "AWAITING_SIGNAL",
            WorkflowStatus::Completed => "COMPLETED",
            WorkflowStatus::Failed => "FAILED",
            WorkflowStatus::TimedOut => "TIMED_OUT",
            WorkflowStatus::Canceled => "CANCELED",
        }
    }

    /// True once the instance can no longer advance.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed
                | WorkflowStatus::Failed
                | WorkflowStatus::TimedOut
                | WorkflowStatus::Canceled
        )
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(WorkflowStatus::Running),
            "AWAITING_SIGNAL" => Ok(WorkflowStatus::AwaitingSignal),
            "COMPLETED" => Ok(WorkflowStatus::Completed),
            "FAILED" => Ok(WorkflowStatus::Failed),
            "TIMED_OUT" => Ok(WorkflowStatus::TimedOut),
            "CANCELED" => Ok(WorkflowStatus::Canceled),
            _ => Err(CoreError::InvalidStatus(s.to_string())),
        }
    }
}

/// Snapshot of one workflow instance, derived purely from its history.
///
/// The snapshot is owned by the execution core and mutated only through
/// [`WorkflowInstance::apply`]. Replaying the same events from the same
/// starting point always reproduces the same snapshot; no field here may
/// depend on wall-clock time other than timestamps recorded at append time.
///
/// `AwaitingSignal` never appears in the pure fold: a blocking wait persists
/// its registration in the signal inbox / deadline timer component, not in
/// history, and the engine overlays that registration when serving status
/// queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub workflow_type: String,
    pub instance_id: Uuid,
    pub status: WorkflowStatus,
    /// Number of steps (activities, waits, children) resolved so far.
    pub current_step: u32,
    /// Results of completed activities, keyed by activity name. Used during
    /// replay to skip re-execution of completed side effects.
    pub step_results: HashMap<String, Vec<u8>>,
    /// Most recent failure reason, if any attempt has failed.
    pub last_error: Option<String>,
    /// Serialized workflow result, present once `status` is `Completed`.
    pub result: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub last_event_at: DateTime<Utc>,
}

impl WorkflowInstance {
    /// The empty snapshot an instance starts from, before any event.
    pub fn new(workflow_type: impl Into<String>, instance_id: Uuid, created_at: DateTime<Utc>) -> Self {
        Self {
            workflow_type: workflow_type.into(),
            instance_id,
            status: WorkflowStatus::Running,
            current_step: 0,
            step_results: HashMap::new(),
            last_error: None,
            result: None,
            created_at,
            last_event_at: created_at,
        }
    }

    /// Rebuilds the snapshot by folding `events` in order over the empty
    /// state. This is the replay-to-resume protocol's read side: the result
    /// is a pure function of the event sequence.
    pub fn replay<'a>(
        workflow_type: impl Into<String>,
        instance_id: Uuid,
        created_at: DateTime<Utc>,
        events: impl IntoIterator<Item = &'a HistoryEvent>,
    ) -> Self {
        let mut instance = Self::new(workflow_type, instance_id, created_at);
        for event in events {
            instance.apply(event);
        }
        instance
    }

    /// Applies a single event. Pure state transition: no clock reads, no
    /// storage access, no side effects.
    pub fn apply(&mut self, event: &HistoryEvent) {
        self.last_event_at = event.recorded_at;

        match &event.kind {
            EventKind::ActivityScheduled { .. } => {}
            EventKind::ActivityCompleted { activity, result } => {
                self.step_results.insert(activity.clone(), result.clone());
                self.current_step += 1;
            }
            EventKind::ActivityFailed { error, permanent, .. } => {
                self.last_error = Some(error.clone());
                if *permanent {
                    self.current_step += 1;
                }
            }
            EventKind::SignalReceived { .. } | EventKind::TimerFired { .. } => {
                self.current_step += 1;
            }
            EventKind::ChildStarted { .. } => {}
            EventKind::ChildCompleted { .. } => {
                self.current_step += 1;
            }
            EventKind::WorkflowCompleted { result } => {
                self.status = WorkflowStatus::Completed;
                self.result = Some(result.clone());
            }
            EventKind::WorkflowFailed { kind, reason } => {
                self.status = match kind {
                    FailureKind::Failure => WorkflowStatus::Failed,
                    FailureKind::Timeout => WorkflowStatus::TimedOut,
                    FailureKind::Canceled => WorkflowStatus::Canceled,
                };
                self.last_error = Some(reason.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::ChildOutcome;

    fn event(seq: u64, kind: EventKind) -> HistoryEvent {
        HistoryEvent::new(Uuid::nil(), seq, Utc::now(), kind)
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            WorkflowStatus::Running,
            WorkflowStatus::AwaitingSignal,
            WorkflowStatus::Completed,
            WorkflowStatus::Failed,
            WorkflowStatus::TimedOut,
            WorkflowStatus::Canceled,
        ] {
            assert_eq!(WorkflowStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(WorkflowStatus::from_str("LIMBO").is_err());
    }

    #[test]
    fn test_replay_is_deterministic() {
        let events = vec![
            event(
                1,
                EventKind::ActivityScheduled {
                    activity: "verify_payment".to_string(),
                    attempt: 1,
                    input_hash: 42,
                },
            ),
            event(
                2,
                EventKind::ActivityCompleted {
                    activity: "verify_payment".to_string(),
                    result: b"\"ok\"".to_vec(),
                },
            ),
            event(
                3,
                EventKind::SignalReceived {
                    name: "otp".to_string(),
                    payload: b"\"123456\"".to_vec(),
                },
            ),
            event(
                4,
                EventKind::WorkflowCompleted {
                    result: b"\"AR-000001\"".to_vec(),
                },
            ),
        ];

        let created = Utc::now();
        let first = WorkflowInstance::replay("filing", Uuid::nil(), created, &events);
        let second = WorkflowInstance::replay("filing", Uuid::nil(), created, &events);

        assert_eq!(first, second);
        assert_eq!(first.status, WorkflowStatus::Completed);
        assert_eq!(first.current_step, 2);
        assert_eq!(
            first.step_results.get("verify_payment").map(Vec::as_slice),
            Some(&b"\"ok\""[..])
        );
    }

    #[test]
    fn test_timeout_failure_kind_maps_to_timed_out() {
        let events = vec![event(
            1,
            EventKind::WorkflowFailed {
                kind: FailureKind::Timeout,
                reason: "otp deadline elapsed".to_string(),
            },
        )];
        let instance = WorkflowInstance::replay("filing", Uuid::nil(), Utc::now(), &events);
        assert_eq!(instance.status, WorkflowStatus::TimedOut);
        assert_eq!(instance.last_error.as_deref(), Some("otp deadline elapsed"));
    }

    #[test]
    fn test_transient_failure_keeps_instance_running() {
        let events = vec![
            event(
                1,
                EventKind::ActivityScheduled {
                    activity: "submit_filing".to_string(),
                    attempt: 1,
                    input_hash: 7,
                },
            ),
            event(
                2,
                EventKind::ActivityFailed {
                    activity: "submit_filing".to_string(),
                    attempt: 1,
                    error: "connection reset".to_string(),
                    permanent: false,
                },
            ),
        ];
        let instance = WorkflowInstance::replay("filing", Uuid::nil(), Utc::now(), &events);
        assert_eq!(instance.status, WorkflowStatus::Running);
        assert_eq!(instance.current_step, 0);
        assert_eq!(instance.last_error.as_deref(), Some("connection reset"));
    }

    #[test]
    fn test_child_completion_advances_step() {
        let child_id = Uuid::new_v4();
        let events = vec![
            event(
                1,
                EventKind::ChildStarted {
                    child_id,
                    workflow_type: "compliance_check".to_string(),
                },
            ),
            event(
                2,
                EventKind::ChildCompleted {
                    child_id,
                    outcome: ChildOutcome::Completed {
                        result: b"\"clear\"".to_vec(),
                    },
                },
            ),
        ];
        let instance = WorkflowInstance::replay("filing", Uuid::nil(), Utc::now(), &events);
        assert_eq!(instance.current_step, 1);
        assert_eq!(instance.status, WorkflowStatus::Running);
    }
}
