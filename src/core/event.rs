use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a workflow instance reached a terminal failure state.
///
/// `WorkflowFailed` carries this discriminant so the instance fold can
/// distinguish a timed-out wait and an external cancellation from an
/// activity failure without widening the event set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// An activity failed permanently (or the workflow body returned an error).
    Failure,
    /// A deadline fired before the awaited signal arrived.
    Timeout,
    /// The instance was canceled from outside.
    Canceled,
}

/// Outcome of a child workflow, folded into the parent's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildOutcome {
    /// The child completed; bytes are the child's serialized result.
    Completed { result: Vec<u8> },
    /// The child failed; `permanent` preserves retry classification for the parent.
    Failed { reason: String, permanent: bool },
}

/// The closed set of things that can happen to a workflow instance.
///
/// Every variant is a tagged payload with a known shape, so replay-time
/// deserialization is type-checked instead of going through an open map of
/// dynamic values. Activity inputs and results stay as serialized bytes:
/// their concrete types are only known at the call site that scheduled them,
/// and are re-checked there during replay via the recorded input hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// An activity attempt was handed to the runner.
    ActivityScheduled {
        activity: String,
        attempt: u32,
        input_hash: u64,
    },
    /// An activity attempt succeeded; `result` is its serialized output.
    ActivityCompleted { activity: String, result: Vec<u8> },
    /// An activity attempt failed. `permanent` marks the end of the retry
    /// budget (or a business rejection); a non-permanent failure is followed
    /// by another `ActivityScheduled` after the backoff delay.
    ActivityFailed {
        activity: String,
        attempt: u32,
        error: String,
        permanent: bool,
    },
    /// A named external signal was consumed by a wait point.
    SignalReceived { name: String, payload: Vec<u8> },
    /// The deadline timer of a wait point fired before its signal arrived.
    TimerFired { name: String },
    /// A child workflow instance was started.
    ChildStarted { child_id: Uuid, workflow_type: String },
    /// A child workflow instance finished; delivered by the one-shot
    /// completion callback from child to parent.
    ChildCompleted { child_id: Uuid, outcome: ChildOutcome },
    /// The workflow body returned successfully.
    WorkflowCompleted { result: Vec<u8> },
    /// The workflow reached a terminal failure state.
    WorkflowFailed { kind: FailureKind, reason: String },
}

impl EventKind {
    /// Short name used in logs and storage indexes.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::ActivityScheduled { .. } => "activity_scheduled",
            EventKind::ActivityCompleted { .. } => "activity_completed",
            EventKind::ActivityFailed { .. } => "activity_failed",
            EventKind::SignalReceived { .. } => "signal_received",
            EventKind::TimerFired { .. } => "timer_fired",
            EventKind::ChildStarted { .. } => "child_started",
            EventKind::ChildCompleted { .. } => "child_completed",
            EventKind::WorkflowCompleted { .. } => "workflow_completed",
            EventKind::WorkflowFailed { .. } => "workflow_failed",
        }
    }

    /// True if this event ends the instance's history.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::WorkflowCompleted { .. } | EventKind::WorkflowFailed { .. }
        )
    }
}

/// One immutable record in an instance's append-only history.
///
/// Sequence numbers are assigned by the store, strictly increasing per
/// instance with no gaps; `recorded_at` is captured at append time and is
/// the only wall-clock value an event may carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub instance_id: Uuid,
    pub seq: u64,
    pub recorded_at: DateTime<Utc>,
    pub kind: EventKind,
}

impl HistoryEvent {
    pub fn new(instance_id: Uuid, seq: u64, recorded_at: DateTime<Utc>, kind: EventKind) -> Self {
        Self {
            instance_id,
            seq,
            recorded_at,
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_tagged_encoding() {
        let kind = EventKind::SignalReceived {
            name: "otp".to_string(),
            payload: b"\"123456\"".to_vec(),
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], "signal_received");
        assert_eq!(json["name"], "otp");

        let back: EventKind = serde_json::from_value(json).unwrap();
        assert_eq!(back, kind);
    }

    #[test]
    fn test_terminal_events() {
        let completed = EventKind::WorkflowCompleted { result: vec![] };
        let failed = EventKind::WorkflowFailed {
            kind: FailureKind::Timeout,
            reason: "otp deadline elapsed".to_string(),
        };
        let scheduled = EventKind::ActivityScheduled {
            activity: "verify_payment".to_string(),
            attempt: 1,
            input_hash: 0,
        };

        assert!(completed.is_terminal());
        assert!(failed.is_terminal());
        assert!(!scheduled.is_terminal());
    }
}
