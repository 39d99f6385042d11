//! Activities: the side-effecting units of work a workflow schedules.
//!
//! An activity is the only place a workflow touches the outside world (an
//! HTTP call to a payment provider, a database write, an outbound message).
//! The execution core records an event before and after every invocation, so
//! an activity whose completion event is persisted is never run again, and
//! one whose completion event was lost in a crash WILL be re-invoked.
//! Activities must therefore be idempotent under their
//! [`ActivityContext::idempotency_key`].

use super::error::Retryable;
use crate::core::RetryPolicy;
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Error returned by an activity attempt.
///
/// The variants carry their retry classification: `Transient` failures are
/// retried per policy, `Rejected` is an explicit business rejection that
/// short-circuits retries, and `Timeout`/`Canceled` are produced by the
/// runner, not the activity body.
#[derive(Debug, Error, Clone)]
pub enum ActivityError {
    /// Infrastructure failure (network, 5xx, lock contention). Retried.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Explicit business rejection (invalid documentation, declined
    /// payment). Never retried.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The attempt exceeded its start-to-close timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The heartbeat went silent longer than the heartbeat timeout.
    #[error("heartbeat lost after {0:?}")]
    HeartbeatLost(Duration),

    /// The attempt was canceled cooperatively.
    #[error("canceled")]
    Canceled,
}

impl Retryable for ActivityError {
    fn is_retryable(&self) -> bool {
        match self {
            ActivityError::Transient(_) => true,
            ActivityError::Timeout(_) => true,
            ActivityError::HeartbeatLost(_) => true,
            ActivityError::Rejected(_) => false,
            ActivityError::Canceled => false,
        }
    }
}

/// Per-attempt context handed to an activity body.
///
/// Long-running activities should call [`heartbeat`](Self::heartbeat)
/// periodically and check [`is_canceled`](Self::is_canceled), aborting
/// promptly instead of continuing after their owning instance has timed out
/// or been canceled.
#[derive(Clone)]
pub struct ActivityContext {
    instance_id: Uuid,
    activity: &'static str,
    attempt: u32,
    cancellation: CancellationToken,
    /// Millisecond timestamp of the most recent heartbeat.
    last_heartbeat_ms: Arc<AtomicI64>,
}

impl ActivityContext {
    pub fn new(
        instance_id: Uuid,
        activity: &'static str,
        attempt: u32,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            instance_id,
            activity,
            attempt,
            cancellation,
            last_heartbeat_ms: Arc::new(AtomicI64::new(Utc::now().timestamp_millis())),
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn activity(&self) -> &'static str {
        self.activity
    }

    /// 1-indexed attempt number for this invocation.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Key identifying this logical attempt: `instance:activity:attempt`.
    ///
    /// Passing this to an external system as its idempotency reference makes
    /// a crash-forced re-invocation of the same attempt a no-op there.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}:{}", self.instance_id, self.activity, self.attempt)
    }

    /// Report liveness. Resets the heartbeat watchdog.
    pub fn heartbeat(&self) {
        self.last_heartbeat_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Milliseconds since the last heartbeat (or since the attempt started).
    pub(super) fn millis_since_heartbeat(&self) -> i64 {
        Utc::now().timestamp_millis() - self.last_heartbeat_ms.load(Ordering::Relaxed)
    }

    /// True once cancellation has been requested for this attempt.
    pub fn is_canceled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves when cancellation is requested; for use in `select!` arms of
    /// long-running activity bodies.
    pub async fn canceled(&self) {
        self.cancellation.cancelled().await
    }

    pub(super) fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}

/// A typed, side-effecting unit of work.
///
/// Implementations declare their retry policy and timeouts; the runner and
/// the retry policy evaluator enforce them. The engine only ever sees the
/// serialized input/output, so the closed set of shapes per activity is
/// checked where it is known: here.
#[async_trait]
pub trait Activity: Send + Sync + 'static {
    type Input: Serialize + DeserializeOwned + Send + Sync;
    type Output: Serialize + DeserializeOwned + Send + Sync;

    /// Stable activity name recorded in history events. Must not change
    /// across deployments while instances are in flight.
    const NAME: &'static str;

    /// Retry policy for this activity class.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::STANDARD
    }

    /// Start-to-close timeout for a single attempt.
    fn timeout(&self) -> Duration {
        Duration::from_secs(300)
    }

    /// Maximum silence between heartbeats before the runner cancels the
    /// attempt. `None` disables the watchdog (short activities).
    fn heartbeat_timeout(&self) -> Option<Duration> {
        None
    }

    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> std::result::Result<Self::Output, ActivityError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency_key_is_attempt_scoped() {
        let id = Uuid::new_v4();
        let first = ActivityContext::new(id, "submit_filing", 1, CancellationToken::new());
        let second = ActivityContext::new(id, "submit_filing", 2, CancellationToken::new());

        assert_eq!(first.idempotency_key(), format!("{}:submit_filing:1", id));
        assert_ne!(first.idempotency_key(), second.idempotency_key());
    }

    #[test]
    fn test_activity_error_classification() {
        assert!(ActivityError::Transient("503".into()).is_retryable());
        assert!(ActivityError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(ActivityError::HeartbeatLost(Duration::from_secs(30)).is_retryable());
        assert!(!ActivityError::Rejected("invalid documentation".into()).is_retryable());
        assert!(!ActivityError::Canceled.is_retryable());
    }
}
