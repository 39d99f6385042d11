//! Bounded execution of activity attempts.
//!
//! The runner owns the worker pool semaphore and the per-attempt
//! enforcement: start-to-close timeout, heartbeat watchdog, cooperative
//! cancellation. Retry scheduling is NOT here: the workflow context owns
//! the attempt loop because every attempt must be recorded in history.

use super::activity::{Activity, ActivityContext, ActivityError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Executes single activity attempts on a bounded worker pool.
///
/// Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct ActivityRunner {
    permits: Arc<Semaphore>,
}

impl ActivityRunner {
    /// Creates a runner allowing at most `max_concurrent` attempts at once.
    /// Excess attempts queue on the semaphore.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Run one attempt to completion, timeout, heartbeat loss, or
    /// cancellation, whichever comes first. Losing arms cancel the attempt
    /// token so a well-behaved body aborts promptly instead of continuing
    /// silently.
    pub async fn run<A: Activity>(
        &self,
        activity: &A,
        ctx: &ActivityContext,
        input: A::Input,
    ) -> std::result::Result<A::Output, ActivityError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ActivityError::Canceled)?;

        let timeout = activity.timeout();
        debug!(
            instance = %ctx.instance_id(),
            activity = ctx.activity(),
            attempt = ctx.attempt(),
            "running activity attempt"
        );

        tokio::select! {
            result = activity.execute(ctx, input) => result,
            _ = tokio::time::sleep(timeout) => {
                warn!(
                    instance = %ctx.instance_id(),
                    activity = ctx.activity(),
                    attempt = ctx.attempt(),
                    "activity attempt exceeded start-to-close timeout {:?}", timeout
                );
                ctx.cancellation().cancel();
                Err(ActivityError::Timeout(timeout))
            }
            err = heartbeat_watchdog(ctx, activity.heartbeat_timeout()) => {
                warn!(
                    instance = %ctx.instance_id(),
                    activity = ctx.activity(),
                    attempt = ctx.attempt(),
                    "activity heartbeat lost"
                );
                ctx.cancellation().cancel();
                Err(err)
            }
            _ = ctx.canceled() => Err(ActivityError::Canceled),
        }
    }
}

/// Resolves with `HeartbeatLost` once the context has been silent longer
/// than `timeout`; never resolves when the watchdog is disabled.
async fn heartbeat_watchdog(ctx: &ActivityContext, timeout: Option<Duration>) -> ActivityError {
    let Some(timeout) = timeout else {
        return std::future::pending().await;
    };

    let check_every = (timeout / 2).max(Duration::from_millis(50));
    loop {
        tokio::time::sleep(check_every).await;
        if ctx.millis_since_heartbeat() > timeout.as_millis() as i64 {
            return ActivityError::HeartbeatLost(timeout);
        }
    }
}
