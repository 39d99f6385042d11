//! Background processor that fires expired wait deadlines.
//!
//! Runs in a separate task and periodically compares persisted fire times
//! against the current clock, never an in-memory countdown, so deadlines
//! still fire correctly after a process restart. Firing goes through the
//! store's atomic wait resolution, so a deadline and a racing signal can
//! never both win.

use super::context::InstanceWakers;
use crate::core::EventKind;
use crate::storage::{ExpiredDeadline, HistoryStore};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Background deadline processor.
///
/// # Lifecycle
/// 1. Create: `DeadlineProcessor::new(storage, wakers)`
/// 2. Configure: `.with_poll_interval(duration)`
/// 3. Start: `.start()` returns a handle
/// 4. Shutdown: `handle.shutdown().await`
pub struct DeadlineProcessor {
    storage: Arc<dyn HistoryStore>,
    wakers: Arc<InstanceWakers>,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl DeadlineProcessor {
    /// Creates a new deadline processor with the default 1 second poll
    /// interval (±1 second firing precision).
    pub(super) fn new(storage: Arc<dyn HistoryStore>, wakers: Arc<InstanceWakers>) -> Self {
        Self {
            storage,
            wakers,
            poll_interval: Duration::from_secs(1),
            shutdown: CancellationToken::new(),
        }
    }

    /// Sets the poll interval for checking expired deadlines.
    ///
    /// Lower intervals = better precision, higher storage traffic.
    pub(super) fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Starts the processor in a background task. The returned handle must
    /// be used to stop it; dropping the handle without calling shutdown
    /// leaks the background task.
    pub(super) fn start(self) -> DeadlineProcessorHandle {
        let shutdown = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            self.run().await;
        });

        DeadlineProcessorHandle { handle, shutdown }
    }

    async fn run(self) {
        info!(
            "deadline processor started (poll_interval={:?})",
            self.poll_interval
        );

        loop {
            if let Err(e) = self.process_expired().await {
                // Keep polling despite errors; deadlines fire on a later pass.
                error!("error processing deadlines: {}", e);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.shutdown.cancelled() => break,
            }
        }

        info!("deadline processor stopped cleanly");
    }

    /// Fire every overdue deadline. Idempotent: a deadline whose wait is
    /// already resolved claims nothing.
    async fn process_expired(&self) -> crate::storage::Result<()> {
        let expired = self.storage.expired_deadlines(Utc::now()).await?;

        if !expired.is_empty() {
            debug!("processing {} expired deadlines", expired.len());
        }

        for deadline in expired {
            match self.fire(&deadline).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(
                        instance = %deadline.instance_id,
                        wait = %deadline.wait_name,
                        "deadline already resolved by a racing signal"
                    );
                }
                Err(e) => {
                    warn!(
                        instance = %deadline.instance_id,
                        wait = %deadline.wait_name,
                        "failed to fire deadline (will retry): {}", e
                    );
                }
            }
        }

        Ok(())
    }

    /// Fire a single deadline. Returns true if this call won the claim,
    /// false if the wait was already resolved.
    async fn fire(&self, deadline: &ExpiredDeadline) -> crate::storage::Result<bool> {
        let fired = self
            .storage
            .resolve_wait(
                deadline.instance_id,
                EventKind::TimerFired {
                    name: deadline.wait_name.clone(),
                },
            )
            .await?;

        let Some(event) = fired else {
            return Ok(false);
        };

        self.wakers.wake(deadline.instance_id);

        info!(
            instance = %deadline.instance_id,
            wait = %deadline.wait_name,
            seq = event.seq,
            "deadline fired (latency={:?})",
            Utc::now().signed_duration_since(deadline.fire_at)
        );

        Ok(true)
    }
}

/// Handle for stopping the deadline processor.
pub struct DeadlineProcessorHandle {
    handle: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl DeadlineProcessorHandle {
    /// Gracefully shut down the processor, waiting for the in-flight poll
    /// pass to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.handle.await;
    }
}
