//! Periodic timer driving time-based flushes.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::coordinator::Shared;
use crate::config::BatchConfig;

/// Stand-in deadline when `last_tick + flush_interval` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365);

/// Handle to the running timer task.
pub(crate) struct Scheduler {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl Scheduler {
    /// Arm the timer. Each tick flushes every category whose batch has
    /// waited at least `max_wait`.
    pub(crate) fn spawn(shared: Arc<Shared>, mut config: watch::Receiver<BatchConfig>) -> Self {
        let shutdown = Arc::new(Notify::new());
        let stop = Arc::clone(&shutdown);

        let handle = tokio::spawn(async move {
            let mut last_tick = Instant::now();
            info!("scheduler armed");

            loop {
                let period = config.borrow_and_update().flush_interval;
                let deadline = last_tick
                    .checked_add(period)
                    .unwrap_or_else(|| Instant::now() + FAR_FUTURE);

                tokio::select! {
                    _ = stop.notified() => {
                        info!("scheduler disarmed");
                        return;
                    }
                    changed = config.changed() => {
                        if changed.is_err() {
                            debug!("config channel closed, scheduler stopping");
                            return;
                        }
                        // Re-read the period against the same last tick.
                        continue;
                    }
                    _ = tokio::time::sleep_until(deadline) => {}
                }

                last_tick = Instant::now();
                shared.flush_due().await;
            }
        });

        Self { shutdown, handle }
    }

    /// Ask the timer to stop after its current tick, without waiting.
    pub(crate) fn disarm(&self) {
        self.shutdown.notify_one();
    }

    /// Stop the timer and wait for an in-flight tick to finish.
    pub(crate) async fn stop(self) {
        self.disarm();
        if let Err(e) = self.handle.await {
            warn!("scheduler task ended abnormally: {e}");
        }
    }
}
