//! Batch coordinator. The public API for submitting and releasing events.
//!
//! The coordinator owns one lane per category and the scheduler. All access
//! to a category's store goes through its lane lock, so an event is either
//! pending, delivered once, or cleared; it is never flushed twice or lost
//! between the read and the removal. The two categories never share a lock.

use opentelemetry::KeyValue;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, watch};
use tracing::{error, info, warn};

use super::lane::{BatchSnapshot, FlushReport, FlushTrigger, Lane};
use super::scheduler::Scheduler;
use crate::clock::{Clock, SystemClock};
use crate::config::BatchConfig;
use crate::delivery::DeliverySink;
use crate::error::{Error, Result};
use crate::model::{Category, EventId, InteractionEvent, PendingEvent};
use crate::store::EventStore;
use crate::telemetry::metrics;

/// State shared between the coordinator and its scheduler task.
pub(crate) struct Shared {
    asset: Mutex<Lane>,
    experience: Mutex<Lane>,
    config: watch::Sender<BatchConfig>,
    clock: Arc<dyn Clock>,
}

impl Shared {
    fn lane(&self, category: Category) -> &Mutex<Lane> {
        match category {
            Category::Asset => &self.asset,
            Category::Experience => &self.experience,
        }
    }

    fn config(&self) -> BatchConfig {
        *self.config.borrow()
    }

    /// Flush every category whose oldest pending event has waited long
    /// enough. Failures are logged; one category never blocks the other.
    pub(crate) async fn flush_due(&self) {
        let max_wait = self.config().max_wait;

        for category in Category::ALL {
            let mut lane = self.lane(category).lock().await;
            if !lane.snapshot().is_due(self.clock.now(), max_wait) {
                continue;
            }
            if let Err(e) = lane.flush(FlushTrigger::Timer).await {
                error!(%category, error = %e, "timed flush failed");
            }
        }
    }
}

/// The batch coordinator.
pub struct Coordinator {
    shared: Arc<Shared>,
    scheduler: StdMutex<Option<Scheduler>>,
}

impl Coordinator {
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::default()
    }

    /// Accept an event: persist it, then flush its category if the batch is
    /// full or batching is off.
    ///
    /// On `Err(Error::Persistence(_))` the event was not accepted and nothing
    /// changed. A failure in the follow-up flush does not fail the submit;
    /// the event is durable and will go out with a later flush.
    pub async fn submit(&self, category: Category, event: InteractionEvent) -> Result<EventId> {
        let config = self.shared.config();
        let mut lane = self.shared.lane(category).lock().await;

        let pending = PendingEvent::new(category, event, self.shared.clock.now());
        if let Err(e) = lane.append(&pending).await {
            metrics::events_submitted().add(
                1,
                &[
                    KeyValue::new("category", category.store_name()),
                    KeyValue::new("result", "error"),
                ],
            );
            warn!(%category, error = %e, "submit rejected");
            return Err(e);
        }
        metrics::events_submitted().add(
            1,
            &[
                KeyValue::new("category", category.store_name()),
                KeyValue::new("result", "ok"),
            ],
        );

        let trigger = if !config.batching_enabled {
            Some(FlushTrigger::Unbatched)
        } else if lane.snapshot().pending_count >= config.max_batch_size {
            Some(FlushTrigger::Size)
        } else {
            None
        };

        if let Some(trigger) = trigger {
            if let Err(e) = lane.flush(trigger).await {
                error!(%category, %trigger, error = %e, "inline flush failed, events stay pending");
            }
        }

        Ok(pending.id)
    }

    /// Flush one category now. `Ok(None)` if it had nothing pending.
    pub async fn flush_category(&self, category: Category) -> Result<Option<FlushReport>> {
        self.shared
            .lane(category)
            .lock()
            .await
            .flush(FlushTrigger::Manual)
            .await
    }

    /// Flush every category, asset first. Each category is flushed
    /// independently; a failure is logged and the next category still runs.
    pub async fn flush(&self) -> Vec<FlushReport> {
        let mut reports = Vec::new();
        for category in Category::ALL {
            match self.flush_category(category).await {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {}
                Err(e) => error!(%category, error = %e, "flush failed"),
            }
        }
        reports
    }

    /// Discard everything pending in both categories without delivering it.
    ///
    /// Both categories are attempted; the first error is returned.
    pub async fn clear(&self) -> Result<()> {
        let mut first_error = None;
        for category in Category::ALL {
            if let Err(e) = self.shared.lane(category).lock().await.clear().await {
                error!(%category, error = %e, "clear failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Current view of a category's batch.
    pub async fn pending(&self, category: Category) -> BatchSnapshot {
        self.shared.lane(category).lock().await.snapshot()
    }

    pub fn config(&self) -> BatchConfig {
        self.shared.config()
    }

    /// Replace the batching configuration. An invalid configuration is
    /// rejected and the current one stays in effect.
    pub fn update_config(&self, config: BatchConfig) -> Result<()> {
        if let Err(e) = config.validate() {
            warn!(error = %e, "config update rejected");
            return Err(e);
        }
        self.shared.config.send_replace(config);
        info!(?config, "config updated");
        Ok(())
    }

    /// Stop the timer, waiting for any flush in progress to finish.
    ///
    /// Pending events stay in their stores and are recovered by the next
    /// coordinator built over them.
    pub async fn shutdown(&self) {
        let scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(scheduler) = scheduler {
            scheduler.stop().await;
        }
        // An inline flush started by `submit` holds its lane lock.
        for category in Category::ALL {
            drop(self.shared.lane(category).lock().await);
        }
        info!("coordinator stopped");
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if let Some(scheduler) = self
            .scheduler
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            scheduler.disarm();
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for a [`Coordinator`]. Both stores and both sinks are required.
pub struct CoordinatorBuilder {
    asset_store: Option<Arc<dyn EventStore>>,
    experience_store: Option<Arc<dyn EventStore>>,
    asset_sink: Option<Arc<dyn DeliverySink>>,
    experience_sink: Option<Arc<dyn DeliverySink>>,
    config: BatchConfig,
    clock: Arc<dyn Clock>,
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self {
            asset_store: None,
            experience_store: None,
            asset_sink: None,
            experience_sink: None,
            config: BatchConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl CoordinatorBuilder {
    pub fn store(mut self, category: Category, store: impl EventStore + 'static) -> Self {
        let store: Arc<dyn EventStore> = Arc::new(store);
        match category {
            Category::Asset => self.asset_store = Some(store),
            Category::Experience => self.experience_store = Some(store),
        }
        self
    }

    pub fn sink(mut self, category: Category, sink: impl DeliverySink + 'static) -> Self {
        let sink: Arc<dyn DeliverySink> = Arc::new(sink);
        match category {
            Category::Asset => self.asset_sink = Some(sink),
            Category::Experience => self.experience_sink = Some(sink),
        }
        self
    }

    pub fn config(mut self, config: BatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Recover both lanes from their stores and arm the scheduler.
    ///
    /// Must be called within a tokio runtime.
    pub async fn start(self) -> Result<Coordinator> {
        self.config.validate()?;

        let missing = |what: &str| Error::Config(format!("coordinator needs {what}"));
        let asset_store = self.asset_store.ok_or_else(|| missing("an asset store"))?;
        let experience_store = self
            .experience_store
            .ok_or_else(|| missing("an experience store"))?;
        let asset_sink = self.asset_sink.ok_or_else(|| missing("an asset sink"))?;
        let experience_sink = self
            .experience_sink
            .ok_or_else(|| missing("an experience sink"))?;

        if asset_store.name() == experience_store.name() {
            return Err(Error::Config(format!(
                "asset and experience stores must differ, both are named {:?}",
                asset_store.name()
            )));
        }

        let asset = Lane::recover(Category::Asset, asset_store, asset_sink).await?;
        let experience =
            Lane::recover(Category::Experience, experience_store, experience_sink).await?;

        let (config_tx, config_rx) = watch::channel(self.config);
        let shared = Arc::new(Shared {
            asset: Mutex::new(asset),
            experience: Mutex::new(experience),
            config: config_tx,
            clock: self.clock,
        });

        let scheduler = Scheduler::spawn(Arc::clone(&shared), config_rx);
        info!(config = ?self.config, "coordinator started");

        Ok(Coordinator {
            shared,
            scheduler: StdMutex::new(Some(scheduler)),
        })
    }
}
