//! One category's lane: its store, its batch state, and its sink.
//!
//! Everything here runs with the lane's lock held by the coordinator, so a
//! lane method never races another operation on the same category.

use chrono::{DateTime, TimeDelta, Utc};
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Instrument, debug, error, info, warn};

use super::dedup::{Collapsed, collapse_latest};
use crate::delivery::{DeliveryError, DeliverySink, deliver_guarded};
use crate::error::{Error, Result};
use crate::model::{Category, PendingEvent};
use crate::store::{EventStore, StoredEvent};
use crate::telemetry::flush::{record_flush_result, start_flush_span};
use crate::telemetry::metrics;

/// What caused a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushTrigger {
    /// Pending count reached `max_batch_size`.
    Size,
    /// Batching is disabled; every submit flushes.
    Unbatched,
    /// The scheduler found the batch older than `max_wait`.
    Timer,
    /// An explicit `flush` call.
    Manual,
}

impl FlushTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            FlushTrigger::Size => "size",
            FlushTrigger::Unbatched => "unbatched",
            FlushTrigger::Timer => "timer",
            FlushTrigger::Manual => "manual",
        }
    }
}

impl std::fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a flush that found records to deliver.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushReport {
    pub category: Category,
    pub trigger: FlushTrigger,
    /// Records read from the store (before dedup).
    pub read: usize,
    /// Events handed to the sink.
    pub delivered: usize,
    /// Older duplicates dropped by dedup.
    pub collapsed: usize,
    /// Set when the sink failed. The records were removed regardless.
    pub delivery_error: Option<DeliveryError>,
}

/// Point-in-time view of a category's batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSnapshot {
    pub pending_count: usize,
    /// Oldest unflushed event. `None` exactly when `pending_count == 0`.
    pub first_event_at: Option<DateTime<Utc>>,
}

impl BatchSnapshot {
    fn from_records(records: &[StoredEvent]) -> Self {
        Self {
            pending_count: records.len(),
            first_event_at: records.iter().map(|r| r.event.enqueued_at).min(),
        }
    }

    fn record(&mut self, enqueued_at: DateTime<Utc>) {
        self.pending_count += 1;
        if self.first_event_at.is_none_or(|first| enqueued_at < first) {
            self.first_event_at = Some(enqueued_at);
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    /// Has the oldest pending event waited at least `max_wait` as of `now`?
    pub fn is_due(&self, now: DateTime<Utc>, max_wait: Duration) -> bool {
        match self.first_event_at {
            Some(first) if self.pending_count > 0 => {
                let max_wait = TimeDelta::from_std(max_wait).unwrap_or(TimeDelta::MAX);
                now.signed_duration_since(first) >= max_wait
            }
            _ => false,
        }
    }
}

pub(crate) struct Lane {
    category: Category,
    store: Arc<dyn EventStore>,
    sink: Arc<dyn DeliverySink>,
    state: BatchSnapshot,
}

impl Lane {
    /// Build a lane whose state is seeded from what the store already holds.
    pub(crate) async fn recover(
        category: Category,
        store: Arc<dyn EventStore>,
        sink: Arc<dyn DeliverySink>,
    ) -> Result<Self> {
        let records = store.read_all().await?;
        let state = BatchSnapshot::from_records(&records);
        if state.pending_count > 0 {
            info!(
                %category,
                store = store.name(),
                pending = state.pending_count,
                "recovered pending events"
            );
        }
        Ok(Self {
            category,
            store,
            sink,
            state,
        })
    }

    pub(crate) fn snapshot(&self) -> BatchSnapshot {
        self.state
    }

    /// Persist `event`. State changes only after the store confirms.
    pub(crate) async fn append(&mut self, event: &PendingEvent) -> Result<u64> {
        let seq = self.store.append(event).await?;
        self.state.record(event.enqueued_at);
        debug!(
            category = %self.category,
            seq,
            id = %event.id,
            pending = self.state.pending_count,
            "event persisted"
        );
        Ok(seq)
    }

    /// Read the batch back, collapse duplicates, deliver, then remove what
    /// was read. Returns `None` when there was nothing to flush.
    pub(crate) async fn flush(&mut self, trigger: FlushTrigger) -> Result<Option<FlushReport>> {
        let span = start_flush_span(self.category.store_name(), trigger.as_str());
        let report = async {
            let started = Instant::now();

            let records = match self.store.read_all().await {
                Ok(records) => records,
                Err(e) => {
                    error!(category = %self.category, error = %e, "flush read failed");
                    self.reconcile().await;
                    return Err(Error::from(e));
                }
            };
            let Some(through) = records.last().map(|r| r.seq) else {
                self.state.reset();
                return Ok(None);
            };

            let read = records.len();
            let Collapsed { events, collapsed } = collapse_latest(records);

            let delivery_error = deliver_guarded(self.sink.as_ref(), self.category, &events).err();
            if let Some(ref e) = delivery_error {
                warn!(
                    category = %self.category,
                    %trigger,
                    error = %e,
                    "delivery failed, batch dropped"
                );
                metrics::delivery_failures()
                    .add(1, &[KeyValue::new("category", self.category.store_name())]);
            }

            if let Err(e) = self.store.remove_through(through).await {
                error!(category = %self.category, through, error = %e, "flush removal failed");
                self.reconcile().await;
                return Err(Error::from(e));
            }
            self.state.reset();

            let labels = [KeyValue::new("category", self.category.store_name())];
            metrics::batches_flushed().add(
                1,
                &[
                    KeyValue::new("category", self.category.store_name()),
                    KeyValue::new("trigger", trigger.as_str()),
                ],
            );
            metrics::events_delivered().add(events.len() as u64, &labels);
            metrics::events_collapsed().add(collapsed as u64, &labels);
            metrics::flush_duration_ms().record(started.elapsed().as_secs_f64() * 1000.0, &labels);

            info!(
                category = %self.category,
                %trigger,
                read,
                delivered = events.len(),
                collapsed,
                "batch flushed"
            );

            Ok(Some(FlushReport {
                category: self.category,
                trigger,
                read,
                delivered: events.len(),
                collapsed,
                delivery_error,
            }))
        }
        .instrument(span.clone())
        .await?;

        if let Some(ref r) = report {
            record_flush_result(&span, r.read, r.delivered, r.collapsed);
        }
        Ok(report)
    }

    /// Drop everything pending without delivering it.
    pub(crate) async fn clear(&mut self) -> Result<()> {
        if let Err(e) = self.store.clear().await {
            self.reconcile().await;
            return Err(Error::from(e));
        }
        self.state.reset();
        info!(category = %self.category, "batch cleared");
        Ok(())
    }

    /// Recompute state from the store after a failed mutation.
    async fn reconcile(&mut self) {
        match self.store.read_all().await {
            Ok(records) => self.state = BatchSnapshot::from_records(&records),
            Err(e) => warn!(
                category = %self.category,
                error = %e,
                "cannot reconcile batch state, keeping cached counters"
            ),
        }
    }
}
