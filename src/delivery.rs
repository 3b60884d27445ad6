//! Delivery sinks: where flushed batches go.
//!
//! A sink is registered once per category when the coordinator is built and
//! is invoked synchronously from the flush path, under that category's lock.
//! Implement [`DeliverySink`] directly, or hand the builder a closure via
//! [`sink_fn`].
//!
//! Delivery is fire-and-forget from the coordinator's side. A sink that
//! returns an error, or panics, is logged and counted. The batch is still
//! removed from the store.

use serde::Serialize;
use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::sync::Mutex;

use crate::model::{Category, PendingEvent};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("sink rejected batch: {0}")]
    Rejected(String),

    #[error("sink panicked: {0}")]
    Panicked(String),
}

pub trait DeliverySink: Send + Sync {
    /// Receive one deduplicated batch, oldest first.
    fn deliver(&self, category: Category, batch: &[PendingEvent]) -> Result<(), DeliveryError>;
}

/// Wraps a closure as a [`DeliverySink`].
pub struct FnSink<F>(F);

impl<F> DeliverySink for FnSink<F>
where
    F: Fn(Category, &[PendingEvent]) -> Result<(), DeliveryError> + Send + Sync,
{
    fn deliver(&self, category: Category, batch: &[PendingEvent]) -> Result<(), DeliveryError> {
        (self.0)(category, batch)
    }
}

pub fn sink_fn<F>(f: F) -> FnSink<F>
where
    F: Fn(Category, &[PendingEvent]) -> Result<(), DeliveryError> + Send + Sync,
{
    FnSink(f)
}

/// Invoke `sink`, converting a panic into [`DeliveryError::Panicked`].
pub(crate) fn deliver_guarded(
    sink: &dyn DeliverySink,
    category: Category,
    batch: &[PendingEvent],
) -> Result<(), DeliveryError> {
    match std::panic::catch_unwind(AssertUnwindSafe(|| sink.deliver(category, batch))) {
        Ok(result) => result,
        Err(panic) => {
            let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic payload".to_string()
            };
            Err(DeliveryError::Panicked(msg))
        }
    }
}

// ---------------------------------------------------------------------------
// JSON lines
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct BatchLine<'a> {
    category: Category,
    events: &'a [PendingEvent],
}

/// Writes each batch as one JSON object per line: `{"category":..,"events":[..]}`.
pub struct JsonLinesSink<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<W: Write + Send> DeliverySink for JsonLinesSink<W> {
    fn deliver(&self, category: Category, batch: &[PendingEvent]) -> Result<(), DeliveryError> {
        let line = serde_json::to_string(&BatchLine {
            category,
            events: batch,
        })
        .map_err(|e| DeliveryError::Rejected(format!("encode batch: {e}")))?;

        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(out, "{line}")
            .and_then(|_| out.flush())
            .map_err(|e| DeliveryError::Rejected(format!("write batch: {e}")))
    }
}
