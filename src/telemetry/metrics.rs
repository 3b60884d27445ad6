//! Metric instrument factories for tally-rs.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without a registered provider every instrument is a no-op.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("tally-rs")
}

/// Counter: submit calls.
/// Labels: `category`, `result` ("ok" | "error").
pub fn events_submitted() -> Counter<u64> {
    meter()
        .u64_counter("tally.events.submitted")
        .with_description("Number of events submitted")
        .build()
}

/// Counter: batches handed to a sink.
/// Labels: `category`, `trigger`.
pub fn batches_flushed() -> Counter<u64> {
    meter()
        .u64_counter("tally.batches.flushed")
        .with_description("Number of batches flushed")
        .build()
}

/// Counter: events delivered after dedup.
/// Labels: `category`.
pub fn events_delivered() -> Counter<u64> {
    meter()
        .u64_counter("tally.events.delivered")
        .with_description("Number of events delivered to sinks")
        .build()
}

/// Counter: older duplicates dropped by dedup.
/// Labels: `category`.
pub fn events_collapsed() -> Counter<u64> {
    meter()
        .u64_counter("tally.events.collapsed")
        .with_description("Number of duplicate events collapsed before delivery")
        .build()
}

/// Counter: sink failures (errors and panics).
/// Labels: `category`.
pub fn delivery_failures() -> Counter<u64> {
    meter()
        .u64_counter("tally.delivery.failures")
        .with_description("Number of failed batch deliveries")
        .build()
}

/// Counter: durable store operations.
/// Labels: `store`, `operation`.
pub fn store_operations() -> Counter<u64> {
    meter()
        .u64_counter("tally.store.operations")
        .with_description("Number of event store operations")
        .build()
}

/// Histogram: flush duration in milliseconds, read through removal.
/// Labels: `category`.
pub fn flush_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("tally.flush.duration_ms")
        .with_description("Flush duration in milliseconds")
        .with_unit("ms")
        .build()
}
