//! # tally-rs
//!
//! Durable batch coordinator for analytics interaction events.
//!
//! Accepts asset and experience interactions, persists each one before
//! acknowledging it, batches them per category, and releases batches to a
//! delivery sink when they fill up or grow old. Pending events survive a
//! crash and are delivered by the next coordinator built over the same
//! stores.

pub mod clock;
pub mod config;
pub mod db;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod model;
pub mod store;
pub mod telemetry;
