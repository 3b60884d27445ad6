//! Batching engine: coordinator, per-category lanes, dedup, and scheduler.

pub mod coordinator;
pub mod dedup;
pub mod lane;
mod scheduler;

pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use lane::{BatchSnapshot, FlushReport, FlushTrigger};
