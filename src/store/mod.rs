//! Durable event store contract.
//!
//! One store per category. A store is an ordered queue of pending events
//! with store-assigned sequence numbers. It is the source of truth for what
//! is pending; the coordinator's counters are a cache over it.
//!
//! Implementations must guarantee:
//! - `append` is durable before it returns `Ok`. A crash during `append`
//!   loses at most that record.
//! - `read_all` returns records oldest first and never returns a partial or
//!   corrupt record. `count` is a plain row count and may still include
//!   corrupt records that `read_all` has not yet discarded.
//! - `clear` and `remove_through` are atomic with respect to readers.

pub mod memory;

pub use memory::MemoryEventStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::PendingEvent;

/// A pending event as held by a store, with its sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Monotonically increasing within one store. Never reused.
    pub seq: u64,
    pub event: PendingEvent,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// The store's name. Stores with different names never share records.
    fn name(&self) -> &str;

    /// Durably append an event. Returns its sequence number.
    async fn append(&self, event: &PendingEvent) -> Result<u64, StoreError>;

    /// All records, oldest first.
    async fn read_all(&self) -> Result<Vec<StoredEvent>, StoreError>;

    /// Number of records currently held.
    ///
    /// May include corrupt records that the next `read_all` discards, so it
    /// can exceed `read_all().len()` until then.
    async fn count(&self) -> Result<usize, StoreError>;

    /// Remove every record with `seq <= through`. Returns how many were removed.
    async fn remove_through(&self, through: u64) -> Result<u64, StoreError>;

    /// Remove every record.
    async fn clear(&self) -> Result<(), StoreError>;
}

/// Errors from event store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Backend(String),
}
