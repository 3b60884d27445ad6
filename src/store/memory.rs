//! In-memory event store.
//!
//! Not durable: records live only as long as the value (or a clone of it,
//! which shares the same queue). Used for tests and ephemeral runs. Failure
//! injection lets callers exercise the coordinator's persistence error paths.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use super::{EventStore, StoreError, StoredEvent};
use crate::model::PendingEvent;

#[derive(Debug, Default)]
struct Queue {
    records: VecDeque<StoredEvent>,
    next_seq: u64,
}

/// A store backed by a shared in-process queue.
#[derive(Debug, Clone)]
pub struct MemoryEventStore {
    name: String,
    queue: Arc<RwLock<Queue>>,
    fail_appends: Arc<AtomicBool>,
    fail_removals: Arc<AtomicBool>,
}

impl MemoryEventStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: Arc::new(RwLock::new(Queue {
                records: VecDeque::new(),
                next_seq: 1,
            })),
            fail_appends: Arc::new(AtomicBool::new(false)),
            fail_removals: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make subsequent appends fail until switched off again.
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `remove_through` and `clear` calls fail.
    pub fn fail_removals(&self, fail: bool) {
        self.fail_removals.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn append(&self, event: &PendingEvent) -> Result<u64, StoreError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(format!("{}: append rejected", self.name)));
        }
        let mut queue = self.queue.write().await;
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.records.push_back(StoredEvent {
            seq,
            event: event.clone(),
        });
        Ok(seq)
    }

    async fn read_all(&self) -> Result<Vec<StoredEvent>, StoreError> {
        Ok(self.queue.read().await.records.iter().cloned().collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.queue.read().await.records.len())
    }

    async fn remove_through(&self, through: u64) -> Result<u64, StoreError> {
        if self.fail_removals.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(format!("{}: removal rejected", self.name)));
        }
        let mut queue = self.queue.write().await;
        let before = queue.records.len();
        queue.records.retain(|r| r.seq > through);
        Ok((before - queue.records.len()) as u64)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        if self.fail_removals.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(format!("{}: clear rejected", self.name)));
        }
        self.queue.write().await.records.clear();
        Ok(())
    }
}
