//! Last-wins collapse of a batch by dedup key.

use std::collections::HashSet;

use crate::model::PendingEvent;
use crate::store::StoredEvent;

/// A batch after duplicate collapse.
#[derive(Debug)]
pub struct Collapsed {
    /// Surviving events in store order.
    pub events: Vec<PendingEvent>,
    /// How many older duplicates were dropped.
    pub collapsed: usize,
}

/// Keep only the most recent record for each dedup key.
///
/// Records must be oldest first (as `read_all` returns them). A survivor
/// keeps its own position, so the output stays in insertion order.
pub fn collapse_latest(records: Vec<StoredEvent>) -> Collapsed {
    let total = records.len();
    let mut seen = HashSet::with_capacity(total);
    let mut events: Vec<PendingEvent> = records
        .into_iter()
        .rev()
        .filter(|r| seen.insert(r.event.dedup_key.clone()))
        .map(|r| r.event)
        .collect();
    events.reverse();

    Collapsed {
        collapsed: total - events.len(),
        events,
    }
}
