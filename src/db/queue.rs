//! Durable event queue over the `pending_events` table.

use async_trait::async_trait;
use opentelemetry::KeyValue;
use sqlx::SqlitePool;
use tracing::warn;

use crate::model::PendingEvent;
use crate::store::{EventStore, StoreError, StoredEvent};
use crate::telemetry::metrics;

/// A named queue inside a [`Db`](super::Db).
#[derive(Debug, Clone)]
pub struct SqliteQueue {
    pool: SqlitePool,
    name: String,
}

impl SqliteQueue {
    pub(crate) fn new(pool: SqlitePool, name: impl Into<String>) -> Self {
        Self {
            pool,
            name: name.into(),
        }
    }

    fn record_operation(&self, operation: &'static str) {
        metrics::store_operations().add(
            1,
            &[
                KeyValue::new("store", self.name.clone()),
                KeyValue::new("operation", operation),
            ],
        );
    }

    /// Drop rows whose payload no longer decodes. Runs in one transaction so
    /// readers see either all or none of them.
    async fn discard_corrupt(&self, seqs: &[i64]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for seq in seqs {
            sqlx::query("DELETE FROM pending_events WHERE queue_name = ?1 AND seq = ?2")
                .bind(&self.name)
                .bind(seq)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        self.record_operation("discard_corrupt");
        Ok(())
    }
}

#[async_trait]
impl EventStore for SqliteQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn append(&self, event: &PendingEvent) -> Result<u64, StoreError> {
        let payload = serde_json::to_string(event)?;
        let result = sqlx::query(
            "INSERT INTO pending_events (queue_name, event_id, dedup_key, payload, enqueued_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&self.name)
        .bind(event.id.0.to_string())
        .bind(&event.dedup_key)
        .bind(payload)
        .bind(event.enqueued_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        self.record_operation("append");
        Ok(result.last_insert_rowid() as u64)
    }

    async fn read_all(&self) -> Result<Vec<StoredEvent>, StoreError> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            "SELECT seq, payload FROM pending_events WHERE queue_name = ?1 ORDER BY seq ASC",
        )
        .bind(&self.name)
        .fetch_all(&self.pool)
        .await?;
        self.record_operation("read_all");

        let mut records = Vec::with_capacity(rows.len());
        let mut corrupt = Vec::new();
        for (seq, payload) in rows {
            match serde_json::from_str::<PendingEvent>(&payload) {
                Ok(event) => records.push(StoredEvent {
                    seq: seq as u64,
                    event,
                }),
                Err(e) => {
                    warn!(store = %self.name, seq, error = %e, "discarding corrupt record");
                    corrupt.push(seq);
                }
            }
        }

        if !corrupt.is_empty() {
            self.discard_corrupt(&corrupt).await?;
        }
        Ok(records)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM pending_events WHERE queue_name = ?1")
                .bind(&self.name)
                .fetch_one(&self.pool)
                .await?;
        self.record_operation("count");
        Ok(row.0 as usize)
    }

    async fn remove_through(&self, through: u64) -> Result<u64, StoreError> {
        let removed = sqlx::query("DELETE FROM pending_events WHERE queue_name = ?1 AND seq <= ?2")
            .bind(&self.name)
            .bind(through as i64)
            .execute(&self.pool)
            .await?
            .rows_affected();
        self.record_operation("remove");
        Ok(removed)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM pending_events WHERE queue_name = ?1")
            .bind(&self.name)
            .execute(&self.pool)
            .await?;
        self.record_operation("clear");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::model::{Category, InteractionEvent};
    use chrono::Utc;

    async fn test_db() -> Db {
        let db = Db::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    #[tokio::test]
    async fn malformed_payload_is_counted_until_read_discards_it() {
        let db = test_db().await;
        let queue = db.queue("asset");

        let good = PendingEvent::new(
            Category::Asset,
            InteractionEvent::asset_view("https://a.test/1.png"),
            Utc::now(),
        );
        queue.append(&good).await.unwrap();

        sqlx::query(
            "INSERT INTO pending_events (queue_name, event_id, dedup_key, payload, enqueued_at)
             VALUES ('asset', 'x', 'k', 'this is not valid json {{{', ?1)",
        )
        .bind(Utc::now().to_rfc3339())
        .execute(db.pool())
        .await
        .unwrap();
        assert_eq!(queue.count().await.unwrap(), 2);

        let records = queue.read_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event, good);
        assert_eq!(queue.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn queues_with_different_names_are_isolated() {
        let db = test_db().await;
        let assets = db.queue("asset");
        let experiences = db.queue("experience");

        let event = PendingEvent::new(
            Category::Asset,
            InteractionEvent::asset_click("https://a.test/1.png"),
            Utc::now(),
        );
        assets.append(&event).await.unwrap();

        assert_eq!(assets.count().await.unwrap(), 1);
        assert_eq!(experiences.count().await.unwrap(), 0);

        experiences.clear().await.unwrap();
        assert_eq!(assets.count().await.unwrap(), 1);
    }
}
