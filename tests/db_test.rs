//! SQLite queue contract tests.

use chrono::{TimeDelta, Utc};
use tally_rs::db::Db;
use tally_rs::model::{Category, InteractionEvent, PendingEvent};
use tally_rs::store::EventStore;

async fn test_db() -> Db {
    let db = Db::in_memory().await.expect("in-memory database");
    db.migrate().await.expect("migrations");
    db
}

fn event(n: usize) -> PendingEvent {
    PendingEvent::new(
        Category::Asset,
        InteractionEvent::asset_view(format!("https://cdn.example.com/{n}.png")),
        Utc::now(),
    )
}

#[tokio::test]
async fn health_check_passes() {
    let db = test_db().await;
    db.health_check().await.unwrap();
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let db = test_db().await;
    db.migrate().await.unwrap();
}

#[tokio::test]
async fn read_all_returns_records_in_append_order() {
    let db = test_db().await;
    let queue = db.queue("asset");

    let events: Vec<_> = (0..5).map(event).collect();
    let mut seqs = Vec::new();
    for e in &events {
        seqs.push(queue.append(e).await.unwrap());
    }
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));

    let records = queue.read_all().await.unwrap();
    assert_eq!(records.iter().map(|r| r.seq).collect::<Vec<_>>(), seqs);
    assert_eq!(
        records.into_iter().map(|r| r.event).collect::<Vec<_>>(),
        events
    );
    assert_eq!(queue.count().await.unwrap(), 5);
}

#[tokio::test]
async fn payload_fields_round_trip() {
    let db = test_db().await;
    let queue = db.queue("experience");

    let original = PendingEvent::new(
        Category::Experience,
        InteractionEvent::experience_click("spring-sale")
            .location("banner")
            .detail(serde_json::json!({"variant": "b", "position": 2})),
        Utc::now() - TimeDelta::minutes(3),
    );
    queue.append(&original).await.unwrap();

    let records = queue.read_all().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].event, original);
}

#[tokio::test]
async fn remove_through_keeps_later_records() {
    let db = test_db().await;
    let queue = db.queue("asset");

    queue.append(&event(1)).await.unwrap();
    let through = queue.append(&event(2)).await.unwrap();
    let later = event(3);
    queue.append(&later).await.unwrap();

    assert_eq!(queue.remove_through(through).await.unwrap(), 2);

    let records = queue.read_all().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].event, later);
}

#[tokio::test]
async fn remove_through_on_empty_queue_removes_nothing() {
    let db = test_db().await;
    let queue = db.queue("asset");
    assert_eq!(queue.remove_through(100).await.unwrap(), 0);
}

#[tokio::test]
async fn clear_empties_only_its_queue() {
    let db = test_db().await;
    let assets = db.queue("asset");
    let experiences = db.queue("experience");

    assets.append(&event(1)).await.unwrap();
    assets.append(&event(2)).await.unwrap();
    experiences
        .append(&PendingEvent::new(
            Category::Experience,
            InteractionEvent::experience_view("home-hero"),
            Utc::now(),
        ))
        .await
        .unwrap();

    assets.clear().await.unwrap();
    assert_eq!(assets.count().await.unwrap(), 0);
    assert_eq!(experiences.count().await.unwrap(), 1);
}

#[tokio::test]
async fn sequence_keeps_increasing_after_removal() {
    let db = test_db().await;
    let queue = db.queue("asset");

    let first = queue.append(&event(1)).await.unwrap();
    queue.remove_through(first).await.unwrap();
    let second = queue.append(&event(2)).await.unwrap();
    assert!(second > first);
}

#[tokio::test]
async fn records_persist_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.db");
    let stored = event(7);

    {
        let db = Db::open(&path).await.unwrap();
        db.migrate().await.unwrap();
        db.queue("asset").append(&stored).await.unwrap();
        db.close().await;
    }

    let db = Db::open(&path).await.unwrap();
    db.migrate().await.unwrap();
    let records = db.queue("asset").read_all().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].event, stored);
    db.close().await;
}
