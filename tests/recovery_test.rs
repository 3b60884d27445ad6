//! Crash recovery over the SQLite store.
//!
//! A "crash" here is dropping the coordinator and the database handle
//! without calling `shutdown` or `close`.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tally_rs::clock::{Clock, ManualClock};
use tally_rs::config::BatchConfig;
use tally_rs::db::Db;
use tally_rs::delivery::{DeliveryError, DeliverySink};
use tally_rs::engine::Coordinator;
use tally_rs::model::{Category, InteractionEvent, PendingEvent};
use tally_rs::store::EventStore;

#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<PendingEvent>>>,
}

impl DeliverySink for Recorder {
    fn deliver(&self, _category: Category, batch: &[PendingEvent]) -> Result<(), DeliveryError> {
        self.events.lock().unwrap().extend_from_slice(batch);
        Ok(())
    }
}

async fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    done()
}

async fn open(path: &Path) -> Db {
    let db = Db::open(path).await.expect("open database");
    db.migrate().await.expect("migrations");
    db
}

// The scheduler ticks quickly, but nothing is due until a test moves the
// manual clock past `max_wait`.
async fn coordinator(db: &Db, sink: Recorder, clock: Arc<ManualClock>) -> Coordinator {
    Coordinator::builder()
        .config(BatchConfig {
            batching_enabled: true,
            max_batch_size: 10,
            flush_interval: Duration::from_millis(10),
            max_wait: Duration::from_secs(5),
        })
        .store(Category::Asset, db.queue(Category::Asset.store_name()))
        .store(Category::Experience, db.queue(Category::Experience.store_name()))
        .sink(Category::Asset, sink.clone())
        .sink(Category::Experience, sink)
        .clock(clock)
        .start()
        .await
        .expect("coordinator should start")
}

#[tokio::test]
async fn events_survive_a_crash_and_flush_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tally.db");
    let clock = Arc::new(ManualClock::default());

    let submitted = {
        let db = open(&path).await;
        let coordinator = coordinator(&db, Recorder::default(), clock.clone()).await;
        let a = coordinator
            .submit(Category::Asset, InteractionEvent::asset_view("https://cdn.example.com/a.png"))
            .await
            .unwrap();
        let b = coordinator
            .submit(Category::Asset, InteractionEvent::asset_view("https://cdn.example.com/b.png"))
            .await
            .unwrap();
        vec![a, b]
    };

    let db = open(&path).await;
    let sink = Recorder::default();
    let coordinator = coordinator(&db, sink.clone(), clock).await;
    assert_eq!(coordinator.pending(Category::Asset).await.pending_count, 2);

    coordinator.flush().await;
    let delivered: Vec<_> = sink.events.lock().unwrap().iter().map(|e| e.id).collect();
    assert_eq!(delivered, submitted);
    assert_eq!(db.queue("asset").count().await.unwrap(), 0);

    coordinator.shutdown().await;
    db.close().await;
}

#[tokio::test]
async fn records_written_directly_are_picked_up_on_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tally.db");
    let clock = Arc::new(ManualClock::default());

    let db = open(&path).await;
    let store = db.queue("experience");
    let first = PendingEvent::new(
        Category::Experience,
        InteractionEvent::experience_view("onboarding"),
        clock.now(),
    );
    let second = PendingEvent::new(
        Category::Experience,
        InteractionEvent::experience_click("checkout"),
        clock.now(),
    );
    store.append(&first).await.unwrap();
    store.append(&second).await.unwrap();

    let sink = Recorder::default();
    let coordinator = coordinator(&db, sink.clone(), clock).await;
    let reports = coordinator.flush().await;

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].category, Category::Experience);
    let delivered = sink.events.lock().unwrap().clone();
    assert_eq!(delivered, vec![first, second]);
    assert_eq!(store.count().await.unwrap(), 0);

    coordinator.shutdown().await;
    db.close().await;
}

#[tokio::test]
async fn recovered_batch_age_comes_from_persisted_timestamps() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tally.db");
    let clock = Arc::new(ManualClock::default());
    let enqueued_at = clock.now();

    {
        let db = open(&path).await;
        let coordinator = coordinator(&db, Recorder::default(), clock.clone()).await;
        coordinator
            .submit(Category::Asset, InteractionEvent::asset_click("https://cdn.example.com/a.png"))
            .await
            .unwrap();
    }

    clock.advance(Duration::from_secs(1));
    let db = open(&path).await;
    let sink = Recorder::default();
    let coordinator = coordinator(&db, sink.clone(), clock.clone()).await;

    let pending = coordinator.pending(Category::Asset).await;
    assert_eq!(pending.first_event_at, Some(enqueued_at));

    // Four more seconds makes the recovered batch five seconds old.
    clock.advance(Duration::from_secs(4));
    assert!(wait_for(|| !sink.events.lock().unwrap().is_empty()).await);
    assert_eq!(sink.events.lock().unwrap().len(), 1);

    coordinator.shutdown().await;
    db.close().await;
}

#[tokio::test]
async fn cleared_events_do_not_come_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tally.db");
    let clock = Arc::new(ManualClock::default());

    {
        let db = open(&path).await;
        let coordinator = coordinator(&db, Recorder::default(), clock.clone()).await;
        coordinator
            .submit(Category::Asset, InteractionEvent::asset_view("https://cdn.example.com/a.png"))
            .await
            .unwrap();
        coordinator.clear().await.unwrap();
        coordinator.shutdown().await;
        db.close().await;
    }

    let db = open(&path).await;
    let sink = Recorder::default();
    let coordinator = coordinator(&db, sink.clone(), clock).await;
    assert_eq!(coordinator.pending(Category::Asset).await.pending_count, 0);
    assert!(coordinator.flush().await.is_empty());
    assert!(sink.events.lock().unwrap().is_empty());

    coordinator.shutdown().await;
    db.close().await;
}
