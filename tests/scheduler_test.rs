//! Timer-driven flushing against the real clock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tally_rs::config::BatchConfig;
use tally_rs::delivery::{DeliveryError, DeliverySink};
use tally_rs::engine::Coordinator;
use tally_rs::model::{Category, InteractionEvent, PendingEvent};
use tally_rs::store::{EventStore, MemoryEventStore};

#[derive(Clone, Default)]
struct Recorder {
    batches: Arc<Mutex<Vec<usize>>>,
}

impl DeliverySink for Recorder {
    fn deliver(&self, _category: Category, batch: &[PendingEvent]) -> Result<(), DeliveryError> {
        self.batches.lock().unwrap().push(batch.len());
        Ok(())
    }
}

fn fast_config() -> BatchConfig {
    BatchConfig {
        batching_enabled: true,
        max_batch_size: 100,
        flush_interval: Duration::from_millis(10),
        max_wait: Duration::from_millis(50),
    }
}

async fn start(
    config: BatchConfig,
    assets: MemoryEventStore,
    sink: impl DeliverySink + 'static,
) -> Coordinator {
    Coordinator::builder()
        .config(config)
        .store(Category::Asset, assets)
        .store(Category::Experience, MemoryEventStore::new("experience"))
        .sink(Category::Asset, sink)
        .sink(Category::Experience, Recorder::default())
        .start()
        .await
        .expect("coordinator should start")
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

#[tokio::test]
async fn timer_flushes_a_batch_after_max_wait() {
    let assets = MemoryEventStore::new("asset");
    let sink = Recorder::default();
    let coordinator = start(fast_config(), assets.clone(), sink.clone()).await;

    coordinator
        .submit(Category::Asset, InteractionEvent::asset_view("https://cdn.example.com/1.png"))
        .await
        .unwrap();
    coordinator
        .submit(Category::Asset, InteractionEvent::asset_view("https://cdn.example.com/2.png"))
        .await
        .unwrap();

    assert!(wait_for(|| !sink.batches.lock().unwrap().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(*sink.batches.lock().unwrap(), vec![2]);
    assert_eq!(assets.count().await.unwrap(), 0);
    coordinator.shutdown().await;
}

#[tokio::test]
async fn no_timed_flush_after_shutdown() {
    let assets = MemoryEventStore::new("asset");
    let sink = Recorder::default();
    let coordinator = start(fast_config(), assets.clone(), sink.clone()).await;

    coordinator.shutdown().await;
    coordinator
        .submit(Category::Asset, InteractionEvent::asset_view("https://cdn.example.com/1.png"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(sink.batches.lock().unwrap().is_empty());
    assert_eq!(assets.count().await.unwrap(), 1);
}

#[tokio::test]
async fn shortened_interval_takes_effect_without_restart() {
    let assets = MemoryEventStore::new("asset");
    let sink = Recorder::default();
    let slow = BatchConfig {
        flush_interval: Duration::from_secs(3600),
        ..fast_config()
    };
    let coordinator = start(slow, assets, sink.clone()).await;

    coordinator
        .submit(Category::Asset, InteractionEvent::asset_view("https://cdn.example.com/1.png"))
        .await
        .unwrap();
    coordinator.update_config(fast_config()).unwrap();

    assert!(wait_for(|| !sink.batches.lock().unwrap().is_empty()).await);
    coordinator.shutdown().await;
}

#[tokio::test]
async fn unbounded_interval_leaves_the_timer_usable() {
    let assets = MemoryEventStore::new("asset");
    let sink = Recorder::default();
    let never = BatchConfig {
        flush_interval: Duration::MAX,
        ..fast_config()
    };
    let coordinator = start(never, assets.clone(), sink.clone()).await;

    coordinator
        .submit(Category::Asset, InteractionEvent::asset_view("https://cdn.example.com/1.png"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(sink.batches.lock().unwrap().is_empty());

    coordinator.update_config(fast_config()).unwrap();
    assert!(wait_for(|| !sink.batches.lock().unwrap().is_empty()).await);
    assert_eq!(assets.count().await.unwrap(), 0);
    coordinator.shutdown().await;
}

/// Sink that blocks its thread for a while, marking start and finish.
#[derive(Clone, Default)]
struct SlowSink {
    started: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

impl DeliverySink for SlowSink {
    fn deliver(&self, _category: Category, _batch: &[PendingEvent]) -> Result<(), DeliveryError> {
        self.started.store(true, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(200));
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_waits_for_an_in_flight_flush() {
    let assets = MemoryEventStore::new("asset");
    let sink = SlowSink::default();
    let coordinator = start(fast_config(), assets.clone(), sink.clone()).await;

    coordinator
        .submit(Category::Asset, InteractionEvent::asset_view("https://cdn.example.com/1.png"))
        .await
        .unwrap();
    assert!(wait_for(|| sink.started.load(Ordering::SeqCst)).await);

    coordinator.shutdown().await;
    assert!(sink.finished.load(Ordering::SeqCst));
    assert_eq!(assets.count().await.unwrap(), 0);
}
