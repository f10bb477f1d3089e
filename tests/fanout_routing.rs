// tests/fanout_routing.rs
// Immediate vs deferred routing, past-send-time drops, and read-marking
// rules for both consumer kinds.

use anyhow::{anyhow, Result};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use release_radar::event::{normalize, Event, EventStore, Release};
use release_radar::fanout::{Dispatcher, NotificationConsumer, StorageConsumer};
use release_radar::ingest::types::RawRelease;
use release_radar::notify::{Message, MsgFormat, Notifier};
use release_radar::scheduler::{JobRegistry, Trigger};
use release_radar::sink::{ReleaseRecord, ReleaseSink};
use release_radar::tracker::{ConsumerId, DeliveryTracker};

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Message>>,
    fail: bool,
}

impl RecordingNotifier {
    fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, msg: &Message) -> Result<()> {
        self.sent.lock().unwrap().push(msg.clone());
        if self.fail {
            return Err(anyhow!("transport down"));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

#[derive(Default)]
struct RecordingSink {
    rows: Mutex<Vec<ReleaseRecord>>,
    fail_commit: AtomicBool,
}

#[async_trait::async_trait]
impl ReleaseSink for RecordingSink {
    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn persist_batch(&self, records: &[ReleaseRecord]) -> Result<usize> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(anyhow!("commit failed"));
        }
        let mut rows = self.rows.lock().unwrap();
        let mut inserted = 0;
        for rec in records {
            if rows.iter().any(|r| r.name == rec.name) {
                continue;
            }
            rows.push(rec.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    fn name(&self) -> &str {
        "recording"
    }
}

fn event_with_release_time(title: &str, start_time: i64) -> Event {
    let raw = RawRelease {
        title1: title.into(),
        start_time,
        ..RawRelease::default()
    };
    normalize(&raw, Utc::now()).unwrap()
}

fn store_with(events: Vec<Event>) -> EventStore {
    let mut store = EventStore::new();
    for ev in events {
        store.try_insert(ev);
    }
    store
}

fn notification(transport: Arc<RecordingNotifier>, immediate: bool) -> NotificationConsumer {
    NotificationConsumer {
        id: ConsumerId(0),
        transport,
        immediate,
        normalize_send_time: false,
        format: MsgFormat::Text,
    }
}

#[tokio::test]
async fn immediate_consumer_sends_directly_and_registers_no_jobs() {
    let registry = JobRegistry::new(4);
    let transport = Arc::new(RecordingNotifier::default());
    let dispatcher = Dispatcher {
        notifications: vec![notification(Arc::clone(&transport), true)],
        storage: vec![],
    };
    let store = store_with(vec![event_with_release_time("A", Utc::now().timestamp())]);
    let mut tracker = DeliveryTracker::new();

    let report = dispatcher
        .fanout("netflix", &store, &mut tracker, &registry, Utc::now())
        .await;

    assert_eq!(report.sent, 1);
    assert_eq!(report.deferred, 0);
    assert_eq!(transport.sent_count(), 1);
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn deferred_consumer_registers_exactly_one_job_and_no_direct_send() {
    let registry = JobRegistry::new(4);
    let transport = Arc::new(RecordingNotifier::default());
    let dispatcher = Dispatcher {
        notifications: vec![notification(Arc::clone(&transport), false)],
        storage: vec![],
    };
    let future = (Utc::now() + ChronoDuration::days(2)).timestamp();
    let store = store_with(vec![event_with_release_time("A", future)]);
    let mut tracker = DeliveryTracker::new();

    let report = dispatcher
        .fanout("netflix", &store, &mut tracker, &registry, Utc::now())
        .await;

    assert_eq!(report.sent, 0);
    assert_eq!(report.deferred, 1);
    assert_eq!(transport.sent_count(), 0);
    assert_eq!(registry.job_names().await, vec!["A".to_string()]);
    match registry.trigger_of("A").await {
        Some(Trigger::Date { run_at }) => assert!(run_at > Utc::now()),
        other => panic!("expected date trigger, got {other:?}"),
    }

    // Same cycle re-run: nothing is unread, nothing new is registered.
    let again = dispatcher
        .fanout("netflix", &store, &mut tracker, &registry, Utc::now())
        .await;
    assert_eq!(again.deferred, 0);
    assert_eq!(registry.len().await, 1);
}

#[tokio::test]
async fn deferred_send_time_can_be_normalized_to_midnight() {
    let registry = JobRegistry::new(4);
    let transport = Arc::new(RecordingNotifier::default());
    let mut consumer = notification(Arc::clone(&transport), false);
    consumer.normalize_send_time = true;
    let dispatcher = Dispatcher {
        notifications: vec![consumer],
        storage: vec![],
    };
    let future = (Utc::now() + ChronoDuration::days(2)).timestamp();
    let store = store_with(vec![event_with_release_time("A", future)]);
    let mut tracker = DeliveryTracker::new();

    dispatcher
        .fanout("netflix", &store, &mut tracker, &registry, Utc::now())
        .await;

    match registry.trigger_of("A").await {
        Some(Trigger::Date { run_at }) => {
            assert_eq!(run_at.format("%H:%M:%S").to_string(), "00:00:00");
        }
        other => panic!("expected date trigger, got {other:?}"),
    }
}

#[tokio::test]
async fn past_send_time_is_dropped_but_marked_read() {
    let registry = JobRegistry::new(4);
    let transport = Arc::new(RecordingNotifier::default());
    let dispatcher = Dispatcher {
        notifications: vec![notification(Arc::clone(&transport), false)],
        storage: vec![],
    };
    let past = (Utc::now() - ChronoDuration::days(1)).timestamp();
    let store = store_with(vec![event_with_release_time("A", past)]);
    let mut tracker = DeliveryTracker::new();

    let report = dispatcher
        .fanout("netflix", &store, &mut tracker, &registry, Utc::now())
        .await;
    assert_eq!(report.dropped, 1);
    assert_eq!(report.deferred, 0);
    assert!(registry.is_empty().await);

    // Dropped means consumed: the event is not retried next cycle.
    let again = dispatcher
        .fanout("netflix", &store, &mut tracker, &registry, Utc::now())
        .await;
    assert_eq!(again.dropped, 0);
}

#[tokio::test]
async fn failed_immediate_send_is_not_retried() {
    let registry = JobRegistry::new(4);
    let transport = Arc::new(RecordingNotifier::failing());
    let dispatcher = Dispatcher {
        notifications: vec![notification(Arc::clone(&transport), true)],
        storage: vec![],
    };
    let store = store_with(vec![event_with_release_time("A", Utc::now().timestamp())]);
    let mut tracker = DeliveryTracker::new();

    let first = dispatcher
        .fanout("netflix", &store, &mut tracker, &registry, Utc::now())
        .await;
    assert_eq!(first.sent, 1);

    let second = dispatcher
        .fanout("netflix", &store, &mut tracker, &registry, Utc::now())
        .await;
    assert_eq!(second.sent, 0);
    assert_eq!(transport.sent_count(), 1);
}

#[tokio::test]
async fn render_failure_leaves_the_event_unread() {
    let registry = JobRegistry::new(4);
    let transport = Arc::new(RecordingNotifier::default());
    let dispatcher = Dispatcher {
        notifications: vec![notification(Arc::clone(&transport), true)],
        storage: vec![],
    };
    // An event with no name cannot be rendered or scheduled.
    let broken = Event {
        fingerprint: "broken".into(),
        release: Release {
            name: String::new(),
            video_id: 0,
            country: String::new(),
            release_time: Utc::now(),
            collection_id: 0,
            image: String::new(),
            genre_id: 0,
            url: String::new(),
        },
        discovered_at: Utc::now(),
    };
    let store = store_with(vec![broken]);
    let mut tracker = DeliveryTracker::new();

    let report = dispatcher
        .fanout("netflix", &store, &mut tracker, &registry, Utc::now())
        .await;
    assert_eq!(report.sent, 0);
    assert_eq!(tracker.unread_for(&store, ConsumerId(0)).len(), 1);
}

#[tokio::test]
async fn storage_marks_read_only_after_a_successful_commit() {
    let registry = JobRegistry::new(4);
    let sink = Arc::new(RecordingSink::default());
    sink.fail_commit.store(true, Ordering::SeqCst);
    let dispatcher = Dispatcher {
        notifications: vec![],
        storage: vec![StorageConsumer {
            id: ConsumerId(1),
            sink: Arc::clone(&sink) as Arc<dyn ReleaseSink>,
        }],
    };
    let store = store_with(vec![
        event_with_release_time("A", Utc::now().timestamp()),
        event_with_release_time("B", Utc::now().timestamp()),
    ]);
    let mut tracker = DeliveryTracker::new();

    let failed = dispatcher
        .fanout("netflix", &store, &mut tracker, &registry, Utc::now())
        .await;
    assert_eq!(failed.persisted, 0);
    assert_eq!(tracker.unread_for(&store, ConsumerId(1)).len(), 2);

    // Next cycle the commit goes through and the batch is marked read.
    sink.fail_commit.store(false, Ordering::SeqCst);
    let ok = dispatcher
        .fanout("netflix", &store, &mut tracker, &registry, Utc::now())
        .await;
    assert_eq!(ok.persisted, 2);
    assert!(tracker.unread_for(&store, ConsumerId(1)).is_empty());
    assert_eq!(sink.rows.lock().unwrap().len(), 2);
}
