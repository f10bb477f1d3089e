// src/fanout.rs
// Routes unread events to every registered consumer: notification channels
// get rendered messages (sent now or deferred through the job registry),
// storage sinks get one transactional batch per cycle.

use chrono::{DateTime, NaiveTime, Utc};
use metrics::counter;
use std::sync::Arc;

use crate::event::EventStore;
use crate::notify::{render_message, Message, MsgFormat, Notifier};
use crate::scheduler::{JobRegistry, JobTarget, Trigger};
use crate::sink::{map_record, ReleaseSink};
use crate::tracker::{ConsumerId, DeliveryTracker};

/// A notification channel plus its delivery policy.
#[derive(Clone)]
pub struct NotificationConsumer {
    pub id: ConsumerId,
    pub transport: Arc<dyn Notifier>,
    /// Send synchronously during the poll cycle instead of scheduling.
    pub immediate: bool,
    /// Truncate deferred send times to midnight of the release date.
    pub normalize_send_time: bool,
    pub format: MsgFormat,
}

/// A storage sink with its stable consumer identity.
#[derive(Clone)]
pub struct StorageConsumer {
    pub id: ConsumerId,
    pub sink: Arc<dyn ReleaseSink>,
}

/// Per-cycle fanout counters, logged and asserted on in tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanoutReport {
    /// Immediate sends attempted (success or failure).
    pub sent: usize,
    /// One-shot jobs registered for future delivery.
    pub deferred: usize,
    /// Messages whose send time had already passed.
    pub dropped: usize,
    /// Rows inserted across all storage sinks.
    pub persisted: usize,
}

fn midnight_of(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive().and_time(NaiveTime::MIN).and_utc()
}

pub struct Dispatcher {
    pub notifications: Vec<NotificationConsumer>,
    pub storage: Vec<StorageConsumer>,
}

impl Dispatcher {
    /// Fan the store's unread events out to every consumer.
    ///
    /// Consumers are evaluated sequentially: each consumer's read-state
    /// updates are visible before the next consumer is considered. A failure
    /// on one event never aborts the rest of the batch, and a failure on one
    /// consumer never affects another.
    pub async fn fanout(
        &self,
        source: &str,
        store: &EventStore,
        tracker: &mut DeliveryTracker,
        registry: &Arc<JobRegistry>,
        now: DateTime<Utc>,
    ) -> FanoutReport {
        let mut report = FanoutReport::default();
        for consumer in &self.notifications {
            self.fanout_notification(source, consumer, store, tracker, registry, now, &mut report)
                .await;
        }
        for consumer in &self.storage {
            self.fanout_storage(source, consumer, store, tracker, &mut report)
                .await;
        }
        counter!("radar_notifications_sent_total").increment(report.sent as u64);
        counter!("radar_notifications_deferred_total").increment(report.deferred as u64);
        counter!("radar_notifications_dropped_total").increment(report.dropped as u64);
        counter!("radar_records_persisted_total").increment(report.persisted as u64);
        report
    }

    #[allow(clippy::too_many_arguments)]
    async fn fanout_notification(
        &self,
        source: &str,
        consumer: &NotificationConsumer,
        store: &EventStore,
        tracker: &mut DeliveryTracker,
        registry: &Arc<JobRegistry>,
        now: DateTime<Utc>,
        report: &mut FanoutReport,
    ) {
        let transport = consumer.transport.name();
        for event in tracker.unread_for(store, consumer.id) {
            let msg = match render_message(source, &event, consumer.format) {
                Ok(msg) => msg,
                Err(e) => {
                    // Left unread; retried next cycle.
                    tracing::warn!(source, transport, error = %e, "render failed");
                    continue;
                }
            };

            if consumer.immediate {
                match consumer.transport.send(&msg).await {
                    Ok(()) => {
                        tracing::info!(source, transport, release = %msg.name, "notification sent")
                    }
                    Err(e) => {
                        // No automatic retry of a failed immediate send.
                        tracing::error!(source, transport, release = %msg.name, error = %e, "notification failed")
                    }
                }
                report.sent += 1;
                tracker.mark_read(&event.fingerprint, consumer.id);
                continue;
            }

            let send_time = if consumer.normalize_send_time {
                midnight_of(msg.send_time)
            } else {
                msg.send_time
            };
            if send_time <= now {
                tracing::warn!(source, transport, release = %msg.name, %send_time, "send time is earlier than now, dropping");
                report.dropped += 1;
                tracker.mark_read(&event.fingerprint, consumer.id);
                continue;
            }

            let job_name = msg.name.clone();
            registry
                .register(
                    &job_name,
                    Trigger::Date { run_at: send_time },
                    deferred_send(Arc::clone(&consumer.transport), Message { send_time, ..msg }),
                )
                .await;
            report.deferred += 1;
            // Read at registration time, not at actual send time.
            tracker.mark_read(&event.fingerprint, consumer.id);
        }
    }

    async fn fanout_storage(
        &self,
        source: &str,
        consumer: &StorageConsumer,
        store: &EventStore,
        tracker: &mut DeliveryTracker,
        report: &mut FanoutReport,
    ) {
        let sink = consumer.sink.name().to_string();
        let unread = tracker.unread_for(store, consumer.id);
        if unread.is_empty() {
            return;
        }

        let mut batch = Vec::with_capacity(unread.len());
        let mut fingerprints = Vec::with_capacity(unread.len());
        for event in &unread {
            match map_record(event) {
                Ok(record) => {
                    batch.push(record);
                    fingerprints.push(event.fingerprint.clone());
                }
                Err(e) => {
                    tracing::warn!(source, sink = %sink, error = %e, "mapping failed, event stays unread");
                }
            }
        }
        if batch.is_empty() {
            return;
        }

        match consumer.sink.persist_batch(&batch).await {
            Ok(inserted) => {
                // Read-state only advances once the commit has succeeded.
                for fp in &fingerprints {
                    tracker.mark_read(fp, consumer.id);
                }
                report.persisted += inserted;
                tracing::info!(source, sink = %sink, batch = batch.len(), inserted, "batch committed");
            }
            Err(e) => {
                tracing::error!(source, sink = %sink, error = %e, "commit failed, batch stays unread");
            }
        }
    }
}

fn deferred_send(transport: Arc<dyn Notifier>, msg: Message) -> JobTarget {
    let msg = Arc::new(msg);
    Arc::new(move || {
        let transport = Arc::clone(&transport);
        let msg = Arc::clone(&msg);
        Box::pin(async move {
            match transport.send(&msg).await {
                Ok(()) => {
                    tracing::info!(transport = transport.name(), release = %msg.name, "deferred notification sent")
                }
                Err(e) => {
                    tracing::error!(transport = transport.name(), release = %msg.name, error = %e, "deferred notification failed")
                }
            }
        })
    })
}
