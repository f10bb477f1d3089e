// src/ingest/mod.rs
pub mod providers;
pub mod types;

use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::event::{normalize, EventStore, Insert};
use crate::fanout::{Dispatcher, FanoutReport};
use crate::ingest::types::ReleaseSource;
use crate::scheduler::{JobRegistry, JobTarget, RegisterOutcome, Trigger};
use crate::tracker::DeliveryTracker;

/// One-time metrics registration.
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("radar_feed_items_total", "Raw items decoded from release feeds.");
        describe_counter!("radar_accepted_total", "Events accepted by the dedup store.");
        describe_counter!(
            "radar_duplicates_total",
            "Events rejected as known fingerprints."
        );
        describe_counter!(
            "radar_skipped_total",
            "Raw items without identifying fields."
        );
        describe_counter!("radar_fetch_errors_total", "Source fetch/decode errors.");
        describe_counter!(
            "radar_notifications_sent_total",
            "Immediate notification sends attempted."
        );
        describe_counter!(
            "radar_notifications_deferred_total",
            "Notifications handed to the job registry."
        );
        describe_counter!(
            "radar_notifications_dropped_total",
            "Notifications dropped for past send times."
        );
        describe_counter!(
            "radar_records_persisted_total",
            "Rows inserted across storage sinks."
        );
        describe_gauge!(
            "radar_poll_last_run_ts",
            "Unix ts when a poll cycle last ran."
        );
    });
}

/// Counters for one poll cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    /// New events accepted by the store this cycle.
    pub discovered: usize,
    /// Raw items rejected as already-seen fingerprints.
    pub duplicates: usize,
    pub fanout: FanoutReport,
}

struct MonitorState {
    store: EventStore,
    tracker: DeliveryTracker,
}

/// One monitored source with its dedup store, delivery tracking, and
/// consumer fanout. The whole cycle runs under a single async mutex; fanout
/// is sequential by design, so each consumer's read-state is visible before
/// the next one is evaluated.
pub struct Monitor {
    source: Arc<dyn ReleaseSource>,
    dispatcher: Dispatcher,
    registry: Arc<JobRegistry>,
    state: Mutex<MonitorState>,
}

impl Monitor {
    pub fn new(
        source: Arc<dyn ReleaseSource>,
        dispatcher: Dispatcher,
        registry: Arc<JobRegistry>,
    ) -> Arc<Self> {
        ensure_metrics_described();
        Arc::new(Self {
            source,
            dispatcher,
            registry,
            state: Mutex::new(MonitorState {
                store: EventStore::new(),
                tracker: DeliveryTracker::new(),
            }),
        })
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn job_name(&self) -> String {
        format!("monitor:{}", self.source.name())
    }

    /// One full poll-and-fanout cycle: paginate the source, dedup into the
    /// store, then fan unread events out to every consumer.
    pub async fn poll_cycle(&self) -> CycleSummary {
        let source = self.source.name().to_string();
        let mut state = self.state.lock().await;
        let MonitorState { store, tracker } = &mut *state;

        let mut summary = CycleSummary::default();
        self.collect_new(store, &mut summary).await;
        counter!("radar_accepted_total").increment(summary.discovered as u64);
        counter!("radar_duplicates_total").increment(summary.duplicates as u64);

        summary.fanout = self
            .dispatcher
            .fanout(&source, store, tracker, &self.registry, Utc::now())
            .await;

        gauge!("radar_poll_last_run_ts").set(Utc::now().timestamp() as f64);
        tracing::info!(
            source,
            discovered = summary.discovered,
            duplicates = summary.duplicates,
            sent = summary.fanout.sent,
            deferred = summary.fanout.deferred,
            dropped = summary.fanout.dropped,
            persisted = summary.fanout.persisted,
            "poll cycle finished"
        );
        summary
    }

    /// Paginate from page 1 in source-page order. A fetch or decode failure
    /// ends pagination for this cycle without raising; missed pages are
    /// re-fetched on the next cycle.
    async fn collect_new(&self, store: &mut EventStore, summary: &mut CycleSummary) {
        let mut page: u32 = 1;
        loop {
            let fetched = match self.source.fetch_page(page).await {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(source = self.source.name(), page, error = %e, "fetch failed, ending pagination for this cycle");
                    return;
                }
            };
            let discovered_at = Utc::now();
            for raw in &fetched.items {
                let Some(event) = normalize(raw, discovered_at) else {
                    counter!("radar_skipped_total").increment(1);
                    tracing::debug!(source = self.source.name(), "item lacks identifying fields, skipped");
                    continue;
                };
                match store.try_insert(event) {
                    Insert::Accepted => summary.discovered += 1,
                    Insert::Duplicate => summary.duplicates += 1,
                }
            }
            if page >= fetched.total_pages {
                return;
            }
            page += 1;
        }
    }

    /// Register this monitor's poll cycle as a recurring job. Idempotent:
    /// calling this again with the same interval is a no-op, and a changed
    /// interval reschedules the existing job in place.
    pub async fn schedule(self: &Arc<Self>, every: Duration) -> RegisterOutcome {
        let name = self.job_name();
        let monitor = Arc::clone(self);
        let target: JobTarget = Arc::new(move || {
            let monitor = Arc::clone(&monitor);
            Box::pin(async move {
                monitor.poll_cycle().await;
            })
        });
        self.registry
            .register(&name, Trigger::Interval { every }, target)
            .await
    }
}
