//! Release Radar — binary entrypoint.
//! Wires config, the shared HTTP client, consumers, and the job registry,
//! runs every monitor once, then hands the poll cycles to the scheduler.

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use release_radar::config::{self, Config};
use release_radar::fanout::{Dispatcher, NotificationConsumer, StorageConsumer};
use release_radar::http;
use release_radar::ingest::providers::netflix::NetflixSource;
use release_radar::ingest::types::ReleaseSource;
use release_radar::ingest::Monitor;
use release_radar::notify::{stdout::StdoutNotifier, webhook::WebhookNotifier, Notifier};
use release_radar::scheduler::JobRegistry;
use release_radar::sink::{sqlite::SqliteSink, ReleaseSink};
use release_radar::tracker::ConsumerId;

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

/// Hands out stable consumer ids in registration order.
#[derive(Default)]
struct IdSeq(u32);

impl IdSeq {
    fn next(&mut self) -> ConsumerId {
        let id = ConsumerId(self.0);
        self.0 += 1;
        id
    }
}

fn build_notifications(
    cfg: &Config,
    client: &reqwest::Client,
    ids: &mut IdSeq,
) -> Vec<NotificationConsumer> {
    let mut consumers = Vec::new();
    for nc in cfg.enabled_notifications() {
        let transport: Arc<dyn Notifier> = match nc.kind.as_str() {
            "stdout" => Arc::new(StdoutNotifier::new()),
            "webhook" => Arc::new(
                WebhookNotifier::new(client.clone(), nc.endpoints.clone())
                    .with_retries(cfg.http.max_retries),
            ),
            other => {
                tracing::warn!(kind = other, "notification type not recognized, skipping");
                continue;
            }
        };
        consumers.push(NotificationConsumer {
            id: ids.next(),
            transport,
            immediate: nc.immediate_send,
            normalize_send_time: nc.update_send_time,
            format: nc.msg_format,
        });
    }
    consumers
}

async fn build_storage(
    cfg: &Config,
    source_name: &str,
    ids: &mut IdSeq,
) -> Result<Vec<StorageConsumer>> {
    let mut consumers = Vec::new();
    let table = format!("{source_name}_releases");
    for sc in cfg.enabled_storage() {
        match sc.backend.as_str() {
            "sqlite" => {
                let sink = SqliteSink::connect(&sc.path, &table).await?;
                sink.ensure_schema().await?;
                consumers.push(StorageConsumer {
                    id: ids.next(),
                    sink: Arc::new(sink),
                });
            }
            other => {
                tracing::warn!(backend = other, "storage backend not recognized, skipping");
            }
        }
    }
    Ok(consumers)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let cfg = config::load_default()?;
    init_tracing(&cfg.log.level);
    cfg.validate()?;

    let client = http::build_client(&cfg.http.headers)?;
    let registry = JobRegistry::new(cfg.scheduler.max_concurrent_jobs);

    let mut ids = IdSeq::default();
    let notifications = build_notifications(&cfg, &client, &mut ids);
    if notifications.is_empty() {
        tracing::warn!("no notification channels enabled, running without notifications");
    }

    let mut monitors = Vec::new();
    for (name, sc) in cfg.enabled_sources() {
        let source: Arc<dyn ReleaseSource> = match name.as_str() {
            "netflix" => Arc::new(NetflixSource::new(
                client.clone(),
                &sc.country,
                &sc.language,
                cfg.http.max_retries,
            )),
            other => {
                tracing::warn!(source = other, "source not recognized, skipping");
                continue;
            }
        };
        let storage = build_storage(&cfg, name, &mut ids).await?;
        if storage.is_empty() {
            tracing::warn!(source = %name, "no storage sinks enabled, running without persistence");
        }
        let dispatcher = Dispatcher {
            notifications: notifications.clone(),
            storage,
        };
        let monitor = Monitor::new(source, dispatcher, Arc::clone(&registry));
        monitors.push((monitor, Duration::from_secs(sc.interval_minutes * 60)));
    }
    if monitors.is_empty() {
        bail!("no sources enabled, exiting");
    }

    // First pass runs immediately; the scheduler takes over from here.
    for (monitor, _) in &monitors {
        monitor.poll_cycle().await;
    }

    if !cfg.scheduler.enable {
        tracing::info!("scheduler is disabled, single pass complete");
        return Ok(());
    }

    for (monitor, every) in &monitors {
        monitor.schedule(*every).await;
    }
    tracing::info!(jobs = registry.len().await, "scheduler started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    registry.shutdown();
    Ok(())
}
