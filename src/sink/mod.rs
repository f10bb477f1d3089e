// src/sink/mod.rs
pub mod sqlite;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

use crate::event::Event;

/// Row shape persisted by storage sinks. Backends add their own auto `id`
/// and `create_time` columns at insert time.
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseRecord {
    pub name: String,
    pub url: String,
    pub image: String,
    pub release_time: DateTime<Utc>,
    pub video_id: i64,
    pub genre_id: i64,
    pub collection_id: i64,
    pub country: String,
}

/// Per-event mapping into the persisted shape. A failure here is logged by
/// the dispatcher and leaves the event unread for the sink, to be retried
/// next cycle.
pub fn map_record(event: &Event) -> Result<ReleaseRecord> {
    let r = &event.release;
    if r.name.is_empty() {
        return Err(anyhow!("release has no name, cannot persist"));
    }
    Ok(ReleaseRecord {
        name: r.name.clone(),
        url: r.url.clone(),
        image: r.image.clone(),
        release_time: r.release_time,
        video_id: r.video_id,
        genre_id: r.genre_id,
        collection_id: r.collection_id,
        country: r.country.clone(),
    })
}

/// A storage backend for release records.
///
/// `persist_batch` runs as one transaction: every record is duplicate-checked
/// by name inside the transaction (defense in depth on top of the event
/// store's fingerprint dedup), the rest are inserted, and the commit happens
/// once at the end. The returned count is the number of rows inserted.
#[async_trait::async_trait]
pub trait ReleaseSink: Send + Sync {
    async fn ensure_schema(&self) -> Result<()>;
    async fn persist_batch(&self, records: &[ReleaseRecord]) -> Result<usize>;
    fn name(&self) -> &str;
}
