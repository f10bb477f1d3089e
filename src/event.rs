// src/event.rs
// Event normalization and the in-process dedup store.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::ingest::types::RawRelease;

/// Canonical attributes of one observed release. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    /// Human-readable release name, also used for job naming and sink dedup.
    pub name: String,
    pub video_id: i64,
    pub country: String,
    pub release_time: DateTime<Utc>,
    pub collection_id: i64,
    pub image: String,
    pub genre_id: i64,
    pub url: String,
}

/// One fingerprinted observation from a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub fingerprint: String,
    pub release: Release,
    pub discovered_at: DateTime<Utc>,
}

/// Content hash over the identifying title fields. A separator byte keeps
/// ("ab", "c") and ("a", "bc") distinct.
pub fn fingerprint(title1: &str, title2: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title1.as_bytes());
    hasher.update([0x1f]);
    hasher.update(title2.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Release feeds report epoch seconds or epoch milliseconds depending on the
/// endpoint; anything 13 digits wide is milliseconds.
fn parse_epoch(ts: i64) -> DateTime<Utc> {
    let parsed = if ts.abs() >= 1_000_000_000_000 {
        DateTime::<Utc>::from_timestamp_millis(ts)
    } else {
        DateTime::<Utc>::from_timestamp(ts, 0)
    };
    parsed.unwrap_or(DateTime::UNIX_EPOCH)
}

/// Convert a raw feed item into a candidate `Event`.
///
/// Returns `None` when both title fields are empty, i.e. the item carries no
/// identifying fields. Pure: `discovered_at` is supplied by the caller.
pub fn normalize(raw: &RawRelease, discovered_at: DateTime<Utc>) -> Option<Event> {
    if raw.title1.is_empty() && raw.title2.is_empty() {
        return None;
    }
    let name = if raw.title1 != raw.title2 {
        format!("{} {}", raw.title1, raw.title2).trim().to_string()
    } else {
        raw.title1.clone()
    };
    Some(Event {
        fingerprint: fingerprint(&raw.title1, &raw.title2),
        release: Release {
            name,
            video_id: raw.video_id,
            country: raw.country.clone(),
            release_time: parse_epoch(raw.start_time),
            collection_id: raw.collection,
            image: raw.image.clone(),
            genre_id: raw.genre,
            url: raw.url.clone(),
        },
        discovered_at,
    })
}

/// Outcome of a check-and-insert against the fingerprint set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    Accepted,
    Duplicate,
}

/// Insertion-ordered set of accepted events, keyed by fingerprint.
///
/// Grows for the process lifetime; there is no removal. Dedup state does not
/// survive restarts (the storage sinks re-check by name on insert).
#[derive(Debug, Default)]
pub struct EventStore {
    fingerprints: HashSet<String>,
    events: Vec<Arc<Event>>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic check-and-insert. On `Duplicate` the event is discarded and the
    /// first-seen attributes stand.
    pub fn try_insert(&mut self, event: Event) -> Insert {
        if !self.fingerprints.insert(event.fingerprint.clone()) {
            return Insert::Duplicate;
        }
        self.events.push(Arc::new(event));
        Insert::Accepted
    }

    /// All accepted events in insertion order.
    pub fn events(&self) -> &[Arc<Event>] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
