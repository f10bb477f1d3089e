// src/tracker.rs
// Per-(event, consumer) read-state. Guarantees each consumer sees each
// event at most once within the process lifetime.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::event::{Event, EventStore};

/// Stable consumer identity, assigned as a sequence number at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(pub u32);

impl std::fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "consumer-{}", self.0)
    }
}

/// Read/unread bookkeeping, conceptually a many-to-many join table between
/// events and consumers. Rows default to unread: a consumer registered after
/// N events sees the whole backlog on its first query, and a new event is
/// unread for every existing consumer. Marks are monotonic.
#[derive(Debug, Default)]
pub struct DeliveryTracker {
    read: HashMap<ConsumerId, HashSet<String>>,
}

impl DeliveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored events not yet marked read for `consumer`, in store order.
    /// Evaluated lazily against the current store contents.
    pub fn unread_for(&self, store: &EventStore, consumer: ConsumerId) -> Vec<Arc<Event>> {
        let seen = self.read.get(&consumer);
        store
            .events()
            .iter()
            .filter(|ev| seen.map_or(true, |s| !s.contains(ev.fingerprint.as_str())))
            .cloned()
            .collect()
    }

    /// Idempotent; returns `true` only on the first mark.
    pub fn mark_read(&mut self, fingerprint: &str, consumer: ConsumerId) -> bool {
        self.read
            .entry(consumer)
            .or_default()
            .insert(fingerprint.to_string())
    }

    pub fn is_read(&self, fingerprint: &str, consumer: ConsumerId) -> bool {
        self.read
            .get(&consumer)
            .is_some_and(|s| s.contains(fingerprint))
    }
}
