// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod config;
pub mod event;
pub mod fanout;
pub mod http;
pub mod ingest;
pub mod notify;
pub mod scheduler;
pub mod sink;
pub mod tracker;

// ---- Re-exports for stable public API ----
pub use crate::event::{normalize, Event, EventStore, Insert, Release};
pub use crate::fanout::{Dispatcher, FanoutReport, NotificationConsumer, StorageConsumer};
pub use crate::ingest::{CycleSummary, Monitor};
pub use crate::notify::{render_message, Message, MsgFormat, Notifier};
pub use crate::scheduler::{JobRegistry, JobTarget, RegisterOutcome, Trigger};
pub use crate::sink::{map_record, ReleaseRecord, ReleaseSink};
pub use crate::tracker::{ConsumerId, DeliveryTracker};
