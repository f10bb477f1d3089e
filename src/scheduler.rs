// src/scheduler.rs
// Idempotent registry of named scheduled jobs on tokio timers. Repeated
// registration of the same name reconciles against the existing job instead
// of stacking duplicates: identical trigger parameters are a no-op, changed
// parameters of the same kind reschedule in place, and a kind change
// replaces the job outright.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Deferred work bound at registration time.
pub type JobTarget = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Scheduling rule for a job: recurring interval or one-shot fixed date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Interval { every: Duration },
    Date { run_at: DateTime<Utc> },
}

impl Trigger {
    fn same_kind(&self, other: &Trigger) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::Interval { every } => write!(f, "interval[{}s]", every.as_secs()),
            Trigger::Date { run_at } => write!(f, "date[{}]", run_at.to_rfc3339()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Created,
    Unchanged,
    Rescheduled,
    Replaced,
}

struct JobEntry {
    trigger: Trigger,
    target: JobTarget,
    runs: Arc<AtomicU64>,
    generation: u64,
    handle: JoinHandle<()>,
}

/// Named-job scheduler. One tokio task per job; a global semaphore caps the
/// number of concurrently running job bodies across all jobs. CPU-bound
/// targets should wrap their work in `tokio::task::spawn_blocking`, which
/// runs on the runtime's separate bounded blocking pool.
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, JobEntry>>,
    limit: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    generations: AtomicU64,
}

impl JobRegistry {
    pub fn new(max_concurrent_jobs: usize) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            jobs: Mutex::new(HashMap::new()),
            limit: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            shutdown,
            generations: AtomicU64::new(0),
        })
    }

    /// Register `name` under `trigger`, reconciling against any existing job:
    ///
    /// - absent: job is created.
    /// - same trigger kind, identical parameters: no-op.
    /// - same trigger kind, different parameters: rescheduled in place; the
    ///   existing target and run count are kept (`target` is ignored).
    /// - different trigger kind: replaced with the new target and a fresh
    ///   run count.
    ///
    /// Never an error; conflicts always resolve deterministically. After
    /// `shutdown()` registrations are ignored.
    pub async fn register(
        self: &Arc<Self>,
        name: &str,
        trigger: Trigger,
        target: JobTarget,
    ) -> RegisterOutcome {
        if self.is_shutdown() {
            tracing::warn!(job = name, "registry stopped, ignoring registration");
            return RegisterOutcome::Unchanged;
        }
        let mut jobs = self.jobs.lock().await;
        let Some(existing) = jobs.remove(name) else {
            tracing::info!(job = name, trigger = %trigger, "job scheduled");
            let entry = self.spawn_entry(name, trigger, target, Arc::new(AtomicU64::new(0)));
            jobs.insert(name.to_string(), entry);
            return RegisterOutcome::Created;
        };

        if existing.trigger == trigger {
            tracing::info!(job = name, "job already exists with the same trigger, skipping");
            jobs.insert(name.to_string(), existing);
            return RegisterOutcome::Unchanged;
        }

        existing.handle.abort();
        if existing.trigger.same_kind(&trigger) {
            tracing::info!(job = name, trigger = %trigger, "job exists with different parameters, rescheduling");
            let entry = self.spawn_entry(name, trigger, existing.target, existing.runs);
            jobs.insert(name.to_string(), entry);
            RegisterOutcome::Rescheduled
        } else {
            tracing::info!(job = name, trigger = %trigger, "job exists with different trigger kind, replacing");
            let entry = self.spawn_entry(name, trigger, target, Arc::new(AtomicU64::new(0)));
            jobs.insert(name.to_string(), entry);
            RegisterOutcome::Replaced
        }
    }

    /// Cancel and forget a job. Unknown names are a no-op.
    pub async fn cancel(&self, name: &str) {
        let mut jobs = self.jobs.lock().await;
        if let Some(entry) = jobs.remove(name) {
            entry.handle.abort();
            tracing::info!(job = name, "job cancelled");
        }
    }

    /// Stop dispatching: waiting jobs exit at their next wake-up and no new
    /// runs start; a job body already executing is left to finish.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        tracing::info!("job registry stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.jobs.lock().await.contains_key(name)
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }

    pub async fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn trigger_of(&self, name: &str) -> Option<Trigger> {
        self.jobs.lock().await.get(name).map(|e| e.trigger.clone())
    }

    pub async fn run_count(&self, name: &str) -> Option<u64> {
        self.jobs
            .lock()
            .await
            .get(name)
            .map(|e| e.runs.load(Ordering::Relaxed))
    }

    fn spawn_entry(
        self: &Arc<Self>,
        name: &str,
        trigger: Trigger,
        target: JobTarget,
        runs: Arc<AtomicU64>,
    ) -> JobEntry {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let handle = self.spawn_runner(name.to_string(), trigger.clone(), target.clone(), runs.clone(), generation);
        JobEntry {
            trigger,
            target,
            runs,
            generation,
            handle,
        }
    }

    fn spawn_runner(
        self: &Arc<Self>,
        name: String,
        trigger: Trigger,
        target: JobTarget,
        runs: Arc<AtomicU64>,
        generation: u64,
    ) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        let limit = Arc::clone(&self.limit);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            if *shutdown.borrow() {
                return;
            }
            match trigger {
                Trigger::Interval { every } => {
                    // interval() panics on a zero period; clamp rather than
                    // kill the task.
                    let every = every.max(Duration::from_millis(1));
                    let mut ticker = tokio::time::interval(every);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    // interval() fires immediately; the first real run happens
                    // one full period after registration.
                    ticker.tick().await;
                    loop {
                        tokio::select! {
                            _ = ticker.tick() => {}
                            _ = shutdown.changed() => return,
                        }
                        let permit = tokio::select! {
                            permit = Arc::clone(&limit).acquire_owned() => match permit {
                                Ok(permit) => permit,
                                Err(_) => return,
                            },
                            _ = shutdown.changed() => return,
                        };
                        runs.fetch_add(1, Ordering::Relaxed);
                        target().await;
                        drop(permit);
                    }
                }
                Trigger::Date { run_at } => {
                    let delay = (run_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => return,
                    }
                    let permit = tokio::select! {
                        permit = Arc::clone(&limit).acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => return,
                        },
                        _ = shutdown.changed() => return,
                    };
                    runs.fetch_add(1, Ordering::Relaxed);
                    target().await;
                    drop(permit);
                    // One-shot: remove our own entry unless the name has been
                    // re-registered since.
                    if let Some(registry) = registry.upgrade() {
                        registry.remove_if_generation(&name, generation).await;
                    }
                }
            }
        })
    }

    async fn remove_if_generation(&self, name: &str, generation: u64) {
        let mut jobs = self.jobs.lock().await;
        if jobs.get(name).is_some_and(|e| e.generation == generation) {
            jobs.remove(name);
            tracing::debug!(job = name, "one-shot job finished");
        }
    }
}
