//! The trigger scheduler.
//!
//! Entries live in an in-memory table guarded by a single `RwLock`. A
//! background task ticks on a fixed interval and runs a dispatch pass over the
//! table; each due fire is handed to a bounded worker pool and runs the
//! entry's unit of work on a blocking thread.

use crate::entry::{EntrySnapshot, ScheduledEntry};
use crate::error::SchedulerError;
use crate::trigger::Trigger;
use adpulse_core::{FireId, Result, UnitOfWork, WorkError, execute_caught};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Upper bound on missed fire times collected for one entry in one pass.
const MAX_CATCH_UP: usize = 10_000;

/// Tunables for a [`TriggerScheduler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Number of fires allowed to execute at the same time.
    pub pool_size: usize,
    /// How often the background loop checks for due entries.
    pub tick_interval: Duration,
    /// Misfire grace for entries that do not set their own.
    pub default_misfire_grace: Duration,
    /// Coalescing for entries that do not set their own.
    pub default_coalesce: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            pool_size: 10,
            tick_interval: Duration::from_secs(1),
            default_misfire_grace: Duration::from_secs(60),
            default_coalesce: true,
        }
    }
}

impl SchedulerOptions {
    #[must_use]
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    #[must_use]
    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    #[must_use]
    pub fn with_default_misfire_grace(mut self, grace: Duration) -> Self {
        self.default_misfire_grace = grace;
        self
    }

    #[must_use]
    pub fn with_default_coalesce(mut self, coalesce: bool) -> Self {
        self.default_coalesce = coalesce;
        self
    }
}

/// Point-in-time copy of the scheduler's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub panicked: u64,
    pub skipped_max_instances: u64,
    pub misfired: u64,
}

#[derive(Debug, Default)]
struct Counters {
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    skipped_max_instances: AtomicU64,
    misfired: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            skipped_max_instances: self.skipped_max_instances.load(Ordering::Relaxed),
            misfired: self.misfired.load(Ordering::Relaxed),
        }
    }
}

/// A registered entry with its resolved options and runtime state.
struct EntryState {
    trigger: Trigger,
    job: Arc<dyn UnitOfWork>,
    coalesce: bool,
    max_instances: usize,
    misfire_grace: Duration,
    next_fire: Option<DateTime<Utc>>,
    paused: bool,
    running: Arc<AtomicUsize>,
    last_fired_at: Option<DateTime<Utc>>,
}

impl EntryState {
    fn snapshot(&self, id: &str) -> EntrySnapshot {
        EntrySnapshot {
            id: id.to_string(),
            next_fire_time: self.next_fire,
            trigger: self.trigger.describe(),
            paused: self.paused,
            running_instances: self.running.load(Ordering::SeqCst),
            last_fired_at: self.last_fired_at,
        }
    }
}

/// Holds one slot of an entry's in-flight count for as long as it lives.
struct RunningGuard(Arc<AtomicUsize>);

impl RunningGuard {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Inner {
    options: SchedulerOptions,
    entries: RwLock<BTreeMap<String, EntryState>>,
    workers: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
    counters: Arc<Counters>,
    running: AtomicBool,
}

impl Inner {
    fn tick_at(&self, now: DateTime<Utc>) {
        self.reap_finished();

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for (id, state) in entries.iter_mut() {
            if state.paused {
                continue;
            }
            let Some(first) = state.next_fire else {
                continue;
            };
            if first > now {
                continue;
            }

            let due = if state.coalesce {
                let latest = state.trigger.latest_fire_through(first, now).unwrap_or(first);
                if latest > first {
                    debug!(entry_id = %id, from = %first, to = %latest, "coalescing missed fires");
                }
                vec![latest]
            } else {
                Self::missed_fires(id, &state.trigger, first, now)
            };

            let grace = TimeDelta::from_std(state.misfire_grace).unwrap_or(TimeDelta::MAX);
            for scheduled_for in due {
                let lateness = now - scheduled_for;
                if lateness > grace {
                    Counters::bump(&self.counters.misfired);
                    warn!(
                        entry_id = %id,
                        scheduled_for = %scheduled_for,
                        late_ms = lateness.num_milliseconds(),
                        "fire missed its grace period; skipping"
                    );
                    continue;
                }
                if state.running.load(Ordering::SeqCst) >= state.max_instances {
                    Counters::bump(&self.counters.skipped_max_instances);
                    warn!(
                        entry_id = %id,
                        max_instances = state.max_instances,
                        "entry already at its concurrency limit; skipping fire"
                    );
                    continue;
                }
                self.dispatch(id, state, scheduled_for);
                state.last_fired_at = Some(now);
            }

            state.next_fire = state.trigger.next_fire(now);
        }
    }

    /// Every fire time in `first..=now`, keeping the most recent
    /// `MAX_CATCH_UP` when there are more.
    fn missed_fires(
        id: &str,
        trigger: &Trigger,
        first: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Vec<DateTime<Utc>> {
        let mut due = VecDeque::new();
        let mut dropped = 0_u64;
        let mut cursor = Some(first);
        while let Some(t) = cursor {
            if t > now {
                break;
            }
            if due.len() == MAX_CATCH_UP {
                due.pop_front();
                dropped += 1;
            }
            due.push_back(t);
            cursor = trigger.next_fire(t);
        }
        if dropped > 0 {
            warn!(entry_id = %id, cap = MAX_CATCH_UP, dropped, "too many missed fires; dropping the oldest");
        }
        due.into()
    }

    fn dispatch(&self, id: &str, state: &EntryState, scheduled_for: DateTime<Utc>) {
        let fire_id = FireId::new();
        let guard = RunningGuard::acquire(&state.running);
        let job = Arc::clone(&state.job);
        let workers = Arc::clone(&self.workers);
        let counters = Arc::clone(&self.counters);
        let entry_id = id.to_string();

        Counters::bump(&counters.dispatched);
        debug!(entry_id = %entry_id, fire_id = %fire_id, scheduled_for = %scheduled_for, "dispatching fire");

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.spawn(async move {
            let _guard = guard;
            let Ok(_permit) = workers.acquire_owned().await else {
                warn!(entry_id = %entry_id, fire_id = %fire_id, "worker pool closed; dropping fire");
                return;
            };
            let started = Instant::now();
            let outcome = tokio::task::spawn_blocking(move || execute_caught(job.as_ref())).await;
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match outcome {
                Ok(Ok(_)) => {
                    Counters::bump(&counters.succeeded);
                    debug!(entry_id = %entry_id, fire_id = %fire_id, elapsed_ms, "fire completed");
                }
                Ok(Err(err @ WorkError::Panicked { .. })) => {
                    Counters::bump(&counters.panicked);
                    error!(entry_id = %entry_id, fire_id = %fire_id, elapsed_ms, error = %err, "scheduled job panicked");
                }
                Ok(Err(err)) => {
                    Counters::bump(&counters.failed);
                    error!(entry_id = %entry_id, fire_id = %fire_id, elapsed_ms, error = %err, "scheduled job failed");
                }
                Err(err) => {
                    Counters::bump(&counters.failed);
                    error!(entry_id = %entry_id, fire_id = %fire_id, error = %err, "scheduled job task did not finish");
                }
            }
        });
    }

    fn reap_finished(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        while tasks.try_join_next().is_some() {}
    }

    fn reschedule_all(&self, now: DateTime<Utc>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for state in entries.values_mut().filter(|s| !s.paused) {
            state.next_fire = state.trigger.next_fire(now);
        }
    }
}

/// Fires registered units of work on cron or interval triggers.
///
/// Construct one per process and share it behind an `Arc`. Dispatching needs
/// a Tokio runtime; registration and inspection do not.
pub struct TriggerScheduler {
    inner: Arc<Inner>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TriggerScheduler {
    /// Creates a stopped scheduler.
    #[must_use]
    pub fn new(options: SchedulerOptions) -> Self {
        let permits = options.pool_size.max(1);
        Self {
            inner: Arc::new(Inner {
                options,
                entries: RwLock::new(BTreeMap::new()),
                workers: Arc::new(Semaphore::new(permits)),
                tasks: Mutex::new(JoinSet::new()),
                counters: Arc::new(Counters::default()),
                running: AtomicBool::new(false),
            }),
            loop_handle: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn options(&self) -> &SchedulerOptions {
        &self.inner.options
    }

    /// Registers an entry, replacing any entry with the same id.
    ///
    /// The next fire time is computed immediately from the current time.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Configuration` if the entry has no trigger,
    /// both triggers, an invalid trigger, a zero concurrency limit, or a
    /// trigger that never fires.
    pub fn register(&self, entry: ScheduledEntry) -> Result<String, SchedulerError> {
        let now = Utc::now();
        let trigger = entry.trigger()?.anchored_at(now);
        let next_fire = trigger.next_fire(now).ok_or_else(|| {
            SchedulerError::configuration(format!("entry {} never fires", entry.id))
        })?;

        let options = &self.inner.options;
        let mut entries = self
            .inner
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let running = entries
            .get(&entry.id)
            .map_or_else(|| Arc::new(AtomicUsize::new(0)), |old| Arc::clone(&old.running));
        let replaced = entries.contains_key(&entry.id);

        info!(
            entry_id = %entry.id,
            trigger = %trigger,
            next_fire = %next_fire,
            replaced,
            "registered scheduled entry"
        );

        entries.insert(
            entry.id.clone(),
            EntryState {
                trigger,
                job: entry.job,
                coalesce: entry.coalesce.unwrap_or(options.default_coalesce),
                max_instances: entry.max_concurrent_instances,
                misfire_grace: entry.misfire_grace.unwrap_or(options.default_misfire_grace),
                next_fire: Some(next_fire),
                paused: false,
                running,
                last_fired_at: None,
            },
        );
        Ok(entry.id)
    }

    /// Removes an entry. Unknown ids are ignored.
    pub fn unregister(&self, id: &str) {
        let mut entries = self
            .inner
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if entries.remove(id).is_some() {
            info!(entry_id = %id, "unregistered scheduled entry");
        } else {
            debug!(entry_id = %id, "unregister of unknown entry ignored");
        }
    }

    /// Stops an entry from firing until it is resumed.
    ///
    /// Returns `false`, and logs a warning, if the id is unknown.
    pub fn pause(&self, id: &str) -> bool {
        let mut entries = self
            .inner
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(state) = entries.get_mut(id) else {
            warn!(entry_id = %id, "pause of unknown entry ignored");
            return false;
        };
        state.paused = true;
        state.next_fire = None;
        info!(entry_id = %id, "paused scheduled entry");
        true
    }

    /// Resumes a paused entry, computing its next fire time from now.
    ///
    /// Returns `false`, and logs a warning, if the id is unknown.
    pub fn resume(&self, id: &str) -> bool {
        let mut entries = self
            .inner
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(state) = entries.get_mut(id) else {
            warn!(entry_id = %id, "resume of unknown entry ignored");
            return false;
        };
        state.paused = false;
        state.next_fire = state.trigger.next_fire(Utc::now());
        info!(entry_id = %id, next_fire = ?state.next_fire, "resumed scheduled entry");
        true
    }

    /// Lists every entry, ordered by id.
    #[must_use]
    pub fn list(&self) -> Vec<EntrySnapshot> {
        let entries = self
            .inner
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        entries.iter().map(|(id, state)| state.snapshot(id)).collect()
    }

    /// Returns a single entry's snapshot.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::NotFound` if no entry has this id.
    pub fn snapshot(&self, id: &str) -> Result<EntrySnapshot, SchedulerError> {
        let entries = self
            .inner
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let state = entries
            .get(id)
            .ok_or_else(|| SchedulerError::NotFound { id: id.to_string() })?;
        Ok(state.snapshot(id))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.inner.counters.snapshot()
    }

    /// Runs one dispatch pass as if the clock read `now`.
    ///
    /// The background loop calls this with the wall clock on every tick.
    ///
    /// # Panics
    ///
    /// Panics if a due fire is dispatched outside a Tokio runtime.
    pub fn tick_at(&self, now: DateTime<Utc>) {
        self.inner.tick_at(now);
    }

    /// Starts the background loop. Does nothing if already running.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            info!("scheduler already running; start ignored");
            return;
        }
        self.inner.reschedule_all(Utc::now());

        let inner = Arc::clone(&self.inner);
        let period = inner.options.tick_interval.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                inner.tick_at(Utc::now());
            }
        });

        let previous = self
            .loop_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }

        info!(
            entries = self.len(),
            pool_size = self.inner.options.pool_size,
            tick_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
            "scheduler started"
        );
    }

    /// Stops the background loop.
    ///
    /// With `wait` set, also waits for every in-flight fire to finish.
    /// Otherwise in-flight fires keep running in the background.
    pub async fn stop(&self, wait: bool) {
        let was_running = self.inner.running.swap(false, Ordering::SeqCst);
        let handle = self
            .loop_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            // A pass already in progress finishes before the fire set is taken.
            match handle.await {
                Err(err) if !err.is_cancelled() => {
                    warn!(error = %err, "scheduler loop ended abnormally");
                }
                _ => {}
            }
        }

        if wait {
            let mut tasks =
                std::mem::take(&mut *self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner));
            let in_flight = tasks.len();
            if in_flight > 0 {
                info!(in_flight, "waiting for in-flight fires");
            }
            while let Some(joined) = tasks.join_next().await {
                if let Err(err) = joined {
                    warn!(error = %err, "fire task ended abnormally");
                }
            }
        }

        if was_running {
            info!(wait, "scheduler stopped");
        }
    }
}

impl Drop for TriggerScheduler {
    fn drop(&mut self) {
        let handle = self
            .loop_handle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for TriggerScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerScheduler")
            .field("options", &self.inner.options)
            .field("entries", &self.len())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::CronSpec;
    use adpulse_core::work_fn;
    use serde_json::json;

    fn counting_job(counter: Arc<AtomicUsize>) -> Arc<dyn UnitOfWork> {
        work_fn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!(null))
        })
    }

    fn next_fire(scheduler: &TriggerScheduler, id: &str) -> DateTime<Utc> {
        scheduler
            .snapshot(id)
            .expect("entry exists")
            .next_fire_time
            .expect("next fire computed")
    }

    #[test]
    fn register_rejects_entries_without_a_trigger() {
        let scheduler = TriggerScheduler::new(SchedulerOptions::default());
        let entry = ScheduledEntry::new("bare", work_fn(|| Ok(json!(null))));
        let err = scheduler.register(entry).unwrap_err();
        assert!(err.to_string().contains("neither a cron nor an interval"));
        assert!(scheduler.is_empty());
    }

    #[test]
    fn register_rejects_triggers_that_never_fire() {
        let scheduler = TriggerScheduler::new(SchedulerOptions::default());
        let spec = CronSpec::daily_at(0, 0)
            .with_month(crate::CronField::at(2))
            .with_day_of_month(crate::CronField::at(31));
        let entry = ScheduledEntry::new("feb31", work_fn(|| Ok(json!(null)))).with_cron(spec);
        let err = scheduler.register(entry).unwrap_err();
        assert!(err.to_string().contains("never fires"));
    }

    #[test]
    fn reregistering_replaces_the_entry() {
        let scheduler = TriggerScheduler::new(SchedulerOptions::default());
        let job = work_fn(|| Ok(json!(null)));
        scheduler
            .register(
                ScheduledEntry::new("rollup", Arc::clone(&job)).with_interval(Duration::from_secs(60)),
            )
            .expect("first registration");
        let id = scheduler
            .register(ScheduledEntry::new("rollup", job).with_cron(CronSpec::daily_at(3, 0)))
            .expect("second registration");
        assert_eq!(id, "rollup");

        let listed = scheduler.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "rollup");
        assert_eq!(listed[0].trigger, "cron[0 3 * * *]");
        assert!(listed[0].next_fire_time.is_some());
    }

    #[test]
    fn unregister_is_idempotent() {
        let scheduler = TriggerScheduler::new(SchedulerOptions::default());
        scheduler
            .register(
                ScheduledEntry::new("gone", work_fn(|| Ok(json!(null))))
                    .with_interval(Duration::from_secs(5)),
            )
            .expect("registered");
        scheduler.unregister("gone");
        scheduler.unregister("gone");
        scheduler.unregister("never-existed");
        assert!(scheduler.is_empty());
        assert!(scheduler.snapshot("gone").is_err());
    }

    #[test]
    fn list_is_ordered_by_id() {
        let scheduler = TriggerScheduler::new(SchedulerOptions::default());
        for id in ["zeta", "alpha", "mid"] {
            scheduler
                .register(
                    ScheduledEntry::new(id, work_fn(|| Ok(json!(null))))
                        .with_interval(Duration::from_secs(30)),
                )
                .expect("registered");
        }
        let ids: Vec<String> = scheduler.list().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, ["alpha", "mid", "zeta"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn overlapping_fire_is_skipped_at_the_concurrency_limit() {
        let scheduler = TriggerScheduler::new(SchedulerOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let job = {
            let calls = Arc::clone(&calls);
            let active = Arc::clone(&active);
            let max_seen = Arc::clone(&max_seen);
            work_fn(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                let now_active = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now_active, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(300));
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(json!(null))
            })
        };
        scheduler
            .register(
                ScheduledEntry::new("slow", job)
                    .with_interval(Duration::from_secs(1))
                    .with_misfire_grace(Duration::from_secs(3600)),
            )
            .expect("registered");

        let first = next_fire(&scheduler, "slow");
        scheduler.tick_at(first);
        assert_eq!(scheduler.snapshot("slow").expect("entry").running_instances, 1);
        scheduler.tick_at(first + TimeDelta::seconds(1));
        scheduler.stop(true).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        let stats = scheduler.stats();
        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.skipped_max_instances, 1);
        assert_eq!(scheduler.snapshot("slow").expect("entry").running_instances, 0);
    }

    #[tokio::test]
    async fn missed_fires_coalesce_into_one_run() {
        let scheduler = TriggerScheduler::new(SchedulerOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        scheduler
            .register(
                ScheduledEntry::new("minutely", counting_job(Arc::clone(&calls)))
                    .with_interval(Duration::from_secs(60))
                    .with_misfire_grace(Duration::from_secs(3600)),
            )
            .expect("registered");

        let first = next_fire(&scheduler, "minutely");
        let now = first + TimeDelta::seconds(130);
        scheduler.tick_at(now);
        scheduler.stop(true).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.stats().dispatched, 1);
        let snapshot = scheduler.snapshot("minutely").expect("entry");
        assert_eq!(snapshot.last_fired_at, Some(now));
        assert_eq!(snapshot.next_fire_time, Some(first + TimeDelta::seconds(180)));
    }

    #[tokio::test]
    async fn without_coalescing_every_missed_fire_runs() {
        let scheduler = TriggerScheduler::new(SchedulerOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        scheduler
            .register(
                ScheduledEntry::new("minutely", counting_job(Arc::clone(&calls)))
                    .with_interval(Duration::from_secs(60))
                    .with_coalesce(false)
                    .with_max_concurrent_instances(5)
                    .with_misfire_grace(Duration::from_secs(3600)),
            )
            .expect("registered");

        let first = next_fire(&scheduler, "minutely");
        scheduler.tick_at(first + TimeDelta::seconds(130));
        scheduler.stop(true).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fire_outside_grace_is_dropped() {
        let scheduler = TriggerScheduler::new(SchedulerOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        scheduler
            .register(
                ScheduledEntry::new("hourly", counting_job(Arc::clone(&calls)))
                    .with_interval(Duration::from_secs(3600))
                    .with_misfire_grace(Duration::from_secs(60)),
            )
            .expect("registered");

        let first = next_fire(&scheduler, "hourly");
        scheduler.tick_at(first + TimeDelta::minutes(30));
        scheduler.stop(true).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.stats().misfired, 1);
        assert_eq!(next_fire(&scheduler, "hourly"), first + TimeDelta::hours(1));
    }

    #[tokio::test]
    async fn coalesced_catch_up_survives_a_stall_longer_than_the_cap() {
        let scheduler = TriggerScheduler::new(SchedulerOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        scheduler
            .register(
                ScheduledEntry::new("every-second", counting_job(Arc::clone(&calls)))
                    .with_interval(Duration::from_secs(1))
                    .with_misfire_grace(Duration::from_secs(60)),
            )
            .expect("registered");

        let first = next_fire(&scheduler, "every-second");
        let now = first + TimeDelta::seconds(10_100);
        scheduler.tick_at(now);
        scheduler.stop(true).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = scheduler.stats();
        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.misfired, 0);
        let snapshot = scheduler.snapshot("every-second").expect("entry");
        assert_eq!(snapshot.last_fired_at, Some(now));
        assert_eq!(snapshot.next_fire_time, Some(now + TimeDelta::seconds(1)));
    }

    #[tokio::test]
    async fn entry_not_yet_due_does_not_fire() {
        let scheduler = TriggerScheduler::new(SchedulerOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        scheduler
            .register(
                ScheduledEntry::new("later", counting_job(Arc::clone(&calls)))
                    .with_interval(Duration::from_secs(60)),
            )
            .expect("registered");

        let first = next_fire(&scheduler, "later");
        scheduler.tick_at(first - TimeDelta::seconds(1));
        scheduler.stop(true).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(next_fire(&scheduler, "later"), first);
    }

    #[tokio::test]
    async fn failures_are_contained_per_fire() {
        let scheduler = TriggerScheduler::new(SchedulerOptions::default());
        let healthy_calls = Arc::new(AtomicUsize::new(0));
        scheduler
            .register(
                ScheduledEntry::new("broken", work_fn(|| Err(WorkError::failed("upstream 503"))))
                    .with_interval(Duration::from_secs(60)),
            )
            .expect("registered");
        scheduler
            .register(
                ScheduledEntry::new("explodes", work_fn(|| panic!("bad row")))
                    .with_interval(Duration::from_secs(60)),
            )
            .expect("registered");
        scheduler
            .register(
                ScheduledEntry::new("healthy", counting_job(Arc::clone(&healthy_calls)))
                    .with_interval(Duration::from_secs(60)),
            )
            .expect("registered");

        let now = scheduler
            .list()
            .iter()
            .filter_map(|e| e.next_fire_time)
            .max()
            .expect("entries have fire times");
        scheduler.tick_at(now);
        scheduler.stop(true).await;

        assert_eq!(healthy_calls.load(Ordering::SeqCst), 1);
        let stats = scheduler.stats();
        assert_eq!(stats.dispatched, 3);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.panicked, 1);
        assert_eq!(scheduler.len(), 3);
    }

    #[tokio::test]
    async fn paused_entries_do_not_fire_until_resumed() {
        let scheduler = TriggerScheduler::new(SchedulerOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        scheduler
            .register(
                ScheduledEntry::new("pausable", counting_job(Arc::clone(&calls)))
                    .with_interval(Duration::from_secs(60)),
            )
            .expect("registered");
        let first = next_fire(&scheduler, "pausable");

        assert!(scheduler.pause("pausable"));
        let paused = scheduler.snapshot("pausable").expect("entry");
        assert!(paused.paused);
        assert_eq!(paused.next_fire_time, None);

        scheduler.tick_at(first + TimeDelta::seconds(5));
        assert_eq!(scheduler.stats().dispatched, 0);

        assert!(scheduler.resume("pausable"));
        let resumed = scheduler.snapshot("pausable").expect("entry");
        assert!(!resumed.paused);
        let again = resumed.next_fire_time.expect("recomputed");
        scheduler.tick_at(again);
        scheduler.stop(true).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(!scheduler.pause("unknown"));
        assert!(!scheduler.resume("unknown"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_with_wait_drains_in_flight_work() {
        let scheduler = TriggerScheduler::new(SchedulerOptions::default());
        let finished = Arc::new(AtomicBool::new(false));
        let job = {
            let finished = Arc::clone(&finished);
            work_fn(move || {
                std::thread::sleep(Duration::from_millis(200));
                finished.store(true, Ordering::SeqCst);
                Ok(json!({"rows": 3}))
            })
        };
        scheduler
            .register(ScheduledEntry::new("drain", job).with_interval(Duration::from_secs(60)))
            .expect("registered");

        scheduler.tick_at(next_fire(&scheduler, "drain"));
        scheduler.stop(true).await;

        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(scheduler.stats().succeeded, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reregistering_keeps_the_in_flight_count() {
        let scheduler = TriggerScheduler::new(SchedulerOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let job = {
            let calls = Arc::clone(&calls);
            let active = Arc::clone(&active);
            let max_seen = Arc::clone(&max_seen);
            work_fn(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                let now_active = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now_active, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(500));
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(json!(null))
            })
        };
        scheduler
            .register(
                ScheduledEntry::new("sync", Arc::clone(&job))
                    .with_interval(Duration::from_secs(1))
                    .with_misfire_grace(Duration::from_secs(3600)),
            )
            .expect("registered");
        scheduler.tick_at(next_fire(&scheduler, "sync"));

        scheduler
            .register(
                ScheduledEntry::new("sync", job)
                    .with_interval(Duration::from_secs(2))
                    .with_misfire_grace(Duration::from_secs(3600)),
            )
            .expect("re-registered");
        let replaced = scheduler.snapshot("sync").expect("entry");
        assert_eq!(replaced.trigger, "interval[every 2000ms]");
        assert_eq!(replaced.running_instances, 1);

        scheduler.tick_at(next_fire(&scheduler, "sync"));
        scheduler.stop(true).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        let stats = scheduler.stats();
        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.skipped_max_instances, 1);
        assert_eq!(scheduler.snapshot("sync").expect("entry").running_instances, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_without_wait_leaves_fires_running() {
        let scheduler = TriggerScheduler::new(
            SchedulerOptions::default().with_tick_interval(Duration::from_secs(60)),
        );
        let finished = Arc::new(AtomicBool::new(false));
        let job = {
            let finished = Arc::clone(&finished);
            work_fn(move || {
                std::thread::sleep(Duration::from_millis(300));
                finished.store(true, Ordering::SeqCst);
                Ok(json!(null))
            })
        };
        scheduler
            .register(ScheduledEntry::new("export", job).with_interval(Duration::from_secs(60)))
            .expect("registered");
        scheduler.start();
        scheduler.tick_at(next_fire(&scheduler, "export"));

        scheduler.stop(false).await;
        assert!(!scheduler.is_running());
        assert!(!finished.load(Ordering::SeqCst));
        assert_eq!(scheduler.snapshot("export").expect("entry").running_instances, 1);

        tokio::time::timeout(Duration::from_secs(5), async {
            while scheduler.stats().succeeded == 0
                || scheduler.snapshot("export").expect("entry").running_instances > 0
            {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("fire finished after stop");
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stop_with_wait_drains_fires_from_the_running_loop() {
        let scheduler = TriggerScheduler::new(
            SchedulerOptions::default().with_tick_interval(Duration::from_millis(1)),
        );
        let calls = Arc::new(AtomicUsize::new(0));
        for n in 0..20 {
            scheduler
                .register(
                    ScheduledEntry::new(format!("busy-{n:02}"), counting_job(Arc::clone(&calls)))
                        .with_interval(Duration::from_millis(1)),
                )
                .expect("registered");
        }

        scheduler.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop(true).await;

        let stats = scheduler.stats();
        assert!(stats.dispatched > 0);
        assert_eq!(stats.dispatched, stats.succeeded);
        assert_eq!(
            u64::try_from(calls.load(Ordering::SeqCst)).expect("fits"),
            stats.dispatched
        );
        assert!(scheduler.list().iter().all(|e| e.running_instances == 0));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(scheduler.stats().dispatched, stats.dispatched);
    }

    #[tokio::test]
    async fn start_and_stop_toggle_running_state() {
        let scheduler = TriggerScheduler::new(
            SchedulerOptions::default().with_tick_interval(Duration::from_millis(10)),
        );
        assert!(!scheduler.is_running());
        scheduler.start();
        scheduler.start();
        assert!(scheduler.is_running());
        scheduler.stop(false).await;
        assert!(!scheduler.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn background_loop_fires_due_entries() {
        let scheduler = TriggerScheduler::new(
            SchedulerOptions::default().with_tick_interval(Duration::from_millis(10)),
        );
        let calls = Arc::new(AtomicUsize::new(0));
        scheduler
            .register(
                ScheduledEntry::new("fast", counting_job(Arc::clone(&calls)))
                    .with_interval(Duration::from_millis(50)),
            )
            .expect("registered");

        scheduler.start();
        tokio::time::sleep(Duration::from_millis(400)).await;
        scheduler.stop(true).await;

        assert!(calls.load(Ordering::SeqCst) >= 1);
    }
}
