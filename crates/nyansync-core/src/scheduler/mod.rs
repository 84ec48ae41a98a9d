//! Job scheduler
//!
//! The scheduler is responsible for:
//! - Keeping one recurring timer per enabled job, reconciled against the store
//! - Dispatching runs on timer fire or on demand
//! - Ensuring at most one active run per job
//! - Bounding concurrent runs across all jobs with a fair worker pool
//!
//! ## Per-Job Slots
//!
//! A job with an active run owns a slot. While the slot exists:
//!
//! - a timer fire is dropped (the next tick covers it)
//! - the first on-demand trigger queues one follow-up run
//! - further on-demand triggers coalesce into that follow-up
//!
//! ```text
//!  Idle ──timer──▶ Scheduled ──fire/trigger──▶ Running ──done──▶ Scheduled / Idle
//!                                                 │
//!                                          trigger│(queue one follow-up)
//!                                                 ▼
//!                                              Running
//! ```
//!
//! Timer tasks and run tasks are separate, so reconciliation never interrupts
//! an executing run.

pub mod timer;

pub use timer::{TimerSpec, desired_timers};

use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::executor::JobRunner;
use crate::model::{JobId, Snapshot};
use crate::traits::ConfigStore;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use timer::TimerEntry;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// What caused a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Timer,
    OnDemand,
}

/// Result of asking for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A new run was dispatched
    Started,
    /// A run is active; one follow-up run will start after it
    FollowUpQueued,
    /// A run is active and a follow-up is already queued
    Coalesced,
    /// A timer fired while a run was active
    Dropped,
}

/// Observable state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Enabled, timer not armed yet, not running
    Idle,
    /// Timer armed, not running
    Scheduled,
    /// A run is active (waiting for a pool permit or executing)
    Running,
    /// Not in the store, or disabled
    Removed,
}

/// Changes made by one reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub started: Vec<JobId>,
    pub stopped: Vec<JobId>,
    pub restarted: Vec<JobId>,
    pub unchanged: Vec<JobId>,
}

impl ReconcileReport {
    /// Whether the reconciliation changed any timer
    pub fn is_noop(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty() && self.restarted.is_empty()
    }
}

#[derive(Debug, Default)]
struct Slot {
    follow_up: bool,
}

pub(crate) struct Inner {
    runner: Arc<dyn JobRunner>,
    store: Arc<dyn ConfigStore>,
    pool: Arc<Semaphore>,
    slots: Mutex<HashMap<JobId, Slot>>,
    /// Runs waiting for a pool permit, in dispatch order
    queue: Mutex<VecDeque<JobId>>,
    timers: tokio::sync::Mutex<HashMap<JobId, TimerEntry>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

/// Job scheduler
///
/// Cheap to clone; clones share timers, slots and the worker pool.
///
/// ## Lifecycle
///
/// 1. Create with [`Scheduler::new()`]
/// 2. Arm timers with [`Scheduler::reload_from_store()`]
/// 3. Re-reconcile after every job-set change
/// 4. Stop with [`Scheduler::shutdown()`]
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Create a new scheduler
    ///
    /// # Parameters
    ///
    /// - `runner`: Executes runs (normally a [`crate::JobExecutor`])
    /// - `store`: Config store the job set is read from
    /// - `config`: Pool size and shutdown grace
    pub fn new(
        runner: Arc<dyn JobRunner>,
        store: Arc<dyn ConfigStore>,
        config: &SchedulerConfig,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            inner: Arc::new(Inner {
                runner,
                store,
                pool: Arc::new(Semaphore::new(config.pool_size)),
                slots: Mutex::new(HashMap::new()),
                queue: Mutex::new(VecDeque::new()),
                timers: tokio::sync::Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        })
    }

    /// Reconcile timers against a snapshot
    ///
    /// Cancels timers of removed or disabled jobs, creates timers for newly
    /// enabled jobs and re-creates timers whose interval or timezone changed.
    /// Calling it twice with the same snapshot changes nothing the second time.
    pub async fn reload(&self, snapshot: &Snapshot) -> Result<ReconcileReport> {
        if self.inner.shutdown.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let mut timers = self.inner.timers.lock().await;
        self.reconcile(&mut timers, snapshot)
    }

    /// Read the store and reconcile timers
    ///
    /// The snapshot is read while the timer map is locked, so concurrent
    /// reconciliations apply snapshots in the order the store produced them.
    /// A store failure is logged and returned; timers stay as they are.
    pub async fn reload_from_store(&self) -> Result<ReconcileReport> {
        if self.inner.shutdown.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let mut timers = self.inner.timers.lock().await;
        let snapshot = match self.inner.store.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("Failed to read config store, keeping current timers: {}", e);
                return Err(e);
            }
        };
        self.reconcile(&mut timers, &snapshot)
    }

    fn reconcile(
        &self,
        timers: &mut HashMap<JobId, TimerEntry>,
        snapshot: &Snapshot,
    ) -> Result<ReconcileReport> {
        // Shutdown may have cleared the map while we waited for the lock
        if self.inner.shutdown.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let desired = desired_timers(snapshot);
        let mut report = ReconcileReport::default();

        timers.retain(|job_id, _| {
            let keep = desired.contains_key(job_id);
            if !keep {
                report.stopped.push(job_id.clone());
            }
            keep
        });

        for (job_id, spec) in desired {
            match timers.get(&job_id).map(|entry| entry.spec == spec) {
                Some(true) => {
                    report.unchanged.push(job_id);
                    continue;
                }
                Some(false) => report.restarted.push(job_id.clone()),
                None => report.started.push(job_id.clone()),
            }
            // Replacing an entry drops (and stops) the old timer
            let entry = TimerEntry::spawn(&self.inner, job_id.clone(), spec);
            timers.insert(job_id, entry);
        }

        report.stopped.sort();
        if report.is_noop() {
            debug!(timers = timers.len(), "Reconciled timers, nothing changed");
        } else {
            info!(
                started = ?report.started,
                stopped = ?report.stopped,
                restarted = ?report.restarted,
                "Reconciled timers"
            );
        }
        Ok(report)
    }

    /// Request an immediate run outside the timer cycle
    ///
    /// Returns as soon as the run is dispatched; results appear in the job's
    /// `last_log` / `last_run`.
    ///
    /// # Returns
    ///
    /// - `Ok(TriggerOutcome)`: Started, queued as follow-up, or coalesced
    /// - `Err(Error::NotFound)`: No such job
    pub async fn trigger(&self, job_id: &str) -> Result<TriggerOutcome> {
        if self.inner.store.job(job_id).await?.is_none() {
            return Err(Error::not_found(format!("job {}", job_id)));
        }
        let outcome = Inner::dispatch(&self.inner, job_id, Origin::OnDemand)?;
        info!(job_id, outcome = ?outcome, "Run triggered");
        Ok(outcome)
    }

    /// Current state of a job
    pub async fn state(&self, job_id: &str) -> Result<JobState> {
        if self.inner.lock_slots().contains_key(job_id) {
            return Ok(JobState::Running);
        }
        if self.inner.timers.lock().await.contains_key(job_id) {
            return Ok(JobState::Scheduled);
        }
        Ok(match self.inner.store.job(job_id).await? {
            Some(job) if job.is_schedulable() => JobState::Idle,
            _ => JobState::Removed,
        })
    }

    /// Armed timers
    pub async fn timers(&self) -> BTreeMap<JobId, TimerSpec> {
        self.inner
            .timers
            .lock()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), entry.spec.clone()))
            .collect()
    }

    /// Number of jobs with an active run
    pub fn active_runs(&self) -> usize {
        self.inner.lock_slots().len()
    }

    /// Whether shutdown has started
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Stop the scheduler
    ///
    /// Stops all timers, drops queued follow-ups and waits up to `grace` for
    /// in-flight runs. Runs still executing after the grace period are
    /// abandoned; the store only ever sees complete writes.
    ///
    /// # Returns
    ///
    /// `true` if every run finished within the grace period
    pub async fn shutdown(&self, grace: Duration) -> bool {
        info!("Scheduler shutting down");
        self.inner.shutdown.cancel();
        self.inner.timers.lock().await.clear();

        let in_flight = {
            let mut slots = self.inner.lock_slots();
            for slot in slots.values_mut() {
                slot.follow_up = false;
            }
            slots.len()
        };
        if in_flight > 0 {
            info!(in_flight, "Waiting for in-flight runs");
        }

        self.inner.tracker.close();
        match tokio::time::timeout(grace, self.inner.tracker.wait()).await {
            Ok(()) => {
                info!("Scheduler stopped");
                true
            }
            Err(_) => {
                warn!(
                    abandoned = self.inner.lock_slots().len(),
                    "Grace period of {}s elapsed, abandoning in-flight runs",
                    grace.as_secs()
                );
                false
            }
        }
    }
}

impl Inner {
    fn lock_slots(&self) -> MutexGuard<'_, HashMap<JobId, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a run, or record the request against the active one
    pub(crate) fn dispatch(inner: &Arc<Inner>, job_id: &str, origin: Origin) -> Result<TriggerOutcome> {
        if inner.shutdown.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        {
            let mut slots = inner.lock_slots();
            if let Some(slot) = slots.get_mut(job_id) {
                let outcome = match origin {
                    Origin::Timer => TriggerOutcome::Dropped,
                    Origin::OnDemand if slot.follow_up => TriggerOutcome::Coalesced,
                    Origin::OnDemand => {
                        slot.follow_up = true;
                        TriggerOutcome::FollowUpQueued
                    }
                };
                debug!(job_id, origin = ?origin, outcome = ?outcome, "Run already active");
                return Ok(outcome);
            }
            slots.insert(job_id.to_string(), Slot::default());
        }

        Inner::enqueue(inner, job_id.to_string());
        Ok(TriggerOutcome::Started)
    }

    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<JobId>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a run of a job holding a slot and spawn a worker for it
    ///
    /// Workers take jobs from the front of the queue once they hold a permit,
    /// so runs start in dispatch order whichever worker wins the permit.
    fn enqueue(inner: &Arc<Inner>, job_id: JobId) {
        inner.lock_queue().push_back(job_id);

        let task_inner = inner.clone();
        inner.tracker.spawn(async move { Inner::work(task_inner).await });
    }

    /// Run the next queued job, then queue its follow-up or release its slot
    async fn work(inner: Arc<Inner>) {
        let permit = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => None,
            permit = inner.pool.clone().acquire_owned() => permit.ok(),
        };

        let Some(job_id) = inner.lock_queue().pop_front() else {
            return;
        };
        let Some(permit) = permit else {
            debug!(job_id = %job_id, "Run not started, scheduler shutting down");
            inner.lock_slots().remove(&job_id);
            return;
        };

        inner.execute(&job_id).await;
        drop(permit);

        // Deciding and releasing under one lock keeps a concurrent trigger
        // from queueing onto a slot that is about to disappear
        let follow_up = {
            let mut slots = inner.lock_slots();
            let queued = !inner.shutdown.is_cancelled()
                && slots.get(&job_id).is_some_and(|slot| slot.follow_up);
            if !queued {
                slots.remove(&job_id);
            } else if let Some(slot) = slots.get_mut(&job_id) {
                slot.follow_up = false;
            }
            queued
        };
        if follow_up {
            debug!(job_id = %job_id, "Queueing follow-up run");
            Inner::enqueue(&inner, job_id);
        }
    }

    /// Execute one run; failures and panics are logged, never propagated
    async fn execute(&self, job_id: &str) {
        let runner = self.runner.clone();
        let id = job_id.to_string();
        let handle = tokio::spawn(async move { runner.run(&id).await });

        match handle.await {
            Ok(Ok(report)) => {
                debug!(job_id, status = ?report.status, "Run completed");
            }
            Ok(Err(e)) => {
                error!(job_id, "Run could not access the config store: {}", e);
            }
            Err(e) => {
                error!(job_id, "Run aborted: {}", e);
            }
        }
    }
}
