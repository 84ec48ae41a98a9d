//! Per-job recurring timers

use super::{Inner, Origin};
use crate::model::{JobId, Snapshot};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Desired timer of one job
///
/// The timezone is part of the spec so that changing it re-creates every timer
/// through the same reconciliation as an interval change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimerSpec {
    pub interval_minutes: u32,
    pub timezone: String,
}

impl TimerSpec {
    pub fn period(&self) -> Duration {
        Duration::from_secs(u64::from(self.interval_minutes) * 60)
    }
}

/// Timers every schedulable job of `snapshot` should have
pub fn desired_timers(snapshot: &Snapshot) -> BTreeMap<JobId, TimerSpec> {
    snapshot
        .jobs
        .iter()
        .filter(|(_, job)| job.is_schedulable())
        .map(|(id, job)| {
            (
                id.clone(),
                TimerSpec {
                    interval_minutes: job.interval_minutes,
                    timezone: snapshot.settings.timezone.clone(),
                },
            )
        })
        .collect()
}

/// A running timer task
#[derive(Debug)]
pub(super) struct TimerEntry {
    pub spec: TimerSpec,
    cancel: CancellationToken,
}

impl TimerEntry {
    /// Spawn the timer task; the first fire happens one period from now
    pub fn spawn(inner: &Arc<Inner>, job_id: JobId, spec: TimerSpec) -> Self {
        let cancel = inner.shutdown.child_token();
        let period = spec.period();
        let weak: Weak<Inner> = Arc::downgrade(inner);
        let token = cancel.clone();

        inner.tracker.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        tracing::debug!(job_id = %job_id, "Timer fired");
                        if let Err(e) = Inner::dispatch(&inner, &job_id, Origin::Timer) {
                            tracing::debug!(job_id = %job_id, "Timer fire ignored: {}", e);
                        }
                    }
                }
            }
        });

        Self { spec, cancel }
    }
}

/// Removing an entry stops its timer
impl Drop for TimerEntry {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
