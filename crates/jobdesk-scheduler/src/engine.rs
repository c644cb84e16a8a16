//! Live schedule: one timer task per scheduled job.
//!
//! Each entry owns a tokio task that sleeps until the next trigger instant,
//! applies the misfire grace window, and dispatches the execution as an
//! independent task so a long-running job never delays its own timer or any
//! other job's.
//!
//! Entries carry a generation number. A timer only dispatches while holding
//! the entry table lock and only if its generation is still current, so once
//! `add` or `remove` returns no fire can happen against the replaced trigger.
//!
//! Dispatched executions are tracked so a graceful stop can wait for them and
//! then flush the run log before the process exits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use jobdesk_core::{JobDefinition, MisfirePolicy};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use crate::error::SchedulerError;
use crate::executor::{ExecutionOutcome, JobExecutor, JobParams};
use crate::target::parse_invoke_target;
use crate::trigger::{translate, CronTrigger};

/// Stable key for a job's live entry.
#[must_use]
pub fn entry_key(job_id: i64) -> String {
    format!("sys_job_{job_id}")
}

/// How late a fire may start before it counts as missed.
#[must_use]
pub fn misfire_grace(policy: MisfirePolicy) -> Duration {
    match policy {
        MisfirePolicy::FireImmediately => Duration::from_secs(3600),
        MisfirePolicy::FireOnce => Duration::from_secs(300),
        MisfirePolicy::Discard => Duration::from_secs(1),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireDecision {
    Run,
    Misfire,
}

/// Time left before `scheduled`, or `None` once it is due.
///
/// Timers sleep on the monotonic clock while fire times are wall-clock, so a
/// wake can arrive early if the wall clock was stepped back.
#[must_use]
pub fn remaining_wait(scheduled: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
    scheduled
        .signed_duration_since(now)
        .to_std()
        .ok()
        .filter(|wait| !wait.is_zero())
}

/// Whether a fire scheduled for `scheduled` may still run at `now`.
#[must_use]
pub fn decide_fire(scheduled: DateTime<Utc>, now: DateTime<Utc>, grace: Duration) -> FireDecision {
    match now.signed_duration_since(scheduled).to_std() {
        Ok(late) if late > grace => FireDecision::Misfire,
        _ => FireDecision::Run,
    }
}

struct ScheduledEntry {
    key: String,
    generation: u64,
    trigger: Arc<CronTrigger>,
    grace: Duration,
    params: Arc<JobParams>,
    next_fire: Option<DateTime<Utc>>,
    timer: JoinHandle<()>,
}

struct EngineInner {
    executor: JobExecutor,
    runtime: Handle,
    in_flight: TaskTracker,
    log_task: Mutex<Option<JoinHandle<()>>>,
    entries: Mutex<HashMap<i64, ScheduledEntry>>,
    running: AtomicBool,
    generation: AtomicU64,
}

impl EngineInner {
    fn entries(&self) -> MutexGuard<'_, HashMap<i64, ScheduledEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the next fire time. Returns `false` if the entry was replaced
    /// or removed, which tells the timer to exit.
    fn set_next_fire(&self, job_id: i64, generation: u64, next: Option<DateTime<Utc>>) -> bool {
        match self.entries().get_mut(&job_id) {
            Some(entry) if entry.generation == generation => {
                entry.next_fire = next;
                true
            }
            _ => false,
        }
    }

    fn dispatch_if_current(&self, job_id: i64, generation: u64) -> bool {
        let entries = self.entries();
        let Some(entry) = entries.get(&job_id) else {
            return false;
        };
        if entry.generation != generation || !self.running.load(Ordering::SeqCst) {
            return false;
        }

        let executor = self.executor.clone();
        let params = Arc::clone(&entry.params);
        self.in_flight.spawn_on(
            async move {
                executor.execute(&params).await;
            },
            &self.runtime,
        );
        true
    }
}

/// The live scheduler. Cheap to clone; all clones share one schedule.
#[derive(Clone)]
pub struct SchedulerEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for SchedulerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerEngine")
            .field("running", &self.is_running())
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

impl SchedulerEngine {
    /// Starts an empty engine on the current tokio runtime. `log_task` is the
    /// drain task of the executor's log writer; [`drain`](Self::drain) waits
    /// on it.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NoRuntime`] when called outside a runtime.
    pub fn start(executor: JobExecutor, log_task: JoinHandle<()>) -> Result<Self, SchedulerError> {
        let runtime = Handle::try_current()?;
        Ok(Self {
            inner: Arc::new(EngineInner {
                executor,
                runtime,
                in_flight: TaskTracker::new(),
                log_task: Mutex::new(Some(log_task)),
                entries: Mutex::new(HashMap::new()),
                running: AtomicBool::new(true),
                generation: AtomicU64::new(0),
            }),
        })
    }

    #[must_use]
    pub fn executor(&self) -> &JobExecutor {
        &self.inner.executor
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Schedules `job`, atomically replacing any entry it already has.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Validation`] for a malformed cron expression
    /// or invoke target, and [`SchedulerError::NotRunning`] after shutdown.
    pub fn add(&self, job: &JobDefinition) -> Result<(), SchedulerError> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        let trigger = Arc::new(translate(&job.cron_expression)?);
        parse_invoke_target(&job.invoke_target)?;

        let grace = misfire_grace(job.misfire_policy);
        let params = Arc::new(JobParams::from(job));
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let next_fire = trigger.next_after(Utc::now());
        let key = entry_key(job.job_id);

        let mut entries = self.inner.entries();
        let timer = self.inner.runtime.spawn(run_timer(
            Arc::downgrade(&self.inner),
            job.job_id,
            generation,
            Arc::clone(&trigger),
            grace,
        ));
        let replaced = entries.insert(
            job.job_id,
            ScheduledEntry {
                key: key.clone(),
                generation,
                trigger,
                grace,
                params,
                next_fire,
                timer,
            },
        );
        drop(entries);

        if let Some(old) = replaced {
            old.timer.abort();
        }

        tracing::info!(
            job_id = job.job_id,
            key = %key,
            next_fire = ?next_fire,
            "scheduler: job scheduled"
        );
        Ok(())
    }

    /// Removes a job's entry. Returns whether one existed; absence is not an
    /// error.
    pub fn remove(&self, job_id: i64) -> bool {
        let removed = self.inner.entries().remove(&job_id);
        match removed {
            Some(entry) => {
                entry.timer.abort();
                tracing::info!(job_id, key = %entry.key, "scheduler: job removed");
                true
            }
            None => false,
        }
    }

    /// Dispatches one execution of `job` now, outside its schedule.
    ///
    /// The execution goes through the same guard and log path as a timed
    /// fire. The returned handle resolves when it finishes; dropping it does
    /// not cancel the run.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Validation`] for a malformed invoke target
    /// and [`SchedulerError::NotRunning`] after shutdown.
    pub fn run_once(
        &self,
        job: &JobDefinition,
    ) -> Result<JoinHandle<ExecutionOutcome>, SchedulerError> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }
        parse_invoke_target(&job.invoke_target)?;

        let executor = self.inner.executor.clone();
        let params = JobParams::from(job);
        tracing::info!(job_id = job.job_id, "scheduler: dispatching run-once");
        Ok(self
            .inner
            .in_flight
            .spawn_on(async move { executor.execute(&params).await }, &self.inner.runtime))
    }

    /// The next fire time of a scheduled job, or `None` if it is not
    /// scheduled or its trigger has no future instants.
    #[must_use]
    pub fn next_fire_time(&self, job_id: i64) -> Option<DateTime<Utc>> {
        self.inner
            .entries()
            .get(&job_id)
            .and_then(|entry| entry.next_fire)
    }

    #[must_use]
    pub fn is_scheduled(&self, job_id: i64) -> bool {
        self.inner.entries().contains_key(&job_id)
    }

    /// Scheduled job ids, ascending.
    #[must_use]
    pub fn scheduled_job_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.inner.entries().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Describes a scheduled entry: its key, normalized expression and grace.
    #[must_use]
    pub fn describe(&self, job_id: i64) -> Option<EntrySummary> {
        self.inner.entries().get(&job_id).map(|entry| EntrySummary {
            key: entry.key.clone(),
            expression: entry.trigger.expression().to_string(),
            grace: entry.grace,
            invoke_target: entry.params.invoke_target.clone(),
            next_fire: entry.next_fire,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries().is_empty()
    }

    /// Stops accepting fires and drops every entry. Executions already
    /// dispatched keep running to completion. Calling this twice is harmless.
    pub fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let drained: Vec<ScheduledEntry> = self
            .inner
            .entries()
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        for entry in &drained {
            entry.timer.abort();
        }
        self.inner.in_flight.close();
        tracing::info!(entries = drained.len(), "scheduler: stopped");
    }

    /// Executions dispatched and not yet finished.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Shuts down, waits for in-flight executions, then closes the run log
    /// and waits for it to flush. Both waits share `timeout`.
    ///
    /// Returns `true` when every execution finished and every record reached
    /// the sink in time.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.shutdown();
        let deadline = tokio::time::Instant::now() + timeout;

        let settled = tokio::time::timeout_at(deadline, self.inner.in_flight.wait())
            .await
            .is_ok();
        if !settled {
            tracing::warn!(
                in_flight = self.in_flight(),
                "scheduler: executions still running at drain deadline"
            );
        }

        self.inner.executor.log_writer().close();
        let log_task = self
            .inner
            .log_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let flushed = match log_task {
            Some(task) => match tokio::time::timeout_at(deadline, task).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "scheduler: job log writer failed");
                    false
                }
                Err(_) => {
                    tracing::warn!("scheduler: job log not flushed before drain deadline");
                    false
                }
            },
            None => true,
        };

        tracing::info!(settled, flushed, "scheduler: drained");
        settled && flushed
    }
}

/// A read-only view of one live entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySummary {
    pub key: String,
    pub expression: String,
    pub grace: Duration,
    pub invoke_target: String,
    pub next_fire: Option<DateTime<Utc>>,
}

async fn run_timer(
    inner: Weak<EngineInner>,
    job_id: i64,
    generation: u64,
    trigger: Arc<CronTrigger>,
    grace: Duration,
) {
    let mut cursor = Utc::now();

    loop {
        let scheduled = trigger.next_after(cursor);
        {
            let Some(engine) = inner.upgrade() else {
                return;
            };
            if !engine.set_next_fire(job_id, generation, scheduled) {
                return;
            }
        }
        let Some(scheduled) = scheduled else {
            tracing::info!(job_id, "scheduler: trigger has no further fire times");
            return;
        };

        while let Some(wait) = remaining_wait(scheduled, Utc::now()) {
            tokio::time::sleep(wait).await;
        }

        let Some(engine) = inner.upgrade() else {
            return;
        };
        let now = Utc::now();
        match decide_fire(scheduled, now, grace) {
            FireDecision::Run => {
                if !engine.dispatch_if_current(job_id, generation) {
                    return;
                }
            }
            FireDecision::Misfire => {
                tracing::warn!(
                    job_id,
                    scheduled = %scheduled,
                    late_ms = (now - scheduled).num_milliseconds(),
                    "scheduler: fire missed its grace window; skipping"
                );
            }
        }
        drop(engine);

        // Late wakes coalesce: resume from whichever is later.
        cursor = scheduled.max(now);
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_900_000_000 + secs, 0)
            .single()
            .expect("valid instant")
    }

    #[test]
    fn key_is_derived_from_job_id() {
        assert_eq!(entry_key(1), "sys_job_1");
        assert_eq!(entry_key(42), "sys_job_42");
    }

    #[test]
    fn grace_windows_follow_policy() {
        assert_eq!(
            misfire_grace(MisfirePolicy::FireImmediately),
            Duration::from_secs(3600)
        );
        assert_eq!(misfire_grace(MisfirePolicy::FireOnce), Duration::from_secs(300));
        assert_eq!(misfire_grace(MisfirePolicy::Discard), Duration::from_secs(1));
    }

    #[test]
    fn remaining_wait_is_none_once_due() {
        assert_eq!(remaining_wait(at(10), at(9)), Some(Duration::from_secs(1)));
        assert_eq!(remaining_wait(at(10), at(10)), None);
        assert_eq!(remaining_wait(at(10), at(11)), None);
    }

    #[test]
    fn early_wake_after_clock_step_back_keeps_waiting() {
        // Monotonic sleep elapsed, but the wall clock now reads 30s earlier.
        let scheduled = at(60);
        let woke_at = at(30);
        assert_eq!(remaining_wait(scheduled, woke_at), Some(Duration::from_secs(30)));
    }

    #[test]
    fn on_time_and_early_fires_run() {
        let grace = Duration::from_secs(1);
        assert_eq!(decide_fire(at(10), at(10), grace), FireDecision::Run);
        assert_eq!(decide_fire(at(10), at(9), grace), FireDecision::Run);
        assert_eq!(decide_fire(at(10), at(11), grace), FireDecision::Run);
    }

    #[test]
    fn fires_later_than_grace_are_missed() {
        assert_eq!(
            decide_fire(at(0), at(2), misfire_grace(MisfirePolicy::Discard)),
            FireDecision::Misfire
        );
        assert_eq!(
            decide_fire(at(0), at(299), misfire_grace(MisfirePolicy::FireOnce)),
            FireDecision::Run
        );
        assert_eq!(
            decide_fire(at(0), at(301), misfire_grace(MisfirePolicy::FireOnce)),
            FireDecision::Misfire
        );
        assert_eq!(
            decide_fire(at(0), at(3599), misfire_grace(MisfirePolicy::FireImmediately)),
            FireDecision::Run
        );
    }
}
