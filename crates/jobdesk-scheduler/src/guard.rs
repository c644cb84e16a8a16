//! Process-wide set of jobs currently executing under the forbid policy.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Default)]
pub struct RunningJobs {
    inner: Arc<Mutex<HashSet<i64>>>,
}

impl RunningJobs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `job_id` as running unless it already is.
    ///
    /// The check and the insert happen under one lock. The returned guard
    /// clears the mark when dropped, including during a panic unwind.
    #[must_use]
    pub fn try_acquire(&self, job_id: i64) -> Option<RunGuard> {
        if self.lock().insert(job_id) {
            Some(RunGuard {
                jobs: self.clone(),
                job_id,
            })
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_running(&self, job_id: i64) -> bool {
        self.lock().contains(&job_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panic while holding the lock cannot leave the set half-updated.
    fn lock(&self) -> MutexGuard<'_, HashSet<i64>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
#[must_use = "dropping the guard releases the job immediately"]
pub struct RunGuard {
    jobs: RunningJobs,
    job_id: i64,
}

impl RunGuard {
    #[must_use]
    pub fn job_id(&self) -> i64 {
        self.job_id
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.jobs.lock().remove(&self.job_id);
    }
}
