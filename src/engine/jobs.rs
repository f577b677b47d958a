//! Background jobs and completion handles.
//!
//! A [`JobScheduler`] runs closures on a dedicated rayon pool and hands back a
//! [`JobHandle`]. Handles are what producers register as dependencies of a
//! deferred buffer: the playback point calls [`JobHandle::complete`] on every
//! registered handle before it replays any buffer, so no writer job can still
//! be appending while its buffer is read.
//!
//! The pool is separate from rayon's global pool. Systems run on the global
//! pool, and a system that waits on a job queued behind itself in the same
//! pool would never wake up.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::config::EngineConfig;
use crate::engine::error::{ECSResult, ExecutionError};


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum JobStatus {
    Running,
    Finished,
    Panicked,
}

struct JobState {
    name: String,
    status: Mutex<JobStatus>,
    finished: Condvar,
}

impl JobState {
    fn new(name: String) -> Self {
        Self { name, status: Mutex::new(JobStatus::Running), finished: Condvar::new() }
    }

    // Status is a plain enum written in one step, so a poisoned guard is still valid.
    fn lock(&self) -> MutexGuard<'_, JobStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, status: JobStatus) {
        *self.lock() = status;
        self.finished.notify_all();
    }

    fn wait(&self) -> JobStatus {
        let mut status = self.lock();
        while *status == JobStatus::Running {
            status = self.finished.wait(status).unwrap_or_else(PoisonError::into_inner);
        }
        *status
    }
}

/// Completion handle for one or more scheduled jobs.
///
/// Cloning a handle is cheap; all clones observe the same jobs.
#[derive(Clone)]
pub struct JobHandle {
    jobs: Arc<[Arc<JobState>]>,
}

impl JobHandle {
    /// A handle with nothing to wait for.
    pub fn completed() -> Self {
        Self { jobs: Arc::from(Vec::new()) }
    }

    /// Combines several handles into one that completes when all of them do.
    pub fn combine<I>(handles: I) -> Self
    where
        I: IntoIterator<Item = JobHandle>,
    {
        let jobs: Vec<Arc<JobState>> = handles
            .into_iter()
            .flat_map(|handle| handle.jobs.iter().cloned().collect::<Vec<_>>())
            .collect();
        Self { jobs: jobs.into() }
    }

    /// Blocks until every job behind this handle has stopped running.
    ///
    /// A job that panics still counts as stopped; the panic is reported as
    /// [`ExecutionError::JobPanicked`] once all jobs have been waited on.
    pub fn complete(&self) -> Result<(), ExecutionError> {
        let mut first_panic = None;
        for job in self.jobs.iter() {
            if job.wait() == JobStatus::Panicked && first_panic.is_none() {
                first_panic = Some(job.name.clone());
            }
        }
        match first_panic {
            Some(name) => Err(ExecutionError::JobPanicked { name }),
            None => Ok(()),
        }
    }

    /// Returns `true` when no job behind this handle is still running.
    pub fn is_completed(&self) -> bool {
        self.jobs.iter().all(|job| *job.lock() != JobStatus::Running)
    }

    /// Number of jobs tracked by this handle.
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("jobs", &self.jobs.iter().map(|job| job.name.as_str()).collect::<Vec<_>>())
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// Runs jobs on a dedicated rayon thread pool.
pub struct JobScheduler {
    pool: rayon::ThreadPool,
}

impl JobScheduler {
    /// Creates a scheduler sized by rayon's default (one thread per core).
    pub fn new() -> ECSResult<Self> {
        Self::build(None)
    }

    /// Creates a scheduler with exactly `threads` workers.
    pub fn with_threads(threads: usize) -> ECSResult<Self> {
        Self::build(Some(threads))
    }

    /// Creates a scheduler sized by `config.worker_threads`.
    pub fn from_config(config: &EngineConfig) -> ECSResult<Self> {
        Self::build(config.worker_threads)
    }

    fn build(threads: Option<usize>) -> ECSResult<Self> {
        let mut builder = rayon::ThreadPoolBuilder::new()
            .thread_name(|index| format!("event-job-{index}"));
        if let Some(threads) = threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder
            .build()
            .map_err(|error| ExecutionError::WorkerPool { reason: error.to_string() })?;
        tracing::debug!(threads = pool.current_num_threads(), "job scheduler started");
        Ok(Self { pool })
    }

    /// Number of worker threads.
    pub fn thread_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Queues `job` and returns a handle that completes when it returns or panics.
    pub fn schedule<F>(&self, name: impl Into<String>, job: F) -> JobHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let state = Arc::new(JobState::new(name.into()));
        let worker_state = Arc::clone(&state);
        self.pool.spawn(move || {
            let status = match panic::catch_unwind(AssertUnwindSafe(job)) {
                Ok(()) => JobStatus::Finished,
                Err(_) => {
                    tracing::warn!(job = %worker_state.name, "job panicked");
                    JobStatus::Panicked
                }
            };
            worker_state.finish(status);
        });
        JobHandle { jobs: Arc::from(vec![state]) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn complete_waits_for_every_combined_job() {
        let scheduler = JobScheduler::with_threads(2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let counter = Arc::clone(&counter);
                scheduler.schedule(format!("count-{i}"), move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        let all = JobHandle::combine(handles);
        assert_eq!(all.job_count(), 8);
        all.complete().unwrap();
        assert!(all.is_completed());
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn panicking_job_still_completes() {
        let scheduler = JobScheduler::with_threads(1).unwrap();
        let handle = scheduler.schedule("boom", || panic!("boom"));
        let error = handle.complete().unwrap_err();
        assert_eq!(error, ExecutionError::JobPanicked { name: "boom".into() });
        assert!(handle.is_completed());
    }

    #[test]
    fn empty_handle_is_already_complete() {
        let handle = JobHandle::completed();
        assert!(handle.is_completed());
        assert!(handle.complete().is_ok());
    }
}
