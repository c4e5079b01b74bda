//! Guarded registry of the current job per kind.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::info;

use photolens_core::{defaults, Error, Result};

use crate::job::{Job, JobKind};

/// Holds the most recent job of each kind.
///
/// Starting a job replaces (and drops) the previous job of that kind, but
/// only when it is terminal; the check and the replacement happen under one
/// lock.
pub struct JobRegistry {
    jobs: Mutex<HashMap<JobKind, Arc<Job>>>,
    event_buffer: usize,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(defaults::JOB_EVENT_BUFFER)
    }
}

impl JobRegistry {
    pub fn new(event_buffer: usize) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            event_buffer,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobKind, Arc<Job>>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new pending job, or fail with `Conflict` while another job
    /// of the same kind is pending or running.
    pub fn try_start(&self, kind: JobKind, options: serde_json::Value) -> Result<Arc<Job>> {
        let mut jobs = self.lock();
        if let Some(active) = jobs.get(&kind).filter(|j| !j.is_terminal()) {
            return Err(Error::Conflict(format!(
                "a {} job is already running ({})",
                kind,
                active.id()
            )));
        }
        let job = Arc::new(Job::new(kind, options, self.event_buffer));
        jobs.insert(kind, Arc::clone(&job));
        info!(job_id = %job.id(), job_kind = %kind, "Job registered");
        Ok(job)
    }

    /// The current job of `kind`.
    pub fn current(&self, kind: JobKind) -> Option<Arc<Job>> {
        self.lock().get(&kind).cloned()
    }

    /// The job of `kind` with this id; `NotFound` otherwise.
    pub fn get(&self, kind: JobKind, id: &str) -> Result<Arc<Job>> {
        self.current(kind)
            .filter(|j| j.id() == id)
            .ok_or_else(|| Error::NotFound(format!("{} job {}", kind, id)))
    }

    /// Request cancellation of a job. Cancelling a terminal job is a no-op.
    pub fn cancel(&self, kind: JobKind, id: &str) -> Result<Arc<Job>> {
        let job = self.get(kind, id)?;
        job.cancel();
        Ok(job)
    }
}
