//! Job handlers and the runner that drives them through the state machine.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};

use photolens_core::{Error, Result};

use crate::job::{Job, JobKind};
use crate::registry::JobRegistry;

/// Work performed by one kind of job.
///
/// `run` returns `Err` only for setup failures (the job becomes `Failed`);
/// per-item failures are tallied in the output instead.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    type Options: Serialize + Send + Sync + 'static;
    type Output: Serialize + Send + 'static;

    /// The job kind this handler runs.
    fn kind(&self) -> JobKind;

    /// Validate options before a job is registered.
    fn validate(&self, _options: &Self::Options) -> Result<()> {
        Ok(())
    }

    async fn run(&self, job: Arc<Job>, options: Self::Options) -> Result<Self::Output>;
}

/// Starts jobs and tracks the current job of each kind.
pub struct JobOrchestrator {
    registry: JobRegistry,
}

impl Default for JobOrchestrator {
    fn default() -> Self {
        Self::new(JobRegistry::default())
    }
}

impl JobOrchestrator {
    pub fn new(registry: JobRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Validate, register and spawn a job.
    ///
    /// Fails synchronously with `InvalidInput` or `Conflict`; everything after
    /// registration happens in the background.
    pub fn start<H: JobHandler>(&self, handler: Arc<H>, options: H::Options) -> Result<Arc<Job>> {
        handler.validate(&options)?;
        let job = self
            .registry
            .try_start(handler.kind(), serde_json::to_value(&options)?)?;
        spawn_job(handler, Arc::clone(&job), options);
        Ok(job)
    }

    pub fn get(&self, kind: JobKind, id: &str) -> Result<Arc<Job>> {
        self.registry.get(kind, id)
    }

    pub fn cancel(&self, kind: JobKind, id: &str) -> Result<Arc<Job>> {
        self.registry.cancel(kind, id)
    }
}

/// Drive an already registered job on a background task.
pub fn spawn_job<H: JobHandler>(handler: Arc<H>, job: Arc<Job>, options: H::Options) -> JoinHandle<()> {
    let span = tracing::info_span!(
        "job",
        subsystem = "jobs",
        job_id = %job.id(),
        job_kind = %job.kind()
    );
    tokio::spawn(run_job(handler, job, options).instrument(span))
}

/// Run a job to a terminal state.
pub async fn run_job<H: JobHandler>(handler: Arc<H>, job: Arc<Job>, options: H::Options) {
    let start = Instant::now();
    if job.is_cancelled() {
        job.mark_cancelled(None);
        return;
    }
    if !job.mark_running() {
        warn!("Job was not pending, not running it");
        return;
    }
    info!("Job started");

    let outcome = handler.run(Arc::clone(&job), options).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(output) => {
            let value = match serde_json::to_value(&output) {
                Ok(v) => v,
                Err(e) => {
                    error!(error = %e, "Failed to serialize job result");
                    job.fail(format!("failed to serialize result: {}", e));
                    return;
                }
            };
            if job.is_cancelled() {
                job.mark_cancelled(Some(value));
                info!(
                    processed = job.processed(),
                    duration_ms,
                    "Job cancelled"
                );
            } else {
                job.complete(value);
                info!(
                    processed = job.processed(),
                    skipped = job.skipped(),
                    duration_ms,
                    "Job completed"
                );
            }
        }
        Err(Error::Cancelled) => {
            job.mark_cancelled(None);
            info!(duration_ms, "Job cancelled during setup");
        }
        Err(e) => {
            error!(error = %e, duration_ms, "Job failed");
            job.fail(e.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use crate::job::JobStatus;
    use crate::pool::run_bounded;
    use serde_json::json;
    use std::time::Duration;

    struct CountHandler {
        items: usize,
        fail_setup: bool,
        delay_ms: u64,
    }

    #[async_trait]
    impl JobHandler for CountHandler {
        type Options = usize;
        type Output = serde_json::Value;

        fn kind(&self) -> JobKind {
            JobKind::Process
        }

        fn validate(&self, options: &usize) -> Result<()> {
            if *options == 0 {
                return Err(Error::InvalidInput("concurrency must be positive".into()));
            }
            Ok(())
        }

        async fn run(&self, job: Arc<Job>, concurrency: usize) -> Result<serde_json::Value> {
            if self.fail_setup {
                return Err(Error::Metadata("photo listing failed".into()));
            }
            job.set_total(self.items);
            let delay = self.delay_ms;
            let items: Vec<usize> = (0..self.items).collect();
            let started = run_bounded(&job, items, concurrency, move |_| async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            })
            .await;
            Ok(json!({ "started": started }))
        }
    }

    fn handler(items: usize, fail_setup: bool, delay_ms: u64) -> Arc<CountHandler> {
        Arc::new(CountHandler {
            items,
            fail_setup,
            delay_ms,
        })
    }

    #[tokio::test]
    async fn test_job_completes_with_result() {
        let job = Arc::new(Job::new(JobKind::Process, json!({}), 64));
        let mut events = job.subscribe();
        run_job(handler(3, false, 0), Arc::clone(&job), 2).await;

        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.result().unwrap()["started"], 3);

        let mut types = Vec::new();
        while let Some(e) = events.recv().await {
            types.push(e.event_type);
        }
        assert_eq!(types.first(), Some(&EventType::Started));
        assert_eq!(types.last(), Some(&EventType::Completed));
        assert_eq!(
            types.iter().filter(|t| **t == EventType::Progress).count(),
            3
        );
    }

    #[tokio::test]
    async fn test_setup_failure_fails_job() {
        let job = Arc::new(Job::new(JobKind::Process, json!({}), 64));
        run_job(handler(3, true, 0), Arc::clone(&job), 2).await;
        assert_eq!(job.status(), JobStatus::Failed);
        assert!(job.error().unwrap().contains("photo listing failed"));
        assert_eq!(job.terminal_event().unwrap().event_type, EventType::JobError);
    }

    #[tokio::test]
    async fn test_invalid_options_rejected_before_registration() {
        let orchestrator = JobOrchestrator::default();
        let err = orchestrator.start(handler(1, false, 0), 0).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(orchestrator.registry().current(JobKind::Process).is_none());
    }

    #[tokio::test]
    async fn test_cancel_before_run() {
        let job = Arc::new(Job::new(JobKind::Process, json!({}), 64));
        job.cancel();
        run_job(handler(3, false, 0), Arc::clone(&job), 2).await;
        assert_eq!(job.status(), JobStatus::Cancelled);
        assert_eq!(job.processed(), 0);
    }

    #[tokio::test]
    async fn test_cancel_mid_run() {
        let orchestrator = JobOrchestrator::default();
        let job = orchestrator.start(handler(200, false, 10), 2).unwrap();
        let mut events = job.subscribe();

        // Wait for some progress, then cancel.
        loop {
            match events.recv().await {
                Some(e) if e.event_type == EventType::Progress => break,
                Some(_) => continue,
                None => panic!("stream ended before progress"),
            }
        }
        orchestrator.cancel(JobKind::Process, job.id()).unwrap();

        let mut after_cancel = Vec::new();
        let mut seen_cancelled = false;
        while let Some(e) = events.recv().await {
            if seen_cancelled {
                after_cancel.push(e.event_type);
            }
            if e.event_type == EventType::Cancelled {
                seen_cancelled = true;
            }
        }
        assert!(seen_cancelled);
        assert!(after_cancel.is_empty());
        assert_eq!(job.status(), JobStatus::Cancelled);
        assert!(job.processed() < 200);
    }
}
