//! Job model and state machine.
//!
//! `Pending -> Running -> {Completed | Failed | Cancelled}`. Status, totals
//! and the result sit behind a per-job lock; the processed counter is atomic
//! because pool workers bump it concurrently.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::events::{EventHub, EventType, JobEvent, Subscription};

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of background job. One job per kind may be active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Bulk embedding and face detection.
    Process,
    /// Zero-shot album labelling.
    Sort,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Process => "process",
            JobKind::Sort => "sort",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    total: usize,
    skipped: usize,
    result: Option<serde_json::Value>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of a job, as returned by the status endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub options: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// One background job.
pub struct Job {
    id: String,
    kind: JobKind,
    options: serde_json::Value,
    state: RwLock<JobState>,
    processed: AtomicUsize,
    cancel: CancellationToken,
    events: Arc<EventHub>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("status", &self.status())
            .finish()
    }
}

impl Job {
    /// Create a pending job.
    pub fn new(kind: JobKind, options: serde_json::Value, event_buffer: usize) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            kind,
            options,
            state: RwLock::new(JobState {
                status: JobStatus::Pending,
                total: 0,
                skipped: 0,
                result: None,
                error: None,
                created_at: Utc::now(),
                started_at: None,
                completed_at: None,
            }),
            processed: AtomicUsize::new(0),
            cancel: CancellationToken::new(),
            events: Arc::new(EventHub::new(event_buffer)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, JobState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, JobState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn options(&self) -> &serde_json::Value {
        &self.options
    }

    pub fn status(&self) -> JobStatus {
        self.read().status
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn total(&self) -> usize {
        self.read().total
    }

    pub fn skipped(&self) -> usize {
        self.read().skipped
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn result(&self) -> Option<serde_json::Value> {
        self.read().result.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.read().error.clone()
    }

    /// Number of work units that will be dispatched to the pool.
    pub fn set_total(&self, total: usize) {
        let mut state = self.write();
        state.total = state.total.max(total);
    }

    pub fn add_skipped(&self, n: usize) {
        self.write().skipped += n;
    }

    /// Count one finished unit and broadcast progress.
    pub fn record_progress(&self) -> usize {
        let current = self.processed.fetch_add(1, Ordering::SeqCst) + 1;
        let total = self.total();
        self.emit(
            EventType::Progress,
            format!("{}/{}", current, total),
            json!({ "current": current, "total": total }),
        );
        current
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Request cancellation. No-op (returns false) once terminal.
    pub fn cancel(&self) -> bool {
        if self.is_terminal() {
            return false;
        }
        info!(job_id = %self.id, job_kind = %self.kind, "Job cancellation requested");
        self.cancel.cancel();
        true
    }

    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.events.listener_count()
    }

    pub fn terminal_event(&self) -> Option<JobEvent> {
        self.events.terminal_event()
    }

    /// Broadcast a non-terminal event. Ignored once the job has ended.
    pub fn emit(&self, event_type: EventType, message: impl Into<String>, data: serde_json::Value) {
        if event_type.is_terminal() {
            return;
        }
        self.events.broadcast(JobEvent::new(event_type, message, data));
    }

    /// `Pending -> Running`, broadcasting `started`.
    pub fn mark_running(&self) -> bool {
        {
            let mut state = self.write();
            if state.status != JobStatus::Pending {
                return false;
            }
            state.status = JobStatus::Running;
            state.started_at = Some(Utc::now());
        }
        self.emit(
            EventType::Started,
            format!("{} job started", self.kind),
            json!({ "job_id": self.id }),
        );
        true
    }

    /// Enter a terminal status and broadcast the matching terminal event.
    fn finish(
        &self,
        status: JobStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> bool {
        let event = {
            let mut state = self.write();
            if state.status.is_terminal() {
                return false;
            }
            state.status = status;
            state.completed_at = Some(Utc::now());
            state.result = result.clone();
            state.error = error.clone();

            let (event_type, message) = match status {
                JobStatus::Completed => (EventType::Completed, format!("{} job completed", self.kind)),
                JobStatus::Cancelled => (EventType::Cancelled, format!("{} job cancelled", self.kind)),
                _ => (
                    EventType::JobError,
                    error.clone().unwrap_or_else(|| "job failed".to_string()),
                ),
            };
            JobEvent::new(
                event_type,
                message,
                json!({
                    "status": status,
                    "processed": self.processed(),
                    "total": state.total,
                    "skipped": state.skipped,
                    "result": result,
                    "error": error,
                }),
            )
        };
        self.events.broadcast(event);
        true
    }

    pub fn complete(&self, result: serde_json::Value) -> bool {
        self.finish(JobStatus::Completed, Some(result), None)
    }

    pub fn fail(&self, error: impl Into<String>) -> bool {
        self.finish(JobStatus::Failed, None, Some(error.into()))
    }

    /// Enter `Cancelled`, keeping any partial result.
    pub fn mark_cancelled(&self, partial: Option<serde_json::Value>) -> bool {
        self.cancel.cancel();
        self.finish(JobStatus::Cancelled, partial, None)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.read();
        JobSnapshot {
            job_id: self.id.clone(),
            kind: self.kind,
            status: state.status,
            total: state.total,
            processed: self.processed(),
            skipped: state.skipped,
            options: self.options.clone(),
            result: state.result.clone(),
            error: state.error.clone(),
            created_at: state.created_at,
            started_at: state.started_at,
            completed_at: state.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(JobKind::Process, json!({ "concurrency": 2 }), 16)
    }

    #[test]
    fn test_status_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert_eq!(
            serde_json::to_value(JobStatus::Cancelled).unwrap(),
            json!("cancelled")
        );
    }

    #[test]
    fn test_lifecycle() {
        let job = job();
        assert_eq!(job.status(), JobStatus::Pending);
        assert!(job.mark_running());
        assert!(!job.mark_running());
        job.set_total(3);
        job.record_progress();
        assert!(job.complete(json!({ "processed": 1 })));
        assert_eq!(job.status(), JobStatus::Completed);
        assert!(!job.fail("late"));
        assert_eq!(job.status(), JobStatus::Completed);

        let snap = job.snapshot();
        assert_eq!(snap.processed, 1);
        assert_eq!(snap.total, 3);
        assert!(snap.result.is_some());
        assert!(snap.started_at.is_some() && snap.completed_at.is_some());
    }

    #[test]
    fn test_job_ids_are_v7_uuids() {
        let first = job();
        let second = job();
        let id = Uuid::parse_str(first.id()).unwrap();
        assert_eq!(id.get_version_num(), 7);
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn test_cancel_after_terminal_is_noop() {
        let job = job();
        job.mark_running();
        job.fail("boom");
        assert!(!job.cancel());
        assert!(!job.is_cancelled());
        assert_eq!(job.error().as_deref(), Some("boom"));
    }

    #[test]
    fn test_total_never_decreases() {
        let job = job();
        job.set_total(10);
        job.set_total(4);
        assert_eq!(job.total(), 10);
    }

    #[tokio::test]
    async fn test_terminal_event_is_last() {
        let job = job();
        let mut sub = job.subscribe();
        job.mark_running();
        job.mark_cancelled(None);
        job.record_progress();

        assert_eq!(sub.recv().await.unwrap().event_type, EventType::Started);
        let last = sub.recv().await.unwrap();
        assert_eq!(last.event_type, EventType::Cancelled);
        assert_eq!(last.data["status"], "cancelled");
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn test_snapshot_serialization_omits_empty_fields() {
        let value = serde_json::to_value(job().snapshot()).unwrap();
        assert_eq!(value["status"], "pending");
        assert_eq!(value["kind"], "process");
        assert!(value.get("result").is_none());
        assert!(value.get("error").is_none());
    }
}
