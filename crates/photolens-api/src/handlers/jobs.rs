//! Background job handlers: start, inspect, stream and cancel.
//!
//! Both job kinds share the same surface:
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | POST | `/{kind}` | `202 {job_id, status}` |
//! | GET | `/{kind}/:id` | job snapshot |
//! | GET | `/{kind}/:id/events` | `text/event-stream`, ends after the terminal event |
//! | DELETE | `/{kind}/:id` | `{job_id, cancelled, status}` |

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive};
use axum::response::{IntoResponse, Sse};
use axum::Json;
use futures::Stream;
use serde::Serialize;
use tracing::{debug, info};

use photolens_core::defaults;
use photolens_jobs::{
    Job, JobEvent, JobKind, JobSnapshot, ProcessHandler, ProcessOptions, SortHandler, SortOptions,
};

use super::JsonBody;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct JobStarted {
    pub job_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct JobCancelled {
    pub job_id: String,
    pub cancelled: bool,
    pub status: String,
}

fn accepted(job: &Job) -> (StatusCode, Json<JobStarted>) {
    (
        StatusCode::ACCEPTED,
        Json(JobStarted {
            job_id: job.id().to_string(),
            status: job.status().to_string(),
        }),
    )
}

/// Start bulk processing. An empty body uses default options.
#[utoipa::path(post, path = "/process", tag = "Jobs",
    responses((status = 202, description = "Job started"),
              (status = 409, description = "A processing job is already running")))]
pub async fn start_process(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let options: ProcessOptions = if body.iter().all(u8::is_ascii_whitespace) {
        ProcessOptions::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid process options: {}", e)))?
    };

    let handler = ProcessHandler::new(
        state.metadata()?,
        state.embeddings()?,
        state.images()?,
        state.faces()?,
    )
    .with_default_concurrency(state.job_concurrency)
    .with_marker_iou(state.match_config.face_marker_iou);

    let job = state.jobs.start(Arc::new(handler), options)?;
    info!(job_id = %job.id(), job_kind = "process", "Processing job accepted");
    Ok(accepted(&job))
}

/// Start zero-shot label sorting of an album.
#[utoipa::path(post, path = "/sort", tag = "Jobs",
    responses((status = 202, description = "Job started"),
              (status = 409, description = "A sort job is already running")))]
pub async fn start_sort(
    State(state): State<AppState>,
    JsonBody(options): JsonBody<SortOptions>,
) -> Result<impl IntoResponse, ApiError> {
    let handler = SortHandler::new(state.metadata()?, state.embeddings()?, state.images()?)
        .with_default_concurrency(state.job_concurrency);

    let job = state.jobs.start(Arc::new(handler), options)?;
    info!(job_id = %job.id(), job_kind = "sort", "Sort job accepted");
    Ok(accepted(&job))
}

fn snapshot(state: &AppState, kind: JobKind, id: &str) -> Result<Json<JobSnapshot>, ApiError> {
    Ok(Json(state.jobs.get(kind, id)?.snapshot()))
}

fn cancel(state: &AppState, kind: JobKind, id: &str) -> Result<Json<JobCancelled>, ApiError> {
    let job = state.jobs.cancel(kind, id)?;
    Ok(Json(JobCancelled {
        job_id: job.id().to_string(),
        cancelled: true,
        status: job.status().to_string(),
    }))
}

fn to_sse(event: &JobEvent) -> Event {
    let sse = Event::default().event(event.event_type.as_str());
    match serde_json::to_string(event) {
        Ok(json) => sse.data(json),
        Err(_) => sse.data(event.message.clone()),
    }
}

/// Stream a job's events, ending after its terminal event.
///
/// A listener that misses the terminal event (its buffer was full when the
/// job finished) gets the job's stored terminal event instead.
pub fn job_event_stream(job: Arc<Job>) -> impl Stream<Item = Result<Event, Infallible>> {
    let subscription = job.subscribe();
    futures::stream::unfold(
        (subscription, job, false),
        |(mut subscription, job, finished)| async move {
            if finished {
                return None;
            }
            let event = match subscription.recv().await {
                Some(event) => event,
                None => job.terminal_event()?,
            };
            let terminal = event.event_type.is_terminal();
            Some((Ok(to_sse(&event)), (subscription, job, terminal)))
        },
    )
}

fn events(
    state: &AppState,
    kind: JobKind,
    id: &str,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let job = state.jobs.get(kind, id)?;
    debug!(job_id = %id, job_kind = %kind, "Event stream opened");
    Ok(Sse::new(job_event_stream(job)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(defaults::SSE_KEEPALIVE_SECS))
            .text("keepalive"),
    ))
}

#[utoipa::path(get, path = "/process/{id}", tag = "Jobs",
    params(("id" = String, Path, description = "Job id")),
    responses((status = 200, description = "Job snapshot"), (status = 404, description = "Unknown job")))]
pub async fn get_process(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobSnapshot>, ApiError> {
    snapshot(&state, JobKind::Process, &id)
}

#[utoipa::path(get, path = "/process/{id}/events", tag = "Jobs",
    params(("id" = String, Path, description = "Job id")),
    responses((status = 200, description = "Server-sent job events")))]
pub async fn process_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    events(&state, JobKind::Process, &id)
}

#[utoipa::path(delete, path = "/process/{id}", tag = "Jobs",
    params(("id" = String, Path, description = "Job id")),
    responses((status = 200, description = "Cancellation requested")))]
pub async fn cancel_process(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobCancelled>, ApiError> {
    cancel(&state, JobKind::Process, &id)
}

#[utoipa::path(get, path = "/sort/{id}", tag = "Jobs",
    params(("id" = String, Path, description = "Job id")),
    responses((status = 200, description = "Job snapshot"), (status = 404, description = "Unknown job")))]
pub async fn get_sort(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobSnapshot>, ApiError> {
    snapshot(&state, JobKind::Sort, &id)
}

#[utoipa::path(get, path = "/sort/{id}/events", tag = "Jobs",
    params(("id" = String, Path, description = "Job id")),
    responses((status = 200, description = "Server-sent job events")))]
pub async fn sort_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    events(&state, JobKind::Sort, &id)
}

#[utoipa::path(delete, path = "/sort/{id}", tag = "Jobs",
    params(("id" = String, Path, description = "Job id")),
    responses((status = 200, description = "Cancellation requested")))]
pub async fn cancel_sort(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobCancelled>, ApiError> {
    cancel(&state, JobKind::Sort, &id)
}
