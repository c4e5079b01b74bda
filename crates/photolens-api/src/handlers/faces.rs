//! Face matching, outlier and action handlers.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use tracing::info;

use photolens_search::{
    ApplyRequest, ApplyResponse, FaceActionApplier, FaceMatchResponse, FaceMatcher,
    OutlierDetector, OutlierResponse,
};

use super::{required, JsonBody};
use crate::error::ApiError;
use crate::state::AppState;

/// Request naming one person.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct PersonRequest {
    /// Subject name as known to the metadata service.
    pub person_name: String,
    /// Match: maximum cosine distance (default 0.5). Outliers: minimum
    /// distance from the centroid to report (default 0, all faces).
    #[serde(default)]
    pub threshold: Option<f32>,
    /// Maximum results; 0 or absent means unlimited.
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Find faces of other photos that likely show the person.
///
/// # Returns
/// - 200 OK with matches and an action summary (empty when the person has no embeddings)
/// - 400 Bad Request if `person_name` is missing
/// - 503 Service Unavailable if no vector index is configured
#[utoipa::path(post, path = "/faces/match", tag = "Faces", request_body = PersonRequest,
    responses((status = 200, description = "Face matches")))]
pub async fn match_faces(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<PersonRequest>,
) -> Result<Json<FaceMatchResponse>, ApiError> {
    let person = required(&req.person_name, "person_name")?;
    let mut matcher = FaceMatcher::new(state.faces()?).with_config(state.match_config.clone());
    if let Some(metadata) = state.metadata.clone() {
        matcher = matcher.with_metadata(metadata);
    }

    let response = matcher
        .find_matches(person, req.threshold.unwrap_or(0.0), req.limit.unwrap_or(0))
        .await?;
    info!(
        person,
        result_count = response.matches.len(),
        "Face match request served"
    );
    Ok(Json(response))
}

/// Rank a person's faces by distance from their centroid.
#[utoipa::path(post, path = "/faces/outliers", tag = "Faces", request_body = PersonRequest,
    responses((status = 200, description = "Outlier faces, most anomalous first")))]
pub async fn find_outliers(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<PersonRequest>,
) -> Result<Json<OutlierResponse>, ApiError> {
    let person = required(&req.person_name, "person_name")?;
    let response = OutlierDetector::new(state.faces()?)
        .find_outliers(person, req.threshold.unwrap_or(0.0), req.limit.unwrap_or(0))
        .await?;
    Ok(Json(response))
}

/// Apply one face action (create marker, assign, unassign).
#[utoipa::path(post, path = "/faces/apply", tag = "Faces",
    responses((status = 200, description = "Action applied")))]
pub async fn apply_face_action(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<ApplyRequest>,
) -> Result<Json<ApplyResponse>, ApiError> {
    required(&req.photo_uid, "photo_uid")?;
    let mut applier = FaceActionApplier::new(state.metadata()?);
    if let Some(faces) = state.faces.clone() {
        applier = applier.with_faces(faces);
    }
    Ok(Json(applier.apply(req).await?))
}
