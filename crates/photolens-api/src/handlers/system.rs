//! Health and API documentation handlers.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use tracing::warn;
use utoipa::OpenApi;

use crate::state::AppState;
use crate::ApiDoc;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub metadata: bool,
    pub embeddings: bool,
    pub index: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_embeddings: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_embeddings: Option<usize>,
}

/// Report which collaborators are configured and the index sizes.
#[utoipa::path(get, path = "/health", tag = "System",
    responses((status = 200, description = "Service health")))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let image_embeddings = match &state.images {
        Some(images) => match images.count().await {
            Ok(n) => Some(n),
            Err(e) => {
                warn!(error = %e, "Image index count failed");
                None
            }
        },
        None => None,
    };
    let face_embeddings = match &state.faces {
        Some(faces) => match faces.count().await {
            Ok(n) => Some(n),
            Err(e) => {
                warn!(error = %e, "Face index count failed");
                None
            }
        },
        None => None,
    };

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        metadata: state.metadata.is_some(),
        embeddings: state.embeddings.is_some(),
        index: state.images.is_some() && state.faces.is_some(),
        image_embeddings,
        face_embeddings,
    })
}

/// Serve the OpenAPI document as JSON.
pub async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
