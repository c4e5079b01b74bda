//! Photo-level similarity handlers: duplicates, similar photos, text search
//! and collection searches.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use photolens_core::{defaults, CollectionKind};
use photolens_search::{
    CollectionSearch, CollectionSearchResponse, DuplicateClusterer, DuplicateResponse,
    PhotoSimilarity, SimilarPhotosResponse, SuggestionResponse, TextSearchResponse,
};

use super::{required, JsonBody};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize, utoipa::ToSchema)]
pub struct DuplicatesRequest {
    /// Restrict the scan to one album; absent scans every embedded photo.
    #[serde(default)]
    pub album_uid: Option<String>,
    /// Maximum cosine distance between duplicates (default 0.08).
    #[serde(default)]
    pub threshold: Option<f32>,
    /// Maximum groups (default 50; 0 means unlimited).
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SimilarRequest {
    pub photo_uid: String,
    #[serde(default)]
    pub threshold: Option<f32>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct TextSearchRequest {
    pub text: String,
    #[serde(default)]
    pub threshold: Option<f32>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CollectionRequest {
    /// `album` or `label`.
    pub source_type: String,
    /// Album uid, or label slug/uid.
    pub source_id: String,
    #[serde(default)]
    pub threshold: Option<f32>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SuggestionsRequest {
    /// `album` or `label`.
    pub source_type: String,
    /// Collections to consider; absent means every collection of the type.
    #[serde(default)]
    pub source_ids: Option<Vec<String>>,
    /// Minimum cosine similarity to the centroid (default 0.75).
    #[serde(default)]
    pub threshold: Option<f32>,
    /// Suggestions per collection (default 20).
    #[serde(default)]
    pub top_k: Option<usize>,
}

fn collection_kind(source_type: &str) -> Result<CollectionKind, ApiError> {
    Ok(required(source_type, "source_type")?.parse::<CollectionKind>()?)
}

/// Group near-identical photos.
#[utoipa::path(post, path = "/photos/duplicates", tag = "Photos", request_body = DuplicatesRequest,
    responses((status = 200, description = "Duplicate groups, largest first")))]
pub async fn find_duplicates(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<DuplicatesRequest>,
) -> Result<Json<DuplicateResponse>, ApiError> {
    let mut clusterer = DuplicateClusterer::new(state.images()?);
    if let Some(metadata) = state.metadata.clone() {
        clusterer = clusterer.with_metadata(metadata);
    }
    let album = req
        .album_uid
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty());
    let response = clusterer
        .find_duplicates(
            album,
            req.threshold.unwrap_or(0.0),
            req.limit.unwrap_or(defaults::DUPLICATE_GROUP_LIMIT),
        )
        .await?;
    Ok(Json(response))
}

/// Photos visually similar to one photo.
#[utoipa::path(post, path = "/photos/similar", tag = "Photos", request_body = SimilarRequest,
    responses((status = 200, description = "Similar photos"),
              (status = 404, description = "Photo has no embedding")))]
pub async fn similar_photos(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<SimilarRequest>,
) -> Result<Json<SimilarPhotosResponse>, ApiError> {
    let uid = required(&req.photo_uid, "photo_uid")?;
    let response = PhotoSimilarity::new(state.images()?)
        .similar_photos(uid, req.threshold.unwrap_or(0.0), req.limit.unwrap_or(0))
        .await?;
    Ok(Json(response))
}

/// Photos matching a text description.
#[utoipa::path(post, path = "/photos/search-by-text", tag = "Photos", request_body = TextSearchRequest,
    responses((status = 200, description = "Matching photos")))]
pub async fn search_by_text(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<TextSearchRequest>,
) -> Result<Json<TextSearchResponse>, ApiError> {
    let text = required(&req.text, "text")?;
    let response = PhotoSimilarity::new(state.images()?)
        .with_embeddings(state.embeddings()?)
        .search_by_text(text, req.threshold.unwrap_or(0.0), req.limit.unwrap_or(0))
        .await?;
    Ok(Json(response))
}

/// Photos similar to many members of an album or label.
#[utoipa::path(post, path = "/photos/similar-to-collection", tag = "Photos", request_body = CollectionRequest,
    responses((status = 200, description = "Vote-ranked photos")))]
pub async fn similar_to_collection(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<CollectionRequest>,
) -> Result<Json<CollectionSearchResponse>, ApiError> {
    let kind = collection_kind(&req.source_type)?;
    let id = required(&req.source_id, "source_id")?;
    let response = CollectionSearch::new(state.images()?, state.metadata()?)
        .with_config(state.match_config.clone())
        .similar_to_collection(
            kind,
            id,
            req.threshold.unwrap_or(0.0),
            req.limit.unwrap_or(defaults::SIMILAR_LIMIT),
        )
        .await?;
    Ok(Json(response))
}

/// Suggest new members for albums or labels.
#[utoipa::path(post, path = "/photos/collection-suggestions", tag = "Photos", request_body = SuggestionsRequest,
    responses((status = 200, description = "Suggestions per collection")))]
pub async fn collection_suggestions(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<SuggestionsRequest>,
) -> Result<Json<SuggestionResponse>, ApiError> {
    let kind = collection_kind(&req.source_type)?;
    let ids = req.source_ids.map(|ids| {
        ids.into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect::<Vec<_>>()
    });
    let response = CollectionSearch::new(state.images()?, state.metadata()?)
        .with_config(state.match_config.clone())
        .suggest(
            kind,
            ids,
            req.threshold.unwrap_or(0.0),
            req.top_k.unwrap_or(0),
        )
        .await?;
    Ok(Json(response))
}
