//! # photolens-api
//!
//! HTTP API for photolens.
//!
//! This crate provides:
//! - The axum router with face, photo, job and system endpoints
//! - `ApiError` mapping of core errors to `{"error": ...}` responses
//! - The SSE bridge for job event streams
//! - Server configuration from the environment
//!
//! ## Example
//!
//! ```ignore
//! use photolens_api::{router, AppState};
//!
//! let state = AppState::new()
//!     .with_metadata(metadata)
//!     .with_indexes(images, faces);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, router(state)).await?;
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod state;

use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use uuid::Uuid;

use photolens_core::defaults;

pub use config::{ServerConfig, VectorBackend};
pub use error::ApiError;
pub use handlers::jobs::job_event_stream;
pub use state::AppState;

/// OpenAPI document served at `/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "photolens API",
        description = "Face matching, photo similarity and background embedding jobs for a photo library"
    ),
    paths(
        handlers::faces::match_faces,
        handlers::faces::find_outliers,
        handlers::faces::apply_face_action,
        handlers::photos::find_duplicates,
        handlers::photos::similar_photos,
        handlers::photos::search_by_text,
        handlers::photos::similar_to_collection,
        handlers::photos::collection_suggestions,
        handlers::jobs::start_process,
        handlers::jobs::get_process,
        handlers::jobs::process_events,
        handlers::jobs::cancel_process,
        handlers::jobs::start_sort,
        handlers::jobs::get_sort,
        handlers::jobs::sort_events,
        handlers::jobs::cancel_sort,
        handlers::system::health_check,
    ),
    components(schemas(
        handlers::faces::PersonRequest,
        handlers::photos::DuplicatesRequest,
        handlers::photos::SimilarRequest,
        handlers::photos::TextSearchRequest,
        handlers::photos::CollectionRequest,
        handlers::photos::SuggestionsRequest,
    )),
    tags(
        (name = "Faces", description = "Face matching and marker actions"),
        (name = "Photos", description = "Duplicate, similarity and collection search"),
        (name = "Jobs", description = "Bulk processing and label sorting jobs"),
        (name = "System", description = "Health checks")
    )
)]
pub struct ApiDoc;

/// Generates time-ordered UUIDv7 request correlation IDs.
#[derive(Clone, Default)]
pub struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

/// Build the application router with tracing and request-id layers.
pub fn router(state: AppState) -> Router {
    use handlers::{faces, jobs, photos, system};

    Router::new()
        .route("/health", get(system::health_check))
        .route("/openapi.json", get(system::openapi_json))
        // Faces
        .route("/faces/match", post(faces::match_faces))
        .route("/faces/outliers", post(faces::find_outliers))
        .route("/faces/apply", post(faces::apply_face_action))
        // Photos
        .route("/photos/duplicates", post(photos::find_duplicates))
        .route("/photos/similar", post(photos::similar_photos))
        .route("/photos/search-by-text", post(photos::search_by_text))
        .route(
            "/photos/similar-to-collection",
            post(photos::similar_to_collection),
        )
        .route(
            "/photos/collection-suggestions",
            post(photos::collection_suggestions),
        )
        // Jobs
        .route("/process", post(jobs::start_process))
        .route(
            "/process/:id",
            get(jobs::get_process).delete(jobs::cancel_process),
        )
        .route("/process/:id/events", get(jobs::process_events))
        .route("/sort", post(jobs::start_sort))
        .route("/sort/:id", get(jobs::get_sort).delete(jobs::cancel_sort))
        .route("/sort/:id/events", get(jobs::sort_events))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .with_state(state)
}

/// Parse a comma-separated origin list, dropping invalid entries.
pub fn parse_allowed_origins(origins: &str) -> Vec<HeaderValue> {
    origins
        .split(',')
        .filter_map(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            match trimmed.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!("Invalid CORS origin '{}': {}", trimmed, e);
                    None
                }
            }
        })
        .collect()
}

/// CORS layer restricted to the given origins.
pub fn cors_layer(origins: Vec<HeaderValue>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(std::time::Duration::from_secs(defaults::CORS_MAX_AGE_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_allowed_origins_skips_blanks() {
        let origins = parse_allowed_origins("http://localhost:3000, ,https://photos.example.com");
        assert_eq!(origins.len(), 2);
        assert_eq!(origins[1], "https://photos.example.com");
        assert!(parse_allowed_origins("").is_empty());
    }

    #[test]
    fn test_openapi_lists_endpoints() {
        let doc = ApiDoc::openapi();
        for path in ["/faces/match", "/photos/duplicates", "/process", "/sort/{id}/events"] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
