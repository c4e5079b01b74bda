//! Shared application state.

use std::sync::Arc;

use photolens_core::{defaults, EmbeddingService, FaceIndex, ImageIndex, MetadataService};
use photolens_jobs::JobOrchestrator;
use photolens_search::MatchConfig;

use crate::error::ApiError;

/// Collaborators and settings shared by every handler.
///
/// Each collaborator is optional; handlers needing a missing one answer 503.
#[derive(Clone)]
pub struct AppState {
    pub metadata: Option<Arc<dyn MetadataService>>,
    pub embeddings: Option<Arc<dyn EmbeddingService>>,
    pub images: Option<Arc<dyn ImageIndex>>,
    pub faces: Option<Arc<dyn FaceIndex>>,
    pub match_config: MatchConfig,
    pub jobs: Arc<JobOrchestrator>,
    /// Worker count for jobs that do not specify one.
    pub job_concurrency: usize,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    pub fn new() -> Self {
        Self {
            metadata: None,
            embeddings: None,
            images: None,
            faces: None,
            match_config: MatchConfig::default(),
            jobs: Arc::new(JobOrchestrator::default()),
            job_concurrency: defaults::PROCESS_CONCURRENCY,
        }
    }

    pub fn with_metadata(mut self, metadata: Arc<dyn MetadataService>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_embeddings(mut self, embeddings: Arc<dyn EmbeddingService>) -> Self {
        self.embeddings = Some(embeddings);
        self
    }

    /// Both vector indexes.
    pub fn with_indexes(mut self, images: Arc<dyn ImageIndex>, faces: Arc<dyn FaceIndex>) -> Self {
        self.images = Some(images);
        self.faces = Some(faces);
        self
    }

    pub fn with_match_config(mut self, config: MatchConfig) -> Self {
        self.match_config = config;
        self
    }

    pub fn with_jobs(mut self, jobs: Arc<JobOrchestrator>) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_job_concurrency(mut self, concurrency: usize) -> Self {
        self.job_concurrency = concurrency.max(1);
        self
    }

    pub fn metadata(&self) -> Result<Arc<dyn MetadataService>, ApiError> {
        self.metadata.clone().ok_or_else(|| {
            ApiError::ServiceUnavailable(
                "Metadata service not configured. Set PHOTOPRISM_URL.".into(),
            )
        })
    }

    pub fn embeddings(&self) -> Result<Arc<dyn EmbeddingService>, ApiError> {
        self.embeddings.clone().ok_or_else(|| {
            ApiError::ServiceUnavailable(
                "Embedding service not configured. Set EMBEDDING_URL.".into(),
            )
        })
    }

    pub fn images(&self) -> Result<Arc<dyn ImageIndex>, ApiError> {
        self.images.clone().ok_or_else(index_unavailable)
    }

    pub fn faces(&self) -> Result<Arc<dyn FaceIndex>, ApiError> {
        self.faces.clone().ok_or_else(index_unavailable)
    }
}

fn index_unavailable() -> ApiError {
    ApiError::ServiceUnavailable(
        "Vector index not configured. Set DATABASE_URL or VECTOR_BACKEND=memory.".into(),
    )
}
