//! Photo-to-photo and text-to-photo similarity over the whole-image index.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use photolens_core::{defaults, EmbeddingService, Error, ImageHit, ImageIndex, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarPhoto {
    pub photo_uid: String,
    pub distance: f32,
    pub similarity: f32,
}

impl From<ImageHit> for SimilarPhoto {
    fn from(hit: ImageHit) -> Self {
        Self {
            similarity: 1.0 - hit.distance,
            photo_uid: hit.photo_uid,
            distance: hit.distance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarPhotosResponse {
    pub source_photo_uid: String,
    pub threshold: f32,
    pub results: Vec<SimilarPhoto>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSearchResponse {
    pub query: String,
    pub threshold: f32,
    pub results: Vec<SimilarPhoto>,
    pub count: usize,
}

pub struct PhotoSimilarity {
    images: Arc<dyn ImageIndex>,
    embeddings: Option<Arc<dyn EmbeddingService>>,
}

impl PhotoSimilarity {
    pub fn new(images: Arc<dyn ImageIndex>) -> Self {
        Self {
            images,
            embeddings: None,
        }
    }

    /// Required for text search.
    pub fn with_embeddings(mut self, embeddings: Arc<dyn EmbeddingService>) -> Self {
        self.embeddings = Some(embeddings);
        self
    }

    /// Photos visually similar to one photo, excluding the photo itself.
    ///
    /// Fails with `NotFound` when the photo has no image embedding.
    #[instrument(skip(self), fields(subsystem = "search", component = "similarity", op = "similar_photos"))]
    pub async fn similar_photos(
        &self,
        photo_uid: &str,
        threshold: f32,
        limit: usize,
    ) -> Result<SimilarPhotosResponse> {
        let threshold = or_default(threshold, defaults::SIMILAR_THRESHOLD);
        let limit = if limit == 0 { defaults::SIMILAR_LIMIT } else { limit };

        let source = self
            .images
            .get(photo_uid)
            .await?
            .ok_or_else(|| Error::NotFound(format!("no embedding for photo {}", photo_uid)))?;

        let results: Vec<SimilarPhoto> = self
            .images
            .find_similar_with_distance(&source.vector, limit + 1, threshold)
            .await?
            .into_iter()
            .filter(|h| h.photo_uid != photo_uid)
            .take(limit)
            .map(SimilarPhoto::from)
            .collect();

        debug!(result_count = results.len(), "Similar photos found");
        Ok(SimilarPhotosResponse {
            source_photo_uid: photo_uid.to_string(),
            threshold,
            count: results.len(),
            results,
        })
    }

    /// Photos matching a free-text description.
    #[instrument(skip(self), fields(subsystem = "search", component = "similarity", op = "search_by_text"))]
    pub async fn search_by_text(
        &self,
        text: &str,
        threshold: f32,
        limit: usize,
    ) -> Result<TextSearchResponse> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::InvalidInput("text is required".to_string()));
        }
        let embeddings = self
            .embeddings
            .as_ref()
            .ok_or_else(|| Error::Unavailable("embedding service not configured".to_string()))?;
        let threshold = or_default(threshold, defaults::TEXT_SEARCH_THRESHOLD);
        let limit = if limit == 0 { defaults::SIMILAR_LIMIT } else { limit };

        let vector = embeddings.compute_text_embedding(text).await?;
        let results: Vec<SimilarPhoto> = self
            .images
            .find_similar_with_distance(&vector, limit, threshold)
            .await?
            .into_iter()
            .map(SimilarPhoto::from)
            .collect();

        debug!(result_count = results.len(), "Text search complete");
        Ok(TextSearchResponse {
            query: text.to_string(),
            threshold,
            count: results.len(),
            results,
        })
    }
}

fn or_default(threshold: f32, default: f32) -> f32 {
    if threshold <= 0.0 {
        default
    } else {
        threshold
    }
}
