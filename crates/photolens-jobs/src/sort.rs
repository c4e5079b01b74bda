//! Label-sorting job: assign each album photo the label whose text embedding
//! is closest to the photo's image embedding.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument, warn};

use photolens_core::{
    cosine_similarity, defaults, fetch_all_photos, EmbeddingService, Error, ImageIndex,
    MetadataService, PhotoQuery, Result,
};

use crate::events::EventType;
use crate::handler::JobHandler;
use crate::job::{Job, JobKind};
use crate::pool::run_bounded;

/// Options of a label-sorting job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SortOptions {
    pub album_uid: String,
    /// Candidate label names; each is embedded as text.
    pub labels: Vec<String>,
    /// Minimum cosine similarity; `0` uses the default.
    #[serde(default)]
    pub threshold: f32,
    #[serde(default)]
    pub concurrency: usize,
    /// Compute suggestions without writing labels.
    #[serde(default)]
    pub dry_run: bool,
}

impl SortOptions {
    fn effective_threshold(&self) -> f32 {
        if self.threshold > 0.0 {
            self.threshold
        } else {
            defaults::SORT_SIMILARITY
        }
    }
}

/// One label decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelSuggestion {
    pub photo_uid: String,
    pub label: String,
    pub similarity: f32,
    pub applied: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SortResult {
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub labeled: usize,
    pub errors: usize,
    pub suggestions: Vec<LabelSuggestion>,
}

/// Label uncertainty (0 = certain) for a similarity in `[-1, 1]`.
pub fn uncertainty_for(similarity: f32) -> u8 {
    ((1.0 - similarity) * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Index of the label most similar to `vector`, if any reaches `threshold`.
pub fn best_label(vector: &[f32], labels: &[Vec<f32>], threshold: f32) -> Option<(usize, f32)> {
    labels
        .iter()
        .enumerate()
        .map(|(i, l)| (i, cosine_similarity(vector, l)))
        .filter(|(_, sim)| *sim >= threshold)
        .fold(None, |best: Option<(usize, f32)>, cur| match best {
            Some(b) if b.1 >= cur.1 => Some(b),
            _ => Some(cur),
        })
}

pub struct SortHandler {
    metadata: Arc<dyn MetadataService>,
    embeddings: Arc<dyn EmbeddingService>,
    images: Arc<dyn ImageIndex>,
    default_concurrency: usize,
}

impl SortHandler {
    pub fn new(
        metadata: Arc<dyn MetadataService>,
        embeddings: Arc<dyn EmbeddingService>,
        images: Arc<dyn ImageIndex>,
    ) -> Self {
        Self {
            metadata,
            embeddings,
            images,
            default_concurrency: defaults::PROCESS_CONCURRENCY,
        }
    }

    pub fn with_default_concurrency(mut self, concurrency: usize) -> Self {
        self.default_concurrency = concurrency.max(1);
        self
    }
}

struct SortState {
    metadata: Arc<dyn MetadataService>,
    labels: Vec<String>,
    label_vectors: Vec<Vec<f32>>,
    threshold: f32,
    dry_run: bool,
    labeled: AtomicUsize,
    errors: AtomicUsize,
    suggestions: Mutex<Vec<LabelSuggestion>>,
}

impl SortState {
    async fn sort_one(&self, photo_uid: String, vector: Vec<f32>) {
        let Some((idx, similarity)) = best_label(&vector, &self.label_vectors, self.threshold)
        else {
            return;
        };
        let label = &self.labels[idx];

        let mut applied = false;
        if !self.dry_run {
            match self
                .metadata
                .add_photo_label(&photo_uid, label, uncertainty_for(similarity))
                .await
            {
                Ok(()) => {
                    applied = true;
                    self.labeled.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!(photo_uid = %photo_uid, label = %label, error = %e, "Failed to apply label");
                    self.errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        self.suggestions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(LabelSuggestion {
                photo_uid,
                label: label.clone(),
                similarity,
                applied,
            });
    }
}

#[async_trait]
impl JobHandler for SortHandler {
    type Options = SortOptions;
    type Output = SortResult;

    fn kind(&self) -> JobKind {
        JobKind::Sort
    }

    fn validate(&self, options: &SortOptions) -> Result<()> {
        if options.album_uid.trim().is_empty() {
            return Err(Error::InvalidInput("album_uid is required".to_string()));
        }
        if options.labels.iter().all(|l| l.trim().is_empty()) {
            return Err(Error::InvalidInput("at least one label is required".to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self, job, options), fields(subsystem = "jobs", component = "sort", op = "run", album_uid = %options.album_uid))]
    async fn run(&self, job: Arc<Job>, options: SortOptions) -> Result<SortResult> {
        let photos =
            fetch_all_photos(self.metadata.as_ref(), &PhotoQuery::album(&options.album_uid))
                .await?;
        let total = photos.len();
        job.emit(
            EventType::PhotosCounted,
            format!("{} photos in album", total),
            json!({ "count": total }),
        );

        let labels: Vec<String> = options
            .labels
            .iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        let mut label_vectors = Vec::with_capacity(labels.len());
        for label in &labels {
            label_vectors.push(self.embeddings.compute_text_embedding(label).await?);
        }

        let mut work = Vec::new();
        for photo in photos {
            match self.images.get(&photo.uid).await {
                Ok(Some(e)) if !e.vector.is_empty() => work.push((photo.uid, e.vector)),
                Ok(_) => {}
                Err(e) => warn!(photo_uid = %photo.uid, error = %e, "Image lookup failed"),
            }
        }
        let skipped = total - work.len();
        job.add_skipped(skipped);
        job.set_total(work.len());
        job.emit(
            EventType::FilteringDone,
            format!("{} photos with embeddings, {} skipped", work.len(), skipped),
            json!({ "to_process": work.len(), "skipped": skipped }),
        );
        debug!(to_process = work.len(), labels = labels.len(), "Planned label sort");

        let state = Arc::new(SortState {
            metadata: Arc::clone(&self.metadata),
            labels,
            label_vectors,
            threshold: options.effective_threshold(),
            dry_run: options.dry_run,
            labeled: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            suggestions: Mutex::new(Vec::new()),
        });

        let concurrency = if options.concurrency == 0 {
            self.default_concurrency
        } else {
            options.concurrency
        };
        let pool_state = Arc::clone(&state);
        run_bounded(&job, work, concurrency, move |(uid, vector)| {
            let state = Arc::clone(&pool_state);
            async move { state.sort_one(uid, vector).await }
        })
        .await;

        let mut suggestions =
            std::mem::take(&mut *state.suggestions.lock().unwrap_or_else(|e| e.into_inner()));
        suggestions.sort_by(|a, b| a.photo_uid.cmp(&b.photo_uid));

        Ok(SortResult {
            total,
            processed: job.processed(),
            skipped,
            labeled: state.labeled.load(Ordering::Relaxed),
            errors: state.errors.load(Ordering::Relaxed),
            suggestions,
        })
    }
}
