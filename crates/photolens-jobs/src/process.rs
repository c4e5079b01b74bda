//! Bulk-processing job: image embeddings and face detection for every photo
//! that still needs them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use photolens_core::{
    best_marker_match, defaults, fetch_all_photos, EmbeddingKind, EmbeddingService, Error,
    FaceIndex, ImageEmbedding, ImageIndex, MetadataService, Photo, PhotoQuery, Result, StoredFace,
};

use crate::events::EventType;
use crate::handler::JobHandler;
use crate::job::{Job, JobKind};
use crate::pool::run_bounded;

fn default_true() -> bool {
    true
}

/// Options of a bulk-processing job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessOptions {
    /// Worker count; `0` uses the default.
    #[serde(default)]
    pub concurrency: usize,
    /// Process at most this many photos; `0` means all.
    #[serde(default)]
    pub limit: usize,
    #[serde(default = "default_true")]
    pub faces: bool,
    #[serde(default = "default_true")]
    pub images: bool,
    /// Metadata search filter for the candidate photos.
    #[serde(default)]
    pub query: Option<String>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            concurrency: 0,
            limit: 0,
            faces: true,
            images: true,
            query: None,
        }
    }
}

/// Final tallies of a bulk-processing job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessResult {
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub embeddings_created: usize,
    pub faces_detected: usize,
    pub embed_errors: usize,
    pub face_errors: usize,
    pub download_errors: usize,
    pub duration_ms: u64,
}

#[derive(Default)]
struct Counters {
    embeddings_created: AtomicUsize,
    faces_detected: AtomicUsize,
    embed_errors: AtomicUsize,
    face_errors: AtomicUsize,
    download_errors: AtomicUsize,
}

/// What one photo still needs.
#[derive(Debug, Clone)]
struct WorkItem {
    photo: Photo,
    image: bool,
    faces: bool,
}

/// Computes and stores embeddings for the library.
pub struct ProcessHandler {
    metadata: Arc<dyn MetadataService>,
    embeddings: Arc<dyn EmbeddingService>,
    images: Arc<dyn ImageIndex>,
    faces: Arc<dyn FaceIndex>,
    default_concurrency: usize,
    marker_iou: f64,
}

impl ProcessHandler {
    pub fn new(
        metadata: Arc<dyn MetadataService>,
        embeddings: Arc<dyn EmbeddingService>,
        images: Arc<dyn ImageIndex>,
        faces: Arc<dyn FaceIndex>,
    ) -> Self {
        Self {
            metadata,
            embeddings,
            images,
            faces,
            default_concurrency: defaults::PROCESS_CONCURRENCY,
            marker_iou: defaults::FACE_MARKER_IOU,
        }
    }

    pub fn with_default_concurrency(mut self, concurrency: usize) -> Self {
        self.default_concurrency = concurrency.max(1);
        self
    }

    /// Minimum IoU for associating a detected face with a marker.
    pub fn with_marker_iou(mut self, iou: f64) -> Self {
        self.marker_iou = iou;
        self
    }

    /// Decide what each photo still needs. Index lookup failures count as
    /// "needs work" so the item is retried.
    async fn plan(&self, photos: Vec<Photo>, options: &ProcessOptions) -> Vec<WorkItem> {
        let mut work = Vec::new();
        for photo in photos {
            let image = options.images && !self.images.has(&photo.uid).await.unwrap_or_else(|e| {
                warn!(photo_uid = %photo.uid, error = %e, "Image index lookup failed");
                false
            });
            let faces = options.faces && !self.faces.has(&photo.uid).await.unwrap_or_else(|e| {
                warn!(photo_uid = %photo.uid, error = %e, "Face index lookup failed");
                false
            });
            if image || faces {
                work.push(WorkItem {
                    photo,
                    image,
                    faces,
                });
            }
        }
        work
    }
}

/// Shared state for per-photo work on pool tasks.
struct Worker {
    metadata: Arc<dyn MetadataService>,
    embeddings: Arc<dyn EmbeddingService>,
    images: Arc<dyn ImageIndex>,
    faces: Arc<dyn FaceIndex>,
    marker_iou: f64,
    counters: Counters,
}

impl Worker {
    /// Process one photo, abandoning it as soon as a network call returns
    /// into a cancelled job.
    async fn process(&self, item: WorkItem, token: &CancellationToken) {
        let photo = &item.photo;
        trace!(photo_uid = %photo.uid, image = item.image, faces = item.faces, "Processing photo");

        let bytes = match self.metadata.download_file(&photo.file_hash).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(photo_uid = %photo.uid, error = %e, "Download failed");
                self.counters.download_errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        if token.is_cancelled() {
            trace!(photo_uid = %photo.uid, "Cancelled after download");
            return;
        }

        if item.image {
            match self.embed_image(photo, &bytes, token).await {
                Ok(()) => {
                    self.counters.embeddings_created.fetch_add(1, Ordering::Relaxed);
                }
                Err(Error::Cancelled) => return,
                Err(e) => {
                    warn!(photo_uid = %photo.uid, error = %e, "Image embedding failed");
                    self.counters.embed_errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if token.is_cancelled() {
            trace!(photo_uid = %photo.uid, "Cancelled before face detection");
            return;
        }

        if item.faces {
            match self.detect_faces(photo, &bytes, token).await {
                Ok(n) => {
                    self.counters.faces_detected.fetch_add(n, Ordering::Relaxed);
                }
                Err(Error::Cancelled) => {}
                Err(e) => {
                    warn!(photo_uid = %photo.uid, error = %e, "Face detection failed");
                    self.counters.face_errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    async fn embed_image(&self, photo: &Photo, bytes: &[u8], token: &CancellationToken) -> Result<()> {
        let output = self
            .embeddings
            .compute_image_embedding(bytes, EmbeddingKind::Image)
            .await?;
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.images
            .save(ImageEmbedding {
                photo_uid: photo.uid.clone(),
                vector: output.vector,
                model: output.model,
                dim: output.dim,
                created_at: Utc::now(),
            })
            .await
    }

    /// Detect, associate with markers and store faces. Returns the number of
    /// faces stored; zero faces still marks the photo processed.
    async fn detect_faces(&self, photo: &Photo, bytes: &[u8], token: &CancellationToken) -> Result<usize> {
        let detected = self.embeddings.detect_faces(bytes).await?;
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let markers = if detected.is_empty() {
            Vec::new()
        } else {
            self.metadata
                .get_photo_markers(&photo.uid)
                .await
                .unwrap_or_else(|e| {
                    warn!(photo_uid = %photo.uid, error = %e, "Marker lookup failed, storing faces unlinked");
                    Vec::new()
                })
        };

        let faces: Vec<StoredFace> = detected
            .into_iter()
            .enumerate()
            .map(|(i, face)| {
                let mut stored = StoredFace {
                    photo_uid: photo.uid.clone(),
                    face_index: i as u32,
                    vector: face.vector,
                    bbox: face.bbox,
                    det_score: face.det_score,
                    file_uid: photo.file_uid.clone(),
                    photo_width: photo.width,
                    photo_height: photo.height,
                    orientation: photo.orientation,
                    ..Default::default()
                };
                if let Some(m) = best_marker_match(&markers, &stored.rel_box(), self.marker_iou) {
                    stored.link_marker(&markers[m]);
                }
                stored
            })
            .collect();

        let n = faces.len();
        self.faces.save_faces(&photo.uid, faces).await?;
        Ok(n)
    }
}

#[async_trait]
impl JobHandler for ProcessHandler {
    type Options = ProcessOptions;
    type Output = ProcessResult;

    fn kind(&self) -> JobKind {
        JobKind::Process
    }

    #[instrument(skip(self, job, options), fields(subsystem = "jobs", component = "process", op = "run"))]
    async fn run(&self, job: Arc<Job>, options: ProcessOptions) -> Result<ProcessResult> {
        let start = Instant::now();
        let query = match options.query.as_deref().map(str::trim) {
            Some(q) if !q.is_empty() => PhotoQuery::search(q),
            _ => PhotoQuery::all(),
        };

        let photos = fetch_all_photos(self.metadata.as_ref(), &query).await?;
        let total = photos.len();
        job.emit(
            EventType::PhotosCounted,
            format!("{} photos found", total),
            json!({ "count": total }),
        );

        let mut work = self.plan(photos, &options).await;
        let skipped = total - work.len();
        if options.limit > 0 {
            work.truncate(options.limit);
        }
        job.add_skipped(skipped);
        job.set_total(work.len());
        job.emit(
            EventType::FilteringDone,
            format!("{} to process, {} already done", work.len(), skipped),
            json!({ "to_process": work.len(), "skipped": skipped }),
        );
        debug!(to_process = work.len(), skipped, "Planned bulk processing");

        let concurrency = if options.concurrency == 0 {
            self.default_concurrency
        } else {
            options.concurrency
        };
        let worker = Arc::new(Worker {
            metadata: Arc::clone(&self.metadata),
            embeddings: Arc::clone(&self.embeddings),
            images: Arc::clone(&self.images),
            faces: Arc::clone(&self.faces),
            marker_iou: self.marker_iou,
            counters: Counters::default(),
        });

        let pool_worker = Arc::clone(&worker);
        let token = job.cancellation_token();
        run_bounded(&job, work, concurrency, move |item| {
            let worker = Arc::clone(&pool_worker);
            let token = token.clone();
            async move { worker.process(item, &token).await }
        })
        .await;

        let c = &worker.counters;
        Ok(ProcessResult {
            total,
            processed: job.processed(),
            skipped,
            embeddings_created: c.embeddings_created.load(Ordering::Relaxed),
            faces_detected: c.faces_detected.load(Ordering::Relaxed),
            embed_errors: c.embed_errors.load(Ordering::Relaxed),
            face_errors: c.face_errors.load(Ordering::Relaxed),
            download_errors: c.download_errors.load(Ordering::Relaxed),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
