//! Core traits for photolens collaborators.
//!
//! The matching engine and job orchestrator only talk to the outside world
//! through these contracts, so concrete backends (HTTP clients, pgvector,
//! in-memory stores) are pluggable and testable.

use async_trait::async_trait;

use crate::defaults;
use crate::error::Result;
use crate::geometry::RelBox;
use crate::models::*;

// =============================================================================
// METADATA SERVICE
// =============================================================================

/// Remote photo-metadata service (photos, markers, subjects, albums, labels).
#[async_trait]
pub trait MetadataService: Send + Sync {
    /// Fetch one photo. Unknown uids yield `Error::NotFound`.
    async fn get_photo(&self, uid: &str) -> Result<Photo>;

    /// Fetch one page of photos.
    async fn list_photos(&self, query: &PhotoQuery) -> Result<Vec<Photo>>;

    /// Markers of every file belonging to a photo.
    async fn get_photo_markers(&self, photo_uid: &str) -> Result<Vec<Marker>>;

    /// Raw bytes of a stored file, addressed by content hash.
    async fn download_file(&self, file_hash: &str) -> Result<Vec<u8>>;

    async fn create_marker(&self, marker: NewMarker) -> Result<Marker>;

    async fn assign_marker_subject(&self, marker_uid: &str, subject_name: &str) -> Result<Marker>;

    async fn unassign_marker_subject(&self, marker_uid: &str) -> Result<Marker>;

    async fn get_album(&self, uid: &str) -> Result<Album>;

    async fn list_albums(&self, count: usize, offset: usize) -> Result<Vec<Album>>;

    async fn get_label(&self, uid: &str) -> Result<Label>;

    async fn list_labels(&self, count: usize, offset: usize) -> Result<Vec<Label>>;

    /// Attach a label to a photo, creating the label if needed.
    ///
    /// `uncertainty` is 0..100 (0 = certain).
    async fn add_photo_label(&self, photo_uid: &str, label_name: &str, uncertainty: u8)
        -> Result<()>;
}

/// Fetch every photo matching `query`, paging until a short page.
///
/// `query.count`/`query.offset` are ignored; pages of
/// [`defaults::PHOTO_PAGE_SIZE`] are requested from offset 0.
pub async fn fetch_all_photos(
    metadata: &dyn MetadataService,
    query: &PhotoQuery,
) -> Result<Vec<Photo>> {
    let mut out = Vec::new();
    let mut offset = 0;
    loop {
        let page_query = query.clone().page(defaults::PHOTO_PAGE_SIZE, offset);
        let page = metadata.list_photos(&page_query).await?;
        let n = page.len();
        out.extend(page);
        if n < defaults::PHOTO_PAGE_SIZE {
            break;
        }
        offset += n;
    }
    Ok(out)
}

/// Fetch every album, paging until a short page.
pub async fn fetch_all_albums(metadata: &dyn MetadataService) -> Result<Vec<Album>> {
    let mut out = Vec::new();
    let mut offset = 0;
    loop {
        let page = metadata
            .list_albums(defaults::COLLECTION_PAGE_SIZE, offset)
            .await?;
        let n = page.len();
        out.extend(page);
        if n < defaults::COLLECTION_PAGE_SIZE {
            break;
        }
        offset += n;
    }
    Ok(out)
}

/// Fetch every label, paging until a short page.
pub async fn fetch_all_labels(metadata: &dyn MetadataService) -> Result<Vec<Label>> {
    let mut out = Vec::new();
    let mut offset = 0;
    loop {
        let page = metadata
            .list_labels(defaults::COLLECTION_PAGE_SIZE, offset)
            .await?;
        let n = page.len();
        out.extend(page);
        if n < defaults::COLLECTION_PAGE_SIZE {
            break;
        }
        offset += n;
    }
    Ok(out)
}

// =============================================================================
// EMBEDDING SERVICE
// =============================================================================

/// Remote embedding-computation service.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn compute_image_embedding(
        &self,
        bytes: &[u8],
        kind: EmbeddingKind,
    ) -> Result<EmbeddingOutput>;

    /// Embed a text query into the whole-image vector space.
    async fn compute_text_embedding(&self, text: &str) -> Result<Vec<f32>>;

    /// Detect faces and compute one embedding per face.
    async fn detect_faces(&self, bytes: &[u8]) -> Result<Vec<DetectedFace>>;

    fn model_name(&self) -> &str;
}

// =============================================================================
// SIMILARITY INDEXES
// =============================================================================

/// A whole-image neighbour hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageHit {
    pub photo_uid: String,
    pub distance: f32,
}

/// A face neighbour hit, carrying the stored face with its cached fields.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceHit {
    pub face: StoredFace,
    pub distance: f32,
}

/// Marker fields to cache on one stored face.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaceMarkerUpdate {
    pub marker_uid: String,
    pub subject_uid: String,
    pub subject_name: String,
    pub file_uid: Option<String>,
}

impl FaceMarkerUpdate {
    pub fn from_marker(marker: &Marker) -> Self {
        Self {
            marker_uid: marker.uid.clone(),
            subject_uid: marker.subject_uid.clone(),
            subject_name: marker.subject_name.clone(),
            file_uid: (!marker.file_uid.is_empty()).then(|| marker.file_uid.clone()),
        }
    }
}

/// Whole-image vector storage with nearest-neighbour search.
#[async_trait]
pub trait ImageIndex: Send + Sync {
    async fn get(&self, photo_uid: &str) -> Result<Option<ImageEmbedding>>;

    async fn has(&self, photo_uid: &str) -> Result<bool>;

    async fn count(&self) -> Result<usize>;

    /// Every photo uid with a stored image embedding.
    async fn list_photo_uids(&self) -> Result<Vec<String>>;

    /// Insert or replace the embedding for a photo.
    async fn save(&self, embedding: ImageEmbedding) -> Result<()>;

    /// Neighbours of `vector` with distance `<= max_distance`, ascending by
    /// distance, at most `limit` of them.
    async fn find_similar_with_distance(
        &self,
        vector: &[f32],
        limit: usize,
        max_distance: f32,
    ) -> Result<Vec<ImageHit>>;
}

/// Face vector storage with nearest-neighbour search.
#[async_trait]
pub trait FaceIndex: Send + Sync {
    /// All stored faces of one photo, ordered by face index.
    async fn get_faces(&self, photo_uid: &str) -> Result<Vec<StoredFace>>;

    /// True when face detection has run for the photo (even with zero faces).
    async fn has(&self, photo_uid: &str) -> Result<bool>;

    /// Number of stored faces.
    async fn count(&self) -> Result<usize>;

    /// Faces whose cached subject name equals `name` (case-insensitive).
    async fn faces_for_subject(&self, name: &str) -> Result<Vec<StoredFace>>;

    /// Replace all faces of a photo and mark it processed.
    async fn save_faces(&self, photo_uid: &str, faces: Vec<StoredFace>) -> Result<()>;

    /// Overwrite the cached marker/subject fields of one face.
    async fn update_face_marker(
        &self,
        photo_uid: &str,
        face_index: u32,
        update: FaceMarkerUpdate,
    ) -> Result<()>;

    /// Neighbours of `vector` with distance `<= max_distance`, ascending by
    /// distance, at most `limit` of them. Faces without a vector never match.
    async fn find_similar_with_distance(
        &self,
        vector: &[f32],
        limit: usize,
        max_distance: f32,
    ) -> Result<Vec<FaceHit>>;
}

/// Index of the marker best overlapping `rel`, if its IoU reaches `min_iou`.
///
/// Invalid markers and non-face markers are ignored.
pub fn best_marker_match(markers: &[Marker], rel: &RelBox, min_iou: f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, marker) in markers.iter().enumerate() {
        if marker.invalid || !marker.marker_type.eq_ignore_ascii_case("face") {
            continue;
        }
        let overlap = crate::geometry::iou(&marker.rel_box, rel);
        if overlap >= min_iou && best.map_or(true, |(_, b)| overlap > b) {
            best = Some((i, overlap));
        }
    }
    best.map(|(i, _)| i)
}
