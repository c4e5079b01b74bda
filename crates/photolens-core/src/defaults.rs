//! Centralized default constants for photolens.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers. Request handlers apply them whenever a caller passes a value
//! `<= 0` (or omits it).

// =============================================================================
// EMBEDDINGS
// =============================================================================

/// Dimension of face embeddings (ArcFace-style models).
pub const FACE_EMBED_DIM: usize = 512;

/// Dimension of whole-image embeddings (CLIP-style models).
pub const IMAGE_EMBED_DIM: usize = 768;

// =============================================================================
// FACE MATCHING
// =============================================================================

/// Cosine distance threshold used when a match request passes `threshold <= 0`.
pub const MATCH_THRESHOLD: f32 = 0.5;

/// Upper bound for the per-source-vector neighbour search limit.
///
/// The search limit is `limit * 10`, capped here; `limit == 0` uses the cap.
pub const SEARCH_LIMIT_MAX: usize = 1000;

/// Multiplier from requested result limit to per-vector neighbour limit.
pub const SEARCH_LIMIT_MULTIPLIER: usize = 10;

/// Upper bound of the vote-threshold factor.
pub const VOTE_FACTOR_MAX: f32 = 0.05;

/// Lower bound of the vote-threshold factor.
pub const VOTE_FACTOR_MIN: f32 = 0.01;

/// Minimum vote floor.
pub const VOTE_FLOOR_MIN: usize = 1;

/// Maximum vote floor.
pub const VOTE_FLOOR_MAX: usize = 5;

/// Faces narrower than this (pixels) are treated as spurious detections.
pub const FACE_MIN_WIDTH_PX: f64 = 35.0;

/// Faces narrower than this fraction of the image width are rejected.
pub const FACE_MIN_WIDTH_REL: f64 = 0.01;

/// Minimum IoU between a detected face and a marker to treat them as the same region.
pub const FACE_MARKER_IOU: f64 = 0.1;

/// Concurrent neighbour queries issued by one face-match request.
pub const FACE_SEARCH_CONCURRENCY: usize = 8;

/// Concurrent metadata lookups issued by the reconciliation pass.
pub const RECONCILE_CONCURRENCY: usize = 8;

// =============================================================================
// PHOTO SIMILARITY
// =============================================================================

/// Default distance threshold for near-duplicate detection.
pub const DUPLICATE_THRESHOLD: f32 = 0.08;

/// Default maximum number of duplicate groups returned.
pub const DUPLICATE_GROUP_LIMIT: usize = 50;

/// Neighbours requested per photo while building the duplicate graph.
pub const DUPLICATE_NEIGHBOR_LIMIT: usize = 50;

/// Default distance threshold for single-photo similarity search.
pub const SIMILAR_THRESHOLD: f32 = 0.3;

/// Default distance threshold for text-to-image search.
pub const TEXT_SEARCH_THRESHOLD: f32 = 0.85;

/// Default result limit for similarity-style searches.
pub const SIMILAR_LIMIT: usize = 50;

/// Default distance threshold for collection vote search.
pub const COLLECTION_THRESHOLD: f32 = 0.3;

// =============================================================================
// COLLECTION SUGGESTIONS
// =============================================================================

/// Default similarity floor (0..1) for centroid-based suggestions.
pub const SUGGEST_SIMILARITY: f32 = 0.75;

/// Default maximum suggestions per collection.
pub const SUGGEST_TOP_K: usize = 20;

/// Neighbour over-fetch factor absorbing members filtered from results.
pub const SUGGEST_OVERFETCH: usize = 3;

/// Collections with fewer members (or member vectors) than this are skipped.
pub const COLLECTION_MIN_MEMBERS: usize = 3;

/// Collections processed concurrently by one suggestion request.
pub const SUGGEST_WORKERS: usize = 4;

// =============================================================================
// METADATA SERVICE
// =============================================================================

/// Page size for paginated photo listings.
pub const PHOTO_PAGE_SIZE: usize = 500;

/// Page size for album/label listings.
pub const COLLECTION_PAGE_SIZE: usize = 200;

/// Metadata HTTP request timeout in seconds.
pub const METADATA_TIMEOUT_SECS: u64 = 30;

/// Embedding HTTP request timeout in seconds.
pub const EMBED_TIMEOUT_SECS: u64 = 60;

// =============================================================================
// JOB PROCESSING
// =============================================================================

/// Default worker-pool size for batch jobs.
pub const PROCESS_CONCURRENCY: usize = 4;

/// Buffered events per job listener before non-terminal events are dropped.
pub const JOB_EVENT_BUFFER: usize = 256;

/// Default similarity (0..1) a label must reach to be suggested by the sorting job.
pub const SORT_SIMILARITY: f32 = 0.25;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 8080;

/// SSE keep-alive interval in seconds.
pub const SSE_KEEPALIVE_SECS: u64 = 15;

/// Default CORS max-age in seconds (1 hour).
pub const CORS_MAX_AGE_SECS: u64 = 3600;
