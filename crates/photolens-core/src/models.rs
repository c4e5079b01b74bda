//! Domain models shared across photolens crates.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::geometry::{to_display_rel, PixelBox, RelBox};

// =============================================================================
// METADATA RECORDS
// =============================================================================

/// A photo as exposed by the metadata service.
///
/// `width`/`height` are the pixel dimensions of the primary stored file and
/// `orientation` its EXIF orientation (1..=8, 0 when unknown).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    pub uid: String,
    pub title: String,
    pub taken_at: Option<DateTime<Utc>>,
    pub file_uid: String,
    pub file_hash: String,
    pub width: u32,
    pub height: u32,
    pub orientation: u8,
}

/// A region of a photo file, optionally linked to a subject.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub uid: String,
    pub file_uid: String,
    pub marker_type: String,
    pub rel_box: RelBox,
    pub subject_uid: String,
    pub subject_name: String,
    pub invalid: bool,
}

impl Marker {
    /// True when a subject is linked to this marker.
    pub fn is_assigned(&self) -> bool {
        !self.subject_uid.is_empty() || !self.subject_name.is_empty()
    }

    /// True when the linked subject is `name` (case-insensitive).
    pub fn is_assigned_to(&self, name: &str) -> bool {
        !self.subject_name.is_empty() && self.subject_name.eq_ignore_ascii_case(name)
    }
}

/// Request to create a face marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMarker {
    pub photo_uid: String,
    pub file_uid: String,
    pub rel_box: RelBox,
    /// Subject to assign on creation, if any.
    pub subject_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub uid: String,
    pub title: String,
    pub album_type: String,
    pub photo_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub uid: String,
    pub name: String,
    pub slug: String,
    pub photo_count: u32,
}

/// Paginated photo query against the metadata service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhotoQuery {
    /// Free-form search expression (e.g. `label:cats`).
    pub query: Option<String>,
    /// Restrict to members of one album.
    pub album_uid: Option<String>,
    pub count: usize,
    pub offset: usize,
}

impl PhotoQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn album(uid: impl Into<String>) -> Self {
        Self {
            album_uid: Some(uid.into()),
            ..Self::default()
        }
    }

    pub fn label(slug: &str) -> Self {
        Self {
            query: Some(format!("label:{}", slug)),
            ..Self::default()
        }
    }

    pub fn search(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Self::default()
        }
    }

    pub fn page(mut self, count: usize, offset: usize) -> Self {
        self.count = count;
        self.offset = offset;
        self
    }
}

/// Kind of photo collection used by collection-level searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    Album,
    Label,
}

impl CollectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionKind::Album => "album",
            CollectionKind::Label => "label",
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "album" => Ok(CollectionKind::Album),
            "label" => Ok(CollectionKind::Label),
            other => Err(Error::InvalidInput(format!(
                "source_type must be 'album' or 'label', got '{}'",
                other
            ))),
        }
    }
}

// =============================================================================
// EMBEDDINGS
// =============================================================================

/// What an image embedding request describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingKind {
    /// The whole image.
    Image,
    /// A single pre-cropped face.
    Face,
}

/// Output of an image embedding computation.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingOutput {
    pub vector: Vec<f32>,
    pub model: String,
    pub dim: usize,
}

/// A face found by the embedding service's detector.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub bbox: PixelBox,
    pub det_score: f32,
    pub vector: Vec<f32>,
}

/// A whole-image embedding stored in an [`crate::ImageIndex`].
#[derive(Debug, Clone, PartialEq)]
pub struct ImageEmbedding {
    pub photo_uid: String,
    pub vector: Vec<f32>,
    pub model: String,
    pub dim: usize,
    pub created_at: DateTime<Utc>,
}

/// A face embedding stored in a [`crate::FaceIndex`].
///
/// Besides the vector it carries denormalized marker/subject fields captured
/// when the face was last associated with a marker. Those fields are a cache
/// and may be stale relative to the metadata service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredFace {
    pub photo_uid: String,
    pub face_index: u32,
    /// Empty when the embedding could not be computed.
    pub vector: Vec<f32>,
    pub bbox: PixelBox,
    pub det_score: f32,
    pub marker_uid: String,
    pub subject_uid: String,
    pub subject_name: String,
    pub file_uid: String,
    pub photo_width: u32,
    pub photo_height: u32,
    pub orientation: u8,
}

impl StoredFace {
    pub fn has_vector(&self) -> bool {
        !self.vector.is_empty()
    }

    /// Face region relative to the displayed (orientation-corrected) image.
    pub fn rel_box(&self) -> RelBox {
        to_display_rel(
            &self.bbox,
            self.photo_width,
            self.photo_height,
            self.orientation,
        )
    }

    /// Copy marker and subject fields from a marker into the cache.
    pub fn link_marker(&mut self, marker: &Marker) {
        self.marker_uid = marker.uid.clone();
        self.subject_uid = marker.subject_uid.clone();
        self.subject_name = marker.subject_name.clone();
        if self.file_uid.is_empty() {
            self.file_uid = marker.file_uid.clone();
        }
    }
}

// =============================================================================
// ACTIONS
// =============================================================================

/// Decision for one matched face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// No marker exists for the face yet.
    CreateMarker,
    /// A marker exists but no subject is linked.
    AssignPerson,
    /// The marker is already labeled.
    AlreadyDone,
    /// Explicit removal request; never derived from matching.
    UnassignPerson,
}

impl Action {
    /// Classify a candidate from its cached marker and subject fields.
    pub fn resolve(marker_uid: &str, subject_name: &str, subject_uid: &str) -> Action {
        if marker_uid.is_empty() {
            Action::CreateMarker
        } else if subject_name.is_empty() && subject_uid.is_empty() {
            Action::AssignPerson
        } else {
            Action::AlreadyDone
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::CreateMarker => "create_marker",
            Action::AssignPerson => "assign_person",
            Action::AlreadyDone => "already_done",
            Action::UnassignPerson => "unassign_person",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
