//! Face matching for a named person.
//!
//! Every stored face of the person is a source vector. Each source queries
//! the face index; hits on photos the person does not already own are merged
//! by photo with a [`CandidateAggregator`], filtered by a vote floor, and
//! classified into an [`Action`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use photolens_core::{
    best_marker_match, defaults, Action, FaceIndex, MetadataService, RelBox, Result, StoredFace,
};

use crate::aggregator::{CandidateAggregator, MatchCandidate};
use crate::config::MatchConfig;

/// One matched face on a photo the person is not yet linked to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMatch {
    pub photo_uid: String,
    pub face_index: u32,
    pub distance: f32,
    pub match_count: usize,
    pub action: Action,
    pub marker_uid: String,
    pub subject_uid: String,
    pub subject_name: String,
    pub file_uid: String,
    /// Pixel box `[x1, y1, x2, y2]` on the stored file.
    pub bbox: [f64; 4],
    /// Box relative to the displayed image.
    pub bbox_rel: RelBox,
    pub photo_width: u32,
    pub photo_height: u32,
    pub orientation: u8,
    pub det_score: f32,
}

/// Per-action tallies of a match response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSummary {
    pub create_marker: usize,
    pub assign_person: usize,
    pub already_done: usize,
}

impl MatchSummary {
    fn record(&mut self, action: Action) {
        match action {
            Action::CreateMarker => self.create_marker += 1,
            Action::AssignPerson => self.assign_person += 1,
            Action::AlreadyDone => self.already_done += 1,
            Action::UnassignPerson => {}
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceMatchResponse {
    pub person: String,
    pub source_photos: usize,
    pub source_faces: usize,
    pub matches: Vec<FaceMatch>,
    pub summary: MatchSummary,
}

/// Source vectors for one person.
#[derive(Debug, Clone, Default)]
pub struct MatchSource {
    /// Every photo the person already owns, with or without a vector.
    pub photo_uids: HashSet<String>,
    /// One vector per owned photo that has one.
    pub vectors: Vec<Vec<f32>>,
}

impl MatchSource {
    /// Partition stored faces into owned photos and one search vector per
    /// photo. Faces without a vector still mark their photo as owned.
    pub fn from_faces(faces: &[StoredFace]) -> Self {
        let mut source = MatchSource::default();
        let mut with_vector = HashSet::new();
        for face in faces {
            source.photo_uids.insert(face.photo_uid.clone());
            if face.has_vector() && with_vector.insert(face.photo_uid.clone()) {
                source.vectors.push(face.vector.clone());
            }
        }
        source
    }
}

/// Finds unlinked faces of a person across the library.
pub struct FaceMatcher {
    faces: Arc<dyn FaceIndex>,
    metadata: Option<Arc<dyn MetadataService>>,
    config: MatchConfig,
}

impl FaceMatcher {
    pub fn new(faces: Arc<dyn FaceIndex>) -> Self {
        Self {
            faces,
            metadata: None,
            config: MatchConfig::default(),
        }
    }

    /// Enable reconciliation of stale cached marker fields.
    pub fn with_metadata(mut self, metadata: Arc<dyn MetadataService>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_config(mut self, config: MatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Load the person's stored faces as match sources.
    pub async fn build_source(&self, person: &str) -> Result<MatchSource> {
        let faces = self.faces.faces_for_subject(person).await?;
        Ok(MatchSource::from_faces(&faces))
    }

    /// Match a person's faces against the face index.
    ///
    /// `threshold <= 0` uses the default; `limit == 0` means unlimited.
    #[instrument(skip(self), fields(subsystem = "search", component = "face_matcher", op = "match"))]
    pub async fn find_matches(
        &self,
        person: &str,
        threshold: f32,
        limit: usize,
    ) -> Result<FaceMatchResponse> {
        let start = Instant::now();
        let threshold = if threshold <= 0.0 {
            defaults::MATCH_THRESHOLD
        } else {
            threshold
        };

        let source = self.build_source(person).await?;
        let mut response = FaceMatchResponse {
            person: person.to_string(),
            source_photos: source.photo_uids.len(),
            source_faces: source.vectors.len(),
            ..Default::default()
        };
        if source.vectors.is_empty() {
            debug!(
                source_photos = response.source_photos,
                "No source vectors for person"
            );
            return Ok(response);
        }

        let search_limit = self.config.search_limit(limit);
        let aggregator = self
            .search_sources(&source, threshold, search_limit)
            .await;
        let hit_count = aggregator.len();

        let min_votes = self.config.min_match_count(source.vectors.len(), threshold);
        let mut ranked = aggregator.into_ranked(min_votes);
        debug!(
            hit_count,
            min_votes,
            kept = ranked.len(),
            "Applied vote floor"
        );

        self.reconcile(person, &mut ranked).await;

        if limit > 0 {
            ranked.truncate(limit);
        }

        for candidate in ranked {
            let face = &candidate.payload;
            if self
                .config
                .face_too_small(face.bbox.width(), face.photo_width)
            {
                debug!(
                    photo_uid = %face.photo_uid,
                    width = face.bbox.width(),
                    "Rejected small face"
                );
                continue;
            }
            let m = to_match(&candidate);
            response.summary.record(m.action);
            response.matches.push(m);
        }

        info!(
            person,
            source_count = response.source_faces,
            result_count = response.matches.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Face match completed"
        );
        Ok(response)
    }

    /// One neighbour query per source vector with bounded concurrency.
    /// Each source votes at most once per photo; failed queries are skipped.
    async fn search_sources(
        &self,
        source: &MatchSource,
        threshold: f32,
        search_limit: usize,
    ) -> CandidateAggregator<StoredFace> {
        let concurrency = self.config.search_concurrency.max(1);
        let mut results = stream::iter(source.vectors.clone())
            .map(|vector| {
                let faces = Arc::clone(&self.faces);
                async move {
                    faces
                        .find_similar_with_distance(&vector, search_limit, threshold)
                        .await
                }
            })
            .buffer_unordered(concurrency);

        let mut aggregator = CandidateAggregator::new();
        while let Some(result) = results.next().await {
            let hits = match result {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(error = %e, "Face neighbour query failed, skipping source");
                    continue;
                }
            };
            let mut voted = HashSet::new();
            for hit in hits {
                if source.photo_uids.contains(&hit.face.photo_uid) {
                    continue;
                }
                if !voted.insert(hit.face.photo_uid.clone()) {
                    continue;
                }
                aggregator.merge(hit.face.photo_uid.clone(), hit.distance, hit.face);
            }
        }
        aggregator
    }

    /// Re-read markers for candidates whose cache says they are unassigned.
    ///
    /// Subject fields are copied only when the live marker already belongs to
    /// `person`. Failures leave the candidate as it was.
    async fn reconcile(&self, person: &str, candidates: &mut [MatchCandidate<StoredFace>]) {
        let Some(metadata) = self.metadata.as_ref() else {
            return;
        };
        let min_iou = self.config.face_marker_iou;
        let pending: Vec<(usize, String, RelBox)> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.payload.subject_name.is_empty() && c.payload.subject_uid.is_empty())
            .map(|(i, c)| (i, c.payload.photo_uid.clone(), c.payload.rel_box()))
            .collect();
        if pending.is_empty() {
            return;
        }

        let mut lookups = stream::iter(pending)
            .map(move |(i, photo_uid, rel)| {
                let metadata = Arc::clone(metadata);
                async move {
                    let markers = metadata.get_photo_markers(&photo_uid).await;
                    (i, photo_uid, rel, markers)
                }
            })
            .buffer_unordered(self.config.reconcile_concurrency.max(1));

        let mut patched = 0usize;
        while let Some((i, photo_uid, rel, markers)) = lookups.next().await {
            let markers = match markers {
                Ok(markers) => markers,
                Err(e) => {
                    warn!(photo_uid = %photo_uid, error = %e, "Marker reconciliation failed");
                    continue;
                }
            };
            let Some(m) = best_marker_match(&markers, &rel, min_iou) else {
                continue;
            };
            let marker = &markers[m];
            let payload = &mut candidates[i].payload;
            if marker.is_assigned_to(person) {
                payload.link_marker(marker);
                patched += 1;
            } else if payload.marker_uid != marker.uid {
                // Someone else's (or nobody's) marker: link the region only.
                payload.marker_uid = marker.uid.clone();
                if payload.file_uid.is_empty() {
                    payload.file_uid = marker.file_uid.clone();
                }
                patched += 1;
            }
        }
        if patched > 0 {
            debug!(person, patched, "Reconciled stale face cache");
        }
    }
}

fn to_match(candidate: &MatchCandidate<StoredFace>) -> FaceMatch {
    let face = &candidate.payload;
    FaceMatch {
        photo_uid: face.photo_uid.clone(),
        face_index: face.face_index,
        distance: candidate.distance,
        match_count: candidate.votes,
        action: Action::resolve(&face.marker_uid, &face.subject_name, &face.subject_uid),
        marker_uid: face.marker_uid.clone(),
        subject_uid: face.subject_uid.clone(),
        subject_name: face.subject_name.clone(),
        file_uid: face.file_uid.clone(),
        bbox: [face.bbox.x1, face.bbox.y1, face.bbox.x2, face.bbox.y2],
        bbox_rel: face.rel_box(),
        photo_width: face.photo_width,
        photo_height: face.photo_height,
        orientation: face.orientation,
        det_score: face.det_score,
    }
}
