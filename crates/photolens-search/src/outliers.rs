//! Centroid-distance outlier ranking for one person's faces.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use photolens_core::{centroid, cosine_distance, FaceIndex, RelBox, Result, StoredFace};

/// Distance reported for faces that have no vector.
pub const MISSING_DISTANCE: f32 = -1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierFace {
    pub photo_uid: String,
    pub face_index: u32,
    pub distance: f32,
    pub marker_uid: String,
    pub file_uid: String,
    pub bbox_rel: RelBox,
}

impl OutlierFace {
    fn new(face: &StoredFace, distance: f32) -> Self {
        Self {
            photo_uid: face.photo_uid.clone(),
            face_index: face.face_index,
            distance,
            marker_uid: face.marker_uid.clone(),
            file_uid: face.file_uid.clone(),
            bbox_rel: face.rel_box(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutlierResponse {
    pub person: String,
    pub total_faces: usize,
    pub avg_distance: f32,
    pub outliers: Vec<OutlierFace>,
    pub missing_embeddings: Vec<OutlierFace>,
}

/// Ranks a person's faces by distance from their centroid.
pub struct OutlierDetector {
    faces: Arc<dyn FaceIndex>,
}

impl OutlierDetector {
    pub fn new(faces: Arc<dyn FaceIndex>) -> Self {
        Self { faces }
    }

    /// Most anomalous faces first.
    ///
    /// Faces closer than `min_distance` are dropped (`0` keeps all);
    /// `limit == 0` means unlimited.
    #[instrument(skip(self), fields(subsystem = "search", component = "outlier_detector", op = "find_outliers"))]
    pub async fn find_outliers(
        &self,
        person: &str,
        min_distance: f32,
        limit: usize,
    ) -> Result<OutlierResponse> {
        let faces = self.faces.faces_for_subject(person).await?;
        Ok(rank_outliers(person, &faces, min_distance, limit))
    }
}

/// Pure ranking over an already loaded face set.
pub fn rank_outliers(
    person: &str,
    faces: &[StoredFace],
    min_distance: f32,
    limit: usize,
) -> OutlierResponse {
    let (with_vector, without): (Vec<&StoredFace>, Vec<&StoredFace>) =
        faces.iter().partition(|f| f.has_vector());

    let mut response = OutlierResponse {
        person: person.to_string(),
        total_faces: faces.len(),
        missing_embeddings: without
            .iter()
            .map(|f| OutlierFace::new(f, MISSING_DISTANCE))
            .collect(),
        ..Default::default()
    };

    let vectors: Vec<&[f32]> = with_vector.iter().map(|f| f.vector.as_slice()).collect();
    let Some(center) = centroid(&vectors) else {
        return response;
    };

    let mut scored: Vec<OutlierFace> = with_vector
        .iter()
        .map(|f| {
            // Shorter vectors are compared on the centroid's prefix.
            let d = if f.vector.len() == center.len() {
                cosine_distance(&f.vector, &center)
            } else {
                let mut padded = f.vector.clone();
                padded.resize(center.len(), 0.0);
                cosine_distance(&padded, &center)
            };
            OutlierFace::new(f, d)
        })
        .collect();

    response.avg_distance = scored.iter().map(|o| o.distance).sum::<f32>() / scored.len() as f32;

    scored.sort_by(|a, b| {
        b.distance
            .partial_cmp(&a.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    if min_distance > 0.0 {
        scored.retain(|o| o.distance >= min_distance);
    }
    if limit > 0 {
        scored.truncate(limit);
    }
    debug!(
        result_count = scored.len(),
        avg_distance = response.avg_distance,
        "Ranked outliers"
    );
    response.outliers = scored;
    response
}
