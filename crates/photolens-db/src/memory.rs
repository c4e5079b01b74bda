//! In-memory vector indexes using brute-force cosine distance.
//!
//! Intended for tests, demos and small libraries (a few thousand vectors).
//! Selected with `VECTOR_BACKEND=memory`.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use photolens_core::{
    cosine_distance, Error, FaceHit, FaceIndex, FaceMarkerUpdate, ImageEmbedding, ImageHit,
    ImageIndex, Result, StoredFace,
};

fn sort_by_distance<T>(hits: &mut [(T, f32)]) {
    hits.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
}

/// In-memory [`ImageIndex`].
#[derive(Default)]
pub struct MemoryImageIndex {
    embeddings: RwLock<BTreeMap<String, ImageEmbedding>>,
}

impl MemoryImageIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ImageIndex for MemoryImageIndex {
    async fn get(&self, photo_uid: &str) -> Result<Option<ImageEmbedding>> {
        Ok(self.embeddings.read().await.get(photo_uid).cloned())
    }

    async fn has(&self, photo_uid: &str) -> Result<bool> {
        Ok(self.embeddings.read().await.contains_key(photo_uid))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.embeddings.read().await.len())
    }

    async fn list_photo_uids(&self) -> Result<Vec<String>> {
        Ok(self.embeddings.read().await.keys().cloned().collect())
    }

    async fn save(&self, embedding: ImageEmbedding) -> Result<()> {
        if embedding.vector.is_empty() {
            return Err(Error::InvalidInput(format!(
                "empty image embedding for {}",
                embedding.photo_uid
            )));
        }
        self.embeddings
            .write()
            .await
            .insert(embedding.photo_uid.clone(), embedding);
        Ok(())
    }

    async fn find_similar_with_distance(
        &self,
        vector: &[f32],
        limit: usize,
        max_distance: f32,
    ) -> Result<Vec<ImageHit>> {
        if vector.is_empty() || limit == 0 {
            return Ok(vec![]);
        }
        let embeddings = self.embeddings.read().await;
        let mut hits: Vec<(&str, f32)> = embeddings
            .values()
            .map(|e| (e.photo_uid.as_str(), cosine_distance(vector, &e.vector)))
            .filter(|(_, d)| *d <= max_distance)
            .collect();
        sort_by_distance(&mut hits);
        hits.truncate(limit);

        Ok(hits
            .into_iter()
            .map(|(uid, distance)| ImageHit {
                photo_uid: uid.to_string(),
                distance,
            })
            .collect())
    }
}

#[derive(Default)]
struct FaceStore {
    /// Photos that went through detection, with their faces.
    photos: BTreeMap<String, Vec<StoredFace>>,
}

/// In-memory [`FaceIndex`].
#[derive(Default)]
pub struct MemoryFaceIndex {
    store: RwLock<FaceStore>,
}

impl MemoryFaceIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FaceIndex for MemoryFaceIndex {
    async fn get_faces(&self, photo_uid: &str) -> Result<Vec<StoredFace>> {
        Ok(self
            .store
            .read()
            .await
            .photos
            .get(photo_uid)
            .cloned()
            .unwrap_or_default())
    }

    async fn has(&self, photo_uid: &str) -> Result<bool> {
        Ok(self.store.read().await.photos.contains_key(photo_uid))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.store.read().await.photos.values().map(Vec::len).sum())
    }

    async fn faces_for_subject(&self, name: &str) -> Result<Vec<StoredFace>> {
        let store = self.store.read().await;
        Ok(store
            .photos
            .values()
            .flatten()
            .filter(|f| !f.subject_name.is_empty() && f.subject_name.eq_ignore_ascii_case(name))
            .cloned()
            .collect())
    }

    async fn save_faces(&self, photo_uid: &str, mut faces: Vec<StoredFace>) -> Result<()> {
        let mut seen = HashSet::new();
        for face in &mut faces {
            if !seen.insert(face.face_index) {
                return Err(Error::InvalidInput(format!(
                    "duplicate face index {} for photo {}",
                    face.face_index, photo_uid
                )));
            }
            face.photo_uid = photo_uid.to_string();
        }
        faces.sort_by_key(|f| f.face_index);
        self.store
            .write()
            .await
            .photos
            .insert(photo_uid.to_string(), faces);
        Ok(())
    }

    async fn update_face_marker(
        &self,
        photo_uid: &str,
        face_index: u32,
        update: FaceMarkerUpdate,
    ) -> Result<()> {
        let mut store = self.store.write().await;
        let face = store
            .photos
            .get_mut(photo_uid)
            .and_then(|faces| faces.iter_mut().find(|f| f.face_index == face_index))
            .ok_or_else(|| {
                Error::NotFound(format!("face {} of photo {}", face_index, photo_uid))
            })?;

        face.marker_uid = update.marker_uid;
        face.subject_uid = update.subject_uid;
        face.subject_name = update.subject_name;
        if let Some(file_uid) = update.file_uid {
            face.file_uid = file_uid;
        }
        Ok(())
    }

    async fn find_similar_with_distance(
        &self,
        vector: &[f32],
        limit: usize,
        max_distance: f32,
    ) -> Result<Vec<FaceHit>> {
        if vector.is_empty() || limit == 0 {
            return Ok(vec![]);
        }
        let store = self.store.read().await;
        let mut hits: Vec<(&StoredFace, f32)> = store
            .photos
            .values()
            .flatten()
            .filter(|f| f.has_vector())
            .map(|f| (f, cosine_distance(vector, &f.vector)))
            .filter(|(_, d)| *d <= max_distance)
            .collect();
        sort_by_distance(&mut hits);
        hits.truncate(limit);

        Ok(hits
            .into_iter()
            .map(|(face, distance)| FaceHit {
                face: face.clone(),
                distance,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use photolens_core::PixelBox;

    fn image(uid: &str, vector: Vec<f32>) -> ImageEmbedding {
        ImageEmbedding {
            photo_uid: uid.to_string(),
            dim: vector.len(),
            vector,
            model: "test".to_string(),
            created_at: Utc::now(),
        }
    }

    fn face(index: u32, vector: Vec<f32>, subject: &str) -> StoredFace {
        StoredFace {
            face_index: index,
            vector,
            bbox: PixelBox::new(0.0, 0.0, 100.0, 100.0),
            subject_name: subject.to_string(),
            ..StoredFace::default()
        }
    }

    #[tokio::test]
    async fn test_image_neighbours_sorted_and_thresholded() {
        let idx = MemoryImageIndex::new();
        idx.save(image("a", vec![1.0, 0.0, 0.0])).await.unwrap();
        idx.save(image("b", vec![0.0, 1.0, 0.0])).await.unwrap();
        idx.save(image("c", vec![0.9, 0.1, 0.0])).await.unwrap();

        let hits = idx
            .find_similar_with_distance(&[1.0, 0.0, 0.0], 10, 0.5)
            .await
            .unwrap();
        let uids: Vec<_> = hits.iter().map(|h| h.photo_uid.as_str()).collect();
        assert_eq!(uids, vec!["a", "c"]);
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[tokio::test]
    async fn test_image_limit() {
        let idx = MemoryImageIndex::new();
        for i in 0..5 {
            idx.save(image(&format!("p{}", i), vec![1.0, i as f32 * 0.01]))
                .await
                .unwrap();
        }
        let hits = idx
            .find_similar_with_distance(&[1.0, 0.0], 2, 1.0)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].photo_uid, "p0");
    }

    #[tokio::test]
    async fn test_image_rejects_empty_vector() {
        let idx = MemoryImageIndex::new();
        assert!(idx.save(image("a", vec![])).await.is_err());
        assert_eq!(idx.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_face_save_marks_processed_without_faces() {
        let idx = MemoryFaceIndex::new();
        idx.save_faces("p1", vec![]).await.unwrap();
        assert!(idx.has("p1").await.unwrap());
        assert!(!idx.has("p2").await.unwrap());
        assert_eq!(idx.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_faces_for_subject_case_insensitive() {
        let idx = MemoryFaceIndex::new();
        idx.save_faces(
            "p1",
            vec![face(0, vec![1.0, 0.0], "Alice"), face(1, vec![0.0, 1.0], "Bob")],
        )
        .await
        .unwrap();
        let faces = idx.faces_for_subject("alice").await.unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].photo_uid, "p1");
    }

    #[tokio::test]
    async fn test_face_neighbours_skip_missing_vectors() {
        let idx = MemoryFaceIndex::new();
        idx.save_faces("p1", vec![face(0, vec![], ""), face(1, vec![1.0, 0.0], "")])
            .await
            .unwrap();
        let hits = idx
            .find_similar_with_distance(&[1.0, 0.0], 10, 2.0)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].face.face_index, 1);
    }

    #[tokio::test]
    async fn test_update_face_marker() {
        let idx = MemoryFaceIndex::new();
        idx.save_faces("p1", vec![face(0, vec![1.0], "")]).await.unwrap();
        idx.update_face_marker(
            "p1",
            0,
            FaceMarkerUpdate {
                marker_uid: "m1".to_string(),
                subject_name: "Alice".to_string(),
                ..FaceMarkerUpdate::default()
            },
        )
        .await
        .unwrap();
        let faces = idx.get_faces("p1").await.unwrap();
        assert_eq!(faces[0].marker_uid, "m1");
        assert_eq!(faces[0].subject_name, "Alice");

        let missing = idx
            .update_face_marker("p1", 7, FaceMarkerUpdate::default())
            .await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_save_faces_rejects_duplicate_index() {
        let idx = MemoryFaceIndex::new();
        let result = idx
            .save_faces("p1", vec![face(0, vec![1.0], ""), face(0, vec![1.0], "")])
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert!(!idx.has("p1").await.unwrap());
    }
}
