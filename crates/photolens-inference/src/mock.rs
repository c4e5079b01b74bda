//! Mock embedding service for deterministic testing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use photolens_inference::mock::MockEmbeddingService;
//!
//! let service = MockEmbeddingService::new()
//!     .with_image_vector(b"photo-1", vec![1.0, 0.0, 0.0])
//!     .with_text_vector("beach", vec![1.0, 0.0, 0.0]);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use photolens_core::{
    defaults, l2_normalize, DetectedFace, EmbeddingKind, EmbeddingOutput, EmbeddingService, Error,
    Result,
};

/// Mock embedding service.
#[derive(Clone)]
pub struct MockEmbeddingService {
    config: Arc<MockConfig>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
}

#[derive(Debug, Clone)]
struct MockConfig {
    model: String,
    image_dim: usize,
    face_dim: usize,
    image_vectors: HashMap<Vec<u8>, Vec<f32>>,
    faces: HashMap<Vec<u8>, Vec<DetectedFace>>,
    text_vectors: HashMap<String, Vec<f32>>,
    failing_inputs: HashSet<Vec<u8>>,
    failing_detection: HashSet<Vec<u8>>,
    latency_ms: u64,
}

#[derive(Debug, Clone)]
pub struct MockCall {
    pub operation: String,
    pub input_len: usize,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            model: "mock-embed".to_string(),
            image_dim: defaults::IMAGE_EMBED_DIM,
            face_dim: defaults::FACE_EMBED_DIM,
            image_vectors: HashMap::new(),
            faces: HashMap::new(),
            text_vectors: HashMap::new(),
            failing_inputs: HashSet::new(),
            failing_detection: HashSet::new(),
            latency_ms: 0,
        }
    }
}

impl MockEmbeddingService {
    pub fn new() -> Self {
        Self {
            config: Arc::new(MockConfig::default()),
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Dimension of generated image and text vectors.
    pub fn with_image_dim(mut self, dim: usize) -> Self {
        Arc::make_mut(&mut self.config).image_dim = dim;
        self
    }

    /// Dimension of generated face vectors.
    pub fn with_face_dim(mut self, dim: usize) -> Self {
        Arc::make_mut(&mut self.config).face_dim = dim;
        self
    }

    /// Fixed whole-image vector for specific bytes.
    pub fn with_image_vector(mut self, bytes: &[u8], vector: Vec<f32>) -> Self {
        Arc::make_mut(&mut self.config)
            .image_vectors
            .insert(bytes.to_vec(), vector);
        self
    }

    /// Faces returned by `detect_faces` for specific bytes. Unmapped inputs
    /// contain no faces.
    pub fn with_faces(mut self, bytes: &[u8], faces: Vec<DetectedFace>) -> Self {
        Arc::make_mut(&mut self.config)
            .faces
            .insert(bytes.to_vec(), faces);
        self
    }

    pub fn with_text_vector(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        Arc::make_mut(&mut self.config)
            .text_vectors
            .insert(text.into(), vector);
        self
    }

    /// Make image embedding fail for specific bytes.
    pub fn with_failure_for(mut self, bytes: &[u8]) -> Self {
        Arc::make_mut(&mut self.config)
            .failing_inputs
            .insert(bytes.to_vec());
        self
    }

    /// Make face detection fail for specific bytes.
    pub fn with_detection_failure_for(mut self, bytes: &[u8]) -> Self {
        Arc::make_mut(&mut self.config)
            .failing_detection
            .insert(bytes.to_vec());
        self
    }

    /// Simulated latency for every call.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        Arc::make_mut(&mut self.config).latency_ms = latency_ms;
        self
    }

    /// Get all logged calls for assertion.
    pub fn get_calls(&self) -> Vec<MockCall> {
        self.lock_log().clone()
    }

    /// Number of calls for one operation (`embed_image`, `embed_text`, `detect_faces`).
    pub fn call_count(&self, operation: &str) -> usize {
        self.lock_log()
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    fn lock_log(&self) -> std::sync::MutexGuard<'_, Vec<MockCall>> {
        self.call_log.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn log_call(&self, operation: &str, input_len: usize) {
        self.lock_log().push(MockCall {
            operation: operation.to_string(),
            input_len,
        });
    }

    async fn simulate_latency(&self) {
        if self.config.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.config.latency_ms)).await;
        }
    }
}

impl Default for MockEmbeddingService {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic unit vector derived from input bytes.
pub fn generate_vector(input: &[u8], dimension: usize) -> Vec<f32> {
    let mut vec = vec![0.0f32; dimension];
    if dimension == 0 {
        return vec;
    }
    for (i, b) in input.iter().enumerate() {
        let idx = (*b as usize + i) % dimension;
        vec[idx] += 0.1;
    }
    if input.is_empty() {
        vec[0] = 1.0;
    }
    l2_normalize(&mut vec);
    vec
}

#[async_trait]
impl EmbeddingService for MockEmbeddingService {
    async fn compute_image_embedding(
        &self,
        bytes: &[u8],
        kind: EmbeddingKind,
    ) -> Result<EmbeddingOutput> {
        self.log_call("embed_image", bytes.len());
        self.simulate_latency().await;

        if self.config.failing_inputs.contains(bytes) {
            return Err(Error::Embedding("simulated embedding failure".to_string()));
        }

        let vector = match (kind, self.config.image_vectors.get(bytes)) {
            (EmbeddingKind::Image, Some(v)) => v.clone(),
            (EmbeddingKind::Image, None) => generate_vector(bytes, self.config.image_dim),
            (EmbeddingKind::Face, _) => generate_vector(bytes, self.config.face_dim),
        };
        Ok(EmbeddingOutput {
            dim: vector.len(),
            vector,
            model: self.config.model.clone(),
        })
    }

    async fn compute_text_embedding(&self, text: &str) -> Result<Vec<f32>> {
        self.log_call("embed_text", text.len());
        self.simulate_latency().await;

        Ok(self
            .config
            .text_vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| generate_vector(text.as_bytes(), self.config.image_dim)))
    }

    async fn detect_faces(&self, bytes: &[u8]) -> Result<Vec<DetectedFace>> {
        self.log_call("detect_faces", bytes.len());
        self.simulate_latency().await;

        if self.config.failing_detection.contains(bytes) {
            return Err(Error::Embedding("simulated detection failure".to_string()));
        }
        Ok(self.config.faces.get(bytes).cloned().unwrap_or_default())
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use photolens_core::{cosine_distance, PixelBox};

    #[tokio::test]
    async fn test_deterministic_image_embedding() {
        let service = MockEmbeddingService::new().with_image_dim(16);
        let a = service
            .compute_image_embedding(b"same", EmbeddingKind::Image)
            .await
            .unwrap();
        let b = service
            .compute_image_embedding(b"same", EmbeddingKind::Image)
            .await
            .unwrap();
        assert_eq!(a.vector, b.vector);
        assert_eq!(a.dim, 16);
        assert_eq!(service.call_count("embed_image"), 2);
    }

    #[tokio::test]
    async fn test_mapped_vectors_and_faces() {
        let face = DetectedFace {
            bbox: PixelBox::new(0.0, 0.0, 50.0, 50.0),
            det_score: 0.9,
            vector: vec![0.0, 1.0],
        };
        let service = MockEmbeddingService::new()
            .with_image_vector(b"p1", vec![1.0, 0.0])
            .with_text_vector("cat", vec![0.0, 1.0])
            .with_faces(b"p1", vec![face.clone()]);

        let out = service
            .compute_image_embedding(b"p1", EmbeddingKind::Image)
            .await
            .unwrap();
        assert_eq!(out.vector, vec![1.0, 0.0]);
        assert_eq!(
            service.compute_text_embedding("cat").await.unwrap(),
            vec![0.0, 1.0]
        );
        assert_eq!(service.detect_faces(b"p1").await.unwrap(), vec![face]);
        assert!(service.detect_faces(b"other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_simulated_failures() {
        let service = MockEmbeddingService::new()
            .with_failure_for(b"bad")
            .with_detection_failure_for(b"bad");
        assert!(service
            .compute_image_embedding(b"bad", EmbeddingKind::Image)
            .await
            .is_err());
        assert!(service.detect_faces(b"bad").await.is_err());
    }

    #[test]
    fn test_generate_vector_is_unit_length() {
        let v = generate_vector(b"hello world", 32);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(cosine_distance(&v, &generate_vector(b"hello world", 32)) < 1e-6);
    }
}
