//! HTTP embedding service backend.
//!
//! Talks to an embedding server exposing:
//!
//! | Method | Path | Body | Response |
//! |--------|------|------|----------|
//! | POST | `/embed/image` | `{"image": <base64>}` | `{"embedding": [..], "model": "..", "dim": n}` |
//! | POST | `/embed/face` | `{"image": <base64>}` | same as above |
//! | POST | `/embed/text` | `{"text": ".."}` | `{"embedding": [..]}` |
//! | POST | `/detect/faces` | `{"image": <base64>}` | `{"faces": [{"bbox": [x1,y1,x2,y2], "det_score": s, "embedding": [..]}]}` |

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use photolens_core::{
    defaults, DetectedFace, EmbeddingKind, EmbeddingOutput, EmbeddingService, Error, PixelBox,
    Result,
};

/// Default model name reported when the server does not name one.
pub const DEFAULT_MODEL: &str = "clip-vit-l-14";

/// Embedding calls slower than this are logged at WARN.
const SLOW_EMBED_MS: u64 = 5000;

/// Configuration for [`HttpEmbeddingService`].
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl EmbeddingConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(defaults::EMBED_TIMEOUT_SECS),
        }
    }

    /// Read `EMBEDDING_URL`, `EMBEDDING_MODEL` and `EMBEDDING_TIMEOUT_SECS`.
    /// Returns `None` when no URL is configured.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("EMBEDDING_URL")
            .ok()
            .filter(|u| !u.trim().is_empty())?;
        let mut config = Self::new(base_url);
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            if !model.is_empty() {
                config.model = model;
            }
        }
        if let Some(secs) = std::env::var("EMBEDDING_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.timeout = Duration::from_secs(secs);
        }
        Some(config)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Remote embedding service client.
pub struct HttpEmbeddingService {
    client: Client,
    config: EmbeddingConfig,
}

#[derive(Serialize)]
struct ImageRequest {
    image: String,
}

#[derive(Serialize)]
struct TextRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    dim: Option<usize>,
}

#[derive(Deserialize)]
struct FaceDto {
    bbox: [f64; 4],
    #[serde(default)]
    det_score: f32,
    #[serde(default)]
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct DetectResponse {
    #[serde(default)]
    faces: Vec<FaceDto>,
}

impl HttpEmbeddingService {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "inference",
            component = "embedding_http",
            base_url = %config.base_url,
            model = %config.model,
            "Initializing embedding service client"
        );

        Ok(Self { client, config })
    }

    /// Create from environment; `Ok(None)` when `EMBEDDING_URL` is unset.
    pub fn from_env() -> Result<Option<Self>> {
        EmbeddingConfig::from_env().map(Self::new).transpose()
    }

    fn encode(bytes: &[u8]) -> ImageRequest {
        ImageRequest {
            image: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    async fn post<B: Serialize + ?Sized, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let start = Instant::now();
        let response = self
            .client
            .post(format!("{}{}", self.config.base_url, path))
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Embedding(format!(
                "Embedding service returned {}: {}",
                status, body
            )));
        }

        let parsed = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("Failed to parse response: {}", e)))?;

        let elapsed = start.elapsed().as_millis() as u64;
        if elapsed > SLOW_EMBED_MS {
            warn!(
                duration_ms = elapsed,
                path,
                slow = true,
                "Slow embedding operation"
            );
        }
        Ok(parsed)
    }
}

#[async_trait]
impl EmbeddingService for HttpEmbeddingService {
    #[instrument(skip(self, bytes), fields(subsystem = "inference", component = "embedding_http", op = "embed_image", input_bytes = bytes.len()))]
    async fn compute_image_embedding(
        &self,
        bytes: &[u8],
        kind: EmbeddingKind,
    ) -> Result<EmbeddingOutput> {
        if bytes.is_empty() {
            return Err(Error::InvalidInput("empty image payload".to_string()));
        }
        let path = match kind {
            EmbeddingKind::Image => "/embed/image",
            EmbeddingKind::Face => "/embed/face",
        };
        let response: EmbeddingResponse = self.post(path, &Self::encode(bytes)).await?;
        if response.embedding.is_empty() {
            return Err(Error::Embedding("service returned an empty embedding".to_string()));
        }

        let dim = response.dim.unwrap_or(response.embedding.len());
        if dim != response.embedding.len() {
            return Err(Error::Embedding(format!(
                "dimension mismatch: reported {}, got {}",
                dim,
                response.embedding.len()
            )));
        }
        debug!(dim, "Image embedding complete");
        Ok(EmbeddingOutput {
            vector: response.embedding,
            model: response.model.unwrap_or_else(|| self.config.model.clone()),
            dim,
        })
    }

    #[instrument(skip(self, text), fields(subsystem = "inference", component = "embedding_http", op = "embed_text", text_len = text.len()))]
    async fn compute_text_embedding(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(Error::InvalidInput("empty text query".to_string()));
        }
        let response: EmbeddingResponse = self.post("/embed/text", &TextRequest { text }).await?;
        if response.embedding.is_empty() {
            return Err(Error::Embedding("service returned an empty embedding".to_string()));
        }
        Ok(response.embedding)
    }

    #[instrument(skip(self, bytes), fields(subsystem = "inference", component = "embedding_http", op = "detect_faces", input_bytes = bytes.len()))]
    async fn detect_faces(&self, bytes: &[u8]) -> Result<Vec<DetectedFace>> {
        if bytes.is_empty() {
            return Err(Error::InvalidInput("empty image payload".to_string()));
        }
        let response: DetectResponse = self.post("/detect/faces", &Self::encode(bytes)).await?;
        let faces: Vec<DetectedFace> = response
            .faces
            .into_iter()
            .map(|f| DetectedFace {
                bbox: PixelBox::new(f.bbox[0], f.bbox[1], f.bbox[2], f.bbox[3]),
                det_score: f.det_score,
                vector: f.embedding,
            })
            .collect();
        debug!(result_count = faces.len(), "Face detection complete");
        Ok(faces)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_trims_trailing_slash() {
        let config = EmbeddingConfig::new("http://embed.local:8000/");
        assert_eq!(config.base_url, "http://embed.local:8000");
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(
            config.timeout,
            Duration::from_secs(defaults::EMBED_TIMEOUT_SECS)
        );
    }

    #[test]
    fn test_config_builder() {
        let config = EmbeddingConfig::new("http://x")
            .with_model("siglip")
            .with_timeout(Duration::from_secs(5));
        assert_eq!(config.model, "siglip");
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_encode_base64() {
        let req = HttpEmbeddingService::encode(b"abc");
        assert_eq!(req.image, "YWJj");
    }

    #[tokio::test]
    async fn test_empty_payload_rejected_without_request() {
        let service = HttpEmbeddingService::new(EmbeddingConfig::new("http://127.0.0.1:1")).unwrap();
        let err = service
            .compute_image_embedding(&[], EmbeddingKind::Image)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        let err = service.compute_text_embedding("  ").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
