//! # photolens-inference
//!
//! Embedding service backends for photolens.
//!
//! This crate provides:
//! - [`HttpEmbeddingService`], a client for a remote embedding server that
//!   computes whole-image, face and text embeddings and detects faces
//! - A deterministic mock backend behind the `mock` feature
//!
//! # Feature Flags
//!
//! - `mock`: Enable [`mock::MockEmbeddingService`] for dependent crates' tests
//!
//! # Example
//!
//! ```rust,no_run
//! use photolens_inference::HttpEmbeddingService;
//! use photolens_core::{EmbeddingKind, EmbeddingService};
//!
//! #[tokio::main]
//! async fn main() {
//!     let service = HttpEmbeddingService::from_env().unwrap().expect("EMBEDDING_URL set");
//!     let out = service
//!         .compute_image_embedding(&[0xff, 0xd8], EmbeddingKind::Image)
//!         .await
//!         .unwrap();
//!     println!("{} dims from {}", out.dim, out.model);
//! }
//! ```

pub mod http;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export core types
pub use photolens_core::*;

pub use http::{EmbeddingConfig, HttpEmbeddingService};
