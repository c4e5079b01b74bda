//! # photolens-core
//!
//! Core types, traits, and abstractions for the photolens matching engine.
//!
//! This crate provides the foundational data structures, the narrow contracts
//! for external collaborators (metadata service, embedding service, vector
//! indexes), and the vector/geometry math every other photolens crate shares.

pub mod defaults;
pub mod error;
pub mod geometry;
pub mod models;
pub mod traits;
pub mod vector;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use geometry::{iou, to_display_rel, PixelBox, RelBox};
pub use models::*;
pub use traits::*;
pub use vector::{centroid, cosine_distance, cosine_similarity, l2_normalize};
