//! # photolens-search
//!
//! Matching engine for photolens.
//!
//! This crate provides:
//! - Vote-counting aggregation of nearest-neighbour results
//! - Face matching for a named person, with action resolution
//! - Outlier ranking of a person's faces by centroid distance
//! - Near-duplicate clustering with union-find
//! - Album/label vote search and centroid-based suggestions
//! - Photo and text similarity search
//! - Application of face actions to the metadata service
//!
//! ## Example
//!
//! ```ignore
//! use photolens_search::{FaceMatcher, MatchConfig};
//!
//! let matcher = FaceMatcher::new(faces)
//!     .with_metadata(metadata)
//!     .with_config(MatchConfig::from_env());
//! let response = matcher.find_matches("Ada Lovelace", 0.5, 20).await?;
//! println!("{} new faces", response.summary.create_marker);
//! ```

pub mod aggregator;
pub mod apply;
pub mod collections;
pub mod config;
pub mod duplicates;
pub mod faces;
pub mod outliers;
pub mod similar;

// Re-export core types
pub use photolens_core::*;

pub use aggregator::{CandidateAggregator, MatchCandidate};
pub use apply::{ApplyRequest, ApplyResponse, FaceActionApplier};
pub use collections::{
    resolve_collection, Collection, CollectionMatch, CollectionSearch, CollectionSearchResponse,
    CollectionSuggestions, SuggestOutcome, Suggestion, SuggestionResponse,
};
pub use config::MatchConfig;
pub use duplicates::{DuplicateClusterer, DuplicateGroup, DuplicateResponse, UnionFind};
pub use faces::{FaceMatch, FaceMatchResponse, FaceMatcher, MatchSource, MatchSummary};
pub use outliers::{rank_outliers, OutlierDetector, OutlierFace, OutlierResponse};
pub use similar::{PhotoSimilarity, SimilarPhoto, SimilarPhotosResponse, TextSearchResponse};
