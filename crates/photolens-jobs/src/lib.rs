//! # photolens-jobs
//!
//! Background jobs for photolens.
//!
//! This crate provides:
//! - Job state with status transitions and cancellation
//! - Per-job event hubs with bounded, non-blocking listener channels
//! - A registry enforcing one active job per kind
//! - A bounded worker pool that reports progress
//! - Bulk processing (image embeddings and faces) and label sorting handlers
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use photolens_jobs::{JobOrchestrator, ProcessHandler, ProcessOptions};
//!
//! let orchestrator = JobOrchestrator::default();
//! let handler = Arc::new(ProcessHandler::new(metadata, embeddings, images, faces));
//! let job = orchestrator.start(handler, ProcessOptions::default())?;
//!
//! let mut events = job.subscribe();
//! while let Some(event) = events.recv().await {
//!     println!("{}: {}", event.event_type, event.message);
//! }
//! ```

pub mod events;
pub mod handler;
pub mod job;
pub mod pool;
pub mod process;
pub mod registry;
pub mod sort;

// Re-export core types
pub use photolens_core::*;

pub use events::{EventHub, EventType, JobEvent, Subscription};
pub use handler::{run_job, spawn_job, JobHandler, JobOrchestrator};
pub use job::{Job, JobKind, JobSnapshot, JobStatus};
pub use pool::run_bounded;
pub use process::{ProcessHandler, ProcessOptions, ProcessResult};
pub use registry::JobRegistry;
pub use sort::{best_label, uncertainty_for, LabelSuggestion, SortHandler, SortOptions, SortResult};
