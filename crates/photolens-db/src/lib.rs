//! # photolens-db
//!
//! Storage layer for photolens.
//!
//! This crate provides:
//! - Connection pool management
//! - pgvector-backed image and face indexes
//! - In-memory indexes and metadata store for tests and small libraries
//! - The HTTP client for a PhotoPrism-compatible metadata service
//!
//! ## Example
//!
//! ```rust,ignore
//! use photolens_db::{Database, ImageIndex};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/photolens").await?;
//!     println!("{} image embeddings", db.images.count().await?);
//!     Ok(())
//! }
//! ```

pub mod faces;
pub mod images;
pub mod memory;
pub mod memory_metadata;
pub mod photoprism;
pub mod pool;

use std::sync::Arc;

use sqlx::PgPool;

// Re-export core types
pub use photolens_core::*;

pub use faces::PgFaceIndex;
pub use images::PgImageIndex;
pub use memory::{MemoryFaceIndex, MemoryImageIndex};
pub use memory_metadata::MemoryMetadata;
pub use photoprism::PhotoPrismClient;
pub use pool::{create_pool, create_pool_with_config, PoolConfig};

/// Both pgvector indexes over one pool.
#[derive(Clone)]
pub struct Database {
    pub pool: PgPool,
    pub images: Arc<PgImageIndex>,
    pub faces: Arc<PgFaceIndex>,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self {
            images: Arc::new(PgImageIndex::new(pool.clone())),
            faces: Arc::new(PgFaceIndex::new(pool.clone())),
            pool,
        }
    }

    /// Connect with a pool sized by [`PoolConfig::from_env`].
    pub async fn connect(url: &str) -> Result<Self> {
        Ok(Self::new(create_pool(url).await?))
    }

    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        Ok(Self::new(create_pool_with_config(url, config).await?))
    }

    /// Create the embedding tables and HNSW indexes if missing.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }
}
