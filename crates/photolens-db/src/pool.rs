//! Postgres pool for the pgvector indexes.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use photolens_core::{defaults, Error, Result};

/// Sizing for the vector index pool.
///
/// Index traffic is bursty: a processing job writes one image embedding and
/// one face batch per worker, while search requests mostly read. The pool
/// therefore tracks the job worker count rather than a fixed size.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::for_workers(defaults::PROCESS_CONCURRENCY)
    }
}

impl PoolConfig {
    /// One connection per job worker plus headroom for concurrent searches.
    pub fn for_workers(workers: usize) -> Self {
        let workers = u32::try_from(workers.max(1)).unwrap_or(u32::MAX);
        Self {
            max_connections: workers.saturating_add(4),
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }

    /// `DATABASE_MAX_CONNECTIONS` overrides the worker-derived size.
    pub fn from_env() -> Self {
        let workers = std::env::var("PROCESS_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults::PROCESS_CONCURRENCY);
        let config = Self::for_workers(workers);
        match std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|n| *n > 0)
        {
            Some(n) => config.with_max_connections(n),
            None => config,
        }
    }

    pub fn with_max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

/// Open a pool against `database_url` using [`PoolConfig::from_env`].
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    create_pool_with_config(database_url, PoolConfig::from_env()).await
}

pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let start = Instant::now();
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "connect",
        max_connections = config.max_connections,
        duration_ms = start.elapsed().as_millis() as u64,
        "Vector index pool connected"
    );
    Ok(pool)
}
