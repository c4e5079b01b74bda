//! Server configuration from the environment.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `HOST` | `0.0.0.0` | Bind address |
//! | `PORT` | `8080` | Bind port |
//! | `ALLOWED_ORIGINS` | `http://localhost:3000` | Comma-separated CORS origins |
//! | `DATABASE_URL` | unset | pgvector index backend |
//! | `VECTOR_BACKEND` | unset | `memory` for in-process indexes when no database is set |
//! | `PROCESS_CONCURRENCY` | `4` | Default job worker count |

use photolens_core::defaults;

/// Where vectors are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VectorBackend {
    Postgres(String),
    Memory,
    /// Index endpoints answer 503.
    Disabled,
}

impl VectorBackend {
    /// `database_url` wins over `vector_backend=memory`.
    pub fn select(database_url: Option<&str>, vector_backend: Option<&str>) -> Self {
        if let Some(url) = database_url.map(str::trim).filter(|u| !u.is_empty()) {
            return VectorBackend::Postgres(url.to_string());
        }
        match vector_backend.map(|b| b.trim().to_ascii_lowercase()) {
            Some(b) if b == "memory" => VectorBackend::Memory,
            _ => VectorBackend::Disabled,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            VectorBackend::Postgres(_) => "postgres",
            VectorBackend::Memory => "memory",
            VectorBackend::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: String,
    pub vector_backend: VectorBackend,
    pub job_concurrency: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: defaults::SERVER_PORT,
            allowed_origins: "http://localhost:3000".to_string(),
            vector_backend: VectorBackend::Disabled,
            job_concurrency: defaults::PROCESS_CONCURRENCY,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(host) = std::env::var("HOST") {
            if !host.trim().is_empty() {
                config.host = host;
            }
        }
        if let Some(port) = std::env::var("PORT").ok().and_then(|v| v.parse().ok()) {
            config.port = port;
        }
        if let Ok(origins) = std::env::var("ALLOWED_ORIGINS") {
            if !origins.trim().is_empty() {
                config.allowed_origins = origins;
            }
        }
        config.vector_backend = VectorBackend::select(
            std::env::var("DATABASE_URL").ok().as_deref(),
            std::env::var("VECTOR_BACKEND").ok().as_deref(),
        );
        if let Some(n) = std::env::var("PROCESS_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
        {
            config.job_concurrency = n;
        }
        config
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
