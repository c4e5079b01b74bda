//! photolens-api - HTTP API server for photolens

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use photolens_api::{cors_layer, parse_allowed_origins, router, AppState, ServerConfig, VectorBackend};
use photolens_db::{Database, MemoryFaceIndex, MemoryImageIndex, PhotoPrismClient};
use photolens_inference::HttpEmbeddingService;
use photolens_jobs::{JobOrchestrator, JobRegistry};
use photolens_search::MatchConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let _log_guard = init_tracing();

    let config = ServerConfig::from_env();
    let match_config = MatchConfig::from_env();
    let event_buffer = std::env::var("JOB_EVENT_BUFFER")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(photolens_core::defaults::JOB_EVENT_BUFFER);

    let mut state = AppState::new()
        .with_match_config(match_config)
        .with_job_concurrency(config.job_concurrency)
        .with_jobs(Arc::new(JobOrchestrator::new(JobRegistry::new(event_buffer))));

    // Vector indexes
    match &config.vector_backend {
        VectorBackend::Postgres(url) => {
            info!("Connecting to database...");
            let db = Database::connect(url).await?;
            info!("Running database migrations...");
            db.migrate().await?;
            info!("Database ready");
            state = state.with_indexes(db.images.clone(), db.faces.clone());
        }
        VectorBackend::Memory => {
            warn!("Using in-memory vector indexes; embeddings are lost on restart");
            state = state.with_indexes(
                Arc::new(MemoryImageIndex::new()),
                Arc::new(MemoryFaceIndex::new()),
            );
        }
        VectorBackend::Disabled => {
            warn!("No vector index configured (set DATABASE_URL or VECTOR_BACKEND=memory)");
        }
    }

    // Metadata service
    match PhotoPrismClient::from_env()? {
        Some(client) => state = state.with_metadata(Arc::new(client)),
        None => warn!("Metadata service not configured (set PHOTOPRISM_URL)"),
    }

    // Embedding service
    match HttpEmbeddingService::from_env()? {
        Some(service) => state = state.with_embeddings(Arc::new(service)),
        None => warn!("Embedding service not configured (set EMBEDDING_URL)"),
    }

    info!(
        vector_backend = config.vector_backend.name(),
        metadata = state.metadata.is_some(),
        embeddings = state.embeddings.is_some(),
        "Collaborators configured"
    );

    let app = router(state).layer(cors_layer(parse_allowed_origins(&config.allowed_origins)));

    // Start server
    let addr: SocketAddr = config.bind_addr().parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Install the global subscriber.
///
/// | Variable | Default | Meaning |
/// |----------|---------|---------|
/// | `LOG_FORMAT` | `text` | `json` for one JSON object per line |
/// | `LOG_FILE` | unset | Write to a daily-rotated file instead of stdout |
/// | `LOG_ANSI` | auto | Force ANSI colors on or off |
/// | `RUST_LOG` | `photolens_api=debug,tower_http=debug` | Filter directives |
///
/// The returned guard flushes the file writer and must outlive the server.
fn init_tracing() -> Option<WorkerGuard> {
    let json = std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false);
    let ansi = std::env::var("LOG_ANSI").ok().map(|v| v == "true" || v == "1");
    let log_file = std::env::var("LOG_FILE").ok().filter(|p| !p.trim().is_empty());

    let guard = match log_file.as_deref() {
        Some(path) => {
            let path = std::path::Path::new(path);
            let dir = path.parent().unwrap_or(std::path::Path::new("."));
            let name = path
                .file_name()
                .and_then(|f| f.to_str())
                .unwrap_or("photolens-api.log");
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name));
            install(writer, json, Some(ansi.unwrap_or(false)));
            Some(guard)
        }
        None => {
            install(std::io::stdout, json, ansi);
            None
        }
    };

    info!(
        json,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );
    guard
}

fn install<W>(writer: W, json: bool, ansi: Option<bool>)
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "photolens_api=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .init();
    } else {
        let mut layer = tracing_subscriber::fmt::layer().with_writer(writer);
        if let Some(ansi) = ansi {
            layer = layer.with_ansi(ansi);
        }
        registry.with(layer).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
