use anyhow::{Context, Result};
use std::{fs, io::ErrorKind, net::SocketAddr, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod clock;
mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use crate::{
    clock::{SharedClock, SystemClock},
    services::{
        admission::AdmissionGate, blob_store::BlobStore, metadata_store::SqliteMetadataStore,
        object_store::ObjectStore, sweeper::Sweeper,
    },
    state::AppState,
};

/// Slack on top of the file size limit for multipart framing and fields.
const MULTIPART_OVERHEAD: u64 = 1024 * 1024;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting ephemeral-share with config: {:?}", cfg);

    // --- Ensure storage directories exist ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)
            .with_context(|| format!("creating storage directory {}", cfg.storage_dir))?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    let db_path = cfg
        .database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    // --- Initialize metadata store ---
    let metadata = SqliteMetadataStore::connect(&cfg.database_url)
        .await
        .with_context(|| format!("opening database {}", cfg.database_url))?;
    let statements = metadata.migrate().await.context("applying schema")?;
    tracing::debug!("Applied {} schema statements", statements);

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize core services ---
    let blobs = BlobStore::new(&cfg.storage_dir);
    let stale = blobs
        .remove_stale_temp_files()
        .await
        .context("removing stale temp files")?;
    if stale > 0 {
        tracing::info!("Removed {} unfinished upload(s) from a previous run", stale);
    }

    let clock: SharedClock = Arc::new(SystemClock);
    let store = ObjectStore::new(Arc::new(metadata), blobs, clock.clone(), cfg.store_limits());
    let gate = Arc::new(AdmissionGate::new(cfg.admission_settings(), clock));

    let sweeper = Sweeper::new(store.clone(), cfg.sweep_interval())
        .with_admission_gate(gate.clone())
        .start();
    let sweep_status = sweeper.status();

    // --- Build router ---
    let state = AppState {
        store,
        gate,
        public_url: cfg.public_url.clone(),
        trust_proxy_headers: cfg.trust_proxy_headers,
        sweep_status,
    };
    let body_limit = usize::try_from(cfg.max_file_size_bytes().saturating_add(MULTIPART_OVERHEAD))
        .unwrap_or(usize::MAX);
    let app = routes::routes::app(state, body_limit);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    sweeper.stop().await;
    tracing::info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
