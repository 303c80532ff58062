//! Entry point: loads configuration, wires up the configured storage
//! backend trio, and serves the HTTP router.

use clap::Parser;
use lamina::bucket::BucketRegistry;
use lamina::cache::MetadataCache;
use lamina::config::{Cli, Config, StorageBackend};
use lamina::http::{self, AppState};
use lamina::store::{DataStore, MetadataStore, MultipartStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref())?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(cli.log_filter.clone()))
        .init();

    let (data, metadata, multipart): (
        Arc<dyn DataStore>,
        Arc<dyn MetadataStore>,
        Arc<dyn MultipartStore>,
    ) = build_backend(&config).await?;

    let buckets = Arc::new(BucketRegistry::new());
    let cache = Arc::new(MetadataCache::new(config.metadata_cache_size_bytes));
    let state = Arc::new(AppState::new(data, metadata, multipart, buckets, cache, &config));
    let shutdown = state.shutdown.clone();

    let router = http::router(state);
    let listener = tokio::net::TcpListener::bind(&cli.listen).await?;
    tracing::info!(listen = %cli.listen, "lamina listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;
    Ok(())
}

/// Waits for Ctrl-C, then cancels `shutdown` so every in-flight facade and
/// multipart operation surfaces `RequestCancelled` instead of racing the
/// storage backends as they tear down.
async fn shutdown_signal(shutdown: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("received shutdown signal, cancelling in-flight requests");
    shutdown.cancel();
}

type BackendTrio = (Arc<dyn DataStore>, Arc<dyn MetadataStore>, Arc<dyn MultipartStore>);

async fn build_backend(config: &Config) -> Result<BackendTrio, Box<dyn std::error::Error>> {
    match config.storage_backend {
        StorageBackend::Memory => {
            use lamina::store::memory::{MemoryDataStore, MemoryMetadataStore, MemoryMultipartStore};
            Ok((
                Arc::new(MemoryDataStore::new()),
                Arc::new(MemoryMetadataStore::new()),
                Arc::new(MemoryMultipartStore::new()),
            ))
        }
        StorageBackend::Filesystem => {
            use lamina::store::filesystem::{
                FilesystemDataStore, FilesystemMetadataStore, FilesystemMultipartStore,
            };
            let root = &config.filesystem_data_root;
            Ok((
                Arc::new(FilesystemDataStore::new(root.clone())),
                Arc::new(FilesystemMetadataStore::new(root.clone())),
                Arc::new(FilesystemMultipartStore::new(root.clone())),
            ))
        }
        StorageBackend::Database => database_backend(config).await,
    }
}

#[cfg(feature = "backend-database")]
async fn database_backend(config: &Config) -> Result<BackendTrio, Box<dyn std::error::Error>> {
    let url = config
        .database_connection_string
        .as_deref()
        .ok_or("database_connection_string is required for the database backend")?;
    let store = Arc::new(lamina::store::database::DatabaseStore::connect(url).await?);
    Ok((store.clone(), store.clone(), store))
}

#[cfg(not(feature = "backend-database"))]
async fn database_backend(_config: &Config) -> Result<BackendTrio, Box<dyn std::error::Error>> {
    Err("this binary was built without the backend-database feature".into())
}
