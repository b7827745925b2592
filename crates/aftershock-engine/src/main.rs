//! Engine binary for the Aftershock pipeline.
//!
//! Wires configuration, the geometry store, reference geography and the
//! feed poller together, then polls the feed until told to stop.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `aftershock-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Open the geometry store and run migrations
//! 4. Load reference geography
//! 5. Build the HTTP fetcher, poller and pipeline
//! 6. Poll once, or every `pipeline.poll_interval_secs` until Ctrl-C

mod error;

use std::path::Path;
use std::time::Duration;

use aftershock_core::{
    AftershockConfig, GeographySource, LoggingConfig, Pipeline, PipelineSettings,
    StorageBackend, StorageConfig, load_source,
};
use aftershock_db::{GeometryStore, MemoryStore, PostgresConfig, PostgresPool};
use aftershock_feed::{FeedPoller, Fetcher, HttpFetcher};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;

/// Configuration file looked up in the working directory.
const CONFIG_PATH: &str = "aftershock-config.yaml";

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if any initialization step fails, or if a
/// single-shot poll cannot read the feed.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config_path = Path::new(CONFIG_PATH);
    let (config, from_file) = load_config(config_path)?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    info!("aftershock-engine starting");
    if !from_file {
        info!(path = %config_path.display(), "Config file not found, using defaults");
    }
    info!(
        feed_url = %config.feed.url,
        magnitude_threshold = config.feed.magnitude_threshold,
        backend = ?config.storage.backend,
        data_dir = %config.storage.data_dir.display(),
        granularities = ?config.exposure.granularities,
        "Configuration loaded"
    );

    // 3. Open the store.
    let store = open_store(&config.storage).await?;
    info!(backend = store.backend_name(), "Geometry store ready");

    // 4. Load reference geography.
    load_geography(&store, &config.geography).await?;

    // 5. Build the pipeline.
    let pipeline = build_pipeline(&config, store.clone())?;
    info!(
        max_concurrent_events = config.pipeline.max_concurrent_events,
        poll_interval_secs = config.pipeline.poll_interval_secs,
        "Pipeline assembled"
    );

    // 6. Poll.
    run(&pipeline, config.pipeline.poll_interval_secs).await?;

    if let GeometryStore::Postgis(pool) = &store {
        pool.close().await;
    }
    info!("aftershock-engine shutdown complete");
    Ok(())
}

/// Load the config file, or defaults when it is absent.
///
/// The flag reports whether the file was read. Logging is not up yet, so
/// the caller reports the fallback.
fn load_config(path: &Path) -> Result<(AftershockConfig, bool), EngineError> {
    let from_file = path.exists();
    Ok((AftershockConfig::load_or_default(path)?, from_file))
}

/// Install the global subscriber. `RUST_LOG` wins over `logging.level`.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

/// Connect to the configured backend.
async fn open_store(storage: &StorageConfig) -> Result<GeometryStore, EngineError> {
    match storage.backend {
        StorageBackend::Postgis => {
            let pg_config = PostgresConfig::new(&storage.postgres_url)
                .with_max_connections(storage.max_connections);
            let pool = PostgresPool::connect(&pg_config).await?;
            pool.run_migrations().await?;
            info!(postgis = %pool.postgis_version().await?, "PostGIS schema ready");
            Ok(GeometryStore::Postgis(pool))
        }
        StorageBackend::Memory => {
            info!("Using in-memory store, state is lost on exit");
            Ok(GeometryStore::Memory(MemoryStore::new()))
        }
    }
}

/// Upsert every configured geography source.
async fn load_geography(
    store: &GeometryStore,
    sources: &[GeographySource],
) -> Result<(), EngineError> {
    for source in sources {
        load_source(store, source).await?;
    }
    if sources.is_empty() {
        tracing::warn!("No geography configured, exposure will be empty");
    }
    Ok(())
}

/// Assemble the pipeline around an HTTP fetcher.
fn build_pipeline(
    config: &AftershockConfig,
    store: GeometryStore,
) -> Result<Pipeline, EngineError> {
    let fetcher = Fetcher::Http(HttpFetcher::new(&config.feed.http_config())?);
    let poller = FeedPoller::new(fetcher, config.feed.poller_config());
    Ok(Pipeline::new(poller, store, PipelineSettings::from_config(config)))
}

/// Poll once when `interval_secs` is zero, otherwise loop until Ctrl-C.
///
/// In loop mode a failed poll is logged and retried at the next tick.
async fn run(pipeline: &Pipeline, interval_secs: u64) -> Result<(), EngineError> {
    if interval_secs == 0 {
        pipeline.run_once().await?;
        return Ok(());
    }

    let interval = Duration::from_secs(interval_secs);
    loop {
        if let Err(e) = pipeline.run_once().await {
            tracing::warn!(class = e.class().as_str(), error = %e, "Poll failed");
        }

        tokio::select! {
            () = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let path = Path::new("no/such/aftershock-config.yaml");
        let (config, from_file) = load_config(path).unwrap();
        assert!(!from_file);
        assert_eq!(config.pipeline.poll_interval_secs, 0);
    }

    #[test]
    fn shipped_config_file_is_read() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../aftershock-config.yaml");
        let (_, from_file) = load_config(&path).unwrap();
        assert!(from_file);
    }
}
