//! Clipdrop server binary
//!
//! Wires the store, guards and reaper together and serves the HTTP API
//! until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use clipdrop::clock::{Clock, SystemClock};
use clipdrop::config::ServiceConfig;
use clipdrop::guard::{AbuseGuard, RateLimiter};
use clipdrop::metrics::ServiceMetrics;
use clipdrop::reaper::Reaper;
use clipdrop::server::{self, AppState};
use clipdrop::store::{BlobStore, FsBlobStore, InMemoryBlobStore, ObjectStore};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Clipdrop - share text and files through short-lived codes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "CLIPDROP_CONFIG")]
    config: Option<PathBuf>,

    /// API bind address
    #[arg(long, env = "LISTEN_ADDR")]
    listen_addr: Option<String>,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Directory for uploaded file bodies (in-memory when unset)
    #[arg(long, env = "STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Item lifetime in hours
    #[arg(long, env = "DEFAULT_TTL_HOURS")]
    default_ttl_hours: Option<u64>,

    /// Largest accepted file upload in bytes
    #[arg(long, env = "MAX_FILE_BYTES")]
    max_file_bytes: Option<u64>,

    /// Key clients by forwarded-address headers (only behind a rewriting proxy)
    #[arg(long, env = "TRUST_PROXY_HEADERS")]
    trust_proxy_headers: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    /// Load the config file and apply flag/env overrides on top
    fn service_config(&self) -> anyhow::Result<ServiceConfig> {
        let mut config =
            ServiceConfig::load(self.config.as_deref()).context("loading configuration")?;

        let server = &mut config.server;
        if let Some(addr) = &self.listen_addr {
            server.listen_addr = addr.clone();
        }
        if let Some(addr) = &self.metrics_addr {
            server.metrics_addr = addr.clone();
        }
        if let Some(dir) = &self.storage_dir {
            server.storage_dir = Some(dir.clone());
        }
        if let Some(hours) = self.default_ttl_hours {
            server.default_ttl_secs = hours.saturating_mul(3600);
        }
        if let Some(bytes) = self.max_file_bytes {
            server.max_file_bytes = bytes;
        }
        if self.trust_proxy_headers {
            server.trust_proxy_headers = true;
        }

        config.validate().context("validating configuration")?;
        Ok(config)
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    let config = args.service_config()?;

    info!("Starting Clipdrop");
    info!("  Listen address: {}", config.server.listen_addr);
    info!("  Metrics address: {}", config.server.metrics_addr);
    info!("  Item lifetime: {}s", config.server.default_ttl_secs);
    info!("  Max file size: {} bytes", config.server.max_file_bytes);
    info!("  Trust proxy headers: {}", config.server.trust_proxy_headers);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let blobs = open_blob_store(&config)?;
    let metrics = Arc::new(ServiceMetrics::new().context("registering metrics")?);

    let store = Arc::new(ObjectStore::new(blobs, Arc::clone(&clock)));
    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit.clone(),
        Arc::clone(&clock),
    ));
    let guard = Arc::new(AbuseGuard::new(config.abuse.clone(), Arc::clone(&clock)));
    let reaper = Reaper::new(
        config.reaper.clone(),
        Arc::clone(&store),
        Arc::clone(&limiter),
        Arc::clone(&guard),
        Arc::clone(&metrics),
        Arc::clone(&clock),
    );

    let shutdown = CancellationToken::new();

    // Spawn background eviction
    let reaper_handle = tokio::spawn(Arc::clone(&reaper).run(shutdown.clone()));

    // Start metrics server
    let metrics_addr = config.server.metrics_addr.clone();
    let metrics_handle = {
        let metrics = Arc::clone(&metrics);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = server::run_metrics_server(&metrics_addr, metrics, shutdown).await {
                error!("Metrics server error: {}", e);
            }
        })
    };

    // Start API server
    let listen_addr = config.server.listen_addr.clone();
    let state = Arc::new(AppState {
        config: config.server.clone(),
        store,
        limiter,
        guard,
        reaper,
        metrics,
        clock,
    });
    let mut api_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { server::run_api_server(&listen_addr, state, shutdown).await })
    };

    // Run until interrupted or until the API server gives up on its own
    let api_result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for shutdown signal")?;
            info!("Shutdown signal received");
            shutdown.cancel();
            api_handle.await
        }
        result = &mut api_handle => {
            shutdown.cancel();
            result
        }
    }
    .context("API server task panicked")?;

    let _ = metrics_handle.await;
    let _ = reaper_handle.await;

    api_result.context("API server failed")?;
    info!("Clipdrop shutdown complete");
    Ok(())
}

fn open_blob_store(config: &ServiceConfig) -> anyhow::Result<Arc<dyn BlobStore>> {
    match &config.server.storage_dir {
        Some(dir) => {
            let store = FsBlobStore::open(dir)
                .with_context(|| format!("opening storage directory {}", dir.display()))?;
            // Nothing survives a restart: the index is in memory only
            let purged = store.purge().context("purging stale blobs")?;
            info!(
                "  Storage directory: {} ({} stale blobs purged)",
                store.root().display(),
                purged
            );
            Ok(Arc::new(store))
        }
        None => {
            info!("  Storage: in-memory");
            Ok(Arc::new(InMemoryBlobStore::new()))
        }
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("hyper_util=warn".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}
