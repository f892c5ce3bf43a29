//! imageinf Server
//!
//! Classifies images stored on Tapis systems, synchronously for small
//! batches and through background jobs otherwise.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use imageinf_server::{create_router, AppState, ConfigOverrides, ServerConfig};
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "imageinf-server")]
#[command(about = "Image inference service for Tapis", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "imageinf.yaml", env = "IMAGEINF_CONFIG")]
    config: String,

    /// Listen address
    #[arg(short = 'l', long)]
    listen: Option<String>,

    /// Listen port
    #[arg(short = 'P', long)]
    port: Option<u16>,

    /// Image cache directory
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Model used when a request names none
    #[arg(short = 'm', long)]
    default_model: Option<String>,

    /// Accept tokens without verifying their signature
    #[arg(long)]
    dev_mode: bool,

    /// Load every model's weights before serving
    #[arg(long)]
    preload: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            listen: self.listen.clone(),
            port: self.port,
            cache_dir: self.cache_dir.clone(),
            default_model: self.default_model.clone(),
            dev_mode: self.dev_mode,
            preload: self.preload,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.log_format);

    info!("Starting imageinf server");

    let config = ServerConfig::load(&cli.config, &cli.overrides())?;
    info!("Configuration loaded successfully");
    info!("Default model: {}", config.default_model);
    info!("Allowed tenants: {}", config.auth.allowed_tenants.join(", "));
    info!(
        "Job workers: {}, sync limit: {} files",
        config.jobs.workers, config.sync.max_files
    );

    let metrics_handle = init_metrics()?;

    let addr: SocketAddr = format!("{}:{}", config.listen, config.port).parse()?;
    let state = AppState::from_config(config, Some(metrics_handle))?;
    info!("Application state initialized successfully");

    if state.config.models.preload {
        info!("Preloading models");
        let registry = std::sync::Arc::clone(&state.registry);
        let summary = tokio::task::spawn_blocking(move || registry.preload()).await?;
        if !summary.failed.is_empty() {
            warn!("Models unavailable after preload: {}", summary.failed.join(", "));
        }
    }

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", addr);

    let shutdown = async {
        shutdown_signal().await;
        warn!("Shutdown signal received, stopping server...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Listen for shutdown signals (SIGTERM, SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool, format: LogFormat) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("imageinf=debug,tower_http=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("imageinf=info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

/// Initialize metrics exporter and return handle for rendering
fn init_metrics() -> Result<PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    metrics::describe_counter!(
        "imageinf_requests_total",
        "Total number of API requests by endpoint"
    );
    metrics::describe_counter!("imageinf_jobs_total", "Inference job state transitions by state");
    metrics::describe_counter!(
        "imageinf_jobs_rejected_total",
        "Submissions rejected because the job queue was full"
    );
    metrics::describe_counter!(
        "imageinf_files_processed_total",
        "Images classified, by model"
    );
    metrics::describe_counter!(
        "imageinf_inference_failures_total",
        "Files that failed retrieval or classification"
    );
    metrics::describe_histogram!(
        "imageinf_inference_latency_us",
        metrics::Unit::Microseconds,
        "Per-request inference latency in microseconds"
    );
    metrics::describe_counter!("imageinf_cache_hits_total", "Images served from the local cache");
    metrics::describe_counter!(
        "imageinf_cache_misses_total",
        "Images downloaded from the files service"
    );

    info!("Metrics exporter initialized");
    Ok(handle)
}
