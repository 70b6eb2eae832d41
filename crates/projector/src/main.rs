//! Projection host entry point.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use projector::{Config, HostError, LogFormat};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install SIGINT handler");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), HostError> {
    // 1. Configuration and tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Prometheus exporter with its own HTTP listener
    let metrics_addr: SocketAddr =
        config
            .metrics_addr
            .parse()
            .map_err(|source| HostError::MetricsAddr {
                addr: config.metrics_addr.clone(),
                source,
            })?;
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()?;
    tracing::info!(%metrics_addr, "metrics exporter listening");

    // 3. Event log and workers
    tracing::info!(
        group = %config.group,
        workers = config.workers,
        max_conflict_retries = config.max_conflict_retries,
        "starting projection host"
    );
    projector::run(&config, shutdown_signal()).await?;

    tracing::info!("projection host shut down gracefully");
    Ok(())
}
