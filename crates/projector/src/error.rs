//! Host-level errors.

use event_store::EventStoreError;
use projections::ProjectionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("invalid metrics address `{addr}`: {source}")]
    MetricsAddr {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("failed to install Prometheus exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("failed to join subscription group: {0}")]
    Subscribe(#[from] EventStoreError),

    #[error("worker {worker_id} failed: {source}")]
    Worker {
        worker_id: usize,
        #[source]
        source: ProjectionError,
    },

    #[error("worker task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}
