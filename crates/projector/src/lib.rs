//! Projection host: runs a pool of wallet projection workers against one
//! subscription group until shutdown or the first worker failure.

pub mod config;
pub mod error;

use std::future::Future;
use std::sync::Arc;

use event_store::{
    InMemoryEventStore, PostgresEventStore, SubscriptionSettings, SubscriptionSource,
};
use projections::{
    InMemoryWalletReadStore, PostgresWalletReadStore, ProjectionWorker, WalletProjector,
    WalletReadStore,
};
use tokio::sync::watch;
use tokio::task::JoinSet;

pub use config::{Config, LogFormat};
pub use error::HostError;

/// Competing consumers of one subscription group, sharing a shutdown signal.
pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<(usize, projections::Result<()>)>,
}

impl WorkerPool {
    /// Joins `count` workers to `group` on `source`, all feeding one projector.
    pub async fn spawn<L, R>(
        source: &L,
        group: &str,
        count: usize,
        settings: SubscriptionSettings,
        projector: Arc<WalletProjector<R>>,
    ) -> Result<Self, HostError>
    where
        L: SubscriptionSource,
        R: WalletReadStore + 'static,
    {
        let (shutdown, rx) = watch::channel(false);
        let mut tasks = JoinSet::new();

        for id in 0..count {
            let mut subscription = source.connect(group, settings.clone()).await?;
            let worker = ProjectionWorker::new(id, projector.clone());
            let rx = rx.clone();
            tasks.spawn(async move { (id, worker.run(&mut subscription, rx).await) });
        }

        tracing::info!(group, workers = count, "projection workers started");
        Ok(Self { shutdown, tasks })
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Signals every worker to stop after its current delivery.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Waits for every worker to exit. Returns the first failure, if any.
    pub async fn join(mut self) -> Result<(), HostError> {
        let mut first_error = None;
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = settle(joined)
                && first_error.is_none()
            {
                first_error = Some(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Runs until `signal` resolves or any worker exits, then stops the rest.
    pub async fn run_until(mut self, signal: impl Future<Output = ()>) -> Result<(), HostError> {
        let early_exit = tokio::select! {
            () = signal => None,
            Some(joined) = self.tasks.join_next() => Some(joined),
        };

        self.shutdown();
        let first = match early_exit {
            Some(joined) => {
                tracing::warn!("a projection worker exited, stopping the pool");
                settle(joined)
            }
            None => Ok(()),
        };
        let rest = self.join().await;
        first.and(rest)
    }
}

fn settle(
    joined: Result<(usize, projections::Result<()>), tokio::task::JoinError>,
) -> Result<(), HostError> {
    let (worker_id, result) = joined?;
    result.map_err(|source| {
        tracing::error!(worker_id, error = %source, "projection worker failed");
        HostError::Worker { worker_id, source }
    })
}

/// Connection pool size for `workers` consumers plus one spare.
fn pool_size(workers: usize) -> u32 {
    u32::try_from(workers).unwrap_or(u32::MAX).saturating_add(1)
}

/// Builds the event log and read store from configuration and runs the
/// worker pool until `signal` resolves.
///
/// With `DATABASE_URL` set both live in PostgreSQL. Without it the host
/// serves a private in-memory log, which is only useful for local runs.
pub async fn run(config: &Config, signal: impl Future<Output = ()>) -> Result<(), HostError> {
    match &config.database_url {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(pool_size(config.workers))
                .connect(url)
                .await?;
            let log = PostgresEventStore::new(pool.clone())
                .with_poll_interval(config.poll_interval)
                .with_ack_timeout(config.ack_timeout);
            log.run_migrations().await?;
            tracing::info!("using PostgreSQL event log and read store");
            run_with(config, &log, PostgresWalletReadStore::new(pool), signal).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, projecting a private in-memory log");
            let log = InMemoryEventStore::new();
            run_with(config, &log, InMemoryWalletReadStore::new(), signal).await
        }
    }
}

/// Runs the worker pool over any subscription source and read store until
/// `signal` resolves.
pub async fn run_with<L, R>(
    config: &Config,
    source: &L,
    store: R,
    signal: impl Future<Output = ()>,
) -> Result<(), HostError>
where
    L: SubscriptionSource,
    R: WalletReadStore + 'static,
{
    let projector = Arc::new(
        WalletProjector::new(store).with_max_conflict_retries(config.max_conflict_retries),
    );
    WorkerPool::spawn(
        source,
        &config.group,
        config.workers,
        config.subscription_settings(),
        projector,
    )
    .await?
    .run_until(signal)
    .await
}
