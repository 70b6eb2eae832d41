//! Worker pool lifecycle tests over the in-memory log and read store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::{Aggregate, CreateWallet, CreditWallet, WalletService};
use event_store::{
    EventStoreError, InMemoryEventStore, InMemorySubscription, SubscriptionSettings,
    SubscriptionSource, Version,
};
use projections::{InMemoryWalletReadStore, ProjectionError, WalletProjector, WalletReadStore};
use projector::{Config, HostError, WorkerPool};
use rust_decimal::Decimal;
use tokio::sync::oneshot;

const GROUP: &str = "wallet-projection";

async fn wait_settled(log: &InMemoryEventStore) {
    for _ in 0..500 {
        if log.unsettled_count(GROUP) == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("subscription did not settle");
}

async fn spawn_pool(log: &InMemoryEventStore, count: usize, store: InMemoryWalletReadStore) -> WorkerPool {
    let projector = Arc::new(WalletProjector::new(store));
    WorkerPool::spawn(log, GROUP, count, SubscriptionSettings::default(), projector)
        .await
        .unwrap()
}

/// A log that cannot be reached.
struct UnreachableLog;

#[async_trait]
impl SubscriptionSource for UnreachableLog {
    type Subscription = InMemorySubscription;

    async fn connect(
        &self,
        _group: &str,
        _settings: SubscriptionSettings,
    ) -> event_store::Result<InMemorySubscription> {
        Err(EventStoreError::Database(sqlx::Error::PoolTimedOut))
    }
}

#[tokio::test]
async fn pool_projects_until_signalled() {
    let log = InMemoryEventStore::new();
    let read_store = InMemoryWalletReadStore::new();

    let pool = spawn_pool(&log, 2, read_store.clone()).await;
    assert_eq!(pool.len(), 2);
    let (stop, stopped) = oneshot::channel::<()>();
    let host = tokio::spawn(pool.run_until(async {
        let _ = stopped.await;
    }));

    let service = WalletService::new(log.clone());
    let id = service
        .create_wallet(CreateWallet::new("user-1", "account-1", Decimal::from(10), "opening"))
        .await
        .unwrap()
        .aggregate
        .id();
    service
        .credit_wallet(CreditWallet::new(id, "W2", Decimal::from(5), "in"))
        .await
        .unwrap();

    wait_settled(&log).await;
    stop.send(()).unwrap();
    host.await.unwrap().unwrap();

    let record = read_store.get_by_wallet_id(id).await.unwrap().unwrap();
    assert_eq!(record.version, Version::new(2));
    assert_eq!(record.wallet.balance, Decimal::from(15));
}

#[tokio::test]
async fn dropped_subscription_surfaces_as_worker_failure() {
    let log = InMemoryEventStore::new();
    let pool = spawn_pool(&log, 3, InMemoryWalletReadStore::new()).await;

    log.drop_subscription(GROUP, "server restart");
    let err = pool
        .run_until(std::future::pending::<()>())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        HostError::Worker {
            source: ProjectionError::SubscriptionDropped { .. },
            ..
        }
    ));
}

#[tokio::test]
async fn run_without_database_stops_cleanly() {
    let config = Config {
        workers: 2,
        ..Config::default()
    };

    projector::run(&config, async {}).await.unwrap();
}

#[tokio::test]
async fn run_with_projects_an_external_log() {
    let config = Config {
        workers: 2,
        max_delivery_retries: 50,
        ..Config::default()
    };
    let log = InMemoryEventStore::new();
    let read_store = InMemoryWalletReadStore::new();
    let service = WalletService::new(log.clone());
    let id = service
        .create_wallet(CreateWallet::new("user-1", "account-1", Decimal::from(40), "opening"))
        .await
        .unwrap()
        .aggregate
        .id();

    let (stop, stopped) = oneshot::channel::<()>();
    let host = {
        let (config, log, read_store) = (config.clone(), log.clone(), read_store.clone());
        tokio::spawn(async move {
            projector::run_with(&config, &log, read_store, async {
                let _ = stopped.await;
            })
            .await
        })
    };

    service
        .credit_wallet(CreditWallet::new(id, "W2", Decimal::from(2), "in"))
        .await
        .unwrap();
    wait_settled(&log).await;
    stop.send(()).unwrap();
    host.await.unwrap().unwrap();

    let record = read_store.get_by_wallet_id(id).await.unwrap().unwrap();
    assert_eq!(record.version, Version::new(2));
    assert_eq!(record.wallet.balance, Decimal::from(42));
}

#[tokio::test]
async fn refused_subscription_fails_the_pool_before_start() {
    let projector = Arc::new(WalletProjector::new(InMemoryWalletReadStore::new()));
    let result =
        WorkerPool::spawn(&UnreachableLog, GROUP, 2, SubscriptionSettings::default(), projector)
            .await;

    assert!(matches!(result, Err(HostError::Subscribe(_))));
}

#[tokio::test]
async fn shutdown_then_join_stops_idle_workers() {
    let log = InMemoryEventStore::new();
    let pool = spawn_pool(&log, 2, InMemoryWalletReadStore::new()).await;

    pool.shutdown();
    tokio::time::timeout(Duration::from_secs(1), pool.join())
        .await
        .unwrap()
        .unwrap();
}
