//! Loading and saving wallets against the event log.

use std::sync::Arc;

use common::AggregateId;
use event_store::{AppendOptions, EventEnvelope, EventStore, EventStoreError, EventStoreExt, Version};

use crate::aggregate::Aggregate;
use crate::clock::{Clock, SystemClock};
use crate::error::DomainError;
use crate::wallet::WalletAggregate;

/// Hydrates wallets from their streams and appends staged events with
/// optimistic concurrency.
pub struct WalletRepository<S: EventStore> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: EventStore> WalletRepository<S> {
    /// Creates a repository using the system clock.
    pub fn new(store: S) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Returns a reference to the underlying event store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Clock handed to every wallet this repository builds.
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Loads a wallet. A stream with no events yields an empty aggregate.
    pub async fn load(&self, wallet_id: AggregateId) -> Result<WalletAggregate, DomainError> {
        let events = match self.store.exists(wallet_id).await {
            Ok(()) => self.store.get_events_for_aggregate(wallet_id).await?,
            Err(EventStoreError::AggregateNotFound(_)) => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        WalletAggregate::load(wallet_id, &events, self.clock.clone())
    }

    /// Loads a wallet, returning None if its stream is empty.
    pub async fn load_existing(
        &self,
        wallet_id: AggregateId,
    ) -> Result<Option<WalletAggregate>, DomainError> {
        let wallet = self.load(wallet_id).await?;
        if wallet.is_not_found() {
            Ok(None)
        } else {
            Ok(Some(wallet))
        }
    }

    /// Appends the wallet's staged events, expecting the stream head the
    /// wallet was loaded at. Returns the persisted events and new head.
    pub async fn save(
        &self,
        wallet: &mut WalletAggregate,
    ) -> Result<(Vec<EventEnvelope>, Version), DomainError> {
        if wallet.uncommitted_events().is_empty() {
            return Ok((Vec::new(), wallet.version()));
        }

        let expected = wallet.expected_version();
        let events = wallet.uncommitted_events().to_vec();
        let new_version = self
            .store
            .append(events, AppendOptions::expect_version(expected))
            .await?;

        Ok((wallet.take_uncommitted(), new_version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::TraceContext;
    use event_store::InMemoryEventStore;
    use rust_decimal::Decimal;

    async fn seeded(repo: &WalletRepository<InMemoryEventStore>) -> AggregateId {
        let mut wallet = WalletAggregate::new();
        let id = wallet.id();
        wallet
            .create_wallet(
                Decimal::from(50),
                "opening",
                "u",
                "a",
                id.to_string(),
                &TraceContext::new_root(),
            )
            .unwrap();
        repo.save(&mut wallet).await.unwrap();
        id
    }

    #[tokio::test]
    async fn load_missing_stream_is_empty() {
        let repo = WalletRepository::new(InMemoryEventStore::new());
        let wallet = repo.load(AggregateId::new()).await.unwrap();
        assert!(wallet.is_not_found());
        assert!(repo.load_existing(wallet.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load_round_trips_state() {
        let repo = WalletRepository::new(InMemoryEventStore::new());
        let id = seeded(&repo).await;

        let wallet = repo.load_existing(id).await.unwrap().unwrap();
        assert_eq!(wallet.version(), Version::first());
        assert_eq!(wallet.wallet().balance, Decimal::from(50));
        assert!(wallet.uncommitted_events().is_empty());
    }

    #[tokio::test]
    async fn stale_writer_gets_a_conflict_and_keeps_its_events() {
        let repo = WalletRepository::new(InMemoryEventStore::new());
        let id = seeded(&repo).await;
        let trace = TraceContext::new_root();

        let mut first = repo.load(id).await.unwrap();
        let mut second = repo.load(id).await.unwrap();
        first.lock_wallet("a", &trace).unwrap();
        second.blacklist_wallet("b", &trace).unwrap();

        repo.save(&mut first).await.unwrap();
        let err = repo.save(&mut second).await.unwrap_err();
        assert!(err.is_concurrency_conflict());
        assert_eq!(second.uncommitted_events().len(), 1);
    }

    #[tokio::test]
    async fn save_without_changes_is_a_no_op() {
        let store = InMemoryEventStore::new();
        let repo = WalletRepository::new(store.clone());
        let id = seeded(&repo).await;

        let mut wallet = repo.load(id).await.unwrap();
        let (events, version) = repo.save(&mut wallet).await.unwrap();
        assert!(events.is_empty());
        assert_eq!(version, Version::first());
        assert_eq!(store.event_count().await, 1);
    }
}
