//! In-memory wallet read store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use event_store::Version;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::read_model::{WalletProjection, WalletReadStore};
use crate::{ProjectionError, Result};

/// Read store backed by a map keyed on wallet id. Cloning shares the map.
#[derive(Clone, Default)]
pub struct InMemoryWalletReadStore {
    records: Arc<RwLock<HashMap<AggregateId, WalletProjection>>>,
}

impl InMemoryWalletReadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets all records.
    pub async fn all(&self) -> Vec<WalletProjection> {
        self.records.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl WalletReadStore for InMemoryWalletReadStore {
    async fn create(&self, record: &WalletProjection) -> Result<Uuid> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.wallet_id) {
            return Err(ProjectionError::AlreadyExists(record.wallet_id));
        }
        records.insert(record.wallet_id, record.clone());
        Ok(record.id)
    }

    async fn get_by_wallet_id(&self, wallet_id: AggregateId) -> Result<Option<WalletProjection>> {
        Ok(self.records.read().await.get(&wallet_id).cloned())
    }

    async fn update(&self, record: &WalletProjection, expected_version: Version) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(&record.wallet_id) {
            Some(stored) if stored.version == expected_version => {
                *stored = WalletProjection {
                    id: stored.id,
                    ..record.clone()
                };
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reset(&self) -> Result<()> {
        self.records.write().await.clear();
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_rejects_second_record_for_wallet() {
        let store = InMemoryWalletReadStore::new();
        let record = WalletProjection::new(AggregateId::new());

        store.create(&record).await.unwrap();
        let again = WalletProjection::new(record.wallet_id);
        assert!(matches!(
            store.create(&again).await,
            Err(ProjectionError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn update_is_conditional_on_version() {
        let store = InMemoryWalletReadStore::new();
        let mut record = WalletProjection::new(AggregateId::new());
        record.version = Version::first();
        store.create(&record).await.unwrap();

        let mut next = record.clone();
        next.version = Version::new(2);
        assert!(store.update(&next, Version::first()).await.unwrap());
        // Same expectation again is stale now.
        assert!(!store.update(&next, Version::first()).await.unwrap());

        let stored = store.get_by_wallet_id(record.wallet_id).await.unwrap().unwrap();
        assert_eq!(stored.version, Version::new(2));
        assert_eq!(stored.id, record.id);
    }

    #[tokio::test]
    async fn update_of_missing_record_reports_no_write() {
        let store = InMemoryWalletReadStore::new();
        let record = WalletProjection::new(AggregateId::new());
        assert!(!store.update(&record, Version::initial()).await.unwrap());
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let store = InMemoryWalletReadStore::new();
        store
            .create(&WalletProjection::new(AggregateId::new()))
            .await
            .unwrap();
        store.reset().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.all().await.is_empty());
    }
}
