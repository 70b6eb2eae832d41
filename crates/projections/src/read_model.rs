//! Wallet read-model record and the store contract the projection writes through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{BalanceOverflow, Wallet, WalletEvent, WalletSnapshot, WalletState, WalletTransaction};
use event_store::Version;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;

/// Materialized view of one wallet.
///
/// Keyed by a surrogate `id`; `wallet_id` is the lookup column. `version` is
/// the stream version of the last event applied and guards conditional writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletProjection {
    pub id: Uuid,
    pub wallet_id: AggregateId,
    pub wallet: Wallet,
    pub wallet_state: WalletState,
    pub wallet_transactions: Vec<WalletTransaction>,
    pub version: Version,
}

impl WalletProjection {
    /// An empty record for a wallet, before any event is applied.
    pub fn new(wallet_id: AggregateId) -> Self {
        Self {
            id: Uuid::new_v4(),
            wallet_id,
            wallet: Wallet::default(),
            wallet_state: WalletState::default(),
            wallet_transactions: Vec::new(),
            version: Version::initial(),
        }
    }

    /// Applies an event's delta with the same mutation the aggregate folds with.
    /// On overflow the record, version included, is left as it was.
    pub fn apply(
        &mut self,
        event: &WalletEvent,
        version: Version,
        at: DateTime<Utc>,
    ) -> std::result::Result<(), BalanceOverflow> {
        let mut snapshot = WalletSnapshot {
            wallet: std::mem::take(&mut self.wallet),
            state: std::mem::take(&mut self.wallet_state),
            transactions: std::mem::take(&mut self.wallet_transactions),
        };
        let applied = snapshot.apply(event, at);

        self.wallet = snapshot.wallet;
        self.wallet_state = snapshot.state;
        self.wallet_transactions = snapshot.transactions;
        applied?;
        self.version = version;
        Ok(())
    }
}

/// The read-model store the projection depends on.
#[async_trait]
pub trait WalletReadStore: Send + Sync {
    /// Inserts a new record and returns its surrogate id. Fails with
    /// `AlreadyExists` if the wallet already has one.
    async fn create(&self, record: &WalletProjection) -> Result<Uuid>;

    async fn get_by_wallet_id(&self, wallet_id: AggregateId) -> Result<Option<WalletProjection>>;

    /// Replaces the record only if its stored version is still `expected_version`.
    /// Returns false when another writer got there first.
    async fn update(&self, record: &WalletProjection, expected_version: Version) -> Result<bool>;

    /// Removes every record, ahead of a rebuild.
    async fn reset(&self) -> Result<()>;

    async fn count(&self) -> Result<usize>;
}
