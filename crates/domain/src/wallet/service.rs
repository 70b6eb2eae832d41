//! Wallet service: one method per command.

use std::sync::Arc;

use common::AggregateId;
use event_store::EventStore;

use crate::aggregate::Aggregate;
use crate::clock::Clock;
use crate::command::{Command, CommandResult};
use crate::error::DomainError;
use crate::repository::WalletRepository;

use super::{
    BlacklistWallet, CreateWallet, CreditWallet, DebitWallet, DeleteWallet, LockWallet,
    ReleaseWalletCredit, ReserveWalletCredit, UnBlacklistWallet, UnlockWallet, WalletAggregate,
};

/// Service for managing wallets.
///
/// Each call hydrates the wallet, runs the command, and appends the staged
/// event. A concurrent writer surfaces as a concurrency conflict; the caller
/// retries the whole call.
pub struct WalletService<S: EventStore> {
    repository: WalletRepository<S>,
}

impl<S: EventStore> WalletService<S> {
    /// Creates a new wallet service with the given event store.
    pub fn new(store: S) -> Self {
        Self {
            repository: WalletRepository::new(store),
        }
    }

    pub fn with_clock(store: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository: WalletRepository::with_clock(store, clock),
        }
    }

    /// Returns a reference to the underlying repository.
    pub fn repository(&self) -> &WalletRepository<S> {
        &self.repository
    }

    async fn run<F>(
        &self,
        command: &'static str,
        mut wallet: WalletAggregate,
        f: F,
    ) -> Result<CommandResult<WalletAggregate>, DomainError>
    where
        F: FnOnce(&mut WalletAggregate) -> Result<(), DomainError>,
    {
        f(&mut wallet)?;
        let (events, new_version) = self.repository.save(&mut wallet).await?;

        metrics::counter!("wallet_commands_total", "command" => command).increment(1);
        tracing::info!(aggregate_id = %wallet.id(), %new_version, command, "wallet command applied");

        Ok(CommandResult {
            aggregate: wallet,
            events,
            new_version,
        })
    }

    async fn execute<C, F>(
        &self,
        command: &'static str,
        cmd: &C,
        f: F,
    ) -> Result<CommandResult<WalletAggregate>, DomainError>
    where
        C: Command,
        F: FnOnce(&mut WalletAggregate) -> Result<(), DomainError>,
    {
        let wallet_id = cmd.aggregate_id();
        let wallet = self
            .repository
            .load_existing(wallet_id)
            .await?
            .ok_or(DomainError::WalletNotFound(wallet_id))?;
        self.run(command, wallet, f).await
    }

    /// Opens a wallet. The stream must not exist yet; an existing stream
    /// surfaces as a concurrency conflict from the log.
    #[tracing::instrument(skip(self, cmd), fields(aggregate_id = %cmd.wallet_id))]
    pub async fn create_wallet(
        &self,
        cmd: CreateWallet,
    ) -> Result<CommandResult<WalletAggregate>, DomainError> {
        let wallet_id = cmd.wallet_id;
        let wallet = WalletAggregate::with_id(wallet_id)
            .ok_or(DomainError::WalletNotFound(wallet_id))?
            .with_clock(self.repository.clock());

        self.run("create_wallet", wallet, |wallet| {
            wallet.create_wallet(
                cmd.amount,
                cmd.description,
                cmd.user_id,
                cmd.account_id,
                wallet_id.to_string(),
                &cmd.trace,
            )
        })
        .await
    }

    #[tracing::instrument(skip(self, cmd), fields(aggregate_id = %cmd.wallet_id))]
    pub async fn credit_wallet(
        &self,
        cmd: CreditWallet,
    ) -> Result<CommandResult<WalletAggregate>, DomainError> {
        self.execute("credit_wallet", &cmd, |wallet| {
            wallet.credit_wallet(
                cmd.debit_wallet_id.clone(),
                cmd.amount,
                cmd.description.clone(),
                &cmd.trace,
            )
        })
        .await
    }

    #[tracing::instrument(skip(self, cmd), fields(aggregate_id = %cmd.wallet_id))]
    pub async fn debit_wallet(
        &self,
        cmd: DebitWallet,
    ) -> Result<CommandResult<WalletAggregate>, DomainError> {
        self.execute("debit_wallet", &cmd, |wallet| {
            wallet.debit_wallet(
                cmd.credit_wallet_id.clone(),
                cmd.amount,
                cmd.description.clone(),
                &cmd.trace,
            )
        })
        .await
    }

    #[tracing::instrument(skip(self, cmd), fields(aggregate_id = %cmd.wallet_id))]
    pub async fn reserve_wallet_credit(
        &self,
        cmd: ReserveWalletCredit,
    ) -> Result<CommandResult<WalletAggregate>, DomainError> {
        self.execute("reserve_wallet_credit", &cmd, |wallet| {
            wallet.reserve_wallet_credit(cmd.amount, cmd.description.clone(), &cmd.trace)
        })
        .await
    }

    #[tracing::instrument(skip(self, cmd), fields(aggregate_id = %cmd.wallet_id))]
    pub async fn release_wallet_credit(
        &self,
        cmd: ReleaseWalletCredit,
    ) -> Result<CommandResult<WalletAggregate>, DomainError> {
        self.execute("release_wallet_credit", &cmd, |wallet| {
            wallet.release_wallet_credit(cmd.amount, cmd.description.clone(), &cmd.trace)
        })
        .await
    }

    #[tracing::instrument(skip(self, cmd), fields(aggregate_id = %cmd.wallet_id))]
    pub async fn lock_wallet(
        &self,
        cmd: LockWallet,
    ) -> Result<CommandResult<WalletAggregate>, DomainError> {
        self.execute("lock_wallet", &cmd, |wallet| {
            wallet.lock_wallet(cmd.description.clone(), &cmd.trace)
        })
        .await
    }

    #[tracing::instrument(skip(self, cmd), fields(aggregate_id = %cmd.wallet_id))]
    pub async fn unlock_wallet(
        &self,
        cmd: UnlockWallet,
    ) -> Result<CommandResult<WalletAggregate>, DomainError> {
        self.execute("unlock_wallet", &cmd, |wallet| {
            wallet.unlock_wallet(cmd.description.clone(), &cmd.trace)
        })
        .await
    }

    #[tracing::instrument(skip(self, cmd), fields(aggregate_id = %cmd.wallet_id))]
    pub async fn blacklist_wallet(
        &self,
        cmd: BlacklistWallet,
    ) -> Result<CommandResult<WalletAggregate>, DomainError> {
        self.execute("blacklist_wallet", &cmd, |wallet| {
            wallet.blacklist_wallet(cmd.description.clone(), &cmd.trace)
        })
        .await
    }

    #[tracing::instrument(skip(self, cmd), fields(aggregate_id = %cmd.wallet_id))]
    pub async fn unblacklist_wallet(
        &self,
        cmd: UnBlacklistWallet,
    ) -> Result<CommandResult<WalletAggregate>, DomainError> {
        self.execute("unblacklist_wallet", &cmd, |wallet| {
            wallet.unblacklist_wallet(cmd.description.clone(), &cmd.trace)
        })
        .await
    }

    #[tracing::instrument(skip(self, cmd), fields(aggregate_id = %cmd.wallet_id))]
    pub async fn delete_wallet(
        &self,
        cmd: DeleteWallet,
    ) -> Result<CommandResult<WalletAggregate>, DomainError> {
        self.execute("delete_wallet", &cmd, |wallet| {
            wallet.delete_wallet(cmd.description.clone(), &cmd.trace)
        })
        .await
    }

    /// Loads a wallet by ID, or None if it was never created.
    #[tracing::instrument(skip(self))]
    pub async fn get_wallet(
        &self,
        wallet_id: AggregateId,
    ) -> Result<Option<WalletAggregate>, DomainError> {
        self.repository.load_existing(wallet_id).await
    }
}
