//! Domain layer for the wallet ledger.
//!
//! - `Aggregate`/`DomainEvent` traits for event-sourced entities
//! - the wallet event catalog, aggregate fold and commands
//! - `WalletRepository` and `WalletService` for load, command, append

pub mod aggregate;
pub mod clock;
pub mod command;
pub mod error;
pub mod repository;
pub mod wallet;

pub use aggregate::{Aggregate, DomainEvent};
pub use clock::{Clock, FixedClock, SystemClock};
pub use command::{Command, CommandResult};
pub use error::{DomainError, FoldError};
pub use repository::WalletRepository;
pub use wallet::{
    AGGREGATE_TYPE, BalanceOverflow, BlacklistWallet, CreateWallet, CreditWallet, DebitWallet,
    DeleteWallet, LockWallet, ReleaseWalletCredit, ReserveWalletCredit, UnBlacklistWallet,
    UnlockWallet, Wallet, WalletAggregate, WalletCreditHold, WalletEvent, WalletEventError, WalletLink, WalletService,
    WalletSnapshot, WalletState, WalletStatusChange, WalletTransaction, wallet_aggregate_id,
};
