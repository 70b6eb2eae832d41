//! Wallet aggregate and related types.

mod aggregate;
mod commands;
mod entities;
mod events;
mod service;

pub use aggregate::WalletAggregate;
pub use commands::*;
pub use entities::{
    BalanceOverflow, Wallet, WalletLink, WalletSnapshot, WalletState, WalletTransaction,
};
pub use events::*;
pub use service::WalletService;
