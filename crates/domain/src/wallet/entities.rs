//! Wallet record types and the state mutation shared by the aggregate fold and
//! the read-model projection.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::events::WalletEvent;
use crate::aggregate::DomainEvent;

/// The balance ledger of one wallet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: String,
    pub user_id: String,
    pub account_id: String,
    /// Settled ledger balance.
    pub balance: Decimal,
    /// Balance minus amounts held by outstanding reservations.
    pub available_balance: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Wallet {
    /// Returns `(balance, available_balance)`.
    pub fn balances(&self) -> (Decimal, Decimal) {
        (self.balance, self.available_balance)
    }
}

/// Administrative and compliance flags, orthogonal to the balance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletState {
    pub wallet_id: String,
    pub is_locked: bool,
    pub is_blacklisted: bool,
    pub is_deleted: bool,
}

impl WalletState {
    /// Every flag, in a fixed order. New flags must be added here.
    pub fn flags(&self) -> [(&'static str, bool); 3] {
        [
            ("is_locked", self.is_locked),
            ("is_blacklisted", self.is_blacklisted),
            ("is_deleted", self.is_deleted),
        ]
    }

    /// False as soon as any flag is unset; otherwise requires both the
    /// blacklisted and locked flags.
    ///
    /// This is the historical truth table: it only returns true for a wallet
    /// that is locked, blacklisted and deleted at once, which is almost
    /// certainly an inverted condition. It is kept as-is until the product
    /// owner confirms the intended rule, and no command consults it.
    pub fn can_transact(&self) -> bool {
        if self.flags().iter().any(|(_, set)| !set) {
            return false;
        }
        self.is_blacklisted && self.is_locked
    }
}

static EMAIL_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:[^<>]*<)?[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)*(?:>)?$",
    )
    .unwrap()
});

/// A contact identifier (email address, phone number) bound to a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletLink {
    pub id: String,
    pub wallet_id: String,
    pub value: String,
    pub link_date: DateTime<Utc>,
}

impl WalletLink {
    /// Accepts `local@domain` and `Display Name <local@domain>`.
    pub fn is_email_link(&self) -> bool {
        let value = self.value.trim();
        // Angle brackets must be balanced: either both or neither.
        if value.contains('<') != value.ends_with('>') {
            return false;
        }
        EMAIL_ADDRESS.is_match(value)
    }
}

/// One leg of a credit/debit movement. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub debit_wallet_id: String,
    pub credit_wallet_id: String,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub description: String,
}

/// Wallet, flags and transaction history derived from one event stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSnapshot {
    pub wallet: Wallet,
    pub state: WalletState,
    pub transactions: Vec<WalletTransaction>,
}

/// A balance computation left the representable decimal range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{event_type} of {amount} overflows balance {base}")]
pub struct BalanceOverflow {
    pub event_type: &'static str,
    pub base: Decimal,
    pub amount: Decimal,
}

impl WalletSnapshot {
    /// Applies one event's delta. `at` stamps creation and transaction times.
    ///
    /// On error nothing is mutated.
    pub fn apply(
        &mut self,
        event: &WalletEvent,
        at: DateTime<Utc>,
    ) -> Result<(), BalanceOverflow> {
        let overflow = |base: Decimal, amount: Decimal| BalanceOverflow {
            event_type: event.event_type(),
            base,
            amount,
        };

        match event {
            WalletEvent::Created(data) => {
                self.wallet.account_id = data.account_id.clone();
                self.wallet.user_id = data.user_id.clone();
                self.wallet.created_at = at;
                self.wallet.balance = data.amount;
                self.wallet.id = data.id.clone();
                self.wallet.available_balance = data.amount;
                self.state.wallet_id = data.id.clone();
            }
            WalletEvent::Credited(data) => {
                let balance = self.wallet.balance;
                self.wallet.balance = balance
                    .checked_add(data.amount)
                    .ok_or_else(|| overflow(balance, data.amount))?;
                self.transactions.push(WalletTransaction {
                    debit_wallet_id: data.debit_wallet_id.clone(),
                    credit_wallet_id: self.wallet.id.clone(),
                    amount: data.amount,
                    created_at: at,
                    description: data.description.clone(),
                });
            }
            WalletEvent::Debited(data) => {
                let balance = self.wallet.balance;
                self.wallet.balance = balance
                    .checked_sub(data.amount)
                    .ok_or_else(|| overflow(balance, data.amount))?;
                self.transactions.push(WalletTransaction {
                    debit_wallet_id: self.wallet.id.clone(),
                    credit_wallet_id: data.credit_wallet_id.clone(),
                    amount: data.amount,
                    created_at: at,
                    description: data.description.clone(),
                });
            }
            // NOTE: reserve and release recompute `balance` from
            // `available_balance` and leave `available_balance` untouched.
            // Whether the hold should instead debit `available_balance` is an
            // open product question; do not "fix" without sign-off.
            WalletEvent::CreditReserved(data) => {
                let available = self.wallet.available_balance;
                self.wallet.balance = available
                    .checked_sub(data.amount)
                    .ok_or_else(|| overflow(available, data.amount))?;
            }
            WalletEvent::CreditReleased(data) => {
                let available = self.wallet.available_balance;
                self.wallet.balance = available
                    .checked_add(data.amount)
                    .ok_or_else(|| overflow(available, data.amount))?;
            }
            WalletEvent::Locked(_) => self.state.is_locked = true,
            WalletEvent::Unlocked(_) => self.state.is_locked = false,
            WalletEvent::Blacklisted(_) => self.state.is_blacklisted = true,
            WalletEvent::UnBlacklisted(_) => self.state.is_blacklisted = false,
            WalletEvent::Deleted(_) => self.state.is_deleted = true,
        }
        Ok(())
    }
}
