//! Wallet commands.

use common::{AggregateId, TraceContext};
use rust_decimal::Decimal;

use crate::command::Command;

/// Command to open a wallet with an initial balance.
#[derive(Debug, Clone)]
pub struct CreateWallet {
    pub wallet_id: AggregateId,
    pub user_id: String,
    pub account_id: String,
    pub amount: Decimal,
    pub description: String,
    pub trace: TraceContext,
}

impl CreateWallet {
    /// Creates a command for a new wallet with a generated id.
    pub fn new(
        user_id: impl Into<String>,
        account_id: impl Into<String>,
        amount: Decimal,
        description: impl Into<String>,
    ) -> Self {
        Self {
            wallet_id: AggregateId::new(),
            user_id: user_id.into(),
            account_id: account_id.into(),
            amount,
            description: description.into(),
            trace: TraceContext::new_root(),
        }
    }

    pub fn with_wallet_id(mut self, wallet_id: AggregateId) -> Self {
        self.wallet_id = wallet_id;
        self
    }

    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = trace;
        self
    }
}

impl Command for CreateWallet {
    fn aggregate_id(&self) -> AggregateId {
        self.wallet_id
    }
}

/// Command to move funds into a wallet from a counterpart.
#[derive(Debug, Clone)]
pub struct CreditWallet {
    pub wallet_id: AggregateId,
    /// The counterpart the funds come from.
    pub debit_wallet_id: String,
    pub amount: Decimal,
    pub description: String,
    pub trace: TraceContext,
}

impl CreditWallet {
    pub fn new(
        wallet_id: AggregateId,
        debit_wallet_id: impl Into<String>,
        amount: Decimal,
        description: impl Into<String>,
    ) -> Self {
        Self {
            wallet_id,
            debit_wallet_id: debit_wallet_id.into(),
            amount,
            description: description.into(),
            trace: TraceContext::new_root(),
        }
    }

    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = trace;
        self
    }
}

impl Command for CreditWallet {
    fn aggregate_id(&self) -> AggregateId {
        self.wallet_id
    }
}

/// Command to move funds out of a wallet to a counterpart.
#[derive(Debug, Clone)]
pub struct DebitWallet {
    pub wallet_id: AggregateId,
    /// The counterpart that receives the funds.
    pub credit_wallet_id: String,
    pub amount: Decimal,
    pub description: String,
    pub trace: TraceContext,
}

impl DebitWallet {
    pub fn new(
        wallet_id: AggregateId,
        credit_wallet_id: impl Into<String>,
        amount: Decimal,
        description: impl Into<String>,
    ) -> Self {
        Self {
            wallet_id,
            credit_wallet_id: credit_wallet_id.into(),
            amount,
            description: description.into(),
            trace: TraceContext::new_root(),
        }
    }

    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = trace;
        self
    }
}

impl Command for DebitWallet {
    fn aggregate_id(&self) -> AggregateId {
        self.wallet_id
    }
}

/// Amount and reason for reserving or releasing wallet credit.
#[derive(Debug, Clone)]
pub struct WalletCreditHold {
    pub wallet_id: AggregateId,
    pub amount: Decimal,
    pub description: String,
    pub trace: TraceContext,
}

impl WalletCreditHold {
    pub fn new(wallet_id: AggregateId, amount: Decimal, description: impl Into<String>) -> Self {
        Self {
            wallet_id,
            amount,
            description: description.into(),
            trace: TraceContext::new_root(),
        }
    }

    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = trace;
        self
    }
}

impl Command for WalletCreditHold {
    fn aggregate_id(&self) -> AggregateId {
        self.wallet_id
    }
}

/// Command to hold part of the balance.
pub type ReserveWalletCredit = WalletCreditHold;

/// Command to release a previous hold.
pub type ReleaseWalletCredit = WalletCreditHold;

/// Command carrying only a reason: lock, unlock, blacklist, unblacklist, delete.
#[derive(Debug, Clone)]
pub struct WalletStatusChange {
    pub wallet_id: AggregateId,
    pub description: String,
    pub trace: TraceContext,
}

impl WalletStatusChange {
    pub fn new(wallet_id: AggregateId, description: impl Into<String>) -> Self {
        Self {
            wallet_id,
            description: description.into(),
            trace: TraceContext::new_root(),
        }
    }

    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = trace;
        self
    }
}

impl Command for WalletStatusChange {
    fn aggregate_id(&self) -> AggregateId {
        self.wallet_id
    }
}

pub type LockWallet = WalletStatusChange;
pub type UnlockWallet = WalletStatusChange;
pub type BlacklistWallet = WalletStatusChange;
pub type UnBlacklistWallet = WalletStatusChange;
pub type DeleteWallet = WalletStatusChange;
