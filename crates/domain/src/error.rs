//! Domain error types.

use common::AggregateId;
use event_store::{EventStoreError, Version};
use thiserror::Error;

use crate::wallet::{BalanceOverflow, WalletEventError};

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The event for a command could not be built; nothing was staged.
    #[error("event construction failed: {0}")]
    EventConstruction(#[source] WalletEventError),

    /// Replaying the stream failed; no partially folded aggregate is returned.
    #[error("fold failed: {0}")]
    Fold(#[from] FoldError),

    /// The event log rejected the append, including optimistic-concurrency conflicts.
    #[error("append failed: {0}")]
    Append(#[from] EventStoreError),

    #[error("wallet not found: {0}")]
    WalletNotFound(AggregateId),
}

impl DomainError {
    /// True when another writer appended to the stream first; re-load and retry.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(
            self,
            DomainError::Append(EventStoreError::ConcurrencyConflict { .. })
        )
    }
}

/// Data-integrity failures while folding an event stream.
#[derive(Debug, Error)]
pub enum FoldError {
    #[error(transparent)]
    Event(#[from] WalletEventError),

    #[error(transparent)]
    Overflow(#[from] BalanceOverflow),

    #[error("expected version {expected}, got {actual}")]
    VersionMismatch { expected: Version, actual: Version },

    #[error("event for aggregate {actual} folded into wallet {expected}")]
    AggregateMismatch {
        expected: AggregateId,
        actual: AggregateId,
    },
}
