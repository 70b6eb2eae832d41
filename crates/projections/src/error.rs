//! Projection error types.

use common::AggregateId;
use domain::{BalanceOverflow, WalletEventError};
use event_store::Version;
use thiserror::Error;

/// Errors that can occur during projection processing.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// A non-creation event arrived for a wallet with no read-model record.
    /// Usually a delivery-ordering issue, so the event is retried.
    #[error("read model for wallet {0} not found")]
    NotFound(AggregateId),

    /// A record for this wallet was inserted concurrently.
    #[error("read model for wallet {0} already exists")]
    AlreadyExists(AggregateId),

    /// Unknown event type or undecodable payload.
    #[error(transparent)]
    Event(#[from] WalletEventError),

    /// Applying the event would leave the decimal range; the record is untouched.
    #[error(transparent)]
    Overflow(#[from] BalanceOverflow),

    #[error("out-of-order event for wallet {wallet_id}: expected version {expected}, got {actual}")]
    OutOfOrder {
        wallet_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// Conditional writes kept losing to concurrent updates.
    #[error("update conflict for wallet {wallet_id} after {attempts} attempts")]
    Conflict { wallet_id: AggregateId, attempts: u32 },

    #[error("subscription {group} dropped: {reason}")]
    SubscriptionDropped { group: String, reason: String },

    /// An error occurred in the event store or subscription transport.
    #[error("Event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProjectionError {
    /// True for events whose tag is not in the wallet catalog.
    pub fn is_invalid_event_type(&self) -> bool {
        matches!(
            self,
            ProjectionError::Event(WalletEventError::InvalidEventType(_))
        )
    }

    /// True when the event itself cannot be applied, as opposed to a store,
    /// log or transport failure.
    pub fn is_event_failure(&self) -> bool {
        matches!(
            self,
            ProjectionError::Event(_)
                | ProjectionError::Overflow(_)
                | ProjectionError::NotFound(_)
                | ProjectionError::OutOfOrder { .. }
        )
    }
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
