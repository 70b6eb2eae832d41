use thiserror::Error;

use crate::{AggregateId, Version};

/// Errors that can occur when interacting with the event log.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The expected version did not match the stream head.
    #[error(
        "Concurrency conflict for aggregate {aggregate_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// The stream does not exist.
    #[error("Aggregate not found: {0}")]
    AggregateNotFound(AggregateId),

    /// The batch handed to `append` is not a valid contiguous run for one stream.
    #[error("Invalid append: {0}")]
    InvalidAppend(String),

    /// Ack or nack referenced a delivery this subscription does not hold.
    #[error("Unknown delivery {delivery_id} on subscription group {group}")]
    UnknownDelivery { group: String, delivery_id: u64 },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for event log operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
