use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{AggregateId, EventEnvelope, EventStoreError, Result, Version};

/// Options for appending events to the store.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Expected head version of the stream. `None` skips the check.
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    /// Creates options with no version check.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options expecting the stream to be at a specific version.
    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// Creates options expecting the stream not to exist yet.
    pub fn expect_new() -> Self {
        Self {
            expected_version: Some(Version::initial()),
        }
    }
}

/// A stream of events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope>> + Send>>;

/// The event log: durable, append-only, per-aggregate ordered streams.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends events atomically to one stream.
    ///
    /// Fails with `ConcurrencyConflict` when `options.expected_version` is set and
    /// does not match the current head. Returns the new head version.
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version>;

    /// Loads one stream in version order (oldest first).
    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>>;

    /// Returns the head version of a stream, or None if it has no events.
    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>>;

    /// Streams every event in the log in commit order.
    async fn stream_all_events(&self) -> Result<EventStream>;
}

/// Convenience methods layered on [`EventStore`].
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Returns Ok(()) if the stream exists and `AggregateNotFound` otherwise.
    async fn exists(&self, aggregate_id: AggregateId) -> Result<()> {
        match self.get_aggregate_version(aggregate_id).await? {
            Some(_) => Ok(()),
            None => Err(EventStoreError::AggregateNotFound(aggregate_id)),
        }
    }
}

impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Checks that a batch targets one stream with contiguous versions.
pub fn validate_events_for_append(events: &[EventEnvelope]) -> Result<()> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidAppend(
            "cannot append an empty event list".to_string(),
        ));
    };

    let mut expected_version = first.version;
    for event in events.iter().skip(1) {
        if event.aggregate_id != first.aggregate_id {
            return Err(EventStoreError::InvalidAppend(
                "all events must be for the same aggregate".to_string(),
            ));
        }
        expected_version = expected_version.next();
        if event.version != expected_version {
            return Err(EventStoreError::InvalidAppend(format!(
                "event versions must be sequential: expected {}, got {}",
                expected_version, event.version
            )));
        }
    }

    Ok(())
}
