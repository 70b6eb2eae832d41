//! Applies wallet events to the read store.

use std::sync::Arc;

use domain::{AGGREGATE_TYPE, Clock, SystemClock, WalletEvent};
use event_store::{EventEnvelope, EventStore, Version};
use futures_util::StreamExt;

use crate::read_model::{WalletProjection, WalletReadStore};
use crate::{ProjectionError, Result};

/// Default number of re-read/re-apply rounds after a lost conditional write.
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 3;

/// What applying one event did to the read model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A new record was inserted from a creation event.
    Created,
    /// An existing record was updated.
    Applied,
    /// The record already reflects this version; nothing was written.
    Duplicate,
    /// The event belongs to another stream category.
    Ignored,
}

enum Attempt {
    Done(ApplyOutcome),
    Conflict,
}

/// Maintains `WalletProjection` records from wallet events.
///
/// Lookup and conditional write happen once here for every kind; the kind
/// itself only selects the mutation. Redelivered events whose version the
/// record already has are skipped, so at-least-once delivery never applies an
/// event twice.
pub struct WalletProjector<R: WalletReadStore> {
    store: R,
    clock: Arc<dyn Clock>,
    max_conflict_retries: u32,
}

impl<R: WalletReadStore> WalletProjector<R> {
    pub fn new(store: R) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// Returns a reference to the read store.
    pub fn store(&self) -> &R {
        &self.store
    }

    /// Applies one delivered event.
    #[tracing::instrument(
        name = "projection.apply",
        skip(self, envelope),
        fields(
            aggregate_id = %envelope.aggregate_id,
            event_type = %envelope.event_type,
            version = %envelope.version,
            trace_id = tracing::field::Empty,
        )
    )]
    pub async fn handle(&self, envelope: &EventEnvelope) -> Result<ApplyOutcome> {
        if let Some(trace) = envelope.trace_context() {
            tracing::Span::current().record("trace_id", tracing::field::display(trace.trace_id));
        }
        if envelope.aggregate_type != AGGREGATE_TYPE {
            return Ok(ApplyOutcome::Ignored);
        }

        let event = WalletEvent::from_envelope(envelope)?;

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.try_apply(envelope, &event).await? {
                Attempt::Done(outcome) => {
                    if outcome == ApplyOutcome::Duplicate {
                        metrics::counter!("projection_events_skipped_total").increment(1);
                        tracing::debug!("duplicate delivery skipped");
                    }
                    return Ok(outcome);
                }
                Attempt::Conflict if attempts <= self.max_conflict_retries => {
                    metrics::counter!("projection_conflict_retries_total").increment(1);
                    tracing::debug!(attempts, "conditional write lost, re-reading");
                }
                Attempt::Conflict => {
                    return Err(ProjectionError::Conflict {
                        wallet_id: envelope.aggregate_id,
                        attempts,
                    });
                }
            }
        }
    }

    async fn try_apply(&self, envelope: &EventEnvelope, event: &WalletEvent) -> Result<Attempt> {
        let wallet_id = envelope.aggregate_id;
        let at = self.clock.now();

        let Some(mut record) = self.store.get_by_wallet_id(wallet_id).await? else {
            if !matches!(event, WalletEvent::Created(_)) {
                return Err(ProjectionError::NotFound(wallet_id));
            }
            if envelope.version != Version::first() {
                return Err(ProjectionError::OutOfOrder {
                    wallet_id,
                    expected: Version::first(),
                    actual: envelope.version,
                });
            }

            let mut record = WalletProjection::new(wallet_id);
            record.apply(event, envelope.version, at)?;
            return match self.store.create(&record).await {
                Ok(_) => Ok(Attempt::Done(ApplyOutcome::Created)),
                Err(ProjectionError::AlreadyExists(_)) => Ok(Attempt::Conflict),
                Err(e) => Err(e),
            };
        };

        if envelope.version <= record.version {
            return Ok(Attempt::Done(ApplyOutcome::Duplicate));
        }
        let expected = record.version.next();
        if envelope.version != expected {
            return Err(ProjectionError::OutOfOrder {
                wallet_id,
                expected,
                actual: envelope.version,
            });
        }

        let previous = record.version;
        record.apply(event, envelope.version, at)?;
        if self.store.update(&record, previous).await? {
            Ok(Attempt::Done(ApplyOutcome::Applied))
        } else {
            Ok(Attempt::Conflict)
        }
    }

    /// Clears the read store and replays the whole log from the beginning.
    ///
    /// An event that fails on its own content (undecodable, overflowing, or
    /// out of order behind such an event) is logged and skipped, as the live
    /// worker would park it. Store and log failures abort the rebuild.
    #[tracing::instrument(skip(self, events))]
    pub async fn rebuild<S: EventStore>(&self, events: &S) -> Result<RebuildSummary> {
        self.store.reset().await?;

        let mut stream = events.stream_all_events().await?;
        let mut summary = RebuildSummary::default();
        while let Some(result) = stream.next().await {
            let event = result?;
            match self.handle(&event).await {
                Ok(_) => summary.replayed += 1,
                Err(e) if e.is_event_failure() => {
                    tracing::warn!(
                        error = %e,
                        event_id = %event.event_id,
                        aggregate_id = %event.aggregate_id,
                        event_type = %event.event_type,
                        "skipping event during rebuild"
                    );
                    metrics::counter!("projection_rebuild_skipped_total").increment(1);
                    summary.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            events_replayed = summary.replayed,
            events_skipped = summary.skipped,
            "read model rebuilt"
        );
        Ok(summary)
    }
}

/// Counts from a rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildSummary {
    pub replayed: u64,
    pub skipped: u64,
}
