//! Core aggregate and domain event traits.

use common::AggregateId;
use event_store::Version;

use crate::error::FoldError;

/// Trait for domain events.
///
/// Domain events are facts that already happened; they are immutable and
/// named in past tense.
pub trait DomainEvent: Clone + Send + Sync {
    /// Returns the event-type tag stored on the envelope.
    fn event_type(&self) -> &'static str;
}

/// Trait for aggregates in an event-sourced system.
///
/// Aggregates are rebuilt by replaying their events in version order and
/// produce new events from commands.
pub trait Aggregate: Send + Sync + Sized {
    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// Returns the aggregate type name (the stream category).
    fn aggregate_type() -> &'static str;

    /// Returns the aggregate's unique identifier.
    fn id(&self) -> AggregateId;

    /// Returns the number of events folded so far.
    fn version(&self) -> Version;

    /// Applies an event to the aggregate, updating its state.
    ///
    /// Decoding and ordering checks happen before this is called; the only
    /// failure left is arithmetic the state cannot represent, and then the
    /// state is unchanged.
    fn apply(&mut self, event: &Self::Event) -> Result<(), FoldError>;
}
