//! Command infrastructure shared by the wallet service.

use common::AggregateId;
use event_store::{EventEnvelope, Version};

/// An intention to change one aggregate.
pub trait Command: Send + Sync {
    /// Returns the ID of the aggregate this command targets.
    fn aggregate_id(&self) -> AggregateId;
}

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult<A> {
    /// The aggregate after applying the new events.
    pub aggregate: A,

    /// The events that were generated and persisted.
    pub events: Vec<EventEnvelope>,

    /// The stream head after the append.
    pub new_version: Version,
}
