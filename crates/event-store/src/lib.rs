//! Event log contracts for the wallet system.
//!
//! - [`EventStore`]: append with optimistic concurrency, load a stream, stream everything
//! - [`PersistentSubscription`]: at-least-once delivery with explicit ack/nack
//! - [`PostgresEventStore`]: the durable log, with subscription groups kept in tables
//! - [`InMemoryEventStore`]: an in-process implementation of both, for tests and
//!   local development

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod subscription;

pub use common::{AggregateId, TraceContext};
pub use error::{EventStoreError, Result};
pub use event::{EnvelopeError, EventEnvelope, EventEnvelopeBuilder, EventId, Version};
pub use memory::{InMemoryEventStore, InMemorySubscription};
pub use postgres::{PostgresEventStore, PostgresSubscription};
pub use store::{AppendOptions, EventStore, EventStoreExt, EventStream};
pub use subscription::{
    DeliveryId, NackAction, PersistentSubscription, ResolvedEvent, SubscriptionMessage,
    SubscriptionSettings, SubscriptionSource,
};
