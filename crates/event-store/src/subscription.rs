//! Persistent (competing-consumer) subscription contract.
//!
//! Delivery is at-least-once: every delivered event must be settled with
//! [`PersistentSubscription::ack`] or [`PersistentSubscription::nack`]. Events that
//! are never settled are redelivered once the delivering consumer goes away.

use async_trait::async_trait;

use crate::{EventEnvelope, Result};

/// Identifies one delivery of an event to a consumer.
pub type DeliveryId = u64;

/// An event handed to a consumer, together with its delivery bookkeeping.
#[derive(Debug, Clone)]
pub struct ResolvedEvent {
    pub event: EventEnvelope,
    pub delivery_id: DeliveryId,
    /// How many times this event was nacked with [`NackAction::Retry`] before this delivery.
    pub retry_count: u32,
}

/// What the transport yields on each receive.
#[derive(Debug, Clone)]
pub enum SubscriptionMessage {
    EventAppeared(ResolvedEvent),
    /// The subscription is gone; the consumer must stop.
    Dropped(String),
}

/// Policy requested when negatively acknowledging an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackAction {
    /// Redeliver the event later.
    Retry,
    /// Move the event aside for manual inspection.
    Park,
    /// Discard the event.
    Skip,
}

impl NackAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            NackAction::Retry => "retry",
            NackAction::Park => "park",
            NackAction::Skip => "skip",
        }
    }
}

/// Tuning for a subscription group.
#[derive(Debug, Clone)]
pub struct SubscriptionSettings {
    /// Retries before a repeatedly nacked event is parked.
    pub max_retries: u32,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self { max_retries: 10 }
    }
}

/// A log that hands out consumers of named subscription groups.
///
/// The projector host is written against this so any log with persistent
/// subscriptions can feed it.
#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    type Subscription: PersistentSubscription + 'static;

    /// Joins (or creates) `group`; a new group starts from the beginning of the log.
    async fn connect(
        &self,
        group: &str,
        settings: SubscriptionSettings,
    ) -> Result<Self::Subscription>;
}

/// One consumer's handle on a durable subscription group.
#[async_trait]
pub trait PersistentSubscription: Send {
    /// Name of the subscription group this consumer belongs to.
    fn group(&self) -> &str;

    /// Waits for the next delivery or a drop signal.
    async fn recv(&mut self) -> SubscriptionMessage;

    /// Confirms the event was processed.
    async fn ack(&mut self, event: &ResolvedEvent) -> Result<()>;

    /// Rejects the event with a reason and a redelivery policy.
    async fn nack(&mut self, event: &ResolvedEvent, reason: &str, action: NackAction)
    -> Result<()>;
}
