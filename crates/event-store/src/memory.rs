use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{Notify, RwLock};

use crate::{
    AggregateId, EventEnvelope, EventStoreError, Result, Version,
    store::{AppendOptions, EventStore, EventStream, validate_events_for_append},
    subscription::{
        DeliveryId, NackAction, PersistentSubscription, ResolvedEvent, SubscriptionMessage,
        SubscriptionSettings, SubscriptionSource,
    },
};

/// In-memory event log with persistent subscription groups.
///
/// Stands in for the external event store in tests and local runs. Cloning
/// shares the same log.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    events: Arc<RwLock<Vec<EventEnvelope>>>,
    groups: Arc<Mutex<HashMap<String, Arc<Group>>>>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    /// Joins (or creates) a subscription group over every stream.
    ///
    /// A new group starts from the beginning of the log. Joining an existing
    /// group adds a competing consumer: each event goes to one member.
    pub async fn subscribe(
        &self,
        group: &str,
        settings: SubscriptionSettings,
    ) -> InMemorySubscription {
        // Holding the read lock keeps appends out while the group is seeded.
        let events = self.events.read().await;
        let group = {
            let mut groups = lock(&self.groups);
            groups
                .entry(group.to_string())
                .or_insert_with(|| {
                    let created = Group::new(group, settings);
                    created.enqueue(events.iter().cloned());
                    Arc::new(created)
                })
                .clone()
        };
        drop(events);

        let consumer_id = group.register_consumer();
        tracing::debug!(group = %group.name, consumer_id, "consumer joined subscription group");
        InMemorySubscription { group, consumer_id }
    }

    /// Drops a subscription group; every consumer receives a drop signal.
    pub fn drop_subscription(&self, group: &str, reason: impl Into<String>) {
        if let Some(group) = lock(&self.groups).get(group) {
            group.lock().dropped = Some(reason.into());
            group.notify.notify_waiters();
        }
    }

    /// Events parked by a group after exhausting retries.
    pub fn parked_events(&self, group: &str) -> Vec<EventEnvelope> {
        lock(&self.groups)
            .get(group)
            .map(|g| g.lock().parked.clone())
            .unwrap_or_default()
    }

    /// Events a group has not settled yet, pending or in flight.
    pub fn unsettled_count(&self, group: &str) -> usize {
        lock(&self.groups)
            .get(group)
            .map(|g| {
                let state = g.lock();
                state.pending.len() + state.in_flight.len()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        validate_events_for_append(&events)?;

        let aggregate_id = events[0].aggregate_id;
        let first_new_version = events[0].version;

        let mut store = self.events.write().await;

        let current_version = store
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .map(|e| e.version)
            .max()
            .unwrap_or(Version::initial());

        if let Some(expected) = options.expected_version
            && current_version != expected
        {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual: current_version,
            });
        }

        // Streams stay contiguous even for unchecked appends.
        if first_new_version != current_version.next() {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: options.expected_version.unwrap_or(current_version),
                actual: current_version,
            });
        }

        let last_version = events
            .last()
            .map(|e| e.version)
            .unwrap_or(Version::initial());
        let appended = events.len();

        for group in lock(&self.groups).values() {
            group.enqueue(events.iter().cloned());
        }
        store.extend(events);

        metrics::counter!("event_store_events_appended_total").increment(appended as u64);
        tracing::debug!(%aggregate_id, version = %last_version, appended, "events appended");

        Ok(last_version)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        let store = self.events.read().await;
        let mut events: Vec<_> = store
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let store = self.events.read().await;
        Ok(store
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .map(|e| e.version)
            .max())
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        use futures_util::stream;

        let events = self.events.read().await.clone();
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }
}

#[async_trait]
impl SubscriptionSource for InMemoryEventStore {
    type Subscription = InMemorySubscription;

    async fn connect(
        &self,
        group: &str,
        settings: SubscriptionSettings,
    ) -> Result<InMemorySubscription> {
        Ok(self.subscribe(group, settings).await)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct InFlight {
    event: EventEnvelope,
    retry_count: u32,
    consumer_id: u64,
}

#[derive(Default)]
struct GroupState {
    pending: VecDeque<(EventEnvelope, u32)>,
    in_flight: HashMap<DeliveryId, InFlight>,
    parked: Vec<EventEnvelope>,
    next_delivery: DeliveryId,
    next_consumer: u64,
    dropped: Option<String>,
}

struct Group {
    name: String,
    settings: SubscriptionSettings,
    state: Mutex<GroupState>,
    notify: Notify,
}

impl Group {
    fn new(name: &str, settings: SubscriptionSettings) -> Self {
        Self {
            name: name.to_string(),
            settings,
            state: Mutex::new(GroupState::default()),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GroupState> {
        lock(&self.state)
    }

    fn register_consumer(&self) -> u64 {
        let mut state = self.lock();
        state.next_consumer += 1;
        state.next_consumer
    }

    fn enqueue(&self, events: impl Iterator<Item = EventEnvelope>) {
        self.lock().pending.extend(events.map(|e| (e, 0)));
        self.notify.notify_waiters();
    }

    fn try_deliver(&self, consumer_id: u64) -> Option<SubscriptionMessage> {
        let mut state = self.lock();
        if let Some(reason) = &state.dropped {
            return Some(SubscriptionMessage::Dropped(reason.clone()));
        }

        let (event, retry_count) = state.pending.pop_front()?;
        state.next_delivery += 1;
        let delivery_id = state.next_delivery;
        state.in_flight.insert(
            delivery_id,
            InFlight {
                event: event.clone(),
                retry_count,
                consumer_id,
            },
        );

        Some(SubscriptionMessage::EventAppeared(ResolvedEvent {
            event,
            delivery_id,
            retry_count,
        }))
    }

    fn take_in_flight(&self, state: &mut GroupState, delivery_id: DeliveryId) -> Result<InFlight> {
        state
            .in_flight
            .remove(&delivery_id)
            .ok_or_else(|| EventStoreError::UnknownDelivery {
                group: self.name.clone(),
                delivery_id,
            })
    }
}

/// A consumer handle on an [`InMemoryEventStore`] subscription group.
///
/// Dropping the handle returns its unsettled deliveries to the front of the
/// group's queue.
pub struct InMemorySubscription {
    group: Arc<Group>,
    consumer_id: u64,
}

#[async_trait]
impl PersistentSubscription for InMemorySubscription {
    fn group(&self) -> &str {
        &self.group.name
    }

    async fn recv(&mut self) -> SubscriptionMessage {
        loop {
            let notified = self.group.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.group.try_deliver(self.consumer_id) {
                return message;
            }
            notified.await;
        }
    }

    async fn ack(&mut self, event: &ResolvedEvent) -> Result<()> {
        let mut state = self.group.lock();
        self.group.take_in_flight(&mut state, event.delivery_id)?;
        Ok(())
    }

    async fn nack(
        &mut self,
        event: &ResolvedEvent,
        reason: &str,
        action: NackAction,
    ) -> Result<()> {
        let mut state = self.group.lock();
        let entry = self.group.take_in_flight(&mut state, event.delivery_id)?;

        match action {
            NackAction::Retry if entry.retry_count < self.group.settings.max_retries => {
                state
                    .pending
                    .push_back((entry.event, entry.retry_count + 1));
                drop(state);
                self.group.notify.notify_waiters();
            }
            NackAction::Retry | NackAction::Park => {
                tracing::warn!(
                    group = %self.group.name,
                    event_id = %entry.event.event_id,
                    retry_count = entry.retry_count,
                    reason,
                    "event parked"
                );
                state.parked.push(entry.event);
            }
            NackAction::Skip => {}
        }
        Ok(())
    }
}

impl Drop for InMemorySubscription {
    fn drop(&mut self) {
        let mut state = self.group.lock();
        let mut returned: Vec<_> = state
            .in_flight
            .iter()
            .filter(|(_, f)| f.consumer_id == self.consumer_id)
            .map(|(id, _)| *id)
            .collect();
        if returned.is_empty() {
            return;
        }
        returned.sort_unstable();
        for delivery_id in returned.into_iter().rev() {
            if let Some(entry) = state.in_flight.remove(&delivery_id) {
                state.pending.push_front((entry.event, entry.retry_count));
            }
        }
        drop(state);
        self.group.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn create_test_event(aggregate_id: AggregateId, version: i64) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(aggregate_id)
            .aggregate_type("wallet")
            .event_type("V1_TEST")
            .version(Version::new(version))
            .payload_raw(serde_json::json!({"test": true}))
            .build()
            .unwrap()
    }

    async fn expect_event(sub: &mut InMemorySubscription) -> ResolvedEvent {
        match tokio::time::timeout(Duration::from_secs(1), sub.recv()).await {
            Ok(SubscriptionMessage::EventAppeared(event)) => event,
            other => panic!("expected an event, got {other:?}"),
        }
    }

    async fn expect_nothing(sub: &mut InMemorySubscription) {
        let res = tokio::time::timeout(Duration::from_millis(50), sub.recv()).await;
        assert!(res.is_err(), "expected no delivery, got {res:?}");
    }

    #[tokio::test]
    async fn append_and_load_in_version_order() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let version = store
            .append(
                vec![create_test_event(id, 1), create_test_event(id, 2)],
                AppendOptions::expect_new(),
            )
            .await
            .unwrap();
        assert_eq!(version, Version::new(2));

        let events = store.get_events_for_aggregate(id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].version, Version::first());
        assert_eq!(events[1].version, Version::new(2));
    }

    #[tokio::test]
    async fn expected_version_mismatch_is_a_conflict() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append(vec![create_test_event(id, 1)], AppendOptions::expect_new())
            .await
            .unwrap();

        let result = store
            .append(
                vec![create_test_event(id, 2)],
                AppendOptions::expect_version(Version::initial()),
            )
            .await;
        assert!(matches!(
            result,
            Err(EventStoreError::ConcurrencyConflict { .. })
        ));

        store
            .append(
                vec![create_test_event(id, 2)],
                AppendOptions::expect_version(Version::first()),
            )
            .await
            .unwrap();
        assert_eq!(
            store.get_aggregate_version(id).await.unwrap(),
            Some(Version::new(2))
        );
    }

    #[tokio::test]
    async fn unchecked_append_must_still_be_contiguous() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        let result = store
            .append(vec![create_test_event(id, 3)], AppendOptions::new())
            .await;
        assert!(matches!(
            result,
            Err(EventStoreError::ConcurrencyConflict { .. })
        ));
    }

    #[tokio::test]
    async fn exists_reports_missing_stream() {
        use crate::store::EventStoreExt;

        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        assert!(matches!(
            store.exists(id).await,
            Err(EventStoreError::AggregateNotFound(_))
        ));

        store
            .append(vec![create_test_event(id, 1)], AppendOptions::expect_new())
            .await
            .unwrap();
        assert!(store.exists(id).await.is_ok());
    }

    #[tokio::test]
    async fn stream_all_events_in_commit_order() {
        use futures_util::StreamExt;

        let store = InMemoryEventStore::new();
        let a = AggregateId::new();
        let b = AggregateId::new();
        store
            .append(vec![create_test_event(a, 1)], AppendOptions::new())
            .await
            .unwrap();
        store
            .append(vec![create_test_event(b, 1)], AppendOptions::new())
            .await
            .unwrap();

        let events: Vec<_> = store.stream_all_events().await.unwrap().collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_ref().unwrap().aggregate_id, a);
        assert_eq!(events[1].as_ref().unwrap().aggregate_id, b);
    }

    #[tokio::test]
    async fn new_group_replays_history_then_live_events() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append(vec![create_test_event(id, 1)], AppendOptions::new())
            .await
            .unwrap();

        let mut sub = store
            .subscribe("wallet-projection", SubscriptionSettings::default())
            .await;
        let first = expect_event(&mut sub).await;
        assert_eq!(first.event.version, Version::first());
        sub.ack(&first).await.unwrap();

        store
            .append(vec![create_test_event(id, 2)], AppendOptions::new())
            .await
            .unwrap();
        let second = expect_event(&mut sub).await;
        assert_eq!(second.event.version, Version::new(2));
        sub.ack(&second).await.unwrap();

        assert_eq!(store.unsettled_count("wallet-projection"), 0);
    }

    #[tokio::test]
    async fn nack_retry_redelivers_with_incremented_count() {
        let store = InMemoryEventStore::new();
        store
            .append(vec![create_test_event(AggregateId::new(), 1)], AppendOptions::new())
            .await
            .unwrap();

        let mut sub = store.subscribe("g", SubscriptionSettings::default()).await;
        let delivery = expect_event(&mut sub).await;
        assert_eq!(delivery.retry_count, 0);
        sub.nack(&delivery, "boom", NackAction::Retry).await.unwrap();

        let redelivery = expect_event(&mut sub).await;
        assert_eq!(redelivery.event.event_id, delivery.event.event_id);
        assert_eq!(redelivery.retry_count, 1);
        assert_ne!(redelivery.delivery_id, delivery.delivery_id);
    }

    #[tokio::test]
    async fn exhausted_retries_park_the_event() {
        let store = InMemoryEventStore::new();
        store
            .append(vec![create_test_event(AggregateId::new(), 1)], AppendOptions::new())
            .await
            .unwrap();

        let mut sub = store
            .subscribe("g", SubscriptionSettings { max_retries: 1 })
            .await;
        let first = expect_event(&mut sub).await;
        sub.nack(&first, "boom", NackAction::Retry).await.unwrap();
        let second = expect_event(&mut sub).await;
        sub.nack(&second, "boom", NackAction::Retry).await.unwrap();

        expect_nothing(&mut sub).await;
        assert_eq!(store.parked_events("g").len(), 1);
    }

    #[tokio::test]
    async fn ack_of_unknown_delivery_fails() {
        let store = InMemoryEventStore::new();
        store
            .append(vec![create_test_event(AggregateId::new(), 1)], AppendOptions::new())
            .await
            .unwrap();
        let mut sub = store.subscribe("g", SubscriptionSettings::default()).await;
        let delivery = expect_event(&mut sub).await;
        sub.ack(&delivery).await.unwrap();

        assert!(matches!(
            sub.ack(&delivery).await,
            Err(EventStoreError::UnknownDelivery { .. })
        ));
    }

    #[tokio::test]
    async fn dropped_group_signals_every_consumer() {
        let store = InMemoryEventStore::new();
        let mut sub = store.subscribe("g", SubscriptionSettings::default()).await;

        let waiter = tokio::spawn(async move { sub.recv().await });
        tokio::task::yield_now().await;
        store.drop_subscription("g", "server shutting down");

        match waiter.await.unwrap() {
            SubscriptionMessage::Dropped(reason) => assert_eq!(reason, "server shutting down"),
            other => panic!("expected drop, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropping_a_consumer_returns_unsettled_events() {
        let store = InMemoryEventStore::new();
        store
            .append(vec![create_test_event(AggregateId::new(), 1)], AppendOptions::new())
            .await
            .unwrap();

        let mut first = store.subscribe("g", SubscriptionSettings::default()).await;
        let delivery = expect_event(&mut first).await;
        drop(first);

        let mut second = store.subscribe("g", SubscriptionSettings::default()).await;
        let redelivered = expect_event(&mut second).await;
        assert_eq!(redelivered.event.event_id, delivery.event.event_id);
    }

    #[tokio::test]
    async fn connect_joins_the_named_group() {
        let store = InMemoryEventStore::new();
        store
            .append(vec![create_test_event(AggregateId::new(), 1)], AppendOptions::new())
            .await
            .unwrap();

        let mut sub = store.connect("g", SubscriptionSettings::default()).await.unwrap();
        assert_eq!(sub.group(), "g");
        let delivery = expect_event(&mut sub).await;
        sub.ack(&delivery).await.unwrap();
        assert_eq!(store.unsettled_count("g"), 0);
    }

    #[tokio::test]
    async fn competing_consumers_split_the_stream() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append(
                vec![create_test_event(id, 1), create_test_event(id, 2)],
                AppendOptions::new(),
            )
            .await
            .unwrap();

        let mut a = store.subscribe("g", SubscriptionSettings::default()).await;
        let mut b = store.subscribe("g", SubscriptionSettings::default()).await;

        let from_a = expect_event(&mut a).await;
        let from_b = expect_event(&mut b).await;
        assert_ne!(from_a.event.event_id, from_b.event.event_id);
        expect_nothing(&mut a).await;
    }
}
