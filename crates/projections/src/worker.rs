//! Subscription-driven projection worker.

use std::sync::Arc;

use event_store::{NackAction, PersistentSubscription, ResolvedEvent, SubscriptionMessage};
use tokio::sync::watch;

use crate::projector::WalletProjector;
use crate::read_model::WalletReadStore;
use crate::{ProjectionError, Result};

/// Lifecycle of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    /// Shutdown was observed; the in-flight delivery is left unsettled.
    Draining,
    Stopped,
}

/// One member of a subscription group feeding the projector.
///
/// Events are acked after a successful apply and nacked for retry when the
/// apply fails; a single bad event never stops the worker. A dropped
/// subscription or a failed ack/nack is fatal and is returned to the host,
/// which owns any resubscribe policy.
pub struct ProjectionWorker<R: WalletReadStore> {
    id: usize,
    projector: Arc<WalletProjector<R>>,
    state: watch::Sender<WorkerState>,
}

impl<R: WalletReadStore> ProjectionWorker<R> {
    pub fn new(id: usize, projector: Arc<WalletProjector<R>>) -> Self {
        let (state, _) = watch::channel(WorkerState::Stopped);
        Self {
            id,
            projector,
            state,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Observes state transitions from outside the worker task.
    pub fn watch_state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Consumes deliveries until shutdown is signalled or the subscription fails.
    ///
    /// `shutdown` flipping to true (or its sender going away) is observed
    /// between deliveries.
    #[tracing::instrument(skip_all, fields(worker_id = self.id, group = subscription.group()))]
    pub async fn run<P: PersistentSubscription>(
        &self,
        subscription: &mut P,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        self.state.send_replace(WorkerState::Running);
        tracing::info!("projection worker started");

        let result = loop {
            if *shutdown.borrow() {
                break Ok(());
            }

            let message = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                    continue;
                }
                message = subscription.recv() => message,
            };

            if *shutdown.borrow() {
                self.state.send_replace(WorkerState::Draining);
                tracing::info!("shutdown requested, leaving in-flight event for redelivery");
                break Ok(());
            }

            match message {
                SubscriptionMessage::Dropped(reason) => {
                    tracing::error!(%reason, "subscription dropped");
                    break Err(ProjectionError::SubscriptionDropped {
                        group: subscription.group().to_string(),
                        reason,
                    });
                }
                SubscriptionMessage::EventAppeared(delivery) => {
                    if let Err(e) = self.process(subscription, &delivery).await {
                        tracing::error!(error = %e, "failed to settle delivery");
                        break Err(e);
                    }
                }
            }
        };

        self.state.send_replace(WorkerState::Draining);
        self.state.send_replace(WorkerState::Stopped);
        tracing::info!(ok = result.is_ok(), "projection worker stopped");
        result
    }

    async fn process<P: PersistentSubscription>(
        &self,
        subscription: &mut P,
        delivery: &ResolvedEvent,
    ) -> Result<()> {
        match self.projector.handle(&delivery.event).await {
            Ok(outcome) => {
                subscription.ack(delivery).await?;
                metrics::counter!("projection_events_acked_total").increment(1);
                tracing::debug!(?outcome, event_id = %delivery.event.event_id, "event acked");
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!(
                    error = %reason,
                    event_id = %delivery.event.event_id,
                    event_type = %delivery.event.event_type,
                    retry_count = delivery.retry_count,
                    "apply failed, requesting redelivery"
                );
                subscription
                    .nack(delivery, &reason, NackAction::Retry)
                    .await?;
                metrics::counter!("projection_events_nacked_total").increment(1);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryWalletReadStore;
    use async_trait::async_trait;
    use common::{AggregateId, TraceContext};
    use domain::{Aggregate, WalletAggregate, WalletEvent};
    use event_store::{
        AppendOptions, EventEnvelope, EventStore, EventStoreError, InMemoryEventStore,
        SubscriptionSettings, Version,
    };
    use rust_decimal::Decimal;
    use std::collections::VecDeque;
    use std::time::Duration;

    fn wallet_events(credits: usize) -> (AggregateId, Vec<EventEnvelope>) {
        let trace = TraceContext::new_root();
        let mut wallet = WalletAggregate::new();
        let id = wallet.id();
        wallet
            .create_wallet(Decimal::from(10), "opening", "u", "a", id.to_string(), &trace)
            .unwrap();
        for _ in 0..credits {
            wallet.credit_wallet("W2", Decimal::ONE, "in", &trace).unwrap();
        }
        (id, wallet.take_uncommitted())
    }

    /// Scripted transport recording every settlement.
    #[derive(Default)]
    struct ScriptedSubscription {
        script: VecDeque<SubscriptionMessage>,
        acked: Vec<u64>,
        nacked: Vec<(u64, NackAction)>,
        fail_ack: bool,
        /// Flipped when the script runs dry, to simulate an external shutdown.
        on_empty: Option<watch::Sender<bool>>,
    }

    impl ScriptedSubscription {
        fn deliver(mut self, events: &[EventEnvelope]) -> Self {
            for (i, event) in events.iter().enumerate() {
                self.script
                    .push_back(SubscriptionMessage::EventAppeared(ResolvedEvent {
                        event: event.clone(),
                        delivery_id: i as u64 + 1,
                        retry_count: 0,
                    }));
            }
            self
        }
    }

    #[async_trait]
    impl PersistentSubscription for ScriptedSubscription {
        fn group(&self) -> &str {
            "test-group"
        }

        async fn recv(&mut self) -> SubscriptionMessage {
            if let Some(message) = self.script.pop_front() {
                return message;
            }
            if let Some(tx) = self.on_empty.take() {
                let _ = tx.send(true);
            }
            std::future::pending().await
        }

        async fn ack(&mut self, event: &ResolvedEvent) -> event_store::Result<()> {
            if self.fail_ack {
                return Err(EventStoreError::UnknownDelivery {
                    group: "test-group".to_string(),
                    delivery_id: event.delivery_id,
                });
            }
            self.acked.push(event.delivery_id);
            Ok(())
        }

        async fn nack(
            &mut self,
            event: &ResolvedEvent,
            _reason: &str,
            action: NackAction,
        ) -> event_store::Result<()> {
            self.nacked.push((event.delivery_id, action));
            Ok(())
        }
    }

    fn worker() -> ProjectionWorker<InMemoryWalletReadStore> {
        let projector = WalletProjector::new(InMemoryWalletReadStore::new());
        ProjectionWorker::new(0, Arc::new(projector))
    }

    #[tokio::test]
    async fn acks_applied_events_and_stops_on_shutdown() {
        let (_, events) = wallet_events(1);
        let (tx, rx) = watch::channel(false);
        let mut sub = ScriptedSubscription {
            on_empty: Some(tx),
            ..Default::default()
        }
        .deliver(&events);

        let worker = worker();
        worker.run(&mut sub, rx).await.unwrap();

        assert_eq!(sub.acked, vec![1, 2]);
        assert!(sub.nacked.is_empty());
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn failed_apply_is_nacked_for_retry_and_loop_continues() {
        let (_, events) = wallet_events(1);
        let (tx, rx) = watch::channel(false);
        // Credit before create: not found, then the create still applies.
        let mut sub = ScriptedSubscription {
            on_empty: Some(tx),
            ..Default::default()
        }
        .deliver(&[events[1].clone(), events[0].clone()]);

        worker().run(&mut sub, rx).await.unwrap();

        assert_eq!(sub.nacked, vec![(1, NackAction::Retry)]);
        assert_eq!(sub.acked, vec![2]);
    }

    #[tokio::test]
    async fn overflowing_event_is_nacked_not_fatal() {
        let id = AggregateId::new();
        let at = chrono::Utc::now();
        let trace = TraceContext::new_root();
        let events: Vec<_> = [
            WalletEvent::created(Decimal::MAX, "opening", "u", "a", id.to_string()),
            WalletEvent::credited("W2", Decimal::ONE, "in"),
        ]
        .into_iter()
        .enumerate()
        .map(|(i, e)| e.to_envelope(id, Version::new(i as i64 + 1), at, &trace).unwrap())
        .collect();
        let (tx, rx) = watch::channel(false);
        let mut sub = ScriptedSubscription {
            on_empty: Some(tx),
            ..Default::default()
        }
        .deliver(&events);

        worker().run(&mut sub, rx).await.unwrap();

        assert_eq!(sub.acked, vec![1]);
        assert_eq!(sub.nacked, vec![(2, NackAction::Retry)]);
    }

    #[tokio::test]
    async fn dropped_subscription_is_fatal() {
        let (_tx, rx) = watch::channel(false);
        let mut sub = ScriptedSubscription::default();
        sub.script
            .push_back(SubscriptionMessage::Dropped("connection reset".to_string()));

        let err = worker().run(&mut sub, rx).await.unwrap_err();
        assert!(matches!(
            err,
            ProjectionError::SubscriptionDropped { ref reason, .. } if reason == "connection reset"
        ));
    }

    #[tokio::test]
    async fn ack_failure_stops_the_worker() {
        let (_, events) = wallet_events(0);
        let (_tx, rx) = watch::channel(false);
        let mut sub = ScriptedSubscription {
            fail_ack: true,
            ..Default::default()
        }
        .deliver(&events);

        let err = worker().run(&mut sub, rx).await.unwrap_err();
        assert!(matches!(err, ProjectionError::EventStore(_)));
    }

    #[tokio::test]
    async fn already_cancelled_worker_settles_nothing() {
        let (_, events) = wallet_events(0);
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let mut sub = ScriptedSubscription::default().deliver(&events);

        worker().run(&mut sub, rx).await.unwrap();
        assert!(sub.acked.is_empty());
        assert!(sub.nacked.is_empty());
        assert_eq!(sub.script.len(), 1);
    }

    #[tokio::test]
    async fn end_to_end_over_in_memory_subscription() {
        let log = InMemoryEventStore::new();
        let (id, events) = wallet_events(3);
        log.append(events, AppendOptions::expect_new()).await.unwrap();

        let read_store = InMemoryWalletReadStore::new();
        let worker = ProjectionWorker::new(
            7,
            Arc::new(WalletProjector::new(read_store.clone())),
        );
        let (tx, rx) = watch::channel(false);
        let mut sub = log
            .subscribe("wallet-projection", SubscriptionSettings::default())
            .await;

        let handle = tokio::spawn(async move {
            let result = worker.run(&mut sub, rx).await;
            (result, worker.state())
        });

        let mut applied = false;
        for _ in 0..100 {
            if let Some(record) = read_store.get_by_wallet_id(id).await.unwrap()
                && record.version == Version::new(4)
            {
                applied = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();
        let (result, state) = handle.await.unwrap();

        assert!(applied);
        result.unwrap();
        assert_eq!(state, WorkerState::Stopped);
        assert_eq!(log.unsettled_count("wallet-projection"), 0);
    }
}
