//! PostgreSQL-backed event log with table-driven persistent subscriptions.
//!
//! Appends take a transaction-scoped advisory lock, so log positions become
//! visible strictly in order. Subscription groups rely on that: each group
//! copies new positions into `subscription_deliveries` behind a cursor, and
//! consumers claim rows with `FOR UPDATE SKIP LOCKED` under a lease. A claim
//! whose lease runs out (consumer died, or was cancelled mid-receive) becomes
//! claimable again with its retry count unchanged.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, EventEnvelope, EventId, EventStoreError, Result, Version,
    store::{AppendOptions, EventStore, EventStream, validate_events_for_append},
    subscription::{
        NackAction, PersistentSubscription, ResolvedEvent, SubscriptionMessage,
        SubscriptionSettings, SubscriptionSource,
    },
};

/// Advisory lock key serializing appends.
const APPEND_LOCK_KEY: i64 = 0x7761_6c6c_6574;

/// Positions copied into a group's delivery table per poll.
const ENQUEUE_BATCH: i64 = 500;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(30);

/// PostgreSQL-backed event store implementation.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
    poll_interval: Duration,
    ack_timeout: Duration,
}

impl PostgresEventStore {
    /// Creates a new PostgreSQL event store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            poll_interval: DEFAULT_POLL_INTERVAL,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }

    /// How long an idle consumer sleeps between polls. A retried event also
    /// stays invisible for this long.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// How long a delivery may stay unsettled before another consumer may claim it.
    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    /// Drops a subscription group; every consumer receives a drop signal on its next poll.
    pub async fn drop_subscription(&self, group: &str, reason: &str) -> Result<()> {
        sqlx::query("UPDATE subscription_groups SET dropped_reason = $2 WHERE group_name = $1")
            .bind(group)
            .bind(reason)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Events parked by a group after exhausting retries, in log order.
    pub async fn parked_events(&self, group: &str) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(
            r#"
            SELECT e.id, e.event_type, e.aggregate_id, e.aggregate_type, e.version, e.timestamp, e.payload, e.metadata
            FROM subscription_deliveries d
            JOIN events e ON e.position = d.position
            WHERE d.group_name = $1 AND d.status = 'parked'
            ORDER BY d.position ASC
            "#,
        )
        .bind(group)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    /// Events a group has not settled yet, pending or in flight, including
    /// log entries not copied into the group's delivery table.
    pub async fn unsettled_count(&self, group: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT
                (SELECT COUNT(*) FROM subscription_deliveries
                 WHERE group_name = $1 AND status IN ('pending', 'in_flight'))
              + (SELECT COUNT(*) FROM events e, subscription_groups g
                 WHERE g.group_name = $1 AND e.position > g.enqueued_through)
            "#,
        )
        .bind(group)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    fn row_to_event(row: PgRow) -> Result<EventEnvelope> {
        let metadata_json: serde_json::Value = row.try_get("metadata")?;
        let metadata: HashMap<String, serde_json::Value> = serde_json::from_value(metadata_json)?;

        Ok(EventEnvelope {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_type: row.try_get("event_type")?,
            aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            version: Version::new(row.try_get("version")?),
            timestamp: row.try_get("timestamp")?,
            payload: row.try_get("payload")?,
            metadata,
        })
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        validate_events_for_append(&events)?;

        let aggregate_id = events[0].aggregate_id;
        let first_new_version = events[0].version;

        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(APPEND_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let current: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_uuid())
                .fetch_one(&mut *tx)
                .await?;
        let current_version = Version::new(current.unwrap_or(0));

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

        let mut last_version = current_version;
        for event in &events {
            let metadata_json = serde_json::to_value(&event.metadata)?;

            sqlx::query(
                r#"
                INSERT INTO events (id, event_type, aggregate_id, aggregate_type, version, timestamp, payload, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(event.event_id.as_uuid())
            .bind(&event.event_type)
            .bind(event.aggregate_id.as_uuid())
            .bind(&event.aggregate_type)
            .bind(event.version.as_i64())
            .bind(event.timestamp)
            .bind(&event.payload)
            .bind(metadata_json)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("unique_aggregate_version")
                {
                    return EventStoreError::ConcurrencyConflict {
                        aggregate_id,
                        expected: options.expected_version.unwrap_or(current_version),
                        actual: event.version,
                    };
                }
                EventStoreError::Database(e)
            })?;

            last_version = event.version;
        }

        tx.commit().await?;

        metrics::counter!("event_store_events_appended_total").increment(events.len() as u64);
        tracing::debug!(%aggregate_id, version = %last_version, appended = events.len(), "events appended");

        Ok(last_version)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_type, aggregate_id, aggregate_type, version, timestamp, payload, metadata
            FROM events
            WHERE aggregate_id = $1
            ORDER BY version ASC
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;

        Ok(version.map(Version::new))
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        use futures_util::StreamExt;

        let stream = sqlx::query(
            r#"
            SELECT id, event_type, aggregate_id, aggregate_type, version, timestamp, payload, metadata
            FROM events
            ORDER BY position ASC
            "#,
        )
        .fetch(&self.pool)
        .map(|result| match result {
            Ok(row) => Self::row_to_event(row),
            Err(e) => Err(EventStoreError::Database(e)),
        });

        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl SubscriptionSource for PostgresEventStore {
    type Subscription = PostgresSubscription;

    async fn connect(
        &self,
        group: &str,
        settings: SubscriptionSettings,
    ) -> Result<PostgresSubscription> {
        // The first consumer's settings define the group.
        sqlx::query(
            r#"
            INSERT INTO subscription_groups (group_name, max_retries)
            VALUES ($1, $2)
            ON CONFLICT (group_name) DO NOTHING
            "#,
        )
        .bind(group)
        .bind(i32::try_from(settings.max_retries).unwrap_or(i32::MAX))
        .execute(&self.pool)
        .await?;

        tracing::debug!(group, "consumer joined subscription group");
        Ok(PostgresSubscription {
            pool: self.pool.clone(),
            group: group.to_string(),
            poll_interval: self.poll_interval,
            ack_timeout: self.ack_timeout,
        })
    }
}

/// A consumer handle on a [`PostgresEventStore`] subscription group.
///
/// Deliveries left unsettled when the handle goes away are claimable again
/// once their lease expires.
pub struct PostgresSubscription {
    pool: PgPool,
    group: String,
    poll_interval: Duration,
    ack_timeout: Duration,
}

impl PostgresSubscription {
    async fn poll(&self) -> Result<Option<SubscriptionMessage>> {
        let dropped: Option<Option<String>> = sqlx::query_scalar(
            "SELECT dropped_reason FROM subscription_groups WHERE group_name = $1",
        )
        .bind(&self.group)
        .fetch_optional(&self.pool)
        .await?;
        match dropped {
            None => {
                return Ok(Some(SubscriptionMessage::Dropped(format!(
                    "subscription group {} no longer exists",
                    self.group
                ))));
            }
            Some(Some(reason)) => return Ok(Some(SubscriptionMessage::Dropped(reason))),
            Some(None) => {}
        }

        self.enqueue().await?;

        let row = sqlx::query(
            r#"
            WITH next AS (
                SELECT group_name, position
                FROM subscription_deliveries
                WHERE group_name = $1
                  AND status IN ('pending', 'in_flight')
                  AND COALESCE(visible_after, '-infinity'::timestamptz) <= NOW()
                ORDER BY position ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            ), claimed AS (
                UPDATE subscription_deliveries d
                SET status = 'in_flight',
                    delivery_id = nextval('subscription_delivery_seq'),
                    visible_after = NOW() + make_interval(secs => $2)
                FROM next
                WHERE d.group_name = next.group_name AND d.position = next.position
                RETURNING d.position, d.delivery_id, d.retry_count
            )
            SELECT c.delivery_id, c.retry_count,
                   e.id, e.event_type, e.aggregate_id, e.aggregate_type, e.version, e.timestamp, e.payload, e.metadata
            FROM claimed c
            JOIN events e ON e.position = c.position
            "#,
        )
        .bind(&self.group)
        .bind(self.ack_timeout.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let delivery_id: i64 = row.try_get("delivery_id")?;
        let retry_count: i32 = row.try_get("retry_count")?;
        let event = PostgresEventStore::row_to_event(row)?;

        Ok(Some(SubscriptionMessage::EventAppeared(ResolvedEvent {
            event,
            delivery_id: delivery_id.unsigned_abs(),
            retry_count: retry_count.unsigned_abs(),
        })))
    }

    /// Copies log positions past the group's cursor into its delivery table.
    async fn enqueue(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let through: i64 = sqlx::query_scalar(
            "SELECT enqueued_through FROM subscription_groups WHERE group_name = $1 FOR UPDATE",
        )
        .bind(&self.group)
        .fetch_one(&mut *tx)
        .await?;

        let head: Option<i64> = sqlx::query_scalar(
            r#"
            WITH batch AS (
                SELECT position FROM events
                WHERE position > $2
                ORDER BY position ASC
                LIMIT $3
            ), queued AS (
                INSERT INTO subscription_deliveries (group_name, position)
                SELECT $1, position FROM batch
                ON CONFLICT DO NOTHING
            )
            SELECT MAX(position) FROM batch
            "#,
        )
        .bind(&self.group)
        .bind(through)
        .bind(ENQUEUE_BATCH)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(head) = head {
            sqlx::query(
                "UPDATE subscription_groups SET enqueued_through = $2 WHERE group_name = $1",
            )
            .bind(&self.group)
            .bind(head)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    fn delivery_key(&self, event: &ResolvedEvent) -> Result<i64> {
        i64::try_from(event.delivery_id).map_err(|_| self.unknown(event))
    }

    fn unknown(&self, event: &ResolvedEvent) -> EventStoreError {
        EventStoreError::UnknownDelivery {
            group: self.group.clone(),
            delivery_id: event.delivery_id,
        }
    }
}

#[async_trait]
impl PersistentSubscription for PostgresSubscription {
    fn group(&self) -> &str {
        &self.group
    }

    async fn recv(&mut self) -> SubscriptionMessage {
        loop {
            match self.poll().await {
                Ok(Some(message)) => return message,
                Ok(None) => tokio::time::sleep(self.poll_interval).await,
                Err(e) => {
                    tracing::error!(group = %self.group, error = %e, "subscription poll failed");
                    return SubscriptionMessage::Dropped(format!("subscription poll failed: {e}"));
                }
            }
        }
    }

    async fn ack(&mut self, event: &ResolvedEvent) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE subscription_deliveries
            SET status = 'acked', visible_after = NULL
            WHERE group_name = $1 AND delivery_id = $2 AND status = 'in_flight'
            "#,
        )
        .bind(&self.group)
        .bind(self.delivery_key(event)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.unknown(event));
        }
        Ok(())
    }

    async fn nack(
        &mut self,
        event: &ResolvedEvent,
        reason: &str,
        action: NackAction,
    ) -> Result<()> {
        let status: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE subscription_deliveries d
            SET status = CASE
                    WHEN $3 = 'retry' AND d.retry_count < g.max_retries THEN 'pending'
                    WHEN $3 = 'skip' THEN 'acked'
                    ELSE 'parked'
                END,
                retry_count = CASE
                    WHEN $3 = 'retry' AND d.retry_count < g.max_retries THEN d.retry_count + 1
                    ELSE d.retry_count
                END,
                visible_after = CASE
                    WHEN $3 = 'retry' AND d.retry_count < g.max_retries
                        THEN NOW() + make_interval(secs => $5)
                    ELSE NULL
                END,
                last_error = $4
            FROM subscription_groups g
            WHERE g.group_name = d.group_name
              AND d.group_name = $1
              AND d.delivery_id = $2
              AND d.status = 'in_flight'
            RETURNING d.status
            "#,
        )
        .bind(&self.group)
        .bind(self.delivery_key(event)?)
        .bind(action.as_str())
        .bind(reason)
        .bind(self.poll_interval.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        match status.as_deref() {
            None => Err(self.unknown(event)),
            Some("parked") => {
                tracing::warn!(
                    group = %self.group,
                    event_id = %event.event.event_id,
                    retry_count = event.retry_count,
                    reason,
                    "event parked"
                );
                Ok(())
            }
            Some(_) => Ok(()),
        }
    }
}
