//! PostgreSQL-backed wallet read store.

use async_trait::async_trait;
use common::AggregateId;
use event_store::Version;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::read_model::{WalletProjection, WalletReadStore};
use crate::{ProjectionError, Result};

/// Read store over the `wallet_projections` table.
///
/// Entities are stored as typed JSONB columns; the adapter owns
/// serialization. Updates are conditional on the `version` column.
#[derive(Clone)]
pub struct PostgresWalletReadStore {
    pool: PgPool,
}

impl PostgresWalletReadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_record(row: PgRow) -> Result<WalletProjection> {
        Ok(WalletProjection {
            id: row.try_get("id")?,
            wallet_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("wallet_id")?),
            wallet: serde_json::from_value(row.try_get("wallet")?)?,
            wallet_state: serde_json::from_value(row.try_get("wallet_state")?)?,
            wallet_transactions: serde_json::from_value(row.try_get("wallet_transactions")?)?,
            version: Version::new(row.try_get("version")?),
        })
    }
}

#[async_trait]
impl WalletReadStore for PostgresWalletReadStore {
    async fn create(&self, record: &WalletProjection) -> Result<Uuid> {
        sqlx::query(
            r#"
            INSERT INTO wallet_projections (id, wallet_id, wallet, wallet_state, wallet_transactions, version)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.id)
        .bind(record.wallet_id.as_uuid())
        .bind(serde_json::to_value(&record.wallet)?)
        .bind(serde_json::to_value(&record.wallet_state)?)
        .bind(serde_json::to_value(&record.wallet_transactions)?)
        .bind(record.version.as_i64())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_wallet_projection")
            {
                return ProjectionError::AlreadyExists(record.wallet_id);
            }
            ProjectionError::Database(e)
        })?;

        Ok(record.id)
    }

    async fn get_by_wallet_id(&self, wallet_id: AggregateId) -> Result<Option<WalletProjection>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT id, wallet_id, wallet, wallet_state, wallet_transactions, version
            FROM wallet_projections
            WHERE wallet_id = $1
            "#,
        )
        .bind(wallet_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn update(&self, record: &WalletProjection, expected_version: Version) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE wallet_projections
            SET wallet = $2, wallet_state = $3, wallet_transactions = $4, version = $5, updated_at = NOW()
            WHERE wallet_id = $1 AND version = $6
            "#,
        )
        .bind(record.wallet_id.as_uuid())
        .bind(serde_json::to_value(&record.wallet)?)
        .bind(serde_json::to_value(&record.wallet_state)?)
        .bind(serde_json::to_value(&record.wallet_transactions)?)
        .bind(record.version.as_i64())
        .bind(expected_version.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn reset(&self) -> Result<()> {
        sqlx::query("TRUNCATE TABLE wallet_projections")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM wallet_projections")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}
