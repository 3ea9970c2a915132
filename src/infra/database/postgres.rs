//! PostgreSQL implementation of the interaction store.

use alloy::primitives::{Address, B256, Bytes};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgPoolOptions, postgres::PgRow};
use std::time::Duration;
use tracing::{error, info, instrument};

use crate::domain::{
    AppError, ArchiveReason, ArchivedInteraction, DatabaseError, InteractionOutcome,
    InteractionStatus, InteractionStore, NewInteraction, PendingInteraction, PreparedInteraction,
    PushedInteraction, QueueStats, SkipPredicate, skip_if_empty,
};

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    /// Leases older than this are released by the next `get_and_lock`
    pub lock_timeout: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
            lock_timeout: Duration::from_secs(5 * 60),
        }
    }
}

const PENDING_COLUMNS: &str = "id, wallet, product_id, type_denominator, interaction_data, \
     signature, status, failure_reason, retry_count, last_retry_at, next_retry_at, \
     created_at, updated_at, locked_at";

const PUSHED_COLUMNS: &str = "id, wallet, product_id, type_denominator, interaction_data, \
     signature, tx_hash, created_at, pushed_at";

const ARCHIVED_COLUMNS: &str = "id, original_id, wallet, product_id, type_denominator, \
     interaction_data, signature, final_status, failure_reason, total_retries, \
     archive_reason, archived_at, original_created_at";

/// PostgreSQL database client with connection pooling
pub struct PostgresClient {
    pool: PgPool,
    lock_timeout: chrono::Duration,
}

impl PostgresClient {
    /// Create a new PostgreSQL client with custom configuration
    pub async fn new(database_url: &str, config: PostgresConfig) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        info!("Connected to PostgreSQL");
        Ok(Self::from_pool(pool, config.lock_timeout))
    }

    /// Create a new PostgreSQL client with default configuration
    pub async fn with_defaults(database_url: &str) -> Result<Self, AppError> {
        Self::new(database_url, PostgresConfig::default()).await
    }

    pub fn from_pool(pool: PgPool, lock_timeout: Duration) -> Self {
        Self {
            pool,
            lock_timeout: chrono::Duration::from_std(lock_timeout)
                .unwrap_or(chrono::Duration::minutes(5)),
        }
    }

    /// Run database migrations using sqlx migrate
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Migration(e.to_string())))?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying connection pool (for testing)
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_pending(row: &PgRow) -> Result<PendingInteraction, AppError> {
        let status: String = row.try_get("status").map_err(DatabaseError::from)?;
        Ok(PendingInteraction {
            id: row.try_get("id").map_err(DatabaseError::from)?,
            wallet: decode_address(row, "wallet")?,
            product_id: decode_b256(row, "product_id")?,
            type_denominator: decode_denominator(row)?,
            interaction_data: decode_bytes(row, "interaction_data")?,
            signature: decode_optional_bytes(row, "signature")?,
            status: status.parse().map_err(DatabaseError::Decode)?,
            failure_reason: row.try_get("failure_reason").map_err(DatabaseError::from)?,
            retry_count: row.try_get("retry_count").map_err(DatabaseError::from)?,
            last_retry_at: row.try_get("last_retry_at").map_err(DatabaseError::from)?,
            next_retry_at: row.try_get("next_retry_at").map_err(DatabaseError::from)?,
            created_at: row.try_get("created_at").map_err(DatabaseError::from)?,
            updated_at: row.try_get("updated_at").map_err(DatabaseError::from)?,
            locked_at: row.try_get("locked_at").map_err(DatabaseError::from)?,
        })
    }

    fn row_to_pushed(row: &PgRow) -> Result<PushedInteraction, AppError> {
        Ok(PushedInteraction {
            id: row.try_get("id").map_err(DatabaseError::from)?,
            wallet: decode_address(row, "wallet")?,
            product_id: decode_b256(row, "product_id")?,
            type_denominator: decode_denominator(row)?,
            interaction_data: decode_bytes(row, "interaction_data")?,
            signature: decode_bytes(row, "signature")?,
            tx_hash: decode_b256(row, "tx_hash")?,
            created_at: row.try_get("created_at").map_err(DatabaseError::from)?,
            pushed_at: row.try_get("pushed_at").map_err(DatabaseError::from)?,
        })
    }

    fn row_to_archived(row: &PgRow) -> Result<ArchivedInteraction, AppError> {
        let final_status: String = row.try_get("final_status").map_err(DatabaseError::from)?;
        let archive_reason: String = row.try_get("archive_reason").map_err(DatabaseError::from)?;
        Ok(ArchivedInteraction {
            id: row.try_get("id").map_err(DatabaseError::from)?,
            original_id: row.try_get("original_id").map_err(DatabaseError::from)?,
            wallet: decode_address(row, "wallet")?,
            product_id: decode_b256(row, "product_id")?,
            type_denominator: decode_denominator(row)?,
            interaction_data: decode_bytes(row, "interaction_data")?,
            signature: decode_optional_bytes(row, "signature")?,
            final_status: final_status.parse().map_err(DatabaseError::Decode)?,
            failure_reason: row.try_get("failure_reason").map_err(DatabaseError::from)?,
            total_retries: row.try_get("total_retries").map_err(DatabaseError::from)?,
            archive_reason: archive_reason.parse().map_err(DatabaseError::Decode)?,
            archived_at: row.try_get("archived_at").map_err(DatabaseError::from)?,
            original_created_at: row
                .try_get("original_created_at")
                .map_err(DatabaseError::from)?,
        })
    }

    /// Move due, unlocked rows still in one of `from` to `to`
    async fn requeue(
        &self,
        ids: &[i64],
        from: &[InteractionStatus],
        to: InteractionStatus,
    ) -> Result<u64, AppError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let from: Vec<&str> = from.iter().map(InteractionStatus::as_str).collect();
        let moved = sqlx::query(
            "UPDATE pending_interactions SET status = $1, updated_at = NOW() \
             WHERE id = ANY($2) \
               AND status = ANY($3) \
               AND locked_at IS NULL \
               AND (next_retry_at IS NULL OR next_retry_at <= NOW())",
        )
        .bind(to.as_str())
        .bind(ids)
        .bind(&from)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?
        .rows_affected();
        Ok(moved)
    }
}

fn decode_bytes(row: &PgRow, column: &str) -> Result<Bytes, AppError> {
    let raw: Vec<u8> = row.try_get(column).map_err(DatabaseError::from)?;
    Ok(raw.into())
}

fn decode_optional_bytes(row: &PgRow, column: &str) -> Result<Option<Bytes>, AppError> {
    let raw: Option<Vec<u8>> = row.try_get(column).map_err(DatabaseError::from)?;
    Ok(raw.map(Bytes::from))
}

fn decode_address(row: &PgRow, column: &str) -> Result<Address, AppError> {
    let raw: Vec<u8> = row.try_get(column).map_err(DatabaseError::from)?;
    Address::try_from(raw.as_slice()).map_err(|_| {
        AppError::Database(DatabaseError::Decode(format!(
            "{} has {} bytes, expected 20",
            column,
            raw.len()
        )))
    })
}

fn decode_b256(row: &PgRow, column: &str) -> Result<B256, AppError> {
    let raw: Vec<u8> = row.try_get(column).map_err(DatabaseError::from)?;
    B256::try_from(raw.as_slice()).map_err(|_| {
        AppError::Database(DatabaseError::Decode(format!(
            "{} has {} bytes, expected 32",
            column,
            raw.len()
        )))
    })
}

fn decode_denominator(row: &PgRow) -> Result<u8, AppError> {
    let raw: i16 = row.try_get("type_denominator").map_err(DatabaseError::from)?;
    u8::try_from(raw).map_err(|_| {
        AppError::Database(DatabaseError::Decode(format!(
            "type_denominator {} out of range",
            raw
        )))
    })
}

fn ids_of(rows: &[PendingInteraction]) -> Vec<i64> {
    rows.iter().map(|r| r.id).collect()
}

#[async_trait]
impl InteractionStore for PostgresClient {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self, skip_process))]
    async fn get_and_lock(
        &self,
        status: InteractionStatus,
        limit: i64,
        skip_process: Option<&SkipPredicate>,
    ) -> Result<Vec<PendingInteraction>, AppError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;

        let released = sqlx::query(
            "UPDATE pending_interactions SET locked_at = NULL \
             WHERE locked_at IS NOT NULL AND locked_at < $1",
        )
        .bind(now - self.lock_timeout)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from)?
        .rows_affected();
        if released > 0 {
            info!(count = released, "Released stale interaction locks");
        }

        let rows = sqlx::query(&format!(
            "SELECT {PENDING_COLUMNS} FROM pending_interactions \
             WHERE status = $1 AND locked_at IS NULL \
             ORDER BY created_at ASC, id ASC \
             LIMIT $2 \
             FOR UPDATE SKIP LOCKED"
        ))
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&mut *tx)
        .await
        .map_err(DatabaseError::from)?;

        let mut candidates = rows
            .iter()
            .map(Self::row_to_pending)
            .collect::<Result<Vec<_>, _>>()?;

        let skip = match skip_process {
            Some(predicate) => predicate(&candidates),
            None => skip_if_empty(&candidates),
        };
        if skip {
            // Keep the stale-lock release even when abandoning
            tx.commit().await.map_err(DatabaseError::from)?;
            return Ok(Vec::new());
        }

        sqlx::query("UPDATE pending_interactions SET locked_at = $1 WHERE id = ANY($2)")
            .bind(now)
            .bind(ids_of(&candidates))
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from)?;
        tx.commit().await.map_err(DatabaseError::from)?;

        for candidate in &mut candidates {
            candidate.locked_at = Some(now);
        }
        Ok(candidates)
    }

    #[instrument(skip(self, rows), fields(count = rows.len()))]
    async fn unlock(&self, rows: &[PendingInteraction]) -> Result<(), AppError> {
        if rows.is_empty() {
            return Ok(());
        }
        sqlx::query("UPDATE pending_interactions SET locked_at = NULL WHERE id = ANY($1)")
            .bind(ids_of(rows))
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from)?;
        Ok(())
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn reset_for_simulation(&self, ids: &[i64]) -> Result<u64, AppError> {
        self.requeue(
            ids,
            &[InteractionStatus::Failed, InteractionStatus::NoSession],
            InteractionStatus::Pending,
        )
        .await
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn reset_for_execution(&self, ids: &[i64]) -> Result<u64, AppError> {
        self.requeue(
            ids,
            &[InteractionStatus::ExecutionFailed],
            InteractionStatus::Succeeded,
        )
        .await
    }

    #[instrument(skip(self, interactions), fields(count = interactions.len()))]
    async fn insert_pending(&self, interactions: &[NewInteraction]) -> Result<u64, AppError> {
        if interactions.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        let mut inserted = 0;
        for interaction in interactions {
            inserted += sqlx::query(
                "INSERT INTO pending_interactions \
                 (wallet, product_id, type_denominator, interaction_data, signature, status) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(interaction.wallet.as_slice())
            .bind(interaction.product_id.as_slice())
            .bind(i16::from(interaction.type_denominator))
            .bind(&interaction.interaction_data[..])
            .bind(interaction.signature.as_ref().map(|s| s.to_vec()))
            .bind(InteractionStatus::Pending.as_str())
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from)?
            .rows_affected();
        }
        tx.commit().await.map_err(DatabaseError::from)?;
        Ok(inserted)
    }

    #[instrument(skip(self, outcomes), fields(count = outcomes.len()))]
    async fn apply_outcomes(&self, outcomes: &[InteractionOutcome]) -> Result<(), AppError> {
        if outcomes.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        for outcome in outcomes {
            sqlx::query(
                "UPDATE pending_interactions \
                 SET status = $1, failure_reason = $2, retry_count = $3, \
                     last_retry_at = $4, next_retry_at = $5, updated_at = NOW() \
                 WHERE id = $6",
            )
            .bind(outcome.status.as_str())
            .bind(outcome.failure_reason.as_deref())
            .bind(outcome.retry_count)
            .bind(outcome.last_retry_at)
            .bind(outcome.next_retry_at)
            .bind(outcome.id)
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from)?;
        }
        tx.commit().await.map_err(DatabaseError::from)?;
        Ok(())
    }

    #[instrument(skip(self, prepared), fields(count = prepared.len(), tx_hash = %tx_hash))]
    async fn mark_pushed(
        &self,
        prepared: &[PreparedInteraction],
        tx_hash: B256,
    ) -> Result<u64, AppError> {
        if prepared.is_empty() {
            return Ok(0);
        }
        let ids: Vec<i64> = prepared.iter().map(|p| p.interaction.id).collect();
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        let removed: Vec<i64> =
            sqlx::query_scalar("DELETE FROM pending_interactions WHERE id = ANY($1) RETURNING id")
                .bind(&ids)
                .fetch_all(&mut *tx)
                .await
                .map_err(DatabaseError::from)?;
        if removed.len() != prepared.len() {
            let missing: Vec<i64> = ids.iter().filter(|id| !removed.contains(id)).copied().collect();
            error!(
                tx_hash = %tx_hash,
                missing = ?missing,
                "CRITICAL: pushed interactions were no longer pending"
            );
        }

        for p in prepared.iter().filter(|p| removed.contains(&p.interaction.id)) {
            let row = &p.interaction;
            sqlx::query(
                "INSERT INTO pushed_interactions \
                 (wallet, product_id, type_denominator, interaction_data, signature, tx_hash, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(row.wallet.as_slice())
            .bind(row.product_id.as_slice())
            .bind(i16::from(row.type_denominator))
            .bind(&row.interaction_data[..])
            .bind(&p.signature[..])
            .bind(tx_hash.as_slice())
            .bind(row.created_at)
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from)?;
        }
        tx.commit().await.map_err(|e| {
            error!(error = %e, "Commit of pushed batch failed");
            DatabaseError::from(e)
        })?;
        Ok(removed.len() as u64)
    }

    #[instrument(skip(self))]
    async fn get_retry_candidates(&self, limit: i64) -> Result<Vec<PendingInteraction>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {PENDING_COLUMNS} FROM pending_interactions \
             WHERE status IN ('no_session', 'failed', 'execution_failed') \
               AND locked_at IS NULL \
               AND (next_retry_at IS NULL OR next_retry_at <= NOW()) \
             ORDER BY next_retry_at ASC NULLS FIRST, created_at ASC \
             LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        rows.iter().map(Self::row_to_pending).collect()
    }

    #[instrument(skip(self, rows), fields(count = rows.len(), reason = %reason))]
    async fn archive(
        &self,
        rows: &[PendingInteraction],
        reason: ArchiveReason,
    ) -> Result<u64, AppError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let statuses: Vec<&str> = rows.iter().map(|r| r.status.as_str()).collect();
        // The DELETE takes the row lock, a concurrent archive of the same row moves nothing
        let archived = sqlx::query(
            "WITH moved AS ( \
                 DELETE FROM pending_interactions \
                 WHERE locked_at IS NULL \
                   AND (id, status) IN (SELECT * FROM UNNEST($1::BIGINT[], $2::TEXT[])) \
                 RETURNING id, wallet, product_id, type_denominator, interaction_data, \
                           signature, status, failure_reason, retry_count, created_at \
             ) \
             INSERT INTO archived_interactions \
             (original_id, wallet, product_id, type_denominator, interaction_data, signature, \
              final_status, failure_reason, total_retries, archive_reason, original_created_at) \
             SELECT id, wallet, product_id, type_denominator, interaction_data, signature, \
                    status, failure_reason, retry_count, $3, created_at \
             FROM moved",
        )
        .bind(ids_of(rows))
        .bind(&statuses)
        .bind(reason.as_str())
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?
        .rows_affected();
        Ok(archived)
    }

    #[instrument(skip(self))]
    async fn get_pending(&self, id: i64) -> Result<Option<PendingInteraction>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {PENDING_COLUMNS} FROM pending_interactions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        row.as_ref().map(Self::row_to_pending).transpose()
    }

    #[instrument(skip(self), fields(wallet = %wallet))]
    async fn get_pending_by_wallet(
        &self,
        wallet: Address,
    ) -> Result<Vec<PendingInteraction>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {PENDING_COLUMNS} FROM pending_interactions \
             WHERE wallet = $1 ORDER BY created_at DESC"
        ))
        .bind(wallet.as_slice())
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        rows.iter().map(Self::row_to_pending).collect()
    }

    #[instrument(skip(self), fields(wallet = %wallet))]
    async fn get_pushed_by_wallet(
        &self,
        wallet: Address,
    ) -> Result<Vec<PushedInteraction>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {PUSHED_COLUMNS} FROM pushed_interactions \
             WHERE wallet = $1 ORDER BY pushed_at DESC"
        ))
        .bind(wallet.as_slice())
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        rows.iter().map(Self::row_to_pushed).collect()
    }

    #[instrument(skip(self), fields(wallet = %wallet))]
    async fn get_archived_by_wallet(
        &self,
        wallet: Address,
    ) -> Result<Vec<ArchivedInteraction>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {ARCHIVED_COLUMNS} FROM archived_interactions \
             WHERE wallet = $1 ORDER BY archived_at DESC"
        ))
        .bind(wallet.as_slice())
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        rows.iter().map(Self::row_to_archived).collect()
    }

    #[instrument(skip(self))]
    async fn queue_stats(&self) -> Result<QueueStats, AppError> {
        let mut stats = QueueStats::default();

        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM pending_interactions GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;
        for row in &rows {
            let status: String = row.get("status");
            let count: i64 = row.get("count");
            let status: InteractionStatus = status.parse().map_err(DatabaseError::Decode)?;
            stats.add_status(status, count);
        }

        let totals = sqlx::query(
            "SELECT \
               (SELECT COUNT(*) FROM pending_interactions WHERE locked_at IS NOT NULL) AS locked, \
               (SELECT COUNT(*) FROM pushed_interactions) AS pushed, \
               (SELECT COUNT(*) FROM archived_interactions) AS archived",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from)?;
        stats.locked = totals.get("locked");
        stats.pushed = totals.get("pushed");
        stats.archived = totals.get("archived");

        Ok(stats)
    }
}
