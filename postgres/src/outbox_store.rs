//! `PostgreSQL` implementation of [`OutboxStore`].
//!
//! A claim is an open transaction holding row locks on the claimed messages
//! (`FOR UPDATE SKIP LOCKED`). Another dispatcher claiming at the same time
//! skips those rows. Recording outcomes commits the transaction; dropping the
//! batch rolls it back and releases the locks.

use crate::database_error;
use chrono::{DateTime, Utc};
use lodgebook_core::outbox::{ClaimedBatch, DeliveryOutcome, OutboxMessage, OutboxStore};
use lodgebook_core::persistence::{BoxFuture, PersistenceError};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

/// Outbox messages stored in `PostgreSQL`.
#[derive(Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    /// Create a store on an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Every message in insertion order, processed or not.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Database`] if the query fails.
    pub async fn messages(&self) -> Result<Vec<OutboxMessage>, PersistenceError> {
        let rows = sqlx::query(
            r"
            SELECT sequence, id, occurred_at, event_type, payload, processed_at, error
            FROM outbox_messages
            ORDER BY sequence ASC
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(database_error)?;

        rows.iter().map(row_to_message).collect()
    }

    async fn claim_batch(&self, limit: usize) -> Result<Box<dyn ClaimedBatch>, PersistenceError> {
        let mut tx = self.pool.begin().await.map_err(database_error)?;

        #[allow(clippy::cast_possible_wrap)] // Batch sizes are small
        let rows = sqlx::query(
            r"
            SELECT sequence, id, occurred_at, event_type, payload, processed_at, error
            FROM outbox_messages
            WHERE processed_at IS NULL
            ORDER BY sequence ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            ",
        )
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(database_error)?;

        let messages = rows.iter().map(row_to_message).collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(claimed = messages.len(), limit, "Outbox messages claimed");
        Ok(Box::new(PgClaimedBatch { tx, messages }))
    }

    async fn count_pending(&self) -> Result<u64, PersistenceError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox_messages WHERE processed_at IS NULL")
            .fetch_one(&self.pool)
            .await
            .map_err(database_error)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

impl OutboxStore for PostgresOutboxStore {
    fn claim(&self, limit: usize) -> BoxFuture<'_, Result<Box<dyn ClaimedBatch>, PersistenceError>> {
        Box::pin(self.claim_batch(limit))
    }

    fn pending_count(&self) -> BoxFuture<'_, Result<u64, PersistenceError>> {
        Box::pin(self.count_pending())
    }
}

/// Messages locked by one claim transaction.
pub struct PgClaimedBatch {
    tx: Transaction<'static, Postgres>,
    messages: Vec<OutboxMessage>,
}

impl ClaimedBatch for PgClaimedBatch {
    fn messages(&self) -> &[OutboxMessage] {
        &self.messages
    }

    fn record(
        self: Box<Self>,
        outcomes: Vec<DeliveryOutcome>,
    ) -> BoxFuture<'static, Result<usize, PersistenceError>> {
        Box::pin(async move {
            let Self { mut tx, messages } = *self;
            let mut updated: u64 = 0;

            for outcome in outcomes {
                if !messages.iter().any(|m| m.id == outcome.message_id()) {
                    tracing::warn!(message_id = %outcome.message_id(), "Outcome for unclaimed message ignored");
                    continue;
                }
                let result = match outcome {
                    DeliveryOutcome::Delivered {
                        message_id,
                        processed_at,
                    } => {
                        sqlx::query("UPDATE outbox_messages SET processed_at = $2, error = NULL WHERE id = $1")
                            .bind(message_id)
                            .bind(processed_at)
                            .execute(&mut *tx)
                            .await
                    }
                    DeliveryOutcome::Failed { message_id, error } => {
                        sqlx::query("UPDATE outbox_messages SET error = $2 WHERE id = $1")
                            .bind(message_id)
                            .bind(error)
                            .execute(&mut *tx)
                            .await
                    }
                };
                updated += result.map_err(database_error)?.rows_affected();
            }

            tx.commit().await.map_err(database_error)?;
            Ok(usize::try_from(updated).unwrap_or(usize::MAX))
        })
    }
}

fn row_to_message(row: &PgRow) -> Result<OutboxMessage, PersistenceError> {
    let id: Uuid = row.try_get("id").map_err(database_error)?;
    let occurred_at: DateTime<Utc> = row.try_get("occurred_at").map_err(database_error)?;

    Ok(OutboxMessage {
        sequence: row.try_get("sequence").map_err(database_error)?,
        id,
        occurred_at,
        event_type: row.try_get("event_type").map_err(database_error)?,
        payload: row.try_get("payload").map_err(database_error)?,
        processed_at: row.try_get("processed_at").map_err(database_error)?,
        error: row.try_get("error").map_err(database_error)?,
    })
}
