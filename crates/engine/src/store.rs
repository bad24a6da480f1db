//! Registration storage contract and its PostgreSQL implementation.
//!
//! Every mutation is a single-row UPDATE; the engine needs no transactions
//! beyond the atomicity of that one statement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use sqlx::PgPool;
use uuid::Uuid;

use nudge_common::error::PushError;
use nudge_common::types::Registration;

/// Storage collaborator consumed by the scheduler and the outcome recorder.
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Lazily stream every registration eligible at `now`.
    ///
    /// The stream is finite and restartable per call. Order is unspecified.
    fn stream_due(&self, now: DateTime<Utc>) -> BoxStream<'_, Result<Registration, PushError>>;

    async fn persist_reschedule(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), PushError>;

    async fn persist_success(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        success_count: i64,
    ) -> Result<(), PushError>;

    async fn persist_failure(
        &self,
        id: Uuid,
        active: bool,
        at: DateTime<Utc>,
        failure_count: i64,
        error_code: &str,
    ) -> Result<(), PushError>;
}

/// PostgreSQL-backed registration store.
#[derive(Clone)]
pub struct PgRegistrationStore {
    pool: PgPool,
}

impl PgRegistrationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Load a single registration by id.
    pub async fn get(&self, id: Uuid) -> Result<Option<Registration>, PushError> {
        let registration = sqlx::query_as::<_, Registration>(
            r#"
            SELECT id, token, timezone, locale, next_planned_delivery, last_success,
                   last_failure, last_error_code, success_count, failure_count,
                   active, deleted, created_at
            FROM registrations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(registration)
    }

    /// Fail when an UPDATE matched no row.
    fn expect_row(id: Uuid, rows_affected: u64) -> Result<(), PushError> {
        if rows_affected == 0 {
            return Err(PushError::Storage(format!("registration {id} not found")));
        }
        Ok(())
    }
}

#[async_trait]
impl RegistrationStore for PgRegistrationStore {
    fn stream_due(&self, now: DateTime<Utc>) -> BoxStream<'_, Result<Registration, PushError>> {
        sqlx::query_as::<_, Registration>(
            r#"
            SELECT id, token, timezone, locale, next_planned_delivery, last_success,
                   last_failure, last_error_code, success_count, failure_count,
                   active, deleted, created_at
            FROM registrations
            WHERE active = true
              AND deleted = false
              AND next_planned_delivery <= $1
            "#,
        )
        .bind(now)
        .fetch(&self.pool)
        .map_err(PushError::from)
        .boxed()
    }

    async fn persist_reschedule(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), PushError> {
        let result =
            sqlx::query("UPDATE registrations SET next_planned_delivery = $2 WHERE id = $1")
                .bind(id)
                .bind(at)
                .execute(&self.pool)
                .await?;

        Self::expect_row(id, result.rows_affected())
    }

    async fn persist_success(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        success_count: i64,
    ) -> Result<(), PushError> {
        let result = sqlx::query(
            "UPDATE registrations SET last_success = $2, success_count = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .bind(success_count)
        .execute(&self.pool)
        .await?;

        Self::expect_row(id, result.rows_affected())
    }

    async fn persist_failure(
        &self,
        id: Uuid,
        active: bool,
        at: DateTime<Utc>,
        failure_count: i64,
        error_code: &str,
    ) -> Result<(), PushError> {
        let result = sqlx::query(
            r#"
            UPDATE registrations
            SET active = $2, last_failure = $3, failure_count = $4, last_error_code = $5
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(active)
        .bind(at)
        .bind(failure_count)
        .bind(error_code)
        .execute(&self.pool)
        .await?;

        Self::expect_row(id, result.rows_affected())
    }
}
