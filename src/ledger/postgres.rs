//! PostgreSQL ledger backend.
//!
//! Enable with the `postgres` feature flag.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::store::UsageLedger;
use super::{LedgerError, LedgerResult, LedgerSummary, UsageEvent, with_retry};

const MAX_RETRIES: u32 = 2;
const INITIAL_BACKOFF: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_millis(500);

/// PostgreSQL ledger backend.
///
/// Appends are plain INSERTs; aggregates are computed per query with
/// SUM/COUNT. No row is ever updated.
pub struct PostgresLedger {
    pool: Arc<PgPool>,
    table_name: String,
}

impl PostgresLedger {
    /// Create a new PostgreSQL ledger backend.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::with_pool(Arc::new(pool)))
    }

    /// Create with an existing connection pool.
    pub fn with_pool(pool: Arc<PgPool>) -> Self {
        Self {
            pool,
            table_name: "usage_events".to_string(),
        }
    }

    /// Set custom table name.
    pub fn with_table_name(mut self, name: impl Into<String>) -> Self {
        self.table_name = name.into();
        self
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        let query = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id UUID PRIMARY KEY,
                organization_id VARCHAR(255) NOT NULL,
                user_id VARCHAR(255) NOT NULL,
                feature VARCHAR(64) NOT NULL,
                model VARCHAR(128) NOT NULL,
                input_tokens BIGINT NOT NULL,
                output_tokens BIGINT NOT NULL,
                total_tokens BIGINT NOT NULL,
                latency_ms BIGINT NOT NULL,
                cache_hit BOOLEAN NOT NULL DEFAULT FALSE,
                prompt_fingerprint VARCHAR(64) NOT NULL,
                metadata JSONB NOT NULL DEFAULT '{{}}',
                created_at TIMESTAMPTZ NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{table}_org_period
                ON {table} (organization_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_{table}_fingerprint
                ON {table} (organization_id, prompt_fingerprint, created_at);
            "#,
            table = self.table_name
        );
        sqlx::query(&query).execute(&*self.pool).await?;
        Ok(())
    }
}

fn storage_err(e: sqlx::Error) -> LedgerError {
    LedgerError::Unavailable {
        message: e.to_string(),
    }
}

fn to_db(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl UsageLedger for PostgresLedger {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn append(&self, event: UsageEvent) -> LedgerResult<()> {
        let query = format!(
            r#"
            INSERT INTO {} (id, organization_id, user_id, feature, model,
                input_tokens, output_tokens, total_tokens, latency_ms,
                cache_hit, prompt_fingerprint, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
            self.table_name
        );

        with_retry(MAX_RETRIES, INITIAL_BACKOFF, MAX_BACKOFF, || async {
            sqlx::query(&query)
                .bind(event.id)
                .bind(&event.organization_id)
                .bind(&event.user_id)
                .bind(&event.feature)
                .bind(&event.model)
                .bind(to_db(event.input_tokens))
                .bind(to_db(event.output_tokens))
                .bind(to_db(event.total_tokens))
                .bind(to_db(event.latency_ms))
                .bind(event.cache_hit)
                .bind(&event.prompt_fingerprint)
                .bind(&event.metadata)
                .bind(event.created_at)
                .execute(&*self.pool)
                .await
                .map_err(storage_err)?;
            Ok(())
        })
        .await
    }

    async fn sum_tokens(
        &self,
        organization_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> LedgerResult<u64> {
        let query = format!(
            "SELECT COALESCE(SUM(total_tokens), 0)::bigint FROM {}
             WHERE organization_id = $1 AND created_at >= $2 AND created_at < $3",
            self.table_name
        );

        let total: i64 = with_retry(MAX_RETRIES, INITIAL_BACKOFF, MAX_BACKOFF, || async {
            sqlx::query_scalar(&query)
                .bind(organization_id)
                .bind(since)
                .bind(until)
                .fetch_one(&*self.pool)
                .await
                .map_err(storage_err)
        })
        .await?;

        Ok(total.max(0) as u64)
    }

    async fn count_fingerprint(
        &self,
        organization_id: &str,
        fingerprint: &str,
        since: DateTime<Utc>,
    ) -> LedgerResult<u64> {
        let query = format!(
            "SELECT COUNT(*)::bigint FROM {}
             WHERE organization_id = $1 AND prompt_fingerprint = $2 AND created_at >= $3",
            self.table_name
        );

        let count: i64 = with_retry(MAX_RETRIES, INITIAL_BACKOFF, MAX_BACKOFF, || async {
            sqlx::query_scalar(&query)
                .bind(organization_id)
                .bind(fingerprint)
                .bind(since)
                .fetch_one(&*self.pool)
                .await
                .map_err(storage_err)
        })
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn summarize(
        &self,
        organization_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> LedgerResult<LedgerSummary> {
        let query = format!(
            "SELECT COALESCE(SUM(total_tokens), 0)::bigint,
                    COUNT(*)::bigint,
                    COALESCE(AVG(latency_ms), 0)::bigint,
                    COALESCE(AVG(CASE WHEN cache_hit THEN 1.0 ELSE 0.0 END), 0)::float8
             FROM {}
             WHERE organization_id = $1 AND created_at >= $2 AND created_at < $3",
            self.table_name
        );

        let row: (i64, i64, i64, f64) =
            with_retry(MAX_RETRIES, INITIAL_BACKOFF, MAX_BACKOFF, || async {
                sqlx::query_as(&query)
                    .bind(organization_id)
                    .bind(since)
                    .bind(until)
                    .fetch_one(&*self.pool)
                    .await
                    .map_err(storage_err)
            })
            .await?;

        Ok(LedgerSummary {
            total_tokens: row.0.max(0) as u64,
            call_count: row.1.max(0) as u64,
            average_latency_ms: row.2.max(0) as u64,
            cache_hit_rate: row.3,
        })
    }
}
