//! Append-only usage ledger.
//!
//! The ledger is the durable record every allowance decision is computed
//! from. Events are written once per completed invocation and never mutated;
//! aggregates are always recomputed per query, never stored and incremented.

mod store;

#[cfg(feature = "postgres")]
mod postgres;

pub use store::{MemoryLedger, UsageLedger};

#[cfg(feature = "postgres")]
pub use postgres::PostgresLedger;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger unavailable: {message}")]
    Unavailable { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Unavailable { .. })
    }
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// One completed AI invocation, as incurred by an organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    pub id: Uuid,
    pub organization_id: String,
    pub user_id: String,
    pub feature: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub latency_ms: u64,
    pub cache_hit: bool,
    pub prompt_fingerprint: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Measured consumption of one provider call, as reported by the provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageMetrics {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub latency_ms: u64,
    pub cache_hit: bool,
}

impl UsageMetrics {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Aggregates over one organization's events in a time window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub total_tokens: u64,
    pub call_count: u64,
    pub average_latency_ms: u64,
    pub cache_hit_rate: f64,
}

/// Retry a ledger operation on transient storage failures with capped
/// exponential backoff and symmetrical 10% jitter.
#[cfg(feature = "postgres")]
pub(crate) async fn with_retry<F, Fut, T>(
    max_retries: u32,
    initial_backoff: std::time::Duration,
    max_backoff: std::time::Duration,
    operation: F,
) -> LedgerResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = LedgerResult<T>>,
{
    let mut attempt = 0;
    let mut backoff = initial_backoff;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < max_retries && e.is_retryable() => {
                attempt += 1;
                tracing::warn!(
                    attempt = attempt,
                    error = %e,
                    "Retrying ledger operation after transient failure"
                );
                let jitter_factor = 1.0 + (rand::random::<f64>() * 0.2 - 0.1);
                tokio::time::sleep(backoff.mul_f64(jitter_factor)).await;
                backoff = (backoff * 2).min(max_backoff);
            }
            Err(e) => return Err(e),
        }
    }
}
