//! Ledger storage backends.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{LedgerResult, LedgerSummary, UsageEvent};

/// Trait for usage ledger backends.
///
/// Appends must be safe under concurrent callers (the store's native insert
/// semantics, no read-modify-write). Time windows are half-open:
/// `[since, until)`.
#[async_trait::async_trait]
pub trait UsageLedger: Send + Sync {
    fn name(&self) -> &str;

    /// Append one event.
    async fn append(&self, event: UsageEvent) -> LedgerResult<()>;

    /// Sum of `total_tokens` for an organization over `[since, until)`.
    async fn sum_tokens(
        &self,
        organization_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> LedgerResult<u64>;

    /// Number of events with this fingerprint for an organization since a
    /// cutoff.
    async fn count_fingerprint(
        &self,
        organization_id: &str,
        fingerprint: &str,
        since: DateTime<Utc>,
    ) -> LedgerResult<u64>;

    /// Aggregate summary for an organization over `[since, until)`.
    async fn summarize(
        &self,
        organization_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> LedgerResult<LedgerSummary>;
}

/// In-memory ledger (for testing and single-instance deployments)
#[derive(Debug, Default)]
pub struct MemoryLedger {
    events: Arc<RwLock<Vec<UsageEvent>>>,
}

impl MemoryLedger {
    /// Create a new in-memory ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of stored events
    pub async fn count(&self) -> usize {
        self.events.read().await.len()
    }

    /// Clear all events
    pub async fn clear(&self) {
        self.events.write().await.clear();
    }
}

#[async_trait::async_trait]
impl UsageLedger for MemoryLedger {
    fn name(&self) -> &str {
        "memory"
    }

    async fn append(&self, event: UsageEvent) -> LedgerResult<()> {
        let mut events = self.events.write().await;
        events.push(event);
        Ok(())
    }

    async fn sum_tokens(
        &self,
        organization_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> LedgerResult<u64> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|e| {
                e.organization_id == organization_id
                    && e.created_at >= since
                    && e.created_at < until
            })
            .map(|e| e.total_tokens)
            .sum())
    }

    async fn count_fingerprint(
        &self,
        organization_id: &str,
        fingerprint: &str,
        since: DateTime<Utc>,
    ) -> LedgerResult<u64> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|e| {
                e.organization_id == organization_id
                    && e.prompt_fingerprint == fingerprint
                    && e.created_at >= since
            })
            .count() as u64)
    }

    async fn summarize(
        &self,
        organization_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> LedgerResult<LedgerSummary> {
        let events = self.events.read().await;
        let in_window: Vec<&UsageEvent> = events
            .iter()
            .filter(|e| {
                e.organization_id == organization_id
                    && e.created_at >= since
                    && e.created_at < until
            })
            .collect();

        let call_count = in_window.len() as u64;
        if call_count == 0 {
            return Ok(LedgerSummary::default());
        }

        let total_tokens = in_window.iter().map(|e| e.total_tokens).sum();
        let total_latency: u64 = in_window.iter().map(|e| e.latency_ms).sum();
        let cache_hits = in_window.iter().filter(|e| e.cache_hit).count() as u64;

        Ok(LedgerSummary {
            total_tokens,
            call_count,
            average_latency_ms: total_latency / call_count,
            cache_hit_rate: cache_hits as f64 / call_count as f64,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use uuid::Uuid;

    use super::*;

    fn event(org: &str, tokens: u64, created_at: DateTime<Utc>) -> UsageEvent {
        UsageEvent {
            id: Uuid::new_v4(),
            organization_id: org.to_string(),
            user_id: "user-1".to_string(),
            feature: "story_draft".to_string(),
            model: "test-model".to_string(),
            input_tokens: tokens / 2,
            output_tokens: tokens - tokens / 2,
            total_tokens: tokens,
            latency_ms: 800,
            cache_hit: false,
            prompt_fingerprint: "fp".to_string(),
            metadata: serde_json::json!({}),
            created_at,
        }
    }

    #[tokio::test]
    async fn test_sum_tokens_scoped_by_org() {
        let ledger = MemoryLedger::new();
        let now = Utc::now();

        ledger.append(event("org-a", 1_000, now)).await.unwrap();
        ledger.append(event("org-a", 2_000, now)).await.unwrap();
        ledger.append(event("org-b", 5_000, now)).await.unwrap();

        let since = now - Duration::hours(1);
        let until = now + Duration::hours(1);
        assert_eq!(ledger.sum_tokens("org-a", since, until).await.unwrap(), 3_000);
        assert_eq!(ledger.sum_tokens("org-b", since, until).await.unwrap(), 5_000);
        assert_eq!(ledger.sum_tokens("org-c", since, until).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sum_tokens_window_is_half_open() {
        let ledger = MemoryLedger::new();
        let boundary = Utc::now();

        ledger
            .append(event("org-a", 100, boundary - Duration::seconds(1)))
            .await
            .unwrap();
        ledger.append(event("org-a", 200, boundary)).await.unwrap();

        // [boundary, later) includes the event at the boundary, not before it
        let sum = ledger
            .sum_tokens("org-a", boundary, boundary + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(sum, 200);

        // [earlier, boundary) excludes the event at the boundary
        let sum = ledger
            .sum_tokens("org-a", boundary - Duration::hours(1), boundary)
            .await
            .unwrap();
        assert_eq!(sum, 100);
    }

    #[tokio::test]
    async fn test_count_fingerprint() {
        let ledger = MemoryLedger::new();
        let now = Utc::now();

        let mut repeated = event("org-a", 100, now);
        repeated.prompt_fingerprint = "abc123".to_string();
        ledger.append(repeated.clone()).await.unwrap();
        repeated.id = Uuid::new_v4();
        ledger.append(repeated).await.unwrap();

        let mut other_org = event("org-b", 100, now);
        other_org.prompt_fingerprint = "abc123".to_string();
        ledger.append(other_org).await.unwrap();

        let since = now - Duration::minutes(10);
        assert_eq!(
            ledger.count_fingerprint("org-a", "abc123", since).await.unwrap(),
            2
        );
        assert_eq!(
            ledger.count_fingerprint("org-b", "abc123", since).await.unwrap(),
            1
        );
        assert_eq!(
            ledger.count_fingerprint("org-a", "zzz", since).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_count_fingerprint_respects_cutoff() {
        let ledger = MemoryLedger::new();
        let now = Utc::now();

        let mut old = event("org-a", 100, now - Duration::minutes(30));
        old.prompt_fingerprint = "abc123".to_string();
        ledger.append(old).await.unwrap();

        let since = now - Duration::minutes(10);
        assert_eq!(
            ledger.count_fingerprint("org-a", "abc123", since).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_summarize() {
        let ledger = MemoryLedger::new();
        let now = Utc::now();

        let mut hit = event("org-a", 1_000, now);
        hit.cache_hit = true;
        hit.latency_ms = 400;
        ledger.append(hit).await.unwrap();

        let mut miss = event("org-a", 3_000, now);
        miss.latency_ms = 1_200;
        ledger.append(miss).await.unwrap();

        let summary = ledger
            .summarize("org-a", now - Duration::hours(1), now + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(summary.total_tokens, 4_000);
        assert_eq!(summary.call_count, 2);
        assert_eq!(summary.average_latency_ms, 800);
        assert!((summary.cache_hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_summarize_empty_window() {
        let ledger = MemoryLedger::new();
        let now = Utc::now();

        let summary = ledger
            .summarize("org-a", now - Duration::hours(1), now)
            .await
            .unwrap();
        assert_eq!(summary.call_count, 0);
        assert_eq!(summary.total_tokens, 0);
        assert_eq!(summary.average_latency_ms, 0);
    }
}
