//! Duplicate request detection.
//!
//! Reads the same ledger the recorder writes, so the count is naturally
//! consistent with billing at the cost of one extra read per request. The
//! Postgres backend indexes (organization_id, prompt_fingerprint,
//! created_at) to keep it cheap.

use std::sync::Arc;

use chrono::Utc;

use crate::ledger::{LedgerResult, UsageLedger};

#[derive(Debug, Clone, Copy)]
pub struct DuplicateCheck {
    pub is_duplicate: bool,
    /// Recorded identical requests within the trailing window.
    pub count: u64,
}

/// Flags the same organization repeating an identical request beyond the
/// threshold within a short window - scripted abuse, not retry traffic.
pub struct DuplicateDetector {
    ledger: Arc<dyn UsageLedger>,
    window_minutes: u32,
    threshold: u64,
}

impl DuplicateDetector {
    pub fn new(ledger: Arc<dyn UsageLedger>, window_minutes: u32, threshold: u64) -> Self {
        Self {
            ledger,
            window_minutes,
            threshold,
        }
    }

    pub async fn check(
        &self,
        organization_id: &str,
        fingerprint: &str,
    ) -> LedgerResult<DuplicateCheck> {
        let since = Utc::now() - chrono::Duration::minutes(i64::from(self.window_minutes));
        let count = self
            .ledger
            .count_fingerprint(organization_id, fingerprint, since)
            .await?;

        // At most `threshold` identical requests are served per window; the
        // next one is flagged.
        let is_duplicate = count >= self.threshold;
        if is_duplicate {
            tracing::warn!(
                organization_id,
                fingerprint,
                count,
                window_minutes = self.window_minutes,
                "repeated identical request flagged as duplicate"
            );
        }

        Ok(DuplicateCheck {
            is_duplicate,
            count,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration};
    use uuid::Uuid;

    use super::*;
    use crate::ledger::{MemoryLedger, UsageEvent};

    fn event(org: &str, fingerprint: &str, created_at: DateTime<Utc>) -> UsageEvent {
        UsageEvent {
            id: Uuid::new_v4(),
            organization_id: org.to_string(),
            user_id: "user-1".to_string(),
            feature: "story_draft".to_string(),
            model: "test-model".to_string(),
            input_tokens: 100,
            output_tokens: 100,
            total_tokens: 200,
            latency_ms: 500,
            cache_hit: false,
            prompt_fingerprint: fingerprint.to_string(),
            metadata: serde_json::json!({}),
            created_at,
        }
    }

    #[tokio::test]
    async fn test_fourth_identical_request_is_flagged() {
        let ledger = Arc::new(MemoryLedger::new());
        let detector = DuplicateDetector::new(Arc::clone(&ledger) as Arc<dyn UsageLedger>, 10, 3);

        for _ in 0..2 {
            ledger.append(event("org-a", "fp-1", Utc::now())).await.unwrap();
        }
        let third = detector.check("org-a", "fp-1").await.unwrap();
        assert!(!third.is_duplicate);
        assert_eq!(third.count, 2);

        ledger.append(event("org-a", "fp-1", Utc::now())).await.unwrap();
        let fourth = detector.check("org-a", "fp-1").await.unwrap();
        assert!(fourth.is_duplicate);
        assert_eq!(fourth.count, 3);
    }

    #[tokio::test]
    async fn test_other_organization_is_never_flagged() {
        let ledger = Arc::new(MemoryLedger::new());
        let detector = DuplicateDetector::new(Arc::clone(&ledger) as Arc<dyn UsageLedger>, 10, 3);

        for _ in 0..4 {
            ledger.append(event("org-a", "fp-1", Utc::now())).await.unwrap();
        }

        let other = detector.check("org-b", "fp-1").await.unwrap();
        assert!(!other.is_duplicate);
        assert_eq!(other.count, 0);
    }

    #[tokio::test]
    async fn test_events_outside_window_do_not_count() {
        let ledger = Arc::new(MemoryLedger::new());
        let detector = DuplicateDetector::new(Arc::clone(&ledger) as Arc<dyn UsageLedger>, 10, 3);

        let old = Utc::now() - Duration::minutes(30);
        for _ in 0..5 {
            ledger.append(event("org-a", "fp-1", old)).await.unwrap();
        }

        let check = detector.check("org-a", "fp-1").await.unwrap();
        assert!(!check.is_duplicate);
        assert_eq!(check.count, 0);
    }
}
