//! Usage recording.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::ledger::{LedgerResult, UsageEvent, UsageLedger, UsageMetrics};

/// Appends one event per completed provider invocation.
///
/// Call exactly once, after the provider returned, so recorded tokens are
/// actual rather than estimated. Never call for a failed invocation. No
/// aggregate is touched here: checkers recompute from raw events.
pub struct UsageRecorder {
    ledger: Arc<dyn UsageLedger>,
}

impl UsageRecorder {
    pub fn new(ledger: Arc<dyn UsageLedger>) -> Self {
        Self { ledger }
    }

    pub async fn record(
        &self,
        organization_id: &str,
        user_id: &str,
        feature: &str,
        prompt_fingerprint: &str,
        metrics: &UsageMetrics,
        metadata: serde_json::Value,
    ) -> LedgerResult<UsageEvent> {
        let event = UsageEvent {
            id: Uuid::new_v4(),
            organization_id: organization_id.to_string(),
            user_id: user_id.to_string(),
            feature: feature.to_string(),
            model: metrics.model.clone(),
            input_tokens: metrics.input_tokens,
            output_tokens: metrics.output_tokens,
            total_tokens: metrics.total_tokens(),
            latency_ms: metrics.latency_ms,
            cache_hit: metrics.cache_hit,
            prompt_fingerprint: prompt_fingerprint.to_string(),
            metadata,
            created_at: Utc::now(),
        };

        self.ledger.append(event.clone()).await?;
        tracing::debug!(
            organization_id,
            user_id,
            feature,
            total_tokens = event.total_tokens,
            cache_hit = event.cache_hit,
            "recorded usage event"
        );
        Ok(event)
    }
}
