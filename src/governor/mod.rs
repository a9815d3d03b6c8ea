//! The governor facade.
//!
//! Orchestrates one AI invocation: rate limit -> monthly allowance ->
//! duplicate check, then the caller invokes the provider with the granted
//! budget and records actual consumption. Any denial short-circuits with no
//! provider call and no ledger write.

mod allowance;
mod duplicate;
mod rate;
mod recorder;
mod request;

pub use allowance::{
    AllowanceChecker, AllowanceDecision, THROTTLE_HEADROOM_DIVISOR, billing_period_start,
};
pub use duplicate::{DuplicateCheck, DuplicateDetector};
pub use rate::{RateDecision, RateLimiter};
pub use recorder::UsageRecorder;
pub use request::{AiRequest, Complexity};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::config::GovernorConfig;
use crate::fingerprint;
use crate::ledger::{LedgerError, LedgerResult, MemoryLedger, UsageEvent, UsageLedger, UsageMetrics};
use crate::tier::TierTable;

/// Why a request was denied.
#[derive(Debug, Error)]
pub enum GovernorError {
    /// Monthly hard cap reached; terminal until the billing period rolls
    /// over or the organization upgrades. Never retried automatically.
    #[error("monthly token limit reached ({used} of {limit})")]
    HardCapExceeded { used: u64, limit: u64 },

    /// Too many requests in the current window; retry after the delay.
    #[error("rate limit exceeded, retry in {}s", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    /// The same request was repeated too many times; the caller should
    /// surface "vary your input" rather than silently dropping it.
    #[error("duplicate request: {count} identical requests in the last {window_minutes} minutes")]
    DuplicateRequest { count: u64, window_minutes: u32 },

    /// The usage ledger could not be read. The governor fails closed unless
    /// the development-mode fail-open override is set.
    #[error("usage ledger unavailable: {0}")]
    Ledger(#[from] LedgerError),
}

impl GovernorError {
    /// Check if the caller may retry this denial
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GovernorError::RateLimited { .. } | GovernorError::Ledger(_)
        )
    }

    /// Get retry delay if applicable
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GovernorError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Grant to proceed with one bounded provider invocation.
///
/// The budget is fixed here; the governor is not re-consulted mid-call.
#[derive(Debug, Clone)]
pub struct Admission {
    pub max_output_tokens: u64,
    /// Set when the soft cap reduced the budget; callers surface a warning.
    pub throttled: bool,
    pub usage_percentage: f64,
    pub prompt_fingerprint: String,
    pub decision: AllowanceDecision,
}

/// Usage summary for dashboards and billing pages.
#[derive(Debug, Clone, Serialize)]
pub struct UsageReport {
    pub organization_id: String,
    pub period_start: DateTime<Utc>,
    pub current_usage: u64,
    pub soft_cap_tokens: u64,
    pub hard_cap_tokens: u64,
    pub usage_percentage: f64,
    pub call_count: u64,
    pub average_latency_ms: u64,
    pub cache_hit_rate: f64,
}

/// Gate and record every AI invocation in the process.
///
/// Safe to share across concurrent request handlers; all state is either
/// in the ledger or behind sharded in-memory locks.
pub struct Governor {
    config: GovernorConfig,
    tiers: TierTable,
    ledger: Arc<dyn UsageLedger>,
    rate: RateLimiter,
    allowance: AllowanceChecker,
    duplicates: DuplicateDetector,
    recorder: UsageRecorder,
}

impl Governor {
    pub fn new(ledger: Arc<dyn UsageLedger>, tiers: TierTable, config: GovernorConfig) -> Self {
        let rate = RateLimiter::new(config.rate_window);
        let allowance = AllowanceChecker::new(Arc::clone(&ledger), config.default_output_budget);
        let duplicates = DuplicateDetector::new(
            Arc::clone(&ledger),
            config.duplicate_window_minutes,
            config.duplicate_threshold,
        );
        let recorder = UsageRecorder::new(Arc::clone(&ledger));

        Self {
            config,
            tiers,
            ledger,
            rate,
            allowance,
            duplicates,
            recorder,
        }
    }

    pub fn builder() -> GovernorBuilder {
        GovernorBuilder::default()
    }

    /// Gate one invocation.
    ///
    /// Checks run cheapest-first: rate limit (memory only), then allowance
    /// (one ledger aggregate), then duplication (one ledger count). Each
    /// denial short-circuits with no provider call and no ledger write, so
    /// an abandoned check leaves no side effects.
    pub async fn admit(&self, request: &AiRequest) -> Result<Admission, GovernorError> {
        let policy = self.tiers.lookup(&request.tier);

        let rate = self.rate.check(&request.user_id, policy);
        if !rate.allowed {
            return Err(GovernorError::RateLimited {
                retry_after: rate.reset_in.unwrap_or(self.config.rate_window),
            });
        }

        let estimated_tokens = fingerprint::estimate_tokens(&request.prompt);
        let decision = match self
            .allowance
            .check(&request.organization_id, policy, estimated_tokens)
            .await
        {
            Ok(decision) => {
                if !decision.allowed {
                    return Err(GovernorError::HardCapExceeded {
                        used: decision.current_usage,
                        limit: decision.limit,
                    });
                }
                decision
            }
            Err(error) => {
                self.ledger_failure(&request.organization_id, error)?;
                AllowanceDecision::unchecked()
            }
        };

        let prompt_fingerprint = fingerprint::fingerprint(&request.prompt);
        match self
            .duplicates
            .check(&request.organization_id, &prompt_fingerprint)
            .await
        {
            Ok(dup) if dup.is_duplicate => {
                return Err(GovernorError::DuplicateRequest {
                    count: dup.count,
                    window_minutes: self.config.duplicate_window_minutes,
                });
            }
            Ok(_) => {}
            Err(error) => self.ledger_failure(&request.organization_id, error)?,
        }

        let max_output_tokens = if decision.throttled {
            decision
                .suggested_max_output_tokens
                .unwrap_or(self.config.default_output_budget)
        } else {
            request.complexity.scale(self.config.default_output_budget)
        };

        Ok(Admission {
            max_output_tokens,
            throttled: decision.throttled,
            usage_percentage: decision.usage_percentage,
            prompt_fingerprint,
            decision,
        })
    }

    /// Record actual consumption after a successful provider call.
    ///
    /// Do not call when the provider call failed or timed out: no event is
    /// written for work that did not happen.
    pub async fn record(
        &self,
        request: &AiRequest,
        admission: &Admission,
        metrics: &UsageMetrics,
        metadata: serde_json::Value,
    ) -> LedgerResult<UsageEvent> {
        self.recorder
            .record(
                &request.organization_id,
                &request.user_id,
                &request.feature,
                &admission.prompt_fingerprint,
                metrics,
                metadata,
            )
            .await
    }

    /// Current-period usage summary for one organization.
    pub async fn usage_report(
        &self,
        organization_id: &str,
        tier: &str,
    ) -> LedgerResult<UsageReport> {
        let policy = self.tiers.lookup(tier);
        let now = Utc::now();
        let period_start = billing_period_start(now);
        let summary = self.ledger.summarize(organization_id, period_start, now).await?;

        let usage_percentage = if policy.hard_cap_tokens == 0 {
            100.0
        } else {
            summary.total_tokens as f64 / policy.hard_cap_tokens as f64 * 100.0
        };

        Ok(UsageReport {
            organization_id: organization_id.to_string(),
            period_start,
            current_usage: summary.total_tokens,
            soft_cap_tokens: policy.soft_cap_tokens,
            hard_cap_tokens: policy.hard_cap_tokens,
            usage_percentage,
            call_count: summary.call_count,
            average_latency_ms: summary.average_latency_ms,
            cache_hit_rate: summary.cache_hit_rate,
        })
    }

    /// Sweep expired rate windows on a background task.
    pub fn spawn_rate_sweeper(&self) -> tokio::task::JoinHandle<()> {
        self.rate.spawn_sweeper(self.config.sweep_interval)
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    pub fn tiers(&self) -> &TierTable {
        &self.tiers
    }

    fn ledger_failure(&self, organization_id: &str, error: LedgerError) -> Result<(), GovernorError> {
        if self.config.fail_open {
            tracing::warn!(
                organization_id,
                error = %error,
                "ledger unavailable, admitting without checks (fail-open override)"
            );
            return Ok(());
        }
        Err(GovernorError::Ledger(error))
    }
}

#[derive(Default)]
pub struct GovernorBuilder {
    ledger: Option<Arc<dyn UsageLedger>>,
    tiers: Option<TierTable>,
    config: GovernorConfig,
}

impl GovernorBuilder {
    pub fn ledger(mut self, ledger: Arc<dyn UsageLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn tiers(mut self, tiers: TierTable) -> Self {
        self.tiers = Some(tiers);
        self
    }

    pub fn config(mut self, config: GovernorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Governor {
        let ledger = self
            .ledger
            .unwrap_or_else(|| Arc::new(MemoryLedger::new()));
        Governor::new(ledger, self.tiers.unwrap_or_default(), self.config)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::DateTime;

    use super::*;
    use crate::ledger::LedgerSummary;
    use crate::tier::TierPolicy;

    /// Ledger stub whose reads always fail.
    struct FailingLedger;

    #[async_trait]
    impl UsageLedger for FailingLedger {
        fn name(&self) -> &str {
            "failing"
        }

        async fn append(&self, _event: UsageEvent) -> LedgerResult<()> {
            Err(LedgerError::Unavailable {
                message: "connection refused".to_string(),
            })
        }

        async fn sum_tokens(
            &self,
            _organization_id: &str,
            _since: DateTime<Utc>,
            _until: DateTime<Utc>,
        ) -> LedgerResult<u64> {
            Err(LedgerError::Unavailable {
                message: "connection refused".to_string(),
            })
        }

        async fn count_fingerprint(
            &self,
            _organization_id: &str,
            _fingerprint: &str,
            _since: DateTime<Utc>,
        ) -> LedgerResult<u64> {
            Err(LedgerError::Unavailable {
                message: "connection refused".to_string(),
            })
        }

        async fn summarize(
            &self,
            _organization_id: &str,
            _since: DateTime<Utc>,
            _until: DateTime<Utc>,
        ) -> LedgerResult<LedgerSummary> {
            Err(LedgerError::Unavailable {
                message: "connection refused".to_string(),
            })
        }
    }

    fn request() -> AiRequest {
        AiRequest::new("org-a", "user-1", "pro", "story_draft", "Draft a story")
    }

    #[tokio::test]
    async fn test_rate_denial_writes_nothing() {
        let ledger = Arc::new(MemoryLedger::new());
        let tiers = TierTable::new([TierPolicy::new("pro", 8_000, 10_000).with_rates(1, 10_000)]);
        let governor = Governor::new(
            Arc::clone(&ledger) as Arc<dyn UsageLedger>,
            tiers,
            GovernorConfig::default(),
        );

        governor.admit(&request()).await.unwrap();
        let denied = governor.admit(&request()).await.unwrap_err();
        assert!(matches!(denied, GovernorError::RateLimited { .. }));
        assert!(denied.retry_after().unwrap() > Duration::ZERO);
        assert_eq!(ledger.count().await, 0);
    }

    #[tokio::test]
    async fn test_ledger_failure_fails_closed_by_default() {
        let governor = Governor::new(
            Arc::new(FailingLedger),
            TierTable::default(),
            GovernorConfig::default(),
        );

        let denied = governor.admit(&request()).await.unwrap_err();
        assert!(matches!(denied, GovernorError::Ledger(_)));
        assert!(denied.is_retryable());
    }

    #[tokio::test]
    async fn test_fail_open_override_admits_with_default_budget() {
        let config = GovernorConfig::default().with_fail_open(true);
        let governor = Governor::new(Arc::new(FailingLedger), TierTable::default(), config);

        let admission = governor.admit(&request()).await.unwrap();
        assert!(!admission.throttled);
        assert_eq!(admission.max_output_tokens, 4_096);
    }

    #[tokio::test]
    async fn test_complexity_scales_unthrottled_budget() {
        let governor = Governor::builder().build();

        let light = governor
            .admit(&request().with_complexity(Complexity::Light))
            .await
            .unwrap();
        assert_eq!(light.max_output_tokens, 2_048);

        let complex = governor
            .admit(&request().with_complexity(Complexity::Complex))
            .await
            .unwrap();
        assert_eq!(complex.max_output_tokens, 8_192);
    }

    #[tokio::test]
    async fn test_unknown_tier_is_degraded_not_rejected() {
        let governor = Governor::builder().build();
        let mut req = request();
        req.tier = "legacy-enterprise".to_string();

        let admission = governor.admit(&req).await.unwrap();
        assert!(!admission.throttled);

        let report = governor
            .usage_report("org-a", "legacy-enterprise")
            .await
            .unwrap();
        // Degraded to the most restrictive built-in tier
        assert_eq!(report.hard_cap_tokens, 50_000);
    }
}
