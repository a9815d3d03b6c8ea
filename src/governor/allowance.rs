//! Monthly allowance checks.
//!
//! The allowance decision is computed fresh on every call from the event
//! ledger. There is no stored usage counter anywhere: recomputing the
//! aggregate from immutable events is what makes concurrent requests safe
//! without a lock, at the cost of a bounded overrun from in-flight calls.

use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

use crate::ledger::{LedgerResult, UsageLedger};
use crate::tier::TierPolicy;

/// Divisor applied to remaining hard-cap headroom when computing a throttled
/// budget, so a single throttled call cannot consume the whole remainder.
/// Kept at the historical halving for compatibility.
pub const THROTTLE_HEADROOM_DIVISOR: u64 = 2;

/// First instant of the calendar month containing `now`, UTC.
///
/// All cap enforcement aggregates over `[period_start, now)`; a month
/// rollover moves this boundary and the aggregate resets implicitly.
pub fn billing_period_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let first = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .unwrap_or_else(|| now.date_naive());
    first.and_time(NaiveTime::MIN).and_utc()
}

/// Outcome of one allowance check. Computed fresh per request, never cached.
#[derive(Debug, Clone, Serialize)]
pub struct AllowanceDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub current_usage: u64,
    pub limit: u64,
    pub usage_percentage: f64,
    pub throttled: bool,
    pub suggested_max_output_tokens: Option<u64>,
}

impl AllowanceDecision {
    /// Placeholder decision for the explicit fail-open override, when the
    /// ledger could not be read at all.
    pub(crate) fn unchecked() -> Self {
        Self {
            allowed: true,
            reason: Some("ledger unavailable, admitted by fail-open override".to_string()),
            current_usage: 0,
            limit: 0,
            usage_percentage: 0.0,
            throttled: false,
            suggested_max_output_tokens: None,
        }
    }
}

pub struct AllowanceChecker {
    ledger: Arc<dyn UsageLedger>,
    default_output_budget: u64,
}

impl AllowanceChecker {
    pub fn new(ledger: Arc<dyn UsageLedger>, default_output_budget: u64) -> Self {
        Self {
            ledger,
            default_output_budget,
        }
    }

    /// Check an organization's current-period usage against its tier caps.
    ///
    /// `estimated_tokens` is informational (throughput pre-flight); the
    /// hard/soft decision is based on recorded usage only, so estimation
    /// error cannot bypass the hard cap.
    pub async fn check(
        &self,
        organization_id: &str,
        policy: &TierPolicy,
        estimated_tokens: u64,
    ) -> LedgerResult<AllowanceDecision> {
        let now = Utc::now();
        let period_start = billing_period_start(now);
        let current_usage = self
            .ledger
            .sum_tokens(organization_id, period_start, now)
            .await?;

        let decision = self.decide(policy, current_usage);
        tracing::debug!(
            organization_id,
            tier = %policy.tier,
            current_usage,
            estimated_tokens,
            allowed = decision.allowed,
            throttled = decision.throttled,
            "allowance check"
        );
        Ok(decision)
    }

    /// Pure decision against a known usage figure; separated so cap edges
    /// and rollover boundaries are unit-testable without a ledger.
    pub fn decide(&self, policy: &TierPolicy, current_usage: u64) -> AllowanceDecision {
        let hard_cap = policy.hard_cap_tokens;
        let usage_percentage = if hard_cap == 0 {
            100.0
        } else {
            current_usage as f64 / hard_cap as f64 * 100.0
        };

        if current_usage >= hard_cap {
            return AllowanceDecision {
                allowed: false,
                reason: Some(format!(
                    "monthly token limit reached ({current_usage} of {hard_cap})"
                )),
                current_usage,
                limit: hard_cap,
                usage_percentage,
                throttled: true,
                suggested_max_output_tokens: None,
            };
        }

        if current_usage >= policy.soft_cap_tokens {
            let remaining = hard_cap - current_usage;
            let suggested =
                (remaining / THROTTLE_HEADROOM_DIVISOR).min(self.default_output_budget);
            return AllowanceDecision {
                allowed: true,
                reason: Some(format!(
                    "soft cap reached ({current_usage} of {} tokens), output budget reduced",
                    policy.soft_cap_tokens
                )),
                current_usage,
                limit: hard_cap,
                usage_percentage,
                throttled: true,
                suggested_max_output_tokens: Some(suggested),
            };
        }

        AllowanceDecision {
            allowed: true,
            reason: None,
            current_usage,
            limit: hard_cap,
            usage_percentage,
            throttled: false,
            suggested_max_output_tokens: None,
        }
    }
}
