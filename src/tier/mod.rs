//! Subscription tier policies.
//!
//! The tier table is injected configuration: deployments load it alongside
//! the rest of their config and can add or adjust tiers without code changes.
//! Changing a policy never retroactively alters recorded usage events.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Numeric limits for one subscription tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPolicy {
    pub tier: String,
    /// Monthly token level beyond which calls are throttled.
    pub soft_cap_tokens: u64,
    /// Monthly token level beyond which calls are denied.
    pub hard_cap_tokens: u64,
    pub requests_per_minute: u32,
    /// Carried for the throughput pre-flight contract; not enforced by the
    /// request rate limiter.
    pub tokens_per_minute: u64,
}

impl TierPolicy {
    pub fn new(tier: impl Into<String>, soft_cap_tokens: u64, hard_cap_tokens: u64) -> Self {
        Self {
            tier: tier.into(),
            soft_cap_tokens,
            hard_cap_tokens,
            requests_per_minute: 10,
            tokens_per_minute: 10_000,
        }
    }

    pub fn with_rates(mut self, requests_per_minute: u32, tokens_per_minute: u64) -> Self {
        self.requests_per_minute = requests_per_minute;
        self.tokens_per_minute = tokens_per_minute;
        self
    }
}

/// Mapping from tier name to policy, keyed case-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierTable {
    policies: HashMap<String, TierPolicy>,
}

impl Default for TierTable {
    fn default() -> Self {
        Self::new([
            TierPolicy::new("free", 40_000, 50_000).with_rates(5, 10_000),
            TierPolicy::new("starter", 400_000, 500_000).with_rates(10, 40_000),
            TierPolicy::new("pro", 1_600_000, 2_000_000).with_rates(30, 100_000),
            TierPolicy::new("business", 8_000_000, 10_000_000).with_rates(60, 400_000),
        ])
    }
}

impl TierTable {
    /// Build a table from explicit policies. An empty iterator falls back to
    /// the built-in tiers so a lookup can always return a policy.
    pub fn new(policies: impl IntoIterator<Item = TierPolicy>) -> Self {
        let policies: HashMap<String, TierPolicy> = policies
            .into_iter()
            .map(|p| (p.tier.to_lowercase(), p))
            .collect();
        if policies.is_empty() {
            return Self::default();
        }
        Self { policies }
    }

    pub fn insert(&mut self, policy: TierPolicy) {
        self.policies.insert(policy.tier.to_lowercase(), policy);
    }

    /// Resolve the policy for a tier name.
    ///
    /// An unrecognized tier degrades to the most restrictive configured
    /// policy - never to unlimited - and is logged as an anomaly.
    pub fn lookup(&self, tier: &str) -> &TierPolicy {
        let key = tier.trim().to_lowercase();
        match self.policies.get(&key) {
            Some(policy) => policy,
            None => {
                let fallback = self.most_restrictive();
                tracing::warn!(
                    tier,
                    fallback = %fallback.tier,
                    "unknown subscription tier, substituting most restrictive policy"
                );
                fallback
            }
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.policies.values().map(|p| p.tier.as_str()).collect()
    }

    fn most_restrictive(&self) -> &TierPolicy {
        // The table is never empty (`new` falls back to built-ins).
        self.policies
            .values()
            .min_by_key(|p| (p.hard_cap_tokens, p.requests_per_minute))
            .unwrap_or_else(|| unreachable!("tier table is never empty"))
    }
}
