//! Per-user request rate limiting.
//!
//! Fixed-window counters: O(1) memory per active user and trivial to reason
//! about, at the cost of burst smoothness the governor does not need. State
//! is in-memory only; a restart resets all windows (rate limiting is abuse
//! protection, not a billing control).

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::time::MissedTickBehavior;

use crate::tier::TierPolicy;

#[derive(Debug, Clone)]
pub struct RateDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    /// Time until the current window resets, set on denial.
    pub reset_in: Option<Duration>,
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    reset_at: Instant,
}

/// Fixed-window per-user counter over a sharded map.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    windows: Arc<DashMap<String, RateWindow>>,
    window: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            window,
        }
    }

    /// Count one request against the user's current window.
    ///
    /// The expiry check runs before the increment, so a stale window that
    /// the sweeper has not reached yet self-corrects here. Touches memory
    /// only; must never block on I/O.
    pub fn check(&self, user_id: &str, policy: &TierPolicy) -> RateDecision {
        let now = Instant::now();
        let mut entry = self
            .windows
            .entry(user_id.to_string())
            .or_insert(RateWindow {
                count: 0,
                reset_at: now + self.window,
            });

        if entry.reset_at <= now {
            entry.count = 0;
            entry.reset_at = now + self.window;
        }
        entry.count = entry.count.saturating_add(1);

        if entry.count > policy.requests_per_minute {
            let reset_in = entry.reset_at.saturating_duration_since(now);
            return RateDecision {
                allowed: false,
                reason: Some(format!(
                    "rate limit of {} requests per minute reached",
                    policy.requests_per_minute
                )),
                reset_in: Some(reset_in),
            };
        }

        RateDecision {
            allowed: true,
            reason: None,
            reset_in: None,
        }
    }

    /// Drop windows whose reset time has passed. Returns how many were
    /// removed. Best-effort: correctness does not depend on it.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, window| window.reset_at > now);
        before.saturating_sub(self.windows.len())
    }

    /// Number of users with a live window.
    pub fn tracked_users(&self) -> usize {
        self.windows.len()
    }

    /// Run `sweep` on a background task every `interval`.
    pub fn spawn_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = limiter.sweep();
                if removed > 0 {
                    tracing::debug!(removed, "swept expired rate windows");
                }
            }
        })
    }
}
