//! Governor configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning knobs for the governor. All values have production defaults;
/// deployments typically load this from config alongside the tier table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Baseline max-output-token budget for unthrottled calls.
    pub default_output_budget: u64,
    /// Trailing window for duplicate detection, in minutes.
    pub duplicate_window_minutes: u32,
    /// Identical requests served per window before the next one is flagged.
    pub duplicate_threshold: u64,
    /// Fixed-window length for the per-user rate limiter.
    pub rate_window: Duration,
    /// How often expired rate windows are swept.
    pub sweep_interval: Duration,
    /// Admit requests when the ledger cannot be read.
    ///
    /// Development-mode override only: failing open silently disables all
    /// billing and abuse protection. Defaults to fail-closed.
    pub fail_open: bool,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            default_output_budget: 4_096,
            duplicate_window_minutes: 10,
            duplicate_threshold: 3,
            rate_window: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(120),
            fail_open: false,
        }
    }
}

impl GovernorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_output_budget(mut self, tokens: u64) -> Self {
        self.default_output_budget = tokens;
        self
    }

    pub fn with_duplicate_window(mut self, minutes: u32, threshold: u64) -> Self {
        self.duplicate_window_minutes = minutes;
        self.duplicate_threshold = threshold;
        self
    }

    pub fn with_rate_window(mut self, window: Duration) -> Self {
        self.rate_window = window;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Explicit development-mode opt-in; never set this in production.
    pub fn with_fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fail_closed() {
        let config = GovernorConfig::default();
        assert!(!config.fail_open);
        assert_eq!(config.rate_window, Duration::from_secs(60));
        assert_eq!(config.duplicate_threshold, 3);
    }

    #[test]
    fn test_builder_chain() {
        let config = GovernorConfig::new()
            .with_default_output_budget(2_048)
            .with_duplicate_window(5, 2)
            .with_fail_open(true);
        assert_eq!(config.default_output_budget, 2_048);
        assert_eq!(config.duplicate_window_minutes, 5);
        assert_eq!(config.duplicate_threshold, 2);
        assert!(config.fail_open);
    }

    #[test]
    fn test_deserializes_with_partial_fields() {
        let config: GovernorConfig =
            serde_json::from_str(r#"{"default_output_budget": 1024}"#).unwrap();
        assert_eq!(config.default_output_budget, 1_024);
        assert!(!config.fail_open);
    }
}
