//! Invocation request parameters.

use serde::{Deserialize, Serialize};

/// How heavy a generation the feature expects. Scales the default output
/// budget for unthrottled calls; a throttled call's budget is already capped
/// by the allowance decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Light,
    #[default]
    Standard,
    Complex,
}

impl Complexity {
    pub(crate) fn scale(self, base: u64) -> u64 {
        match self {
            Complexity::Light => base / 2,
            Complexity::Standard => base,
            Complexity::Complex => base.saturating_mul(2),
        }
    }
}

/// One AI-backed feature request presented to the governor.
#[derive(Debug, Clone)]
pub struct AiRequest {
    pub organization_id: String,
    pub user_id: String,
    /// Tier name as assigned by the billing provider.
    pub tier: String,
    /// Which AI feature is being invoked, e.g. "story_draft".
    pub feature: String,
    /// The request content the fingerprint and token estimate derive from.
    pub prompt: String,
    pub complexity: Complexity,
}

impl AiRequest {
    pub fn new(
        organization_id: impl Into<String>,
        user_id: impl Into<String>,
        tier: impl Into<String>,
        feature: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            user_id: user_id.into(),
            tier: tier.into(),
            feature: feature.into(),
            prompt: prompt.into(),
            complexity: Complexity::default(),
        }
    }

    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }
}
