//! # usage-governor
//!
//! Usage governance for AI-backed features in a multi-tenant application.
//!
//! For every AI invocation the governor decides whether the request may
//! proceed and how much output budget it gets, then records what the call
//! actually consumed. Monthly token caps are enforced per organization from
//! an append-only usage ledger, request rates per user from an in-memory
//! fixed-window counter, and repeated identical prompts are rejected by
//! fingerprint counting. The provider call itself stays with the caller;
//! the governor only bounds and records it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use usage_governor::{AiRequest, Governor, MemoryLedger, UsageMetrics};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let governor = Governor::builder()
//!         .ledger(Arc::new(MemoryLedger::new()))
//!         .build();
//!
//!     let request = AiRequest::new(
//!         "org-1",
//!         "user-1",
//!         "pro",
//!         "story_draft",
//!         "Draft a user story for the checkout flow",
//!     );
//!     let admission = governor.admit(&request).await?;
//!
//!     // ... invoke the provider bounded by admission.max_output_tokens ...
//!     let metrics = UsageMetrics {
//!         model: "claude-sonnet-4-5".to_string(),
//!         input_tokens: 420,
//!         output_tokens: 800,
//!         latency_ms: 900,
//!         cache_hit: false,
//!     };
//!     governor
//!         .record(&request, &admission, &metrics, serde_json::json!({}))
//!         .await?;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod fingerprint;
pub mod governor;
pub mod ledger;
pub mod tier;

// Re-exports for convenience
pub use config::GovernorConfig;
pub use fingerprint::{estimate_tokens, fingerprint, normalize};
pub use governor::{
    Admission, AiRequest, AllowanceChecker, AllowanceDecision, Complexity, DuplicateCheck,
    DuplicateDetector, Governor, GovernorBuilder, GovernorError, RateDecision, RateLimiter,
    THROTTLE_HEADROOM_DIVISOR, UsageRecorder, UsageReport, billing_period_start,
};
pub use ledger::{
    LedgerError, LedgerResult, LedgerSummary, MemoryLedger, UsageEvent, UsageLedger, UsageMetrics,
};
#[cfg(feature = "postgres")]
pub use ledger::PostgresLedger;
pub use tier::{TierPolicy, TierTable};
