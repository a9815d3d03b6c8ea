//! Request fingerprinting.
//!
//! A fingerprint is a SHA-256 digest over the normalized request text. Two
//! requests that differ only in letter case or whitespace produce the same
//! fingerprint, so cosmetic retries of a scripted prompt still count as the
//! same request.

use sha2::{Digest, Sha256};

/// Collapse whitespace runs and lowercase the text.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Hex-encoded SHA-256 of the normalized request text.
pub fn fingerprint(text: &str) -> String {
    let digest = Sha256::digest(normalize(text).as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Rough token count for pre-flight estimates (~4 characters per token).
///
/// Informational only: allowance decisions are based on recorded usage, not
/// on this estimate.
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(4)
}
