//! Exponential backoff with jitter for the retry loop (SPEC_FULL.md 7):
//! base 500ms, factor 2, jitter +/-20%, capped at 30s.

use std::time::Duration;

use rand::Rng;

const BASE_MS: u64 = 500;
const FACTOR: u32 = 2;
const CAP_MS: u64 = 30_000;
const JITTER: f64 = 0.20;

/// `attempt` is 0-indexed (the first retry is `attempt = 0`).
pub fn backoff_duration(attempt: u32) -> Duration {
    let raw = BASE_MS.saturating_mul(FACTOR.saturating_pow(attempt) as u64);
    let capped = raw.min(CAP_MS);
    let jitter_span = (capped as f64 * JITTER) as i64;
    let delta = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
    let millis = (capped as i64 + delta).max(0) as u64;
    Duration::from_millis(millis)
}
