//! Exponential backoff with optional jitter.

use std::time::Duration;

use rand::Rng;

/// Delay before retry number `attempt` (0-based): `min(base * 2^attempt, max)`.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exponential = 2u64.saturating_pow(attempt);
    let delay_ms = base_ms.saturating_mul(exponential);
    Duration::from_millis(delay_ms.min(max_ms))
}

/// [`calculate_backoff`] plus up to 10% random jitter, never above `max_ms`.
pub fn calculate_backoff_with_jitter(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let capped = calculate_backoff(attempt, base_ms, max_ms).as_millis() as u64;

    let jitter_range = capped / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis((capped + jitter).min(max_ms))
}
