//! Backoff delay computation.

use std::time::Duration;

use rand::Rng;

use super::RetryConfig;

/// Highest exponent applied to the multiplier; past this every realistic
/// config is already pinned at `max_delay`.
const MAX_EXPONENT: i32 = 63;

/// Deterministic part of the delay: `initial * multiplier^(attempt - 1)`,
/// capped at `max_delay`.
///
/// `attempt` is 1-based; `0` is treated as `1`.
///
/// With `initial = 1s`, `multiplier = 2.0`, `max = 30s`:
/// - attempt 1: 1s
/// - attempt 2: 2s
/// - attempt 5: 16s
/// - attempt 6+: 30s
pub fn compute_base_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let exponent = (attempt.saturating_sub(1) as i32).min(MAX_EXPONENT);
    let initial_ms = config.initial_delay.as_secs_f64() * 1000.0;
    let max_ms = config.max_delay.as_secs_f64() * 1000.0;

    let raw_ms = initial_ms * config.multiplier.powi(exponent);
    let capped_ms = if raw_ms.is_finite() {
        raw_ms.min(max_ms)
    } else {
        max_ms
    };
    millis_to_duration(capped_ms)
}

/// Delay before retry number `attempt`, with jitter.
pub fn compute_delay(attempt: u32, config: &RetryConfig) -> Duration {
    compute_delay_with_rng(attempt, config, &mut rand::thread_rng())
}

/// [`compute_delay`] with a caller-supplied random source.
///
/// The jitter offset is drawn uniformly from
/// `[-capped * jitter_factor, +capped * jitter_factor]`; the result is never
/// negative.
pub fn compute_delay_with_rng<R: Rng>(
    attempt: u32,
    config: &RetryConfig,
    rng: &mut R,
) -> Duration {
    let capped_ms = compute_base_delay(attempt, config).as_secs_f64() * 1000.0;
    let spread = capped_ms * config.jitter_factor;
    let offset = if spread > 0.0 {
        rng.gen_range(-spread..=spread)
    } else {
        0.0
    };
    millis_to_duration(capped_ms + offset)
}

/// Negative or NaN becomes zero; anything past `Duration::MAX` saturates.
fn millis_to_duration(ms: f64) -> Duration {
    Duration::try_from_secs_f64(ms.max(0.0) / 1000.0).unwrap_or(Duration::MAX)
}
