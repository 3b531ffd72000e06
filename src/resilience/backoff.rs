//! Exponential backoff with jitter for fallback retries.

use std::time::Duration;
use rand::Rng;

/// Delay before retry number `retry` (1-based). Retry 0 has no delay.
///
/// `base_ms * 2^(retry-1)`, capped at `max_ms`, plus up to 10% jitter.
pub fn calculate_backoff(retry: u32, base_ms: u64, max_ms: u64) -> Duration {
    if retry == 0 {
        return Duration::ZERO;
    }

    let factor = 1u64.checked_shl(retry - 1).unwrap_or(u64::MAX);
    let capped = base_ms.saturating_mul(factor).min(max_ms);

    let jitter_range = capped / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_retry_has_no_delay() {
        assert_eq!(calculate_backoff(0, 100, 1_000), Duration::ZERO);
    }

    #[test]
    fn test_growth_and_cap() {
        let d1 = calculate_backoff(1, 100, 2_000).as_millis();
        assert!((100..110).contains(&d1));

        let d3 = calculate_backoff(3, 100, 2_000).as_millis();
        assert!((400..440).contains(&d3));

        let capped = calculate_backoff(64, 100, 1_000).as_millis();
        assert!((1_000..1_100).contains(&capped));
    }
}
