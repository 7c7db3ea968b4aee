use std::time::Duration;

/// Exponential backoff for retry `retry_count` (0-based): `base * 2^retry_count`, capped.
pub fn compute_retry_backoff(retry_count: i32, base_ms: u64, max_secs: u64) -> Duration {
    let exponent = retry_count.clamp(0, 32) as u32;
    let cap_ms = max_secs.saturating_mul(1000);
    let delay_ms = base_ms
        .saturating_mul(2_u64.saturating_pow(exponent))
        .min(cap_ms);
    Duration::from_millis(delay_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base() {
        assert_eq!(compute_retry_backoff(0, 1000, 300), Duration::from_secs(1));
        assert_eq!(compute_retry_backoff(1, 1000, 300), Duration::from_secs(2));
        assert_eq!(compute_retry_backoff(2, 1000, 300), Duration::from_secs(4));
        assert_eq!(compute_retry_backoff(3, 250, 300), Duration::from_secs(2));
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(compute_retry_backoff(9, 1000, 300), Duration::from_secs(300));
        assert_eq!(compute_retry_backoff(64, 1000, 300), Duration::from_secs(300));
        assert_eq!(
            compute_retry_backoff(i32::MAX, u64::MAX, 60),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn negative_retry_count_uses_base() {
        assert_eq!(compute_retry_backoff(-1, 500, 300), Duration::from_millis(500));
    }
}
