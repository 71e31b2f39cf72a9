//! Full-jitter exponential backoff (§4.9), shared by the permit-rejection
//! re-enqueue path and the job-failure Retry Policy — they differ only in
//! base delay and the counter they key off.

use std::time::Duration;

use rand::Rng;

/// Permit-rejection backoff: base 500 ms, cap 30 s.
pub const PERMIT_BACKOFF_BASE_MS: u64 = 500;
pub const PERMIT_BACKOFF_MAX_MS: u64 = 30_000;

/// Job-failure retry backoff: base 1000 ms, cap 30 s.
pub const RETRY_BACKOFF_BASE_MS: u64 = 1_000;
pub const RETRY_BACKOFF_MAX_MS: u64 = 30_000;

/// `delay = uniform(0, min(max_ms, base_ms * 2^count))`.
pub fn compute_backoff_delay(count: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exp = base_ms.saturating_mul(1u64.checked_shl(count).unwrap_or(u64::MAX).max(1));
    let bound = exp.min(max_ms);
    let jittered = rand::thread_rng().gen_range(0..=bound);
    Duration::from_millis(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_within_cap_even_for_large_counts() {
        for _ in 0..100 {
            let delay = compute_backoff_delay(20, PERMIT_BACKOFF_BASE_MS, PERMIT_BACKOFF_MAX_MS);
            assert!(delay <= Duration::from_millis(PERMIT_BACKOFF_MAX_MS));
        }
    }

    #[test]
    fn zero_count_bounded_by_base() {
        for _ in 0..100 {
            let delay = compute_backoff_delay(0, RETRY_BACKOFF_BASE_MS, RETRY_BACKOFF_MAX_MS);
            assert!(delay <= Duration::from_millis(RETRY_BACKOFF_BASE_MS));
        }
    }
}
