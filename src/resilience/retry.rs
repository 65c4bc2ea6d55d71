use std::time::Duration;

use crate::config::EndpointPolicy;

/// Bounded exponential backoff with full jitter.
///
/// Attempt `n` sleeps a uniformly random duration in
/// `[0, min(cap, base × 2ⁿ)]`. Full jitter decorrelates retry storms from
/// many processes hitting the same failing endpoint.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base: Duration,
    cap: Duration,
}

impl RetryPolicy {
    pub fn new(policy: &EndpointPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts,
            base: policy.backoff_base,
            cap: policy.backoff_cap,
        }
    }

    /// Total attempts per call, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff before retry number `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponential = self
            .base
            .saturating_mul(2u32.saturating_pow(attempt.min(16)));
        let ceiling = exponential.min(self.cap);
        ceiling.mul_f64(rand::random::<f64>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(&EndpointPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_millis(400),
            ..EndpointPolicy::default()
        })
    }

    #[test]
    fn backoff_stays_under_the_exponential_ceiling() {
        let policy = policy();
        for _ in 0..200 {
            assert!(policy.backoff(0) <= Duration::from_millis(100));
            assert!(policy.backoff(1) <= Duration::from_millis(200));
        }
    }

    #[test]
    fn backoff_is_capped() {
        let policy = policy();
        for _ in 0..200 {
            assert!(policy.backoff(10) <= Duration::from_millis(400));
        }
    }

    #[test]
    fn large_attempt_counts_do_not_overflow() {
        let policy = policy();
        let _ = policy.backoff(u32::MAX);
    }
}
