//! Automatic reconnection policy.
//!
//! The stream controller retries a failed stream a bounded number of times,
//! doubling the wait on each attempt. Once the ladder is exhausted the
//! controller waits for a manual action.

use std::time::Duration;

/// Defines how a failed stream is retried.
///
/// # Example
///
/// ```rust
/// use homecam_core::backoff::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.delay_for(0), Some(Duration::from_secs(2)));
/// assert_eq!(policy.delay_for(2), Some(Duration::from_secs(8)));
/// assert_eq!(policy.delay_for(3), None);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// The maximum number of automatic retries.
    ///
    /// Set to 0 to disable automatic reconnection.
    pub max_attempts: u32,

    /// Delay before the first retry. Each later retry doubles it.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    /// Three retries at 2 s, 4 s and 8 s.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with explicit bounds.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay before the retry that follows `attempt` previous retries.
    ///
    /// Returns `None` once `attempt` reaches `max_attempts`.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let factor = 2u32.checked_pow(attempt)?;
        self.base_delay.checked_mul(factor)
    }

    /// Whether the automatic ladder is used up.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ladder() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = (0..4).map(|a| policy.delay_for(a)).collect();
        assert_eq!(
            delays,
            vec![
                Some(Duration::from_millis(2000)),
                Some(Duration::from_millis(4000)),
                Some(Duration::from_millis(8000)),
                None,
            ]
        );
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
    }

    #[test]
    fn zero_attempts_disables_retry() {
        let policy = RetryPolicy::new(0, Duration::from_millis(100));
        assert_eq!(policy.delay_for(0), None);
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let policy = RetryPolicy::new(u32::MAX, Duration::from_secs(1));
        assert_eq!(policy.delay_for(40), None);
    }
}
