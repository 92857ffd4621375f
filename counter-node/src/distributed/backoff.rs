// Bounded exponential backoff for peer deliveries

use std::time::Duration;

/// Retry parameters shared by every delivery
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    /// Retries allowed after the first failure; 0 means unlimited
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            factor: 2.0,
            max_delay: Duration::from_secs(2),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Fresh retry sequence for one operation
    pub fn start(&self) -> Backoff {
        Backoff {
            policy: *self,
            attempt: 0,
        }
    }
}

/// Delays for one failing operation: `base * factor^attempt`, capped.
///
/// Yields `None` once the attempt budget is spent; the caller must stop.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn next_delay(&mut self) -> Option<Duration> {
        let policy = &self.policy;
        if policy.max_attempts > 0 && self.attempt >= policy.max_attempts {
            return None;
        }

        let exponent = i32::try_from(self.attempt).unwrap_or(i32::MAX);
        let scaled = policy.base.as_nanos() as f64 * policy.factor.powi(exponent);
        self.attempt = self.attempt.saturating_add(1);

        if !scaled.is_finite() || scaled >= policy.max_delay.as_nanos() as f64 {
            return Some(policy.max_delay);
        }
        Some(Duration::from_nanos(scaled as u64))
    }

    /// Delays handed out so far
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        self.next_delay()
    }
}
