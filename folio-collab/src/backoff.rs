//! Reconnect policy with exponential backoff.
//!
//! With the default policy an abnormal close schedules retries after
//! 1s, 2s, 4s, 8s and 16s; the sixth failure exhausts the budget.

use std::time::Duration;

/// Retry parameters for abnormal closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Retries allowed before giving up
    pub max_attempts: u32,
    /// Delay growth factor between retries
    pub multiplier: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_attempts: 5,
            multiplier: 2,
        }
    }
}

/// Attempt counter and current delay for one session.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempts: u32,
    delay: Duration,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            delay: policy.base_delay,
        }
    }

    /// Claim the next retry slot.
    ///
    /// Returns the delay to wait before reconnecting, or `None` once
    /// `max_attempts` retries have been handed out.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let delay = self.delay;
        self.delay = self.delay.saturating_mul(self.policy.multiplier);
        self.attempts += 1;
        Some(delay)
    }

    /// Back to the base delay after a successful open.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.delay = self.policy.base_delay;
    }

    /// Retries handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let mut backoff = Backoff::new(ReconnectPolicy::default());
        let delays: Vec<u128> = std::iter::from_fn(|| backoff.next_delay())
            .map(|d| d.as_millis())
            .collect();

        assert_eq!(delays, [1000, 2000, 4000, 8000, 16000]);
        assert!(backoff.is_exhausted());
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempts(), 5);
    }

    #[test]
    fn test_reset_restores_base_delay() {
        let mut backoff = Backoff::new(ReconnectPolicy::default());
        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();

        assert_eq!(backoff.attempts(), 0);
        assert!(!backoff.is_exhausted());
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn test_zero_attempts_never_retries() {
        let mut backoff = Backoff::new(ReconnectPolicy {
            max_attempts: 0,
            ..ReconnectPolicy::default()
        });
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn test_custom_multiplier() {
        let mut backoff = Backoff::new(ReconnectPolicy {
            base_delay: Duration::from_millis(100),
            max_attempts: 3,
            multiplier: 3,
        });
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(300)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(900)));
        assert_eq!(backoff.next_delay(), None);
    }
}
