//! Retry policies
//!
//! Every retry loop in the workspace (upload resend, device and telemetry
//! reconnect, artifact forwarding) takes one of these instead of sleeping
//! inline, so tests can run with zero delays.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Fixed-delay retry policy, optionally bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries forever
    pub max_attempts: Option<u32>,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn unbounded(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            delay,
        }
    }

    pub const fn bounded(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            delay,
        }
    }

    /// Whether attempt number `attempt` (1-based) may run.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt <= max)
    }

    /// Whether another attempt follows attempt `attempt`.
    pub fn has_next(&self, attempt: u32) -> bool {
        self.allows(attempt.saturating_add(1))
    }

    /// Sleep for the policy delay.
    ///
    /// Returns `false` if `cancel` fired first.
    pub async fn wait(&self, cancel: &CancellationToken) -> bool {
        if self.delay.is_zero() {
            return !cancel.is_cancelled();
        }
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_allows_everything() {
        let policy = RetryPolicy::unbounded(Duration::ZERO);
        assert!(policy.allows(1));
        assert!(policy.allows(u32::MAX));
        assert!(policy.has_next(u32::MAX));
    }

    #[test]
    fn test_bounded_stops_after_max() {
        let policy = RetryPolicy::bounded(3, Duration::ZERO);
        assert!(policy.allows(3));
        assert!(!policy.allows(4));
        assert!(policy.has_next(2));
        assert!(!policy.has_next(3));
    }

    #[tokio::test]
    async fn test_wait_observes_cancellation() {
        let policy = RetryPolicy::unbounded(Duration::from_secs(60));
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!policy.wait(&cancel).await);
    }
}
