//! Bounded automatic reconnection

use std::time::Duration;
use tokio::time::Instant;

/// Delay before an automatic reconnect
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(2000);

/// Consecutive automatic reconnects allowed before giving up
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Counts consecutive automatic reconnects against a fixed budget
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    delay: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
            attempts: 0,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Automatic attempts made since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether another automatic attempt fits in the budget
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Count one automatic attempt; saturates at the maximum
    pub fn record_attempt(&mut self) -> u32 {
        self.attempts = (self.attempts + 1).min(self.max_attempts);
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_DELAY, DEFAULT_MAX_RECONNECT_ATTEMPTS)
    }
}

/// A single revocable reconnect deadline
///
/// Scheduling replaces any previous deadline, so at most one is pending.
#[derive(Debug, Default)]
pub struct ReconnectTimer {
    deadline: Option<Instant>,
}

impl ReconnectTimer {
    pub fn schedule(&mut self, delay: Duration) {
        self.deadline = Some(Instant::now() + delay);
    }

    /// Revoke the pending deadline; returns whether one was pending
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

/// Sleep until `deadline`, or forever when nothing is scheduled
pub(crate) async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_budget() {
        let mut policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(), Duration::from_millis(2000));
        assert_eq!(policy.max_attempts(), 3);

        for expected in 1..=3 {
            assert!(policy.can_retry());
            assert_eq!(policy.record_attempt(), expected);
        }
        assert!(!policy.can_retry());

        // Never exceeds the maximum
        assert_eq!(policy.record_attempt(), 3);

        policy.reset();
        assert_eq!(policy.attempts(), 0);
        assert!(policy.can_retry());
    }

    #[test]
    fn test_zero_budget_never_retries() {
        let policy = ReconnectPolicy::new(Duration::from_millis(10), 0);
        assert!(!policy.can_retry());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_schedule_and_cancel() {
        let mut timer = ReconnectTimer::default();
        assert!(!timer.cancel());

        timer.schedule(Duration::from_secs(2));
        assert!(timer.deadline().is_some());
        let first = timer.deadline().unwrap();

        tokio::time::advance(Duration::from_millis(500)).await;
        timer.schedule(Duration::from_secs(2));
        assert!(timer.deadline().unwrap() > first);

        assert!(timer.cancel());
        assert!(timer.deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_until_deadline_waits() {
        let start = Instant::now();
        sleep_until_deadline(Some(start + Duration::from_secs(2))).await;
        assert!(start.elapsed() >= Duration::from_secs(2));

        let unscheduled = tokio::time::timeout(Duration::from_secs(60), sleep_until_deadline(None));
        assert!(unscheduled.await.is_err());
    }
}
