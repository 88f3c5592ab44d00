use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

/// Sliding one-minute window limiting how many alerts go out
///
/// Every method takes the current time explicitly so callers (and tests)
/// control the clock.
#[derive(Debug)]
pub struct RateLimiter {
    max_per_minute: usize,
    /// Send times inside the current window, oldest first
    sent: VecDeque<DateTime<Utc>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RateLimiter {
    /// # Arguments
    ///
    /// * `max_per_minute` - Alerts allowed in any sixty-second window
    pub fn new(max_per_minute: usize) -> Self {
        Self {
            max_per_minute,
            sent: VecDeque::with_capacity(max_per_minute),
        }
    }

    /// Whether one more alert fits in the window ending at `now`
    pub fn can_send(&mut self, now: DateTime<Utc>) -> bool {
        self.expire(now);
        self.sent.len() < self.max_per_minute
    }

    /// Record an alert sent at `at`
    pub fn record(&mut self, at: DateTime<Utc>) {
        let position = self.sent.partition_point(|&t| t <= at);
        self.sent.insert(position, at);
    }

    /// Alerts counted in the window ending at `now`
    pub fn current_count(&mut self, now: DateTime<Utc>) -> usize {
        self.expire(now);
        self.sent.len()
    }

    /// How many more alerts fit in the window ending at `now`
    pub fn remaining(&mut self, now: DateTime<Utc>) -> usize {
        self.max_per_minute
            .saturating_sub(self.current_count(now))
    }

    fn expire(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::minutes(1);
        while self.sent.front().is_some_and(|&t| t <= cutoff) {
            self.sent.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_limit() {
        let mut limiter = RateLimiter::new(3);
        let now = Utc::now();

        for _ in 0..3 {
            assert!(limiter.can_send(now));
            limiter.record(now);
        }
        assert!(!limiter.can_send(now));
        assert_eq!(limiter.remaining(now), 0);
    }

    #[test]
    fn test_window_slides() {
        let mut limiter = RateLimiter::new(2);
        let now = Utc::now();

        limiter.record(now - Duration::seconds(50));
        limiter.record(now - Duration::seconds(10));
        assert!(!limiter.can_send(now));

        // The first send leaves the window 10s later
        assert!(limiter.can_send(now + Duration::seconds(11)));
        assert_eq!(limiter.current_count(now + Duration::seconds(11)), 1);
    }

    #[test]
    fn test_out_of_order_records_expire_correctly() {
        let mut limiter = RateLimiter::new(5);
        let now = Utc::now();

        limiter.record(now - Duration::seconds(10));
        limiter.record(now - Duration::minutes(5));
        limiter.record(now - Duration::seconds(30));

        assert_eq!(limiter.current_count(now), 2);
    }

    #[test]
    fn test_zero_limit_never_sends() {
        let mut limiter = RateLimiter::new(0);
        assert!(!limiter.can_send(Utc::now()));
    }
}
