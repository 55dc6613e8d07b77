use std::time::Duration;

/// Trait for defining reconnection strategies
///
/// Implement this trait to control how the client should
/// behave when reconnecting after a disconnection.
pub trait ReconnectionStrategy: Send + Sync {
    /// Get the delay before the next reconnection attempt
    ///
    /// # Arguments
    /// * `attempt` - The reconnection attempt number (0-indexed)
    ///
    /// # Returns
    /// * `Some(duration)` - Wait this long before reconnecting
    /// * `None` - Attempt budget exhausted, stop reconnecting
    fn next_delay(&self, attempt: u32) -> Option<Duration>;

    /// The delay used for the first attempt
    fn base_delay(&self) -> Duration;

    /// Check if we should continue reconnecting
    fn should_reconnect(&self, attempt: u32) -> bool;
}

/// Exponential backoff reconnection strategy
///
/// Delays between reconnection attempts grow geometrically:
/// `base_delay * multiplier^attempt`, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    max_attempts: Option<u32>,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff strategy
    ///
    /// # Arguments
    /// * `base_delay` - The delay before the first reconnect
    /// * `multiplier` - Growth factor per attempt (1.0 gives a fixed delay)
    /// * `max_delay` - The maximum delay between reconnects
    /// * `max_attempts` - Maximum number of attempts (None = unlimited)
    pub fn new(
        base_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
        max_attempts: Option<u32>,
    ) -> Self {
        Self {
            base_delay,
            multiplier: multiplier.max(1.0),
            max_delay,
            max_attempts,
        }
    }
}

impl ReconnectionStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if !self.should_reconnect(attempt) {
            return None;
        }

        // f64 math saturates to +inf instead of overflowing
        let factor = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let delay_secs = self.base_delay.as_secs_f64() * factor;
        let cap_secs = self.max_delay.as_secs_f64();

        if !delay_secs.is_finite() || delay_secs >= cap_secs {
            return Some(self.max_delay);
        }
        Some(Duration::from_nanos((delay_secs * 1e9).round() as u64))
    }

    fn base_delay(&self) -> Duration {
        self.base_delay
    }

    fn should_reconnect(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubling_sequence() {
        let strategy = ExponentialBackoff::new(
            Duration::from_millis(100),
            2.0,
            Duration::from_secs(10),
            Some(5),
        );

        let expected = [100, 200, 400, 800, 1600];
        for (attempt, &ms) in expected.iter().enumerate() {
            assert_eq!(
                strategy.next_delay(attempt as u32).unwrap(),
                Duration::from_millis(ms),
                "unexpected delay at attempt {}",
                attempt
            );
        }
        assert!(strategy.next_delay(5).is_none());
    }

    #[test]
    fn test_cap_is_respected() {
        let strategy =
            ExponentialBackoff::new(Duration::from_millis(500), 2.0, Duration::from_secs(2), None);

        let delays: Vec<Duration> = (0..6).map(|i| strategy.next_delay(i).unwrap()).collect();
        assert_eq!(delays[0], Duration::from_millis(500));
        assert_eq!(delays[1], Duration::from_millis(1000));
        assert_eq!(delays[2], Duration::from_secs(2));
        assert!(delays[3..].iter().all(|d| *d == Duration::from_secs(2)));
    }

    #[test]
    fn test_non_decreasing_until_cap() {
        let strategy =
            ExponentialBackoff::new(Duration::from_millis(250), 1.5, Duration::from_secs(30), None);

        let mut previous = Duration::ZERO;
        for attempt in 0..40 {
            let delay = strategy.next_delay(attempt).unwrap();
            assert!(delay >= previous, "delay shrank at attempt {}", attempt);
            assert!(delay <= Duration::from_secs(30));
            previous = delay;
        }
        assert_eq!(previous, Duration::from_secs(30));
    }

    #[test]
    fn test_multiplier_one_is_fixed_delay() {
        let strategy =
            ExponentialBackoff::new(Duration::from_secs(5), 1.0, Duration::from_secs(60), Some(10));
        for attempt in 0..10 {
            assert_eq!(strategy.next_delay(attempt), Some(Duration::from_secs(5)));
        }
        assert_eq!(strategy.next_delay(10), None);
    }

    #[test]
    fn test_zero_attempts_never_reconnects() {
        let strategy =
            ExponentialBackoff::new(Duration::from_secs(1), 2.0, Duration::from_secs(60), Some(0));
        assert!(!strategy.should_reconnect(0));
        assert!(strategy.next_delay(0).is_none());
    }

    #[test]
    fn test_overflow_safety() {
        let strategy = ExponentialBackoff::new(
            Duration::from_millis(100),
            2.0,
            Duration::from_secs(3600),
            None,
        );
        assert_eq!(strategy.next_delay(1000), Some(Duration::from_secs(3600)));
        assert_eq!(strategy.next_delay(u32::MAX - 1), Some(Duration::from_secs(3600)));
    }
}
