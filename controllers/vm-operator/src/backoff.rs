//! # Fibonacci Backoff
//!
//! Requeue delays for VirtualMachine reconcile failures. The delay grows along
//! the Fibonacci sequence, which is gentler than doubling: vCenter tasks that
//! fail transiently (a host in maintenance, a datastore briefly full) get
//! retried soon, while a VM stuck on a bad class backs off to the cap.
//!
//! Default sequence: 5s, 5s, 10s, 15s, 25s, 40s, 65s, ... 300s (max).

use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each delay is the sum of the previous two, capped at `max`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min: Duration,
    prev: Duration,
    current: Duration,
    max: Duration,
}

impl FibonacciBackoff {
    /// Create a backoff starting at `min` and capped at `max`
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            prev: Duration::ZERO,
            current: min,
            max,
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        let next = self.prev + self.current;
        self.prev = self.current;
        self.current = std::cmp::min(next, self.max);
        result
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.prev = Duration::ZERO;
        self.current = self.min;
    }
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(backoff: &mut FibonacciBackoff) -> u64 {
        backoff.next_backoff().as_secs()
    }

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::default();

        assert_eq!(secs(&mut backoff), 5);
        assert_eq!(secs(&mut backoff), 5);
        assert_eq!(secs(&mut backoff), 10);
        assert_eq!(secs(&mut backoff), 15);
        assert_eq!(secs(&mut backoff), 25);
        assert_eq!(secs(&mut backoff), 40);
        assert_eq!(secs(&mut backoff), 65);
    }

    #[test]
    fn test_fibonacci_backoff_max_cap() {
        let mut backoff = FibonacciBackoff::new(Duration::from_secs(60), Duration::from_secs(180));

        assert_eq!(secs(&mut backoff), 60);
        assert_eq!(secs(&mut backoff), 60);
        assert_eq!(secs(&mut backoff), 120);
        // 180 would be next anyway, 300 is capped
        assert_eq!(secs(&mut backoff), 180);
        assert_eq!(secs(&mut backoff), 180);
        assert_eq!(secs(&mut backoff), 180);
    }

    #[test]
    fn test_fibonacci_backoff_reset() {
        let mut backoff = FibonacciBackoff::default();

        assert_eq!(secs(&mut backoff), 5);
        assert_eq!(secs(&mut backoff), 5);
        assert_eq!(secs(&mut backoff), 10);

        backoff.reset();

        // Should restart from beginning after success
        assert_eq!(secs(&mut backoff), 5);
        assert_eq!(secs(&mut backoff), 5);
    }
}
