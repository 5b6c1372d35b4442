//! Reconnect backoff.

use std::{cmp::min, time::Duration};

/// Exponential backoff bounds for client reconnects.
#[derive(Copy, Clone, Debug)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub factor: u32,
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(1000),
            factor: 2,
            max: Duration::from_millis(30_000),
        }
    }
}

impl BackoffConfig {
    /// Get an iterator of [`Duration`]s which can be passed into e.g.
    /// [`tokio::time::sleep`] to observe time-based exponential backoff.
    /// A successful handshake resets the schedule by taking a fresh
    /// iterator.
    pub fn iter(&self) -> impl Iterator<Item = Duration> {
        let initial_ms = self.initial.as_millis() as u64;
        let factor = u64::from(self.factor);
        let max_ms = self.max.as_millis() as u64;
        (0u32..).map(move |index| {
            let scale = factor.saturating_pow(index);
            let wait_ms = initial_ms.saturating_mul(scale);
            Duration::from_millis(min(wait_ms, max_ms))
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_schedule_doubles_and_caps() {
        let config = BackoffConfig::default();
        let waits: Vec<u64> = config.iter().take(8).map(|d| d.as_millis() as u64).collect();
        assert_eq!(waits, [1000, 2000, 4000, 8000, 16_000, 30_000, 30_000, 30_000]);
    }

    #[test]
    fn test_no_integer_overflow() {
        let config = BackoffConfig::default();
        let mut iter = config.iter();
        for _ in 0..200 {
            iter.next();
        }
    }
}
