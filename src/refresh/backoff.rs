use std::time::Duration;

/// Capped exponential backoff: `base * 2^(failures - 1)`, never above `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    /// Delay after `failures` consecutive failures. Zero failures means no backoff.
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        // 2^31 already overflows any sane base; saturate instead of wrapping.
        let factor = 1u32.checked_shl(failures - 1).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }

    /// Wait before the next attempt: the regular interval after a success,
    /// otherwise the backoff delay, but never longer than the interval.
    pub fn next_wait(&self, interval: Duration, failures: u32) -> Duration {
        if failures == 0 {
            interval
        } else {
            interval.min(self.delay(failures))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn doubles_from_base() {
        let b = Backoff::new(secs(2), secs(60));
        assert_eq!(b.delay(0), Duration::ZERO);
        assert_eq!(b.delay(1), secs(2));
        assert_eq!(b.delay(2), secs(4));
        assert_eq!(b.delay(3), secs(8));
        assert_eq!(b.delay(5), secs(32));
        assert_eq!(b.delay(6), secs(60));
    }

    #[test]
    fn never_exceeds_max() {
        let b = Backoff::new(Duration::from_millis(250), secs(45));
        for n in 0..200 {
            assert!(b.delay(n) <= secs(45), "failures={n}");
        }
        assert_eq!(b.delay(u32::MAX), secs(45));
    }

    #[test]
    fn next_wait_is_capped_by_interval() {
        let b = Backoff::new(secs(2), secs(300));
        let interval = secs(60);
        assert_eq!(b.next_wait(interval, 0), interval);
        assert_eq!(b.next_wait(interval, 1), secs(2));
        assert_eq!(b.next_wait(interval, 10), interval);
    }

    #[test]
    fn max_below_base_is_raised_to_base() {
        let b = Backoff::new(secs(10), secs(1));
        assert_eq!(b.delay(1), secs(10));
        assert_eq!(b.delay(4), secs(10));
    }
}
