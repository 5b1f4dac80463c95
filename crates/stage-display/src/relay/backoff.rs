use std::time::Duration;

/// Exponential reconnect delay: doubles per consecutive failure, capped.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            next: base.min(max),
        }
    }

    /// Delay for the upcoming attempt; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }

    /// Call after a successful connection.
    pub fn reset(&mut self) {
        self.next = self.base.min(self.max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_doubles_then_caps() {
        let mut backoff = Backoff::new(ms(1000), ms(10_000));
        let delays: Vec<u64> = (0..7)
            .map(|_| backoff.next_delay().as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 10_000, 10_000, 10_000]);
    }

    #[test]
    fn test_reset_returns_to_base() {
        let mut backoff = Backoff::new(ms(1000), ms(10_000));
        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), ms(1000));
        assert_eq!(backoff.next_delay(), ms(2000));
    }

    #[test]
    fn test_base_above_max_is_capped() {
        let mut backoff = Backoff::new(ms(20_000), ms(5000));
        assert_eq!(backoff.next_delay(), ms(5000));
        assert_eq!(backoff.next_delay(), ms(5000));
    }
}
