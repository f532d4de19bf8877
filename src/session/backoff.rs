use rand::Rng;
use std::time::Duration;

/// Exponential backoff bounds for reconnect and re-announce attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

/// Doubling delay with a ceiling and jitter. Attempts are unlimited.
///
/// Each delay is drawn uniformly from `[ceiling / 2, ceiling]`, where the
/// ceiling starts at `initial` and doubles per attempt up to `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    ceiling: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        let policy = BackoffPolicy {
            initial: policy.initial,
            max: policy.max.max(policy.initial),
        };
        Self {
            policy,
            ceiling: policy.initial,
            attempts: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let ceiling = self.ceiling;
        self.ceiling = ceiling.saturating_mul(2).min(self.policy.max);
        self.attempts = self.attempts.saturating_add(1);
        jitter(ceiling)
    }

    /// Failed attempts since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.ceiling = self.policy.initial;
        self.attempts = 0;
    }
}

fn jitter(ceiling: Duration) -> Duration {
    let ceiling_ms = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
    if ceiling_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(ceiling_ms / 2..=ceiling_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(initial_ms: u64, max_ms: u64) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(initial_ms),
            max: Duration::from_millis(max_ms),
        }
    }

    #[test]
    fn delays_double_up_to_ceiling() {
        let mut backoff = Backoff::new(policy(100, 1000));
        let ceilings = [100u64, 200, 400, 800, 1000, 1000, 1000];
        for ceiling in ceilings {
            let delay = backoff.next_delay();
            assert!(delay <= Duration::from_millis(ceiling), "{delay:?} > {ceiling}ms");
            assert!(delay >= Duration::from_millis(ceiling / 2), "{delay:?} < {ceiling}/2 ms");
        }
        assert_eq!(backoff.attempts(), ceilings.len() as u32);
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = Backoff::new(policy(100, 1000));
        for _ in 0..5 {
            backoff.next_delay();
        }
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert!(backoff.next_delay() <= Duration::from_millis(100));
    }

    #[test]
    fn max_below_initial_is_raised() {
        let mut backoff = Backoff::new(policy(500, 10));
        assert!(backoff.next_delay() <= Duration::from_millis(500));
        assert!(backoff.next_delay() <= Duration::from_millis(500));
    }

    #[test]
    fn zero_policy_never_sleeps() {
        let mut backoff = Backoff::new(policy(0, 0));
        assert_eq!(backoff.next_delay(), Duration::ZERO);
    }
}
