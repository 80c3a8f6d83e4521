//! Exponential backoff with a bounded total budget.
//!
//! Used for ACME order polling, transient retries of authority calls and
//! DNS provider retries. Deadlines are measured with tokio's clock so tests
//! running under a paused runtime advance deterministically.

use std::time::Duration;
use tokio::time::Instant;

/// Backoff tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// First delay returned
    pub initial_interval: Duration,
    /// Upper bound for a single delay
    pub max_interval: Duration,
    /// Total time budget; `None` means unbounded
    pub max_elapsed: Option<Duration>,
    /// Growth factor applied after each delay
    pub multiplier: f64,
}

impl BackoffPolicy {
    /// Order/authorization polling: 1s initial, 10s cap, 120s total.
    pub const POLLING: Self = Self {
        initial_interval: Duration::from_secs(1),
        max_interval: Duration::from_secs(10),
        max_elapsed: Some(Duration::from_secs(120)),
        multiplier: 2.0,
    };

    pub fn new(initial_interval: Duration, max_interval: Duration) -> Self {
        Self {
            initial_interval,
            max_interval,
            max_elapsed: None,
            multiplier: 2.0,
        }
    }

    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = Some(max_elapsed);
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Start a new backoff sequence now.
    pub fn start(&self) -> Backoff {
        Backoff::new(*self)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::POLLING
    }
}

/// A running backoff sequence.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
    started: Instant,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            current: policy.initial_interval,
            started: Instant::now(),
            attempts: 0,
        }
    }

    /// Next delay to wait, or `None` once the total budget is spent.
    ///
    /// The returned delay is clipped so that sleeping it never overruns
    /// `max_elapsed`.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let mut delay = self.current.min(self.policy.max_interval);

        if let Some(budget) = self.policy.max_elapsed {
            let elapsed = self.started.elapsed();
            if elapsed >= budget {
                return None;
            }
            delay = delay.min(budget - elapsed);
        }

        self.attempts += 1;
        let grown = self.current.as_secs_f64() * self.policy.multiplier.max(1.0);
        self.current = Duration::from_secs_f64(grown.min(self.policy.max_interval.as_secs_f64()));
        Some(delay)
    }

    /// Number of delays handed out so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Time since the sequence started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether the total budget has been spent
    pub fn is_exhausted(&self) -> bool {
        self.policy
            .max_elapsed
            .map(|budget| self.started.elapsed() >= budget)
            .unwrap_or(false)
    }

    /// Restart from the initial interval, keeping the original deadline.
    pub fn reset_interval(&mut self) {
        self.current = self.policy.initial_interval;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_delays_grow_and_cap() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(10));
        let mut backoff = policy.start();

        let delays: Vec<u64> = (0..6)
            .map(|_| backoff.next_delay().unwrap().as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
        assert_eq!(backoff.attempts(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion() {
        let mut backoff = BackoffPolicy::POLLING.start();
        let mut total = Duration::ZERO;

        while let Some(delay) = backoff.next_delay() {
            tokio::time::sleep(delay).await;
            total += delay;
        }

        assert_eq!(total, Duration::from_secs(120));
        assert!(backoff.is_exhausted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_never_exhausts() {
        let mut backoff = BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(50)).start();
        for _ in 0..100 {
            assert!(backoff.next_delay().is_some());
        }
        assert!(!backoff.is_exhausted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_interval() {
        let mut backoff = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(10)).start();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset_interval();
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
    }

    proptest::proptest! {
        #[test]
        fn prop_delay_never_exceeds_max(initial in 1u64..5_000, max in 1u64..60_000, steps in 1usize..40) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();
            rt.block_on(async {
                let policy = BackoffPolicy::new(Duration::from_millis(initial), Duration::from_millis(max));
                let mut backoff = policy.start();
                for _ in 0..steps {
                    let delay = backoff.next_delay().unwrap();
                    assert!(delay <= Duration::from_millis(max));
                }
            });
        }
    }
}
