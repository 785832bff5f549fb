//! Backoff strategies, jitter and the stateful schedule that consumes them.

use std::time::Duration;

/// Backoff strategy for calculating retry delays
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed(Duration),
    /// Linear backoff: initial_delay + (attempt * increment)
    Linear { initial_delay: Duration, increment: Duration },
    /// Exponential backoff: initial_delay * base^attempt, capped at max_delay
    Exponential { initial_delay: Duration, base: f64, max_delay: Duration },
}

impl BackoffStrategy {
    /// Calculate the un-jittered delay for the given attempt (0-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed(delay) => *delay,
            BackoffStrategy::Linear { initial_delay, increment } => {
                *initial_delay + increment.saturating_mul(attempt)
            }
            BackoffStrategy::Exponential { initial_delay, base, max_delay } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let delay = initial_delay.as_millis() as f64 * base.powi(exponent);
                let delay_ms = delay.min(max_delay.as_millis() as f64).max(0.0) as u64;
                Duration::from_millis(delay_ms)
            }
        }
    }
}

/// Jitter type for adding randomness to retry delays
#[derive(Debug, Clone, PartialEq)]
pub enum Jitter {
    /// No jitter
    None,
    /// Full jitter: 0 to calculated_delay
    Full,
    /// Equal jitter: calculated_delay/2 to calculated_delay
    Equal,
    /// Symmetric jitter: calculated_delay * (1 ± fraction)
    Proportional(f64),
}

impl Jitter {
    /// Apply jitter using a caller-supplied sample in `[0, 1)`
    pub fn apply_with(&self, delay: Duration, sample: f64) -> Duration {
        let sample = sample.clamp(0.0, 1.0);
        let millis = delay.as_millis() as f64;
        let jittered = match self {
            Jitter::None => millis,
            Jitter::Full => millis * sample,
            Jitter::Equal => millis / 2.0 + (millis / 2.0) * sample,
            Jitter::Proportional(fraction) => {
                let fraction = fraction.clamp(0.0, 1.0);
                millis * (1.0 - fraction + 2.0 * fraction * sample)
            }
        };
        Duration::from_millis(jittered.round().max(0.0) as u64)
    }

    /// Apply jitter using a fresh random sample
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            Jitter::None => delay,
            _ => self.apply_with(delay, rand::random::<f64>()),
        }
    }
}

/// A backoff strategy paired with its jitter
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay curve
    pub strategy: BackoffStrategy,
    /// Randomisation applied on top of the curve
    pub jitter: Jitter,
}

impl BackoffPolicy {
    /// Create a policy from an explicit strategy and jitter
    pub fn new(strategy: BackoffStrategy, jitter: Jitter) -> Self {
        Self { strategy, jitter }
    }

    /// Exponential policy: `initial_delay * factor^attempt`, capped at `max_delay`
    pub fn exponential(
        initial_delay: Duration,
        factor: f64,
        max_delay: Duration,
        jitter: Jitter,
    ) -> Self {
        Self::new(BackoffStrategy::Exponential { initial_delay, base: factor, max_delay }, jitter)
    }

    /// Un-jittered delay for `attempt`
    pub fn ceiling(&self, attempt: u32) -> Duration {
        self.strategy.calculate_delay(attempt)
    }

    /// Jittered delay for `attempt` given a sample in `[0, 1)`
    pub fn delay_with(&self, attempt: u32, sample: f64) -> Duration {
        self.jitter.apply_with(self.ceiling(attempt), sample)
    }

    /// Jittered delay for `attempt` with a random sample
    pub fn delay(&self, attempt: u32) -> Duration {
        self.jitter.apply(self.ceiling(attempt))
    }

    /// Start a schedule driven by this policy
    pub fn schedule(&self) -> BackoffSchedule {
        BackoffSchedule::new(self.clone())
    }
}

/// Stateful iterator over a [`BackoffPolicy`]
///
/// Delays produced by a schedule never decrease: a jittered sample lower than
/// the previous delay is raised to it.
#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    policy: BackoffPolicy,
    attempt: u32,
    last: Duration,
}

impl BackoffSchedule {
    /// Create a schedule positioned at attempt 0
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0, last: Duration::ZERO }
    }

    /// Number of delays handed out so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Next delay with a random jitter sample
    pub fn next_delay(&mut self) -> Duration {
        let candidate = self.policy.delay(self.attempt);
        self.advance(candidate)
    }

    /// Next delay with a caller-supplied jitter sample
    pub fn next_delay_with(&mut self, sample: f64) -> Duration {
        let candidate = self.policy.delay_with(self.attempt, sample);
        self.advance(candidate)
    }

    /// Restart from attempt 0 (e.g. after a successful reconnect)
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.last = Duration::ZERO;
    }

    fn advance(&mut self, candidate: Duration) -> Duration {
        let delay = candidate.max(self.last);
        self.last = delay;
        self.attempt = self.attempt.saturating_add(1);
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_policy() -> BackoffPolicy {
        BackoffPolicy::exponential(
            Duration::from_millis(500),
            2.0,
            Duration::from_secs(30),
            Jitter::Full,
        )
    }

    #[test]
    fn exponential_strategy_doubles_until_cap() {
        let strategy = BackoffStrategy::Exponential {
            initial_delay: Duration::from_secs(1),
            base: 2.0,
            max_delay: Duration::from_secs(30),
        };

        assert_eq!(strategy.calculate_delay(0), Duration::from_secs(1));
        assert_eq!(strategy.calculate_delay(1), Duration::from_secs(2));
        assert_eq!(strategy.calculate_delay(4), Duration::from_secs(16));
        assert_eq!(strategy.calculate_delay(5), Duration::from_secs(30));
        assert_eq!(strategy.calculate_delay(60), Duration::from_secs(30));
    }

    #[test]
    fn fixed_and_linear_strategies() {
        let fixed = BackoffStrategy::Fixed(Duration::from_millis(100));
        assert_eq!(fixed.calculate_delay(7), Duration::from_millis(100));

        let linear = BackoffStrategy::Linear {
            initial_delay: Duration::from_millis(100),
            increment: Duration::from_millis(50),
        };
        assert_eq!(linear.calculate_delay(2), Duration::from_millis(200));
    }

    #[test]
    fn full_jitter_spans_zero_to_ceiling() {
        let delay = Duration::from_millis(1_000);
        assert_eq!(Jitter::Full.apply_with(delay, 0.0), Duration::ZERO);
        assert_eq!(Jitter::Full.apply_with(delay, 0.5), Duration::from_millis(500));
        assert_eq!(Jitter::Full.apply_with(delay, 1.0), delay);
    }

    #[test]
    fn proportional_jitter_stays_within_twenty_percent() {
        let jitter = Jitter::Proportional(0.2);
        let delay = Duration::from_secs(10);

        assert_eq!(jitter.apply_with(delay, 0.0), Duration::from_secs(8));
        assert_eq!(jitter.apply_with(delay, 0.5), Duration::from_secs(10));
        assert_eq!(jitter.apply_with(delay, 1.0), Duration::from_secs(12));

        for _ in 0..100 {
            let sampled = jitter.apply(delay);
            assert!(sampled >= Duration::from_secs(8) && sampled <= Duration::from_secs(12));
        }
    }

    #[test]
    fn policy_is_a_pure_function_of_attempt_and_sample() {
        let policy = request_policy();
        assert_eq!(policy.delay_with(0, 1.0), Duration::from_millis(500));
        assert_eq!(policy.delay_with(1, 1.0), Duration::from_millis(1_000));
        assert_eq!(policy.delay_with(2, 0.5), Duration::from_millis(1_000));
        assert_eq!(policy.ceiling(3), Duration::from_millis(4_000));
    }

    #[test]
    fn schedule_never_decreases() {
        let mut schedule = request_policy().schedule();

        let first = schedule.next_delay_with(0.9);
        let second = schedule.next_delay_with(0.0);
        let third = schedule.next_delay_with(0.1);

        assert_eq!(first, Duration::from_millis(450));
        assert_eq!(second, first);
        assert!(third >= second);
        assert_eq!(schedule.attempt(), 3);
    }

    #[test]
    fn random_schedule_is_monotonic() {
        let mut schedule = request_policy().schedule();
        let mut previous = Duration::ZERO;
        for _ in 0..10 {
            let delay = schedule.next_delay();
            assert!(delay >= previous);
            assert!(delay <= Duration::from_secs(30));
            previous = delay;
        }
    }

    #[test]
    fn reset_restarts_from_first_attempt() {
        let policy = BackoffPolicy::exponential(
            Duration::from_secs(1),
            2.0,
            Duration::from_secs(30),
            Jitter::None,
        );
        let mut schedule = policy.schedule();
        schedule.next_delay();
        schedule.next_delay();
        schedule.reset();

        assert_eq!(schedule.attempt(), 0);
        assert_eq!(schedule.next_delay(), Duration::from_secs(1));
    }
}
