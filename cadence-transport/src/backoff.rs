use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::TAU;
use std::time::Duration;

/// How reconnect attempts are spaced out after the connection drops.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt. Zero disables reconnecting.
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub growth_factor: f64,
    /// Standard deviation of the jitter, as a fraction of the delay.
    pub jitter_factor: f64,
    /// `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            growth_factor: 2.0,
            jitter_factor: 0.1,
            max_retries: None,
        }
    }
}

impl ReconnectPolicy {
    /// Never reconnect.
    pub fn disabled() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }

    pub fn is_enabled(&self) -> bool {
        !self.initial_delay.is_zero()
    }
}

/// Reconnect state: the current delay and how many closes have been seen
/// since the last successful open.
#[derive(Debug)]
pub struct Backoff {
    policy: ReconnectPolicy,
    delay: Duration,
    retry_count: u32,
    rng: StdRng,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self::with_seed(policy, rand::random())
    }

    pub fn with_seed(policy: ReconnectPolicy, seed: u64) -> Self {
        Self {
            delay: policy.initial_delay,
            policy,
            retry_count: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Delay the next attempt will be based on, before jitter.
    pub fn current_delay(&self) -> Duration {
        self.delay.min(self.policy.max_delay)
    }

    /// Back to the initial delay after a successful open.
    pub fn reset(&mut self) {
        self.delay = self.policy.initial_delay;
        self.retry_count = 0;
    }

    /// Record a close and return how long to wait before reconnecting, or
    /// `None` when the policy gives up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.retry_count = self.retry_count.saturating_add(1);
        if !self.policy.is_enabled() {
            return None;
        }
        if let Some(max_retries) = self.policy.max_retries {
            if self.retry_count > max_retries {
                return None;
            }
        }

        let current = self.current_delay();
        let grown = (current.as_nanos() as f64 * self.policy.growth_factor)
            .min(self.policy.max_delay.as_nanos() as f64);
        self.delay = from_nanos_f64(grown);

        Some(self.jittered(current))
    }

    fn jittered(&mut self, delay: Duration) -> Duration {
        if self.policy.jitter_factor <= 0.0 {
            return delay;
        }
        let nanos = delay.as_nanos() as f64;
        let spread = nanos * self.policy.jitter_factor;
        from_nanos_f64(nanos + spread * standard_normal(&mut self.rng))
    }
}

/// Negative and NaN inputs clamp to zero.
fn from_nanos_f64(nanos: f64) -> Duration {
    if nanos.is_nan() || nanos <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(nanos.round() as u64)
}

/// Box-Muller sample from N(0, 1).
fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    let u1 = 1.0 - rng.random::<f64>();
    let u2 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(initial: u64, max: u64) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(initial),
            max_delay: Duration::from_millis(max),
            growth_factor: 2.0,
            jitter_factor: 0.0,
            max_retries: None,
        }
    }

    #[test]
    fn delays_grow_geometrically_up_to_the_cap() {
        let mut backoff = Backoff::with_seed(policy(1, 10), 0);
        let delays: Vec<u128> = (0..7)
            .map(|_| backoff.next_delay().unwrap().as_millis())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10, 10]);
        assert_eq!(backoff.retry_count(), 7);
    }

    #[test]
    fn reset_restores_the_initial_delay() {
        let mut backoff = Backoff::with_seed(policy(100, 1_000), 0);
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.current_delay(), Duration::from_millis(400));

        backoff.reset();
        assert_eq!(backoff.retry_count(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn gives_up_after_max_retries() {
        let mut backoff = Backoff::with_seed(
            ReconnectPolicy {
                max_retries: Some(2),
                ..policy(10, 100)
            },
            0,
        );
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn zero_initial_delay_disables_reconnect() {
        let mut backoff = Backoff::with_seed(ReconnectPolicy::disabled(), 0);
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.retry_count(), 1);
    }

    #[test]
    fn jitter_spreads_around_the_delay() {
        let jittery = ReconnectPolicy {
            jitter_factor: 0.1,
            ..policy(1_000, 1_000)
        };
        let mut backoff = Backoff::with_seed(jittery, 1234);

        let samples: Vec<f64> = (0..10_000)
            .map(|_| backoff.next_delay().unwrap().as_secs_f64())
            .collect();
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let variance =
            samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / samples.len() as f64;

        assert!((mean - 1.0).abs() < 0.01, "mean was {mean}");
        assert!((variance.sqrt() - 0.1).abs() < 0.01, "stddev was {}", variance.sqrt());
        assert!(samples.iter().any(|s| *s != 1.0));
        assert!(samples.iter().all(|s| *s >= 0.0));
    }
}
