//! Reconnect delay policy
//!
//! Exponential backoff with symmetric jitter, capped.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff parameters
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Fraction of the delay randomly added or removed, e.g. `0.2` for ±20%
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

/// Stateful delay generator for one reconnect episode
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        let current = policy.initial;
        Self {
            policy,
            current,
            attempts: 0,
        }
    }

    /// Delay before the next attempt; grows the base delay for the one after
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.attempts += 1;

        let grown = base.as_secs_f64() * self.policy.multiplier;
        self.current = Duration::from_secs_f64(grown.min(self.policy.max.as_secs_f64()));

        apply_jitter(base, self.policy.jitter)
    }

    /// Start over after a successful connection
    pub fn reset(&mut self) {
        self.current = self.policy.initial;
        self.attempts = 0;
    }

    /// Attempts made since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

fn apply_jitter(base: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return base;
    }
    let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
    Duration::from_secs_f64((base.as_secs_f64() * factor).max(0.0))
}
