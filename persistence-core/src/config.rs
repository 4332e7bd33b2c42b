//! Environment-driven configuration for the retry engine, modeled on
//! `SwarmConfig::default()`'s `.ok().and_then(...).filter(...).unwrap_or(...)`
//! idiom.

use std::time::Duration;

use crate::retry::ExponentialBackoffPolicy;

fn env_parsed<T: std::str::FromStr>(name: &str, predicate: impl Fn(&T) -> bool) -> Option<T> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .filter(predicate)
}

/// Defaults for C1's retry policies, recognized as `retry.defaults.*` in §6.
#[derive(Debug, Clone, Copy)]
pub struct RetryDefaults {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_factor: f64,
    pub max_duration: Duration,
}

impl Default for RetryDefaults {
    fn default() -> Self {
        let max_attempts = env_parsed("WORKFLOW_RETRY_MAX_ATTEMPTS", |v: &u32| *v > 0).unwrap_or(3);
        let initial_delay_ms =
            env_parsed("WORKFLOW_RETRY_INITIAL_DELAY_MS", |v: &u64| *v > 0).unwrap_or(200);
        let max_delay_ms = env_parsed("WORKFLOW_RETRY_MAX_DELAY_MS", |v: &u64| *v > 0).unwrap_or(30_000);
        let multiplier = env_parsed("WORKFLOW_RETRY_MULTIPLIER", |v: &f64| *v > 1.0).unwrap_or(2.0);
        let jitter_factor =
            env_parsed("WORKFLOW_RETRY_JITTER_FACTOR", |v: &f64| (0.0..=1.0).contains(v))
                .unwrap_or(0.1);
        let max_duration_secs =
            env_parsed("WORKFLOW_RETRY_MAX_DURATION_SECS", |v: &u64| *v > 0).unwrap_or(600);

        Self {
            max_attempts,
            initial_delay: Duration::from_millis(initial_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
            multiplier,
            jitter_factor,
            max_duration: Duration::from_secs(max_duration_secs),
        }
    }
}

impl RetryDefaults {
    /// Deterministic defaults bypassing the environment, for tests.
    pub fn for_tests() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_duration: Duration::from_secs(5),
        }
    }

    pub fn build_exponential_policy(&self) -> ExponentialBackoffPolicy {
        ExponentialBackoffPolicy::new(
            self.initial_delay,
            self.max_delay,
            self.multiplier,
            self.jitter_factor,
            self.max_attempts,
            self.max_duration,
        )
    }
}
