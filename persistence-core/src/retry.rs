//! Policy-driven retry engine (C1).
//!
//! Wraps any fallible async thunk in a `RetryPolicy`: none, fixed-delay, or
//! exponential backoff with jitter. Retryability is decided by a fixed
//! classifier of transient-error substrings, mirrored on the backoff loop in
//! `orchestrator::prompt_with_retry` from the coding swarm.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::{MetricSink, NoopMetricSink};
use crate::model::{Metric, MetricKind, RetryContext};

/// Case-insensitive substrings that mark an error message as transient.
const TRANSIENT_SUBSTRINGS: &[&str] = &[
    "timeout",
    "connection reset",
    "connection refused",
    "temporary failure",
    "service unavailable",
    "rate limit",
    "too many requests",
    "server error",
    "internal error",
    "network is unreachable",
    "502",
    "503",
    "504",
    "throttled",
    "quota exceeded",
];

/// Classify an error message as retryable using the fixed transient-substring
/// set. Callers with a typed error may short-circuit this for known network
/// or timeout error kinds before falling back to message inspection.
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    TRANSIENT_SUBSTRINGS.iter().any(|s| lower.contains(s))
}

/// A distinct error surfaced when a retry loop is cancelled mid-sleep or
/// mid-attempt rather than exhausting its policy.
#[derive(Debug, Clone, thiserror::Error)]
#[error("retry loop cancelled after {attempts} attempt(s)")]
pub struct RetryCancelled {
    pub attempts: u32,
}

/// `RetryEngine::execute`'s error channel: distinguishes cooperative
/// cancellation from the policy simply declining a further attempt, so
/// callers can map cancellation to their own `Cancelled` kind instead of
/// treating it as an ordinary operation failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RetryOutcomeError {
    #[error(transparent)]
    Cancelled(#[from] RetryCancelled),
    #[error("{0}")]
    Exhausted(String),
}

/// Governs whether/how long to wait between attempts of a wrapped operation.
pub trait RetryPolicy: Send + Sync {
    fn should_retry(&self, ctx: &RetryContext, last_error: &str) -> bool;
    fn retry_delay(&self, ctx: &RetryContext) -> Duration;
    fn is_retryable(&self, error_message: &str) -> bool {
        is_transient_message(error_message)
    }
    fn max_attempts(&self) -> u32;
    fn max_duration(&self) -> Duration;
    /// Short label used when tagging the `retry.*` metrics by policy class.
    fn label(&self) -> &'static str;
}

/// Never retries. `max_attempts` is always 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonePolicy;

impl RetryPolicy for NonePolicy {
    fn should_retry(&self, _ctx: &RetryContext, _last_error: &str) -> bool {
        false
    }

    fn retry_delay(&self, _ctx: &RetryContext) -> Duration {
        Duration::ZERO
    }

    fn max_attempts(&self) -> u32 {
        1
    }

    fn max_duration(&self) -> Duration {
        Duration::ZERO
    }

    fn label(&self) -> &'static str {
        "none"
    }
}

/// Constant delay between attempts, capped by `max_attempts`/`max_duration`.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelayPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
    pub max_duration: Duration,
}

impl RetryPolicy for FixedDelayPolicy {
    fn should_retry(&self, ctx: &RetryContext, last_error: &str) -> bool {
        self.is_retryable(last_error)
            && ctx.attempt_count() < self.max_attempts
            && ctx.elapsed() < self.max_duration
    }

    fn retry_delay(&self, _ctx: &RetryContext) -> Duration {
        self.delay
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn max_duration(&self) -> Duration {
        self.max_duration
    }

    fn label(&self) -> &'static str {
        "fixed"
    }
}

/// `delay = min(initialDelay * multiplier^retryNumber, maxDelay)`, optionally
/// jittered into `[d*(1-j), d*(1+j)]`. Requires `multiplier > 1.0` and
/// `maxDelay >= initialDelay`.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_factor: f64,
    pub max_attempts: u32,
    pub max_duration: Duration,
}

impl ExponentialBackoffPolicy {
    pub fn new(
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
        jitter_factor: f64,
        max_attempts: u32,
        max_duration: Duration,
    ) -> Self {
        assert!(multiplier > 1.0, "multiplier must be > 1.0");
        assert!(max_delay >= initial_delay, "maxDelay must be >= initialDelay");
        let jitter_factor = jitter_factor.clamp(0.0, 1.0);
        Self {
            initial_delay,
            max_delay,
            multiplier,
            jitter_factor,
            max_attempts,
            max_duration,
        }
    }
}

impl RetryPolicy for ExponentialBackoffPolicy {
    fn should_retry(&self, ctx: &RetryContext, last_error: &str) -> bool {
        self.is_retryable(last_error)
            && ctx.attempt_count() < self.max_attempts
            && ctx.elapsed() < self.max_duration
    }

    fn retry_delay(&self, ctx: &RetryContext) -> Duration {
        let retry_number = ctx.attempt_count().saturating_sub(1);
        let raw = self.initial_delay.as_secs_f64() * self.multiplier.powi(retry_number as i32);
        let capped = raw.min(self.max_delay.as_secs_f64());

        let delay_secs = if self.jitter_factor > 0.0 {
            let lower = capped * (1.0 - self.jitter_factor);
            let upper = capped * (1.0 + self.jitter_factor);
            if upper > lower {
                rand::thread_rng().gen_range(lower..upper)
            } else {
                capped
            }
        } else {
            capped
        };

        Duration::from_secs_f64(delay_secs.max(0.0))
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn max_duration(&self) -> Duration {
        self.max_duration
    }

    fn label(&self) -> &'static str {
        "exponential"
    }
}

/// Executes a fallible async thunk under a `RetryPolicy`, recording attempts
/// into a fresh `RetryContext` and honoring cancellation during the
/// inter-attempt sleep.
pub struct RetryEngine<'a> {
    policy: &'a dyn RetryPolicy,
    sink: Arc<dyn MetricSink>,
}

impl<'a> RetryEngine<'a> {
    pub fn new(policy: &'a dyn RetryPolicy) -> Self {
        Self {
            policy,
            sink: Arc::new(NoopMetricSink),
        }
    }

    /// Emit `retry.*` (§4.1) through `sink` instead of discarding them.
    pub fn with_sink(mut self, sink: Arc<dyn MetricSink>) -> Self {
        self.sink = sink;
        self
    }

    fn emit_metrics(&self, op_name: &str, ctx: &RetryContext, success: bool, retried: bool) {
        let mut tags = BTreeMap::new();
        tags.insert("operation".to_string(), op_name.to_string());
        tags.insert("success".to_string(), success.to_string());
        tags.insert("policy".to_string(), self.policy.label().to_string());
        tags.insert("retried".to_string(), retried.to_string());

        let failures = ctx.attempts.iter().filter(|a| !a.success).count() as f64;

        self.sink
            .record(Metric::new("retry.operations.count", MetricKind::Counter, 1.0, tags.clone()));
        self.sink.record(Metric::new(
            "retry.attempts.total",
            MetricKind::Gauge,
            ctx.attempt_count() as f64,
            tags.clone(),
        ));
        self.sink
            .record(Metric::new("retry.failures.total", MetricKind::Gauge, failures, tags.clone()));
        self.sink.record(Metric::new(
            "retry.duration.total",
            MetricKind::Timer,
            ctx.elapsed().as_secs_f64(),
            tags,
        ));
    }

    /// Run `op` until it succeeds, the policy declines a further retry, or
    /// `cancel` is triggered. `op_name` tags the emitted metrics/log spans.
    pub async fn execute<T, E, F, Fut>(
        &self,
        op_name: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, RetryOutcomeError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut ctx = RetryContext::new();
        let mut retried = false;

        loop {
            if cancel.is_cancelled() {
                self.emit_metrics(op_name, &ctx, false, retried);
                return Err(RetryCancelled { attempts: ctx.attempt_count() }.into());
            }

            let attempt_result = op().await;

            match attempt_result {
                Ok(value) => {
                    ctx.record(true, None);
                    info!(
                        operation = op_name,
                        attempts = ctx.attempt_count(),
                        retried,
                        policy = self.policy.label(),
                        "operation succeeded"
                    );
                    self.emit_metrics(op_name, &ctx, true, retried);
                    return Ok(value);
                }
                Err(err) => {
                    let message = err.to_string();
                    ctx.record(false, Some(message.clone()));

                    if !self.policy.should_retry(&ctx, &message) {
                        warn!(
                            operation = op_name,
                            attempts = ctx.attempt_count(),
                            error = %message,
                            policy = self.policy.label(),
                            "operation failed, not retrying"
                        );
                        self.emit_metrics(op_name, &ctx, false, retried);
                        return Err(RetryOutcomeError::Exhausted(message));
                    }

                    retried = true;
                    let delay = self.policy.retry_delay(&ctx);
                    debug!(
                        operation = op_name,
                        attempt = ctx.attempt_count(),
                        delay_ms = delay.as_millis(),
                        "retrying after delay"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {
                            self.emit_metrics(op_name, &ctx, false, retried);
                            return Err(RetryCancelled { attempts: ctx.attempt_count() }.into());
                        }
                    }
                }
            }
        }
    }
}
