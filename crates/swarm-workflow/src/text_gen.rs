//! Text-generation client contract (C4): a single `generate` call. The
//! concrete backend is out of scope; this module carries only the narrow
//! trait plus a canned-response mock used by tests and the CLI's
//! offline/dry-run mode.

use std::sync::Arc;

use async_trait::async_trait;
use persistence_core::{RetryEngine, RetryOutcomeError, RetryPolicy};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::WorkflowError;

/// `generate(prompt) -> text`. No streaming, no tool-calling protocol at
/// this layer — tool calls are a convention in the returned text (see the
/// agent runtime and §6's wire format).
#[async_trait]
pub trait TextGenClient: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, WorkflowError>;
}

/// Wraps an inner client with C1's retry engine, per §4.4's "the client may
/// itself be wrapped by C1."
pub struct RetryingTextGenClient {
    inner: Arc<dyn TextGenClient>,
    policy: Box<dyn RetryPolicy>,
    cancel: CancellationToken,
}

impl RetryingTextGenClient {
    pub fn new(inner: Arc<dyn TextGenClient>, policy: Box<dyn RetryPolicy>, cancel: CancellationToken) -> Self {
        Self { inner, policy, cancel }
    }
}

#[async_trait]
impl TextGenClient for RetryingTextGenClient {
    async fn generate(&self, prompt: &str) -> Result<String, WorkflowError> {
        let engine = RetryEngine::new(self.policy.as_ref());
        match engine
            .execute("text_gen.generate", &self.cancel, || self.inner.generate(prompt))
            .await
        {
            Ok(output) => Ok(output),
            Err(RetryOutcomeError::Cancelled(_)) => Err(WorkflowError::Cancelled),
            Err(RetryOutcomeError::Exhausted(msg)) => Err(WorkflowError::LlmProviderFailure(msg)),
        }
    }
}

/// Deterministic stand-in for C4 used by tests and local smoke runs: serves
/// canned responses in call order, or falls back to an echo if exhausted.
pub struct MockTextGenClient {
    responses: Mutex<std::collections::VecDeque<String>>,
    echo_fallback: bool,
}

impl MockTextGenClient {
    pub fn new(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            echo_fallback: false,
        }
    }

    /// When the canned queue is exhausted, echo the prompt back instead of
    /// erroring — handy for exploratory CLI runs with a short seed list.
    pub fn with_echo_fallback(mut self) -> Self {
        self.echo_fallback = true;
        self
    }
}

#[async_trait]
impl TextGenClient for MockTextGenClient {
    async fn generate(&self, prompt: &str) -> Result<String, WorkflowError> {
        let mut responses = self.responses.lock().await;
        match responses.pop_front() {
            Some(response) => Ok(response),
            None if self.echo_fallback => Ok(prompt.to_string()),
            None => Err(WorkflowError::LlmProviderFailure(
                "mock client exhausted its canned responses".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence_core::ExponentialBackoffPolicy;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fails with a transient-looking message `fail_times` times, then
    /// succeeds with `final_response`.
    struct FlakyTextGenClient {
        remaining_failures: AtomicUsize,
        final_response: String,
    }

    impl FlakyTextGenClient {
        fn new(fail_times: usize, final_response: impl Into<String>) -> Self {
            Self {
                remaining_failures: AtomicUsize::new(fail_times),
                final_response: final_response.into(),
            }
        }
    }

    #[async_trait]
    impl TextGenClient for FlakyTextGenClient {
        async fn generate(&self, _prompt: &str) -> Result<String, WorkflowError> {
            if self.remaining_failures.load(Ordering::SeqCst) > 0 {
                self.remaining_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(WorkflowError::LlmProviderFailure(
                    "upstream: service unavailable, try again".to_string(),
                ));
            }
            Ok(self.final_response.clone())
        }
    }

    #[tokio::test]
    async fn serves_canned_responses_in_order() {
        let client = MockTextGenClient::new(["first", "second"]);
        assert_eq!(client.generate("p1").await.unwrap(), "first");
        assert_eq!(client.generate("p2").await.unwrap(), "second");
    }

    #[tokio::test]
    async fn errors_when_exhausted_without_fallback() {
        let client = MockTextGenClient::new(Vec::<String>::new());
        assert!(client.generate("p").await.is_err());
    }

    #[tokio::test]
    async fn echoes_when_exhausted_with_fallback() {
        let client = MockTextGenClient::new(Vec::<String>::new()).with_echo_fallback();
        assert_eq!(client.generate("hi").await.unwrap(), "hi");
    }

    #[tokio::test]
    async fn retrying_client_recovers_from_transient_failures_within_bounded_time() {
        let inner = Arc::new(FlakyTextGenClient::new(2, "recovered"));
        let policy = ExponentialBackoffPolicy::new(
            Duration::from_millis(5),
            Duration::from_millis(50),
            2.0,
            0.0,
            5,
            Duration::from_secs(5),
        );
        let client = RetryingTextGenClient::new(inner, Box::new(policy), CancellationToken::new());

        let start = std::time::Instant::now();
        let output = client.generate("do it").await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(output, "recovered");
        // Two retries at 5ms/10ms with zero jitter: well under a second,
        // comfortably above zero.
        assert!(elapsed < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn retrying_client_surfaces_non_transient_failure_immediately() {
        struct AlwaysFailsClient;
        #[async_trait]
        impl TextGenClient for AlwaysFailsClient {
            async fn generate(&self, _prompt: &str) -> Result<String, WorkflowError> {
                Err(WorkflowError::LlmProviderFailure("invalid api key".to_string()))
            }
        }

        let policy = ExponentialBackoffPolicy::new(
            Duration::from_millis(5),
            Duration::from_millis(50),
            2.0,
            0.0,
            5,
            Duration::from_secs(5),
        );
        let client = RetryingTextGenClient::new(
            Arc::new(AlwaysFailsClient),
            Box::new(policy),
            CancellationToken::new(),
        );

        let err = client.generate("do it").await.unwrap_err();
        assert!(matches!(err, WorkflowError::LlmProviderFailure(_)));
    }
}
