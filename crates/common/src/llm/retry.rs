//! Bounded exponential-backoff retries for provider calls
//!
//! Transient failures (timeouts, rate limits, 5xx, connection errors) are
//! retried; everything else, content-policy rejections in particular, is
//! returned on the first occurrence.

use super::{
    ChatMessage, ChatModel, ChatResponse, CompletionArgs, CompletionModel, CompletionResponse,
    EmbeddingModel, ProviderResult,
};
use crate::config::RetryConfig;
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoffBuilder};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Retry schedule: `max_attempts` tries, delays doubling from `initial_backoff`
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `call` until it succeeds, fails permanently or runs out of attempts
    pub async fn run<T, F, Fut>(&self, operation: &'static str, model: &str, call: F) -> ProviderResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let schedule = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_interval(self.max_backoff)
            .with_max_elapsed_time(None)
            .build();

        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let call = &call;
        let max_attempts = self.max_attempts;

        retry(schedule, move || async move {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            match call().await {
                Ok(value) => Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    warn!(
                        operation,
                        model,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Provider call failed, retrying"
                    );
                    metrics::counter!(
                        "tutorforge_provider_retries_total",
                        "operation" => operation
                    )
                    .increment(1);
                    Err(backoff::Error::transient(e))
                }
                Err(e) => {
                    warn!(operation, model, attempt, error = %e, "Provider call failed permanently");
                    Err(backoff::Error::permanent(e))
                }
            }
        })
        .await
    }
}

/// Chat handle that retries transient provider failures
pub struct RetryingChat {
    inner: Arc<dyn ChatModel>,
    policy: RetryPolicy,
}

impl RetryingChat {
    pub fn new(inner: Arc<dyn ChatModel>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl ChatModel for RetryingChat {
    async fn chat(&self, messages: &[ChatMessage], args: &CompletionArgs) -> ProviderResult<ChatResponse> {
        self.policy
            .run("chat", self.inner.model_name(), || self.inner.chat(messages, args))
            .await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// Completion handle that retries transient provider failures
pub struct RetryingCompletion {
    inner: Arc<dyn CompletionModel>,
    policy: RetryPolicy,
}

impl RetryingCompletion {
    pub fn new(inner: Arc<dyn CompletionModel>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl CompletionModel for RetryingCompletion {
    async fn complete(&self, prompt: &str, args: &CompletionArgs) -> ProviderResult<CompletionResponse> {
        self.policy
            .run("complete", self.inner.model_name(), || self.inner.complete(prompt, args))
            .await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// Embedding handle that retries transient provider failures
pub struct RetryingEmbedding {
    inner: Arc<dyn EmbeddingModel>,
    policy: RetryPolicy,
}

impl RetryingEmbedding {
    pub fn new(inner: Arc<dyn EmbeddingModel>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl EmbeddingModel for RetryingEmbedding {
    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>> {
        self.policy
            .run("embed", self.inner.model_name(), || self.inner.embed(text))
            .await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}
