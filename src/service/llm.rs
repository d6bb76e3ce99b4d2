//! Shared LLM client and interaction utilities
//!
//! Wraps the OpenAI provider behind the `ChatModel` trait so pipeline
//! services can be exercised against mock models. All calls run under the
//! configured per-call timeout; retries are scoped to transient transport
//! failures only — retrying on arbitrary errors would mask validation and
//! injection failures.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use rig::providers::openai;
use rig::streaming::{StreamedAssistantContent, StreamingPrompt};
use serde_json::json;

/// LLM failure classified by kind, not by transport type.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM rate limited")]
    RateLimited,

    #[error("LLM call timed out")]
    Timeout,

    #[error("LLM connection failed: {0}")]
    Connect(String),

    #[error("LLM authentication failed: {0}")]
    Auth(String),

    #[error("LLM call failed: {0}")]
    Api(String),

    #[error("Failed to parse LLM output: {0}")]
    Parse(String),
}

impl LlmError {
    /// Only throttling and transport-level failures warrant a retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited | LlmError::Timeout | LlmError::Connect(_)
        )
    }

    /// Map a provider error message onto the error taxonomy.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("429") || lower.contains("rate limit") {
            LlmError::RateLimited
        } else if lower.contains("timed out") || lower.contains("timeout") {
            LlmError::Timeout
        } else if lower.contains("connect") || lower.contains("connection") {
            LlmError::Connect(message.to_string())
        } else if lower.contains("401")
            || lower.contains("403")
            || lower.contains("unauthorized")
            || lower.contains("invalid api key")
        {
            LlmError::Auth(message.to_string())
        } else {
            LlmError::Api(message.to_string())
        }
    }
}

/// One chat completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub preamble: String,
    pub prompt: String,
    pub temperature: f64,
    pub max_tokens: Option<u64>,
    /// Request strict JSON output from the provider.
    pub json_mode: bool,
}

impl ChatRequest {
    pub fn new(model: &str, preamble: &str, prompt: String) -> Self {
        Self {
            model: model.to_string(),
            preamble: preamble.to_string(),
            prompt,
            temperature: 0.2,
            max_tokens: None,
            json_mode: false,
        }
    }

    pub fn with_json_mode(mut self) -> Self {
        self.json_mode = true;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

pub type TokenStream = BoxStream<'static, Result<String, LlmError>>;

/// Chat access used by the pipeline services.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run one completion and return the full response text.
    async fn complete(&self, request: ChatRequest) -> Result<String, LlmError>;

    /// Run one streaming completion; the returned stream yields text tokens.
    async fn stream(&self, request: ChatRequest) -> Result<TokenStream, LlmError>;
}

/// OpenAI-backed chat client.
#[derive(Clone)]
pub struct LlmClient {
    client: openai::Client,
    timeout: Duration,
}

impl LlmClient {
    /// Build the provider client with the configured total and connect
    /// timeouts. The total budget is additionally enforced per call, so a
    /// stalled stream cannot outlive it.
    pub fn new(
        api_key: &str,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| LlmError::Connect(e.to_string()))?;

        let client = openai::Client::builder(api_key)
            .custom_client(http_client)
            .build()
            .map_err(|e| LlmError::Auth(e.to_string()))?;
        Ok(Self { client, timeout })
    }

    fn build_agent(&self, request: &ChatRequest) -> rig::agent::Agent<openai::CompletionModel> {
        let mut builder = self
            .client
            .agent(&request.model)
            .preamble(&request.preamble)
            .temperature(request.temperature);
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }
        if request.json_mode {
            builder =
                builder.additional_params(json!({ "response_format": { "type": "json_object" } }));
        }
        builder.build()
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    async fn complete(&self, request: ChatRequest) -> Result<String, LlmError> {
        use rig::completion::Prompt;

        let agent = self.build_agent(&request);
        let prompt = request.prompt.clone();

        match tokio::time::timeout(self.timeout, agent.prompt(prompt)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(LlmError::classify(&e.to_string())),
            Err(_) => Err(LlmError::Timeout),
        }
    }

    async fn stream(&self, request: ChatRequest) -> Result<TokenStream, LlmError> {
        let agent = self.build_agent(&request);
        let prompt = request.prompt.clone();
        let read_timeout = self.timeout;

        let mut inner = match tokio::time::timeout(read_timeout, agent.stream_prompt(prompt)).await
        {
            Ok(stream) => stream,
            Err(_) => return Err(LlmError::Timeout),
        };

        // Stream reads inherit the per-call timeout; a stalled provider
        // surfaces as LlmError::Timeout instead of hanging the pipeline.
        let stream = async_stream::stream! {
            loop {
                match tokio::time::timeout(read_timeout, inner.next()).await {
                    Ok(Some(Ok(StreamedAssistantContent::Text(text)))) => {
                        yield Ok(text.text);
                    }
                    Ok(Some(Ok(_))) => continue,
                    Ok(Some(Err(e))) => {
                        yield Err(LlmError::classify(&e.to_string()));
                        return;
                    }
                    Ok(None) => return,
                    Err(_) => {
                        yield Err(LlmError::Timeout);
                        return;
                    }
                }
            }
        };
        Ok(stream.boxed())
    }
}

/// Retry policy for transient upstream failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff with random jitter for the given attempt (0-based).
    fn delay(&self, attempt: usize) -> Duration {
        use rand::Rng;
        let exp = self
            .base_delay
            .saturating_mul(1u32 << attempt.min(8) as u32)
            .min(self.max_delay);
        let jitter_ms = rand::thread_rng().gen_range(0..500);
        exp + Duration::from_millis(jitter_ms)
    }
}

/// Run an operation with retries on transient errors only.
///
/// Non-transient errors propagate on first occurrence; they are handled by
/// the stage wrapper, never papered over here.
pub async fn with_retries<T, E, F, Fut>(
    operation: &str,
    policy: RetryPolicy,
    mut call: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    for<'a> &'a E: Into<Transience>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let transience: Transience = (&e).into();
                let transient = matches!(transience, Transience::Transient);
                attempt += 1;
                if !transient || attempt >= policy.max_attempts {
                    return Err(e);
                }
                let delay = policy.delay(attempt - 1);
                tracing::warn!(
                    operation = operation,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient upstream failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Retry eligibility of an error, decoupled from the concrete error type.
pub enum Transience {
    Transient,
    Permanent,
}

impl From<&LlmError> for Transience {
    fn from(e: &LlmError) -> Self {
        if e.is_transient() {
            Transience::Transient
        } else {
            Transience::Permanent
        }
    }
}

impl From<&crate::retriever::IndexError> for Transience {
    fn from(e: &crate::retriever::IndexError) -> Self {
        if e.is_transient() {
            Transience::Transient
        } else {
            Transience::Permanent
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn classify_rate_limit_and_timeout() {
        assert!(matches!(
            LlmError::classify("HTTP 429 Too Many Requests"),
            LlmError::RateLimited
        ));
        assert!(matches!(
            LlmError::classify("request timed out"),
            LlmError::Timeout
        ));
        assert!(matches!(
            LlmError::classify("connection refused"),
            LlmError::Connect(_)
        ));
        assert!(matches!(
            LlmError::classify("401 invalid api key"),
            LlmError::Auth(_)
        ));
        assert!(matches!(
            LlmError::classify("model not found"),
            LlmError::Api(_)
        ));
    }

    #[test]
    fn transient_scope_excludes_auth_and_parse() {
        assert!(LlmError::RateLimited.is_transient());
        assert!(LlmError::Timeout.is_transient());
        assert!(LlmError::Connect("x".into()).is_transient());
        assert!(!LlmError::Auth("x".into()).is_transient());
        assert!(!LlmError::Api("x".into()).is_transient());
        assert!(!LlmError::Parse("x".into()).is_transient());
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = Arc::clone(&calls);

        let result: Result<&str, LlmError> = with_retries("test", fast_policy(), move || {
            let calls = Arc::clone(&calls_in);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(LlmError::RateLimited)
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = Arc::clone(&calls);

        let result: Result<&str, LlmError> = with_retries("test", fast_policy(), move || {
            let calls = Arc::clone(&calls_in);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::Auth("bad key".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(LlmError::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_budget_is_bounded() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = Arc::clone(&calls);

        let result: Result<&str, LlmError> = with_retries("test", fast_policy(), move || {
            let calls = Arc::clone(&calls_in);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::Timeout)
            }
        })
        .await;

        assert!(matches!(result, Err(LlmError::Timeout)));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn backoff_delay_is_capped() {
        let policy = RetryPolicy::default();
        // Even at high attempt counts the exponential part stays at max_delay
        // (plus at most 500ms jitter).
        let delay = policy.delay(20);
        assert!(delay <= policy.max_delay + Duration::from_millis(500));
    }
}
