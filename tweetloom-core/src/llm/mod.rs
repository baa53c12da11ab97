//! Outbound chat-completion calls.
//!
//! [`LlmClient`] is the single seam between the calendar code and the network.
//! [`HttpLlmClient`] talks to an OpenAI-compatible endpoint; [`RetryingClient`]
//! layers the backoff policy on top of any client.

mod http;

pub use http::HttpLlmClient;

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::config::LlmConfig;
use crate::retry::{RetryPolicy, Retryable};

/// Message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry of the ordered conversation sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Sampling and transport parameters for a single completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self::from(&LlmConfig::default())
    }
}

impl From<&LlmConfig> for CompletionParams {
    fn from(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: config.timeout(),
        }
    }
}

impl CompletionParams {
    /// Long generations get 50% more time.
    pub fn effective_timeout(&self) -> Duration {
        if self.max_tokens > 2000 {
            self.timeout.mul_f64(1.5)
        } else {
            self.timeout
        }
    }
}

/// Why an LLM call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// 401/403: bad key or permissions
    Auth,
    /// 429
    RateLimit,
    /// DNS failure, refused or reset connection
    Connection,
    /// 5xx
    Server,
    /// Any other 4xx
    BadRequest,
    /// The request exceeded its timeout
    Timeout,
    /// 2xx without usable completion text
    EmptyResponse,
}

impl fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LlmErrorKind::Auth => "authentication failed",
            LlmErrorKind::RateLimit => "rate limited",
            LlmErrorKind::Connection => "connection failed",
            LlmErrorKind::Server => "server error",
            LlmErrorKind::BadRequest => "request rejected",
            LlmErrorKind::Timeout => "timed out",
            LlmErrorKind::EmptyResponse => "empty response",
        };
        f.write_str(name)
    }
}

/// Classified failure from the outbound LLM call.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            401 | 403 => LlmErrorKind::Auth,
            429 => LlmErrorKind::RateLimit,
            400..=499 => LlmErrorKind::BadRequest,
            _ => LlmErrorKind::Server,
        };
        Self {
            kind,
            status: Some(status),
            message: truncate_body(body),
        }
    }

    /// Authentication and malformed-request failures are final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            LlmErrorKind::RateLimit
                | LlmErrorKind::Connection
                | LlmErrorKind::Server
                | LlmErrorKind::Timeout
        )
    }
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (HTTP {}): {}", self.kind, status, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for LlmError {}

impl Retryable for LlmError {
    fn is_retryable(&self) -> bool {
        LlmError::is_retryable(self)
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 300;
    let body = body.trim();
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

/// Chat-completion interface.
pub trait LlmClient: Send + Sync {
    fn complete(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> Result<String, LlmError>;
}

impl<C: LlmClient + ?Sized> LlmClient for &C {
    fn complete(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> Result<String, LlmError> {
        (**self).complete(messages, params)
    }
}

impl<C: LlmClient + ?Sized> LlmClient for Box<C> {
    fn complete(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> Result<String, LlmError> {
        (**self).complete(messages, params)
    }
}

/// Wraps a client so transient failures are retried with backoff.
pub struct RetryingClient<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: LlmClient> RetryingClient<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl<C: LlmClient> LlmClient for RetryingClient<C> {
    fn complete(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> Result<String, LlmError> {
        self.policy.run(|attempt| {
            tracing::debug!(
                attempt,
                max_attempts = self.policy.max_attempts,
                "Calling LLM"
            );
            self.inner.complete(messages, params)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Scripted {
        responses: Mutex<Vec<Result<String, LlmError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(mut responses: Vec<Result<String, LlmError>>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    impl LlmClient for Scripted {
        fn complete(&self, _: &[ChatMessage], _: &CompletionParams) -> Result<String, LlmError> {
            *self.calls.lock().unwrap() += 1;
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(LlmError::new(LlmErrorKind::EmptyResponse, "script exhausted")))
        }
    }

    #[test]
    fn status_classification() {
        assert_eq!(LlmError::from_status(401, "").kind, LlmErrorKind::Auth);
        assert_eq!(LlmError::from_status(403, "").kind, LlmErrorKind::Auth);
        assert_eq!(LlmError::from_status(429, "").kind, LlmErrorKind::RateLimit);
        assert_eq!(LlmError::from_status(404, "").kind, LlmErrorKind::BadRequest);
        assert_eq!(LlmError::from_status(500, "").kind, LlmErrorKind::Server);
        assert_eq!(LlmError::from_status(503, "").kind, LlmErrorKind::Server);
    }

    #[test]
    fn retryability_follows_kind() {
        assert!(LlmError::from_status(429, "").is_retryable());
        assert!(LlmError::from_status(502, "").is_retryable());
        assert!(LlmError::new(LlmErrorKind::Timeout, "t").is_retryable());
        assert!(LlmError::new(LlmErrorKind::Connection, "c").is_retryable());
        assert!(!LlmError::from_status(401, "").is_retryable());
        assert!(!LlmError::from_status(400, "").is_retryable());
        assert!(!LlmError::new(LlmErrorKind::EmptyResponse, "e").is_retryable());
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(1000);
        let err = LlmError::from_status(500, &body);
        assert!(err.message.len() < 310);
        assert!(err.message.ends_with("..."));
    }

    #[test]
    fn timeout_scales_for_long_generations() {
        let mut params = CompletionParams {
            temperature: 0.7,
            max_tokens: 1000,
            timeout: Duration::from_secs(100),
        };
        assert_eq!(params.effective_timeout(), Duration::from_secs(100));
        params.max_tokens = 10_000;
        assert_eq!(params.effective_timeout(), Duration::from_secs(150));
    }

    #[test]
    fn message_roles_serialize_lowercase() {
        let json = serde_json::to_value(ChatMessage::system("hi")).unwrap();
        assert_eq!(json["role"], "system");
        assert_eq!(json["content"], "hi");
    }

    #[test]
    fn retrying_client_retries_transient_failures() {
        let inner = Scripted::new(vec![
            Err(LlmError::from_status(503, "busy")),
            Err(LlmError::new(LlmErrorKind::Timeout, "slow")),
            Ok("{}".to_string()),
        ]);
        let client = RetryingClient::new(inner, RetryPolicy::immediate(3));
        let out = client
            .complete(&[ChatMessage::user("x")], &CompletionParams::default())
            .unwrap();
        assert_eq!(out, "{}");
        assert_eq!(client.inner.calls(), 3);
    }

    #[test]
    fn retrying_client_stops_on_auth_failure() {
        let inner = Scripted::new(vec![
            Err(LlmError::from_status(401, "bad key")),
            Ok("{}".to_string()),
        ]);
        let client = RetryingClient::new(inner, RetryPolicy::immediate(3));
        let err = client
            .complete(&[ChatMessage::user("x")], &CompletionParams::default())
            .unwrap_err();
        assert_eq!(err.kind, LlmErrorKind::Auth);
        assert_eq!(client.inner.calls(), 1);
    }

    #[test]
    fn retrying_client_surfaces_last_error() {
        let inner = Scripted::new(vec![
            Err(LlmError::from_status(500, "first")),
            Err(LlmError::from_status(502, "second")),
        ]);
        let client = RetryingClient::new(inner, RetryPolicy::immediate(2));
        let err = client
            .complete(&[ChatMessage::user("x")], &CompletionParams::default())
            .unwrap_err();
        assert_eq!(err.status, Some(502));
        assert_eq!(err.message, "second");
    }
}
