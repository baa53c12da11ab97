//! OpenAI-compatible chat-completion client.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};

use super::{ChatMessage, CompletionParams, LlmClient, LlmError, LlmErrorKind};
use crate::config::LlmConfig;
use crate::error::{Error, Result};

/// Blocking client for `POST {api_base}/chat/completions`.
pub struct HttpLlmClient {
    model: String,
    endpoint: String,
    api_key: String,
    runtime: tokio::runtime::Runtime,
    http: reqwest::Client,
}

impl HttpLlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config.resolved_api_key().ok_or_else(|| {
            Error::Config(
                "llm.api_key (or TWEETLOOM_API_KEY / OPENAI_API_KEY) is required".to_string(),
            )
        })?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Config(format!("failed to build tokio runtime: {e}")))?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            model: config.model.clone(),
            endpoint: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            api_key,
            runtime,
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn headers(&self) -> std::result::Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key)).map_err(|e| {
                LlmError::new(LlmErrorKind::BadRequest, format!("invalid auth header: {e}"))
            })?,
        );
        Ok(headers)
    }
}

impl LlmClient for HttpLlmClient {
    fn complete(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> std::result::Result<String, LlmError> {
        let headers = self.headers()?;
        let timeout = params.effective_timeout();

        tracing::debug!(
            endpoint = %self.endpoint,
            model = %self.model,
            max_tokens = params.max_tokens,
            timeout_secs = timeout.as_secs(),
            "Sending chat completion"
        );

        self.runtime.block_on(async {
            let resp = self
                .http
                .post(&self.endpoint)
                .headers(headers)
                .timeout(timeout)
                .json(&json!({
                    "model": self.model,
                    "messages": messages,
                    "temperature": params.temperature,
                    "max_tokens": params.max_tokens,
                }))
                .send()
                .await
                .map_err(|e| transport_error(&e))?;

            let status = resp.status();
            let body = resp.text().await.map_err(|e| transport_error(&e))?;
            if !status.is_success() {
                return Err(LlmError::from_status(status.as_u16(), &body));
            }

            completion_text(&body)
        })
    }
}

fn transport_error(err: &reqwest::Error) -> LlmError {
    let kind = if err.is_timeout() {
        LlmErrorKind::Timeout
    } else {
        LlmErrorKind::Connection
    };
    LlmError::new(kind, err.to_string())
}

/// Pull `choices[0].message.content` out of a successful response body.
fn completion_text(body: &str) -> std::result::Result<String, LlmError> {
    let json: Value = serde_json::from_str(body).map_err(|e| {
        LlmError::new(
            LlmErrorKind::EmptyResponse,
            format!("response body is not JSON: {e}"),
        )
    })?;
    json.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| {
            LlmError::new(
                LlmErrorKind::EmptyResponse,
                "response missing choices[0].message.content",
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_choice_content() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"{\"a\":1}"}}]}"#;
        assert_eq!(completion_text(body).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn missing_or_blank_content_is_empty_response() {
        for body in [
            r#"{"choices":[]}"#,
            r#"{"choices":[{"message":{"content":null}}]}"#,
            r#"{"choices":[{"message":{"content":"   "}}]}"#,
            "<html>gateway</html>",
        ] {
            let err = completion_text(body).unwrap_err();
            assert_eq!(err.kind, LlmErrorKind::EmptyResponse, "body: {body}");
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn endpoint_joins_api_base() {
        let config = LlmConfig {
            api_key: Some("sk-test".to_string()),
            api_base: "http://localhost:9/v1/".to_string(),
            ..Default::default()
        };
        let client = HttpLlmClient::new(&config).unwrap();
        assert_eq!(client.endpoint(), "http://localhost:9/v1/chat/completions");
    }
}
