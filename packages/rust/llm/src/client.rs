//! OpenAI-compatible chat-completions client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use contactscout_shared::{LlmConfig, LlmProvider, Result, ScoutError};

/// Failure of a single model call, classified for the retry loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// Worth retrying: rate limits, timeouts, 5xx, garbled output.
    #[error("transient model failure: {0}")]
    Transient(String),

    /// The provider refused this particular request; retrying won't help,
    /// but other requests may still succeed.
    #[error("model request rejected: {0}")]
    Rejected(String),

    /// The provider is unusable as configured (bad key, unknown model).
    #[error("model provider unusable: {0}")]
    Permanent(String),
}

/// One JSON-mode chat completion.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Send a system + user prompt and return the raw JSON text the model
    /// produced.
    async fn complete_json(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> std::result::Result<String, CallError>;
}

enum Auth {
    Bearer(String),
    ApiKey(String),
}

/// Chat-completions client for OpenAI, OpenRouter, and Azure OpenAI.
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    endpoint: String,
    auth: Auth,
    model: String,
}

impl OpenAiCompatClient {
    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self> {
        let base = config.base_url.trim_end_matches('/');
        let (endpoint, auth) = match config.provider {
            LlmProvider::Openai => (format!("{base}/chat/completions"), Auth::Bearer(api_key)),
            LlmProvider::AzureOpenai => (
                format!(
                    "{base}/openai/deployments/{}/chat/completions?api-version={}",
                    config.model, config.azure_api_version
                ),
                Auth::ApiKey(api_key),
            ),
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ScoutError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint,
            auth,
            model: config.model.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    content: Option<String>,
}

#[async_trait]
impl ChatClient for OpenAiCompatClient {
    async fn complete_json(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> std::result::Result<String, CallError> {
        let body = serde_json::json!({
            "model": &self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
            "temperature": 0.0,
            "max_tokens": max_tokens,
            "response_format": {"type": "json_object"}
        });

        let request = self.http.post(&self.endpoint).json(&body);
        let request = match &self.auth {
            Auth::Bearer(key) => request.bearer_auth(key),
            Auth::ApiKey(key) => request.header("api-key", key),
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() || e.is_request() {
                CallError::Transient(e.to_string())
            } else {
                CallError::Permanent(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail: String = detail.chars().take(300).collect();
            return Err(classify_status(status, detail));
        }

        let envelope: ChatResponse = response
            .json()
            .await
            .map_err(|e| CallError::Transient(format!("malformed response envelope: {e}")))?;

        let content = envelope
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| CallError::Transient("model returned no content".into()))?;

        debug!(chars = content.len(), "model call complete");
        Ok(content)
    }
}

fn classify_status(status: StatusCode, detail: String) -> CallError {
    let message = format!("HTTP {status}: {detail}");
    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => CallError::Transient(message),
        s if s.is_server_error() => CallError::Transient(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
            CallError::Permanent(message)
        }
        _ => CallError::Rejected(message),
    }
}

/// Parse a JSON object out of model output.
///
/// Accepts bare JSON or JSON wrapped in prose or a fenced code block.
pub fn parse_json_object(content: &str) -> std::result::Result<serde_json::Value, CallError> {
    if let Ok(value @ serde_json::Value::Object(_)) = serde_json::from_str::<serde_json::Value>(content.trim()) {
        return Ok(value);
    }

    let start = content.find('{');
    let end = content.rfind('}');
    match (start, end) {
        (Some(start), Some(end)) if end > start => {
            match serde_json::from_str::<serde_json::Value>(&content[start..=end]) {
                Ok(value @ serde_json::Value::Object(_)) => Ok(value),
                _ => Err(CallError::Transient("model output is not a JSON object".into())),
            }
        }
        _ => Err(CallError::Transient("model output is not a JSON object".into())),
    }
}
