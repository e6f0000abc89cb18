//! OpenAI-compatible chat completions client.
//!
//! Works against any endpoint that speaks the chat completions protocol
//! (OpenAI itself, Ollama's `/v1`, vLLM and similar) by changing `base_url`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::{MendError, Result};
use crate::llm::http::{build_client, send_with_retry, status_rejection, Rejection, RetryPolicy};
use crate::llm::types::Message;
use crate::llm::LlmClient;

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// OpenAI API base URL.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Settings for one chat completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API key; local endpoints may accept an empty one.
    pub api_key: String,
    pub model: String,
    /// Endpoint root, without the `/chat/completions` suffix.
    pub base_url: String,
    pub timeout_secs: u64,
    /// Sampling temperature. Generation runs cold by default.
    pub temperature: f32,
    pub retry: RetryPolicy,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: OPENAI_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            temperature: 0.0,
            retry: RetryPolicy::default(),
        }
    }

    /// Points the client at another compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// Client for OpenAI and OpenAI-compatible endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = build_client(config.timeout_secs)?;
        Ok(Self { config, client })
    }

    fn to_wire(messages: &[Message]) -> Vec<ChatMessage> {
        messages
            .iter()
            .map(|m| ChatMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect()
    }

    fn reject(status: StatusCode, body: &str) -> Rejection {
        let api_message = serde_json::from_str::<ErrorEnvelope>(body)
            .ok()
            .map(|envelope| envelope.error.message);
        status_rejection("OpenAI", "OPENAI_API_KEY", status, api_message, body)
    }
}

/// Takes the first choice's text out of a completions body.
fn first_choice(body: &str) -> Result<String> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| MendError::llm(format!("Failed to parse response: {e}")))?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| MendError::llm("Empty response from completions endpoint"))
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: Self::to_wire(messages),
            temperature: self.config.temperature,
            stream: false,
        };
        let endpoint = self.config.endpoint();

        let body = send_with_retry(
            "OpenAI",
            self.config.retry,
            || {
                let builder = self.client.post(&endpoint).json(&request);
                if self.config.api_key.is_empty() {
                    builder
                } else {
                    builder.bearer_auth(&self.config.api_key)
                }
            },
            Self::reject,
        )
        .await?;

        first_choice(&body)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = OpenAiConfig::new("sk-test", "gpt-4o");
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.endpoint(), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn test_base_url_override() {
        let config =
            OpenAiConfig::new("", "llama3.2:3b").with_base_url("http://localhost:11434/v1/");
        assert_eq!(config.endpoint(), "http://localhost:11434/v1/chat/completions");
    }

    #[test]
    fn test_to_wire_keeps_roles() {
        let wire = OpenAiClient::to_wire(&[Message::system("You write SQL."), Message::user("Hello")]);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0].role, "system");
        assert_eq!(wire[1].content, "Hello");
    }

    #[test]
    fn test_first_choice() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"SELECT 1"}}]}"#;
        assert_eq!(first_choice(body).unwrap(), "SELECT 1");

        let null_content = r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#;
        assert!(first_choice(null_content).is_err());
        assert!(first_choice(r#"{"choices":[]}"#).is_err());
    }

    #[test]
    fn test_reject_uses_api_message() {
        let body = r#"{"error":{"message":"Invalid API key"}}"#;
        let rejection = OpenAiClient::reject(StatusCode::BAD_REQUEST, body);
        assert!(rejection.error.to_string().contains("Invalid API key"));
        assert!(!rejection.retryable);

        let rejection = OpenAiClient::reject(StatusCode::UNAUTHORIZED, "");
        assert!(rejection.error.to_string().contains("OPENAI_API_KEY"));
    }
}
