//! Anthropic messages API client.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::{MendError, Result};
use crate::llm::http::{build_client, send_with_retry, status_rejection, Rejection, RetryPolicy};
use crate::llm::types::{Message, Role};
use crate::llm::LlmClient;

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Anthropic API base URL.
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";

/// Anthropic API version header.
const ANTHROPIC_VERSION: &str = "2023-06-01";

const DEFAULT_MAX_TOKENS: u32 = 2048;

/// Settings for the messages API.
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    pub retry: RetryPolicy,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: ANTHROPIC_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_tokens: DEFAULT_MAX_TOKENS,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Client for the Anthropic messages API.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    config: AnthropicConfig,
    client: Client,
}

impl AnthropicClient {
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        let client = build_client(config.timeout_secs)?;
        Ok(Self { config, client })
    }

    /// Splits out the system prompt; the API takes it as a separate field.
    /// Several system messages are joined with blank lines.
    fn split_system(messages: &[Message]) -> (Option<String>, Vec<WireMessage>) {
        let mut system: Vec<&str> = Vec::new();
        let mut turns = Vec::new();

        for message in messages {
            match message.role {
                Role::System => system.push(&message.content),
                Role::User | Role::Assistant => turns.push(WireMessage {
                    role: message.role.as_str().to_string(),
                    content: message.content.clone(),
                }),
            }
        }

        let system = (!system.is_empty()).then(|| system.join("\n\n"));
        (system, turns)
    }

    fn reject(status: StatusCode, body: &str) -> Rejection {
        let api_message = serde_json::from_str::<ErrorEnvelope>(body)
            .ok()
            .map(|envelope| envelope.error.message);
        status_rejection("Anthropic", "ANTHROPIC_API_KEY", status, api_message, body)
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        let (system, turns) = Self::split_system(messages);

        let request = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            system,
            messages: turns,
        };

        let endpoint = format!("{}/messages", self.config.base_url.trim_end_matches('/'));

        let body = send_with_retry(
            "Anthropic",
            self.config.retry,
            || {
                self.client
                    .post(&endpoint)
                    .header("x-api-key", &self.config.api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(&request)
            },
            Self::reject,
        )
        .await?;

        extract_text(&body)
    }
}

/// Joins the text blocks of a messages response.
fn extract_text(body: &str) -> Result<String> {
    let response: MessagesResponse = serde_json::from_str(body)
        .map_err(|e| MendError::llm(format!("Failed to parse response: {e}")))?;

    let text = response
        .content
        .into_iter()
        .filter(|block| block.content_type == "text")
        .map(|block| block.text)
        .collect::<Vec<_>>()
        .join("");

    if text.is_empty() {
        return Err(MendError::llm("No response from Anthropic"));
    }

    Ok(text)
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}
