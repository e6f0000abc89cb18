//! LLM integration.
//!
//! The correction loop sees the model only as `LlmClient::complete`: messages
//! in, text out. Prompt building and reply parsing live here too.

mod anthropic;
mod factory;
mod http;
mod mock;
mod openai;
mod parser;
mod prompt;
mod types;

pub use anthropic::{AnthropicClient, AnthropicConfig};
pub use factory::create_client;
pub use http::RetryPolicy;
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, OpenAiConfig};
pub use parser::{parse_llm_response, CandidateKind, ParsedResponse};
pub use prompt::{
    build_generation_messages, build_repair_messages, build_review_messages, build_system_prompt,
    format_hints, RepairContext, REVIEW_PREVIEW_ROWS,
};
pub use types::{prompt_chars, Message, Role};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::Result;

/// Trait for LLM clients.
///
/// Implementations must be thread-safe; sessions share one client.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generates a completion for the given messages.
    async fn complete(&self, messages: &[Message]) -> Result<String>;
}

/// LLM provider type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// OpenAI, or any chat-completions compatible endpoint via `base_url`.
    #[default]
    OpenAi,
    /// Anthropic messages API.
    Anthropic,
    /// Local Ollama through its OpenAI-compatible endpoint.
    Ollama,
}

impl LlmProvider {
    /// Returns the provider as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
        }
    }

    /// Model used when none is configured.
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4o",
            Self::Anthropic => "claude-sonnet-4-20250514",
            Self::Ollama => "llama3.2:3b",
        }
    }
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            _ => Err(format!("Unknown LLM provider: {s}")),
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_str() {
        assert_eq!("openai".parse::<LlmProvider>().unwrap(), LlmProvider::OpenAi);
        assert_eq!("OpenAI".parse::<LlmProvider>().unwrap(), LlmProvider::OpenAi);
        assert_eq!(
            "anthropic".parse::<LlmProvider>().unwrap(),
            LlmProvider::Anthropic
        );
        assert_eq!("ollama".parse::<LlmProvider>().unwrap(), LlmProvider::Ollama);
        assert!("unknown".parse::<LlmProvider>().is_err());
    }

    #[test]
    fn test_provider_display_and_default() {
        assert_eq!(format!("{}", LlmProvider::OpenAi), "openai");
        assert_eq!(LlmProvider::default(), LlmProvider::OpenAi);
    }

    #[tokio::test]
    async fn test_mock_client_implements_trait() {
        let client: Box<dyn LlmClient> =
            Box::new(MockLlmClient::new().with_sql("SELECT * FROM users"));
        let response = client
            .complete(&[Message::user("Show me all users")])
            .await
            .unwrap();
        assert!(response.contains("SELECT"));
    }
}
