//! LLM client factory.

use crate::config::LlmConfig;
use crate::error::{MendError, Result};
use crate::llm::{AnthropicClient, AnthropicConfig, LlmClient, LlmProvider, OpenAiClient, OpenAiConfig};

/// Ollama's OpenAI-compatible endpoint.
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

/// Creates an LLM client from configuration.
///
/// OpenAI and Anthropic need an API key, either configured or taken from
/// `OPENAI_API_KEY` / `ANTHROPIC_API_KEY` when the config was loaded.
pub fn create_client(config: &LlmConfig) -> Result<Box<dyn LlmClient>> {
    let model = config.model().to_string();

    match config.provider {
        LlmProvider::OpenAi => {
            let key = config.api_key.clone().ok_or_else(|| {
                MendError::llm("No API key configured. Set OPENAI_API_KEY or [llm] api_key.")
            })?;
            let mut client_config = OpenAiConfig::new(key, model).with_timeout(config.timeout_secs);
            if let Some(base_url) = &config.base_url {
                client_config = client_config.with_base_url(base_url.clone());
            }
            Ok(Box::new(OpenAiClient::new(client_config)?))
        }
        LlmProvider::Anthropic => {
            let key = config.api_key.clone().ok_or_else(|| {
                MendError::llm("No API key configured. Set ANTHROPIC_API_KEY or [llm] api_key.")
            })?;
            let mut client_config =
                AnthropicConfig::new(key, model).with_timeout(config.timeout_secs);
            if let Some(base_url) = &config.base_url {
                client_config = client_config.with_base_url(base_url.clone());
            }
            Ok(Box::new(AnthropicClient::new(client_config)?))
        }
        LlmProvider::Ollama => {
            let base_url = config
                .base_url
                .clone()
                .unwrap_or_else(|| OLLAMA_BASE_URL.to_string());
            let client_config = OpenAiConfig::new(config.api_key.clone().unwrap_or_default(), model)
                .with_base_url(base_url)
                .with_timeout(config.timeout_secs);
            Ok(Box::new(OpenAiClient::new(client_config)?))
        }
    }
}
