use async_trait::async_trait;

use crate::types::{LLMRequest, LLMResponse};

#[async_trait]
pub trait LLMAdapter: Send + Sync {
    async fn create_chat_completion(&self, request: &LLMRequest) -> Result<LLMResponse, LlmError>;
}

/// Errors from a model provider.
///
/// Messages stay free of provider response bodies: they end up in job
/// failure descriptions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("unsupported LLM provider: {0}")]
    UnsupportedProvider(String),

    #[error("LLM request failed: {0}")]
    Request(String),

    #[error("LLM provider returned HTTP {status}")]
    Api { status: u16 },

    #[error("LLM provider returned an unreadable response")]
    InvalidResponse,

    #[error("LLM provider returned no choices")]
    NoChoices,
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Request("request timed out".to_string())
        } else if err.is_connect() {
            LlmError::Request("could not connect to provider".to_string())
        } else if err.is_decode() {
            LlmError::InvalidResponse
        } else {
            LlmError::Request("transport error".to_string())
        }
    }
}

/// Configuration for LLM provider (named to avoid clashing with `LLMConfig`)
pub struct LLMProviderConfig {
    pub name: String,
    pub api_key: String,
    /// Overrides the provider's default endpoint (OpenAI-compatible gateways, tests).
    pub api_base: Option<String>,
}

pub struct LLM {
    adapter: Box<dyn LLMAdapter>,
    provider_name: String,
}

impl LLM {
    pub fn new(provider: LLMProviderConfig) -> Result<Self, LlmError> {
        let api_base = provider.api_base.as_deref();
        let adapter: Box<dyn LLMAdapter> = match provider.name.as_str() {
            "openai" => Box::new(crate::llm::openai::OpenAIAdapter::new(&provider.api_key, api_base)),
            "anthropic" => Box::new(crate::llm::anthropic::AnthropicAdapter::new(&provider.api_key, api_base)),
            other => return Err(LlmError::UnsupportedProvider(other.to_string())),
        };

        Ok(Self {
            adapter,
            provider_name: provider.name,
        })
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    pub async fn create_chat_completion(&self, request: &LLMRequest) -> Result<LLMResponse, LlmError> {
        self.adapter.create_chat_completion(request).await
    }
}
