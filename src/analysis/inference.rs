// Inference engines: the analysis routine behind the executor.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::LLMConfig;
use crate::llm::provider::{LLMProviderConfig, LLM};
use crate::types::{LLMMessage, LLMRequest};

/// The opaque analysis capability. Implementations may fail, hang or panic;
/// the executor is responsible for making calls safe.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    async fn analyze(&self, query: &str, document_text: &str) -> anyhow::Result<String>;
}

const ANALYST_PROMPT: &str = "You are a careful financial analyst. Provide a concise, \
evidence-based summary of the uploaded financial document that answers the user's request. \
Only use facts present in the document, point out missing data or parsing issues, and do not \
give personalized investment advice.";

/// Longest document excerpt sent to the model.
const MAX_DOCUMENT_CHARS: usize = 60_000;

/// Chat-completion backed analysis.
pub struct LlmInference {
    llm: LLM,
    model: String,
    max_tokens: u32,
}

impl LlmInference {
    pub fn new(llm: LLM, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            llm,
            model: model.into(),
            max_tokens,
        }
    }

    fn build_request(&self, query: &str, document_text: &str) -> LLMRequest {
        let document: String = document_text.chars().take(MAX_DOCUMENT_CHARS).collect();
        let document = if document.trim().is_empty() {
            "(no readable text could be extracted from the document)".to_string()
        } else {
            document
        };

        LLMRequest {
            model: self.model.clone(),
            messages: vec![
                LLMMessage::system(ANALYST_PROMPT),
                LLMMessage::user(format!(
                    "Request: {query}\n\nDocument:\n<<<\n{document}\n>>>"
                )),
            ],
            max_tokens: Some(self.max_tokens),
            temperature: Some(0.2),
            system_instruction: Some(ANALYST_PROMPT.to_string()),
        }
    }
}

#[async_trait]
impl InferenceEngine for LlmInference {
    async fn analyze(&self, query: &str, document_text: &str) -> anyhow::Result<String> {
        let request = self.build_request(query, document_text);
        let response = self.llm.create_chat_completion(&request).await?;
        info!(
            provider = self.llm.provider_name(),
            total_tokens = response.usage.total_tokens,
            finish_reason = %response.finish_reason,
            "Analysis completion received"
        );
        Ok(response.content)
    }
}

/// Deterministic stand-in used when no model provider is configured.
#[derive(Debug, Clone, Default)]
pub struct StubInference;

#[async_trait]
impl InferenceEngine for StubInference {
    async fn analyze(&self, _query: &str, document_text: &str) -> anyhow::Result<String> {
        if document_text.trim().is_empty() {
            return Ok("No document content available for analysis.".to_string());
        }

        let words = document_text.split_whitespace().count();
        let chars = document_text.chars().count();
        Ok(format!(
            "Document size: {words} words, {chars} characters. Detailed analysis not implemented."
        ))
    }
}

/// Pick the engine for this process: the configured provider when it has an
/// API key, the stub otherwise.
pub fn engine_from_config(config: &LLMConfig) -> anyhow::Result<Arc<dyn InferenceEngine>> {
    let Some(api_key) = config.api_key() else {
        info!(
            provider = %config.provider,
            "No API key configured; using placeholder analysis"
        );
        return Ok(Arc::new(StubInference));
    };

    let llm = LLM::new(LLMProviderConfig {
        name: config.provider.clone(),
        api_key: api_key.to_string(),
        api_base: config.api_base.clone(),
    })?;
    info!(provider = %config.provider, model = %config.model, "Using LLM analysis");

    Ok(Arc::new(LlmInference::new(llm, &config.model, config.max_tokens)))
}
