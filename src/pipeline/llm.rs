//! VLM interaction: build the vision request for one page and classify the
//! provider's answer.
//!
//! This module makes exactly one call per [`VisionModel::complete`]. Retry,
//! backoff and the per-page time budget live in [`super::extract`]; prompt
//! text lives in [`crate::prompts`].

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::job::PageImage;
use crate::prompts::{user_instruction, DEFAULT_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Why one model call produced no text.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    /// The provider throttled us (HTTP 429). Worth retrying after a wait.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Any other provider failure. Not retried.
    #[error("model error: {0}")]
    Api(String),
}

/// A multimodal model that answers an instruction about one page image.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Send one request and return the raw text answer.
    async fn complete(&self, page: &PageImage, prompt: &str) -> Result<String, ModelError>;
}

/// [`VisionModel`] backed by an edgequake-llm provider.
pub struct LlmVisionModel {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    options: CompletionOptions,
}

impl LlmVisionModel {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            options: build_options(config),
        }
    }
}

#[async_trait]
impl VisionModel for LlmVisionModel {
    async fn complete(&self, page: &PageImage, prompt: &str) -> Result<String, ModelError> {
        let messages = vec![
            ChatMessage::system(&self.system_prompt),
            ChatMessage::user_with_images(
                user_instruction(prompt, page.page_number),
                vec![page.image.clone()],
            ),
        ];

        match self.provider.chat(&messages, Some(&self.options)).await {
            Ok(response) => {
                debug!(
                    "{} p{}: {} input tokens, {} output tokens",
                    page.document_name,
                    page.page_number,
                    response.prompt_tokens,
                    response.completion_tokens
                );
                Ok(response.content)
            }
            Err(e) => Err(classify_error(&e.to_string())),
        }
    }
}

/// Map a provider error message onto a [`ModelError`].
///
/// Providers surface HTTP 429 in different shapes ("429 Too Many Requests",
/// "rate limit exceeded", "RateLimited"), so matching is on the message.
pub fn classify_error(message: &str) -> ModelError {
    let lower = message.to_lowercase();
    if lower.contains("429")
        || lower.contains("rate limit")
        || lower.contains("ratelimit")
        || lower.contains("rate_limit")
        || lower.contains("too many requests")
    {
        ModelError::RateLimited(message.to_string())
    } else {
        ModelError::Api(message.to_string())
    }
}

/// Build `CompletionOptions` from the extraction config.
fn build_options(config: &ExtractionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, ExtractError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ExtractError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. `config.provider`, used as-is
/// 2. `config.provider_name` + `config.model`
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are set
/// 4. OpenAI when `OPENAI_API_KEY` is set
/// 5. `ProviderFactory::from_env` auto-detection
pub fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, ExtractError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ExtractError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, GEMINI_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

/// Vision model used when only a provider name is given.
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";
