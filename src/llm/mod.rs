//! Provider-agnostic LLM completion facade.
//!
//! Model identifiers take the form `provider/model-name`; the factory maps
//! the provider half onto one of the adapters below, all of which expose
//! the single [`Client::complete`] call.

mod anthropic;
mod gemini;
mod openai;

pub use anthropic::AnthropicClient;
pub use gemini::GeminiClient;
pub use openai::OpenAiClient;

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

/// Token cap requested from providers that require one.
pub(crate) const MAX_COMPLETION_TOKENS: u32 = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
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

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait Client: Send + Sync {
    /// Run one chat completion over the given messages and return the
    /// model's text. Empty responses are errors.
    async fn complete(&self, messages: &[Message]) -> Result<String>;
}

impl std::fmt::Debug for dyn Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Client")
    }
}

/// Split `provider/model-name` into its halves.
pub fn parse_model(model: &str) -> Result<(&str, &str)> {
    match model.split_once('/') {
        Some((provider, name)) if !provider.is_empty() && !name.is_empty() => {
            Ok((provider, name))
        }
        _ => bail!("invalid model format {model:?}: expected provider/model_name"),
    }
}

/// Construct a client for the given provider. `base_url` overrides the
/// provider's default endpoint (used for OpenAI-compatible gateways).
pub fn new_client(
    provider: &str,
    api_key: &str,
    model: &str,
    base_url: Option<&str>,
) -> Result<Arc<dyn Client>> {
    match provider {
        "openai" => Ok(Arc::new(OpenAiClient::new(api_key, model, base_url))),
        "anthropic" => Ok(Arc::new(AnthropicClient::new(api_key, model, base_url))),
        "gemini" => Ok(Arc::new(GeminiClient::new(api_key, model, base_url))),
        other => bail!(
            "unknown LLM provider {other:?}: supported providers are openai, anthropic, gemini"
        ),
    }
}
