//! Language model access for classification and question answering.
//!
//! Both pipeline stages talk to an `Arc<dyn LlmProvider>`; the concrete
//! backend (OpenAI or Anthropic, through rig-core) is picked once at startup.

pub mod provider;
mod rig_adapter;

pub use provider::*;
pub use rig_adapter::RigAdapter;

use std::sync::Arc;

use rig::client::CompletionClient;
use secrecy::ExposeSecret;

use crate::error::LlmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

impl LlmBackend {
    /// Case-insensitive backend name as written in configuration.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "anthropic" => Some(Self::Anthropic),
            _ => None,
        }
    }

    /// Label used in logs and error messages.
    pub fn label(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
        }
    }

    /// Environment variable holding this backend's API key.
    pub fn api_key_var(self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
        }
    }

    /// Model used when none is configured. Small and cheap: both stages
    /// send short prompts with tight token limits.
    pub fn default_model(self) -> &'static str {
        match self {
            Self::Anthropic => "claude-sonnet-4-20250514",
            Self::OpenAi => "o4-mini",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
}

/// Build the provider shared by the classifier and the answerer.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let backend = config.backend.label();
    let client_err = |e: &dyn std::fmt::Display| LlmError::RequestFailed {
        provider: backend.to_string(),
        reason: format!("client setup failed: {e}"),
    };

    let provider: Arc<dyn LlmProvider> = match config.backend {
        LlmBackend::Anthropic => {
            use rig::providers::anthropic;
            let client: rig::client::Client<anthropic::client::AnthropicExt> =
                anthropic::Client::new(config.api_key.expose_secret())
                    .map_err(|e| client_err(&e))?;
            let model = client.completion_model(&config.model);
            Arc::new(RigAdapter::new(model, &config.model, backend))
        }
        LlmBackend::OpenAi => {
            use rig::providers::openai;
            let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
                openai::Client::new(config.api_key.expose_secret())
                    .map_err(|e| client_err(&e))?;
            let model = client.completion_model(&config.model);
            Arc::new(RigAdapter::new(model, &config.model, backend))
        }
    };

    tracing::info!(backend, model = %config.model, "Language model ready");
    Ok(provider)
}
