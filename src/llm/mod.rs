pub mod models;
pub mod prompt;
pub mod providers;
pub mod response;
pub mod translator;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::LlmConfig;
use crate::llm::models::LlmReply;
use crate::llm::prompt::Prompt;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM is not configured")]
    NotConfigured,
    #[error("LLM connection error: {0}")]
    ConnectionError(String),
    #[error("LLM response error: {0}")]
    ResponseError(String),
    #[error("LLM request timed out after {0}s")]
    Timeout(u64),
    #[error("LLM configuration error: {0}")]
    ConfigError(String),
}

/// A chat-completion backend returning the model's raw text.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> Result<String, LlmError>;

    fn name(&self) -> &str;
}

pub struct LlmManager {
    client: Option<Box<dyn LlmClient>>,
    timeout: Duration,
}

impl LlmManager {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client: Option<Box<dyn LlmClient>> = match config.backend.as_str() {
            "openai" => {
                if config.api_key.as_deref().is_none_or(str::is_empty) {
                    warn!("OPENAI_API_KEY not set. LLM features will be disabled.");
                    None
                } else {
                    Some(Box::new(providers::openai::OpenAiProvider::new(config)?))
                }
            }
            "ollama" => Some(Box::new(providers::ollama::OllamaProvider::new(config)?)),
            "disabled" | "none" => None,
            other => {
                return Err(LlmError::ConfigError(format!(
                    "Unsupported LLM backend: {}",
                    other
                )))
            }
        };

        if let Some(client) = &client {
            info!("LLM backend '{}' using model {}", client.name(), config.model);
        }
        Ok(Self { client, timeout })
    }

    pub fn disabled() -> Self {
        Self {
            client: None,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_client(client: Box<dyn LlmClient>, timeout: Duration) -> Self {
        Self {
            client: Some(client),
            timeout,
        }
    }

    pub fn is_available(&self) -> bool {
        self.client.is_some()
    }

    pub fn backend_name(&self) -> Option<&str> {
        self.client.as_ref().map(|c| c.name())
    }

    /// Sends `prompt` under the configured timeout and parses the reply.
    pub async fn complete(&self, prompt: &Prompt) -> Result<LlmReply, LlmError> {
        let client = self.client.as_ref().ok_or(LlmError::NotConfigured)?;
        let raw = tokio::time::timeout(self.timeout, client.complete(prompt))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout.as_secs()))??;
        debug!("Raw LLM reply: {}", raw);
        Ok(response::parse_reply(&raw))
    }
}
