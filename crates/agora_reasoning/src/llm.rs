use anyhow::Result;
use async_trait::async_trait;

/// Parameters for one text completion.
#[derive(Debug, Clone)]
pub struct CompletionParams {
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// Sampling temperature (0.0 - 2.0)
    pub temperature: f32,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            max_tokens: 300,
            temperature: 0.4,
        }
    }
}

impl CompletionParams {
    pub fn from_config(config: &agora_core::LlmConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Single-turn completion: a system instruction and one user payload in,
    /// the raw assistant text out.
    async fn complete(&self, system: &str, user: &str, params: CompletionParams) -> Result<String>;
}
