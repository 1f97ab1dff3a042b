pub mod anthropic;
pub mod mock;
pub mod ollama;
pub mod openai;

use crate::llm::LlmClient;
use agora_core::LlmConfig;
use std::sync::Arc;
use std::time::Duration;

/// Build the configured text generator. `None` when generation is disabled,
/// incompletely configured, or the HTTP client could not be built.
pub fn create_client(config: &LlmConfig) -> Option<Arc<dyn LlmClient>> {
    if !config.is_usable() {
        return None;
    }
    let timeout = Duration::from_secs(config.timeout_secs.max(1));
    let api_key = config.api_key.as_deref().unwrap_or("");
    let base_url = config.base_url.as_deref();

    let built: anyhow::Result<Arc<dyn LlmClient>> = match config.provider.as_str() {
        "openai" => openai::OpenAiClient::new(&config.model, api_key, base_url, timeout)
            .map(|c| Arc::new(c) as Arc<dyn LlmClient>),
        "anthropic" => anthropic::AnthropicClient::new(&config.model, api_key, base_url, timeout)
            .map(|c| Arc::new(c) as Arc<dyn LlmClient>),
        "ollama" => ollama::OllamaClient::new(&config.model, base_url, timeout)
            .map(|c| Arc::new(c) as Arc<dyn LlmClient>),
        "mock" => Ok(Arc::new(mock::MockProvider::new(&config.model))),
        other => {
            tracing::warn!("Unknown LLM provider '{}', text generation disabled", other);
            return None;
        }
    };

    match built {
        Ok(client) => {
            tracing::info!(provider = %config.provider, model = %config.model, "LLM client ready");
            Some(client)
        }
        Err(e) => {
            tracing::error!("Failed to build LLM client: {:#}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_respects_usability() {
        assert!(create_client(&LlmConfig::default()).is_none());
        let mock = LlmConfig {
            provider: "mock".into(),
            model: "m".into(),
            ..LlmConfig::default()
        };
        assert!(create_client(&mock).is_some());
        let unknown = LlmConfig {
            provider: "carrier-pigeon".into(),
            model: "m".into(),
            api_key: Some("k".into()),
            ..LlmConfig::default()
        };
        assert!(create_client(&unknown).is_none());
    }
}
