//! Ollama exposes an OpenAI-compatible API at localhost:11434/v1,
//! so the request and response shapes are shared with the OpenAI client.

use super::openai::{chat_body, first_choice_text};
use crate::llm::{CompletionParams, LlmClient};
use crate::retry::{send_with_retry, RetryPolicy};
use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    retry: RetryPolicy,
}

impl OllamaClient {
    pub fn new(model: &str, base_url: Option<&str>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url
                .unwrap_or("http://localhost:11434/v1")
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            retry: RetryPolicy::within(timeout),
        })
    }
}

#[async_trait::async_trait]
impl LlmClient for OllamaClient {
    #[tracing::instrument(skip(self, system, user, params), fields(model = %self.model))]
    async fn complete(&self, system: &str, user: &str, params: CompletionParams) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = chat_body(&self.model, system, user, &params);
        let client = &self.client;

        let response = send_with_retry(&self.retry, "Ollama", || async {
            let resp = client
                .post(&url)
                .json(&body)
                .send()
                .await
                .context("Failed to send request to Ollama")?;
            Ok(resp)
        })
        .await?;

        let value: Value = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;
        first_choice_text(&value)
    }
}
