use crate::llm::{CompletionParams, LlmClient};
use crate::retry::{send_with_retry, RetryPolicy};
use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    retry: RetryPolicy,
}

impl AnthropicClient {
    pub fn new(model: &str, api_key: &str, base_url: Option<&str>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            api_key: api_key.to_string(),
            base_url: base_url
                .unwrap_or("https://api.anthropic.com")
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            retry: RetryPolicy::within(timeout),
        })
    }
}

fn joined_text(body: &Value) -> Result<String> {
    let blocks = body
        .get("content")
        .and_then(Value::as_array)
        .context("Anthropic response has no content array")?;
    Ok(blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join(""))
}

#[async_trait::async_trait]
impl LlmClient for AnthropicClient {
    #[tracing::instrument(skip(self, system, user, params), fields(model = %self.model))]
    async fn complete(&self, system: &str, user: &str, params: CompletionParams) -> Result<String> {
        let url = format!("{}/v1/messages", self.base_url);
        let request_body = json!({
            "model": self.model,
            "system": system,
            "messages": [{"role": "user", "content": user}],
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
        });
        tracing::debug!(
            "LLM params: max_tokens={}, temperature={:.2}",
            params.max_tokens,
            params.temperature
        );

        let client = &self.client;
        let api_key = &self.api_key;
        let response = send_with_retry(&self.retry, "Anthropic", || async {
            let resp = client
                .post(&url)
                .header("x-api-key", api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&request_body)
                .send()
                .await
                .context("Failed to send request to Anthropic")?;
            Ok(resp)
        })
        .await?;

        let resp_text = response.text().await?;
        tracing::debug!(
            "Anthropic raw response (first 500 chars): {}",
            resp_text.chars().take(500).collect::<String>()
        );
        let value: Value =
            serde_json::from_str(&resp_text).context("Failed to parse Anthropic response")?;
        joined_text(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joined_text_skips_other_blocks() {
        let body = json!({"content": [
            {"type": "text", "text": "{\"message\":"},
            {"type": "tool_use", "id": "x"},
            {"type": "text", "text": "\"hola\"}"}
        ]});
        assert_eq!(joined_text(&body).unwrap(), "{\"message\":\"hola\"}");
        assert!(joined_text(&json!({})).is_err());
    }
}
