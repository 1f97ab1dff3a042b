use crate::llm::{CompletionParams, LlmClient};
use crate::retry::{send_with_retry, RetryPolicy};
use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// Chat-completions body shared by OpenAI-compatible endpoints.
/// The system prompt goes first with role "system".
pub(crate) fn chat_body(model: &str, system: &str, user: &str, params: &CompletionParams) -> Value {
    json!({
        "model": model,
        "messages": [
            {"role": "system", "content": system},
            {"role": "user", "content": user}
        ],
        "max_tokens": params.max_tokens,
        "temperature": params.temperature,
    })
}

pub(crate) fn first_choice_text(body: &Value) -> Result<String> {
    body.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .context("Completion response has no message content")
}

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    retry: RetryPolicy,
}

impl OpenAiClient {
    pub fn new(model: &str, api_key: &str, base_url: Option<&str>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            api_key: api_key.to_string(),
            base_url: base_url
                .unwrap_or("https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            retry: RetryPolicy::within(timeout),
        })
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiClient {
    #[tracing::instrument(skip(self, system, user, params), fields(model = %self.model))]
    async fn complete(&self, system: &str, user: &str, params: CompletionParams) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = chat_body(&self.model, system, user, &params);
        let client = &self.client;
        let api_key = &self.api_key;

        let response = send_with_retry(&self.retry, "OpenAI", || async {
            let resp = client
                .post(&url)
                .bearer_auth(api_key)
                .json(&body)
                .send()
                .await
                .context("Failed to send request to OpenAI")?;
            Ok(resp)
        })
        .await?;

        let value: Value = response
            .json()
            .await
            .context("Failed to parse OpenAI response")?;
        first_choice_text(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_body_puts_system_first() {
        let body = chat_body("m", "sys", "usr", &CompletionParams::default());
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "usr");
        assert_eq!(body["max_tokens"], 300);
    }

    #[test]
    fn test_first_choice_text() {
        let body = json!({"choices": [{"message": {"content": "{\"type\":\"wait\"}"}}]});
        assert_eq!(first_choice_text(&body).unwrap(), "{\"type\":\"wait\"}");
        assert!(first_choice_text(&json!({"choices": []})).is_err());
    }
}
