//! JSON-over-HTTP transport for the world's REST endpoints.

use agora_core::{HttpConfig, Reply};
use anyhow::{Context, Result};
use arc_swap::ArcSwapOption;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Shared, rotatable API key.
pub type ApiKey = Arc<ArcSwapOption<String>>;

pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
    api_key: ApiKey,
    retries: u32,
    backoff: Duration,
}

/// Parse a body: JSON objects pass through, other JSON is wrapped as
/// `{data}`, anything unparseable as `{raw}`.
pub fn normalize_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return json!({});
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Value::Object(map),
        Ok(other) => json!({ "data": other }),
        Err(_) => json!({ "raw": text }),
    }
}

impl HttpTransport {
    pub fn new(base_url: &str, config: &HttpConfig, api_key: ApiKey) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(config.timeout_secs.max(0.1)))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            api_key,
            retries: config.retries,
            backoff: Duration::from_secs_f64(config.backoff_secs.max(0.0)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issue one request. 5xx and transport errors are retried with a
    /// linearly growing sleep; 4xx come back at once.
    #[tracing::instrument(skip(self, payload))]
    pub async fn request(&self, method: Method, path: &str, payload: Option<&Value>) -> Reply {
        let url = format!("{}{}", self.base_url, path);
        let mut last_error = String::from("HTTP retry exhaustion");

        for attempt in 0..=self.retries {
            let mut builder = self.client.request(method.clone(), &url);
            if let Some(key) = self.api_key.load_full() {
                if !key.trim().is_empty() {
                    builder = builder.header("x-api-key", key.trim());
                }
            }
            if let Some(body) = payload {
                builder = builder.json(body);
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let text = response.text().await.unwrap_or_default();
                    let body = normalize_body(&text);
                    if status >= 500 && attempt < self.retries {
                        tracing::debug!(status, attempt, "server error, retrying");
                        tokio::time::sleep(self.backoff * (attempt + 1)).await;
                        continue;
                    }
                    if status >= 400 {
                        let error = body
                            .get("error")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .unwrap_or_else(|| format!("HTTP {status}"));
                        tracing::warn!(status, error = %error, "HTTP request failed");
                        return Reply {
                            status: Some(status),
                            error: Some(error),
                            body,
                        };
                    }
                    return Reply {
                        status: Some(status),
                        error: None,
                        body,
                    };
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < self.retries {
                        tracing::debug!(attempt, error = %e, "transport error, retrying");
                        tokio::time::sleep(self.backoff * (attempt + 1)).await;
                        continue;
                    }
                }
            }
        }
        tracing::error!(path, error = %last_error, "HTTP request gave up");
        Reply::transport(last_error)
    }

    pub async fn get(&self, path: &str) -> Reply {
        self.request(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, payload: &Value) -> Reply {
        self.request(Method::POST, path, Some(payload)).await
    }

    pub async fn patch(&self, path: &str, payload: &Value) -> Reply {
        self.request(Method::PATCH, path, Some(payload)).await
    }
}
