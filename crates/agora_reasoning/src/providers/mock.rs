//! Mock provider: deterministic responses for tests and offline runs.

use crate::llm::{CompletionParams, LlmClient};
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Replays scripted replies in order, then a fixed non-JSON line.
#[derive(Debug, Default)]
pub struct MockProvider {
    model: String,
    script: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..Default::default()
        }
    }

    pub fn scripted<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            model: "mock".to_string(),
            script: Mutex::new(replies.into_iter().map(Into::into).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LlmClient for MockProvider {
    async fn complete(&self, _system: &str, _user: &str, _params: CompletionParams) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
        let next = match self.script.lock() {
            Ok(mut script) => script.pop_front(),
            Err(_) => None,
        };
        Ok(next.unwrap_or_else(|| format!("(Mock {} Response) I received your prompt.", self.model)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_replays_script_then_default() {
        let provider = MockProvider::scripted(["{\"message\":\"hola\"}"]);
        let first = provider
            .complete("s", "u", CompletionParams::default())
            .await
            .unwrap();
        assert_eq!(first, "{\"message\":\"hola\"}");
        let second = provider
            .complete("s", "u", CompletionParams::default())
            .await
            .unwrap();
        assert!(second.contains("Mock"));
        assert_eq!(provider.calls(), 2);
    }
}
