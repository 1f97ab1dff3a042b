use agora_core::{Episode, StateStore, EPISODE_CAP};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

/// Volatile `StateStore` for tests and throwaway runs.
#[derive(Default)]
pub struct MemoryStore {
    sections: Mutex<HashMap<String, Value>>,
    episodes: Mutex<VecDeque<Episode>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn save_section(&self, name: &str, body: &Value) -> Result<()> {
        self.sections
            .lock()
            .await
            .insert(name.to_string(), body.clone());
        Ok(())
    }

    async fn load_section(&self, name: &str) -> Result<Option<Value>> {
        Ok(self.sections.lock().await.get(name).cloned())
    }

    async fn record_episode(&self, episode: &Episode) -> Result<()> {
        let mut episodes = self.episodes.lock().await;
        episodes.push_back(episode.clone());
        while episodes.len() > EPISODE_CAP {
            episodes.pop_front();
        }
        Ok(())
    }

    async fn recent_episodes(&self, limit: usize) -> Result<Vec<Episode>> {
        let episodes = self.episodes.lock().await;
        Ok(episodes.iter().rev().take(limit).cloned().collect())
    }
}
