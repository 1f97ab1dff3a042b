//! Durable agent memory.
//!
//! State is kept as named JSON sections plus a capped episodic log. The
//! shapes stored in each section live in `agora_memory::state`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Episodes beyond this many are pruned oldest-first.
pub const EPISODE_CAP: usize = 80;

pub mod section {
    pub const AGENT_ID: &str = "agent_id";
    pub const PROFILE: &str = "profile";
    pub const MOTIVATION: &str = "motivation";
    pub const PLAN: &str = "plan";
    pub const GOAL: &str = "goal";
    pub const JOB_STRATEGY: &str = "job_strategy";
    pub const PENDING_ACTIONS: &str = "pending_actions";
    pub const RELATIONSHIPS: &str = "relationships";
    pub const HEALTH: &str = "health";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: Uuid,
    pub kind: String,
    pub data: Value,
    pub at: DateTime<Utc>,
}

impl Episode {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            data,
            at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save_section(&self, name: &str, body: &Value) -> anyhow::Result<()>;
    async fn load_section(&self, name: &str) -> anyhow::Result<Option<Value>>;
    async fn record_episode(&self, episode: &Episode) -> anyhow::Result<()>;
    /// Newest first.
    async fn recent_episodes(&self, limit: usize) -> anyhow::Result<Vec<Episode>>;
}
