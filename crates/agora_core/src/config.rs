use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::traits::TraitOverrides;

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub server: ServerConfig,
    pub agent: CitizenConfig,
    pub behavior: BehaviorConfig,
    pub http: HttpConfig,
    pub llm: LlmConfig,
    pub guards: GuardConfig,
    pub queue: QueueConfig,
    pub memory: MemoryConfig,
}

impl AgentConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    /// After loading, env var overrides are applied.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: AgentConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Try to load from path; if file doesn't exist, return defaults with env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    /// Apply environment variable overrides on top of file-based config.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("AGORA_SERVER_URL") {
            self.server.url = v;
        }
        if let Ok(v) = std::env::var("AGORA_API_KEY") {
            if !v.trim().is_empty() {
                self.server.api_key = Some(v.trim().to_string());
            }
        }
        if let Ok(v) = std::env::var("AGORA_AGENT_NAME") {
            self.agent.name = v;
        }
        if let Ok(v) = std::env::var("AGORA_DECISION_MODE") {
            match v.to_ascii_lowercase().as_str() {
                "llm" => self.behavior.decision_loop.mode = DecisionMode::Llm,
                "heuristic" => self.behavior.decision_loop.mode = DecisionMode::Heuristic,
                other => tracing::warn!("Ignoring unknown AGORA_DECISION_MODE '{}'", other),
            }
        }
        if let Ok(v) = std::env::var("AGORA_DB_PATH") {
            self.memory.db_path = v;
        }
        if let Ok(v) = std::env::var("LLM_PROVIDER") {
            self.llm.provider = v;
        }
        if let Ok(v) = std::env::var("LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("LLM_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("LLM_BASE_URL") {
            self.llm.base_url = Some(v);
        }
        if let Ok(v) = std::env::var("LLM_MAX_TOKENS") {
            if let Ok(n) = v.parse() {
                self.llm.max_tokens = n;
            }
        }
        if let Ok(v) = std::env::var("LLM_TEMPERATURE") {
            if let Ok(n) = v.parse() {
                self.llm.temperature = n;
            }
        }
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Event stream endpoint (`ws://` or `wss://`).
    pub url: String,
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:3001".to_string(),
            api_key: None,
        }
    }
}

impl ServerConfig {
    /// HTTP base URL for the REST endpoints, derived from the stream URL.
    pub fn http_base_url(&self) -> String {
        let url = self.url.trim_end_matches('/');
        if let Some(rest) = url.strip_prefix("ws://") {
            format!("http://{}", rest)
        } else if let Some(rest) = url.strip_prefix("wss://") {
            format!("https://{}", rest)
        } else {
            url.to_string()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CitizenConfig {
    pub name: String,
    pub avatar: String,
    pub personality: String,
    pub traits: Option<TraitOverrides>,
    pub goals: Vec<String>,
    /// Capability list sent with the handshake; the server grants all when absent.
    pub permissions: Option<Vec<String>>,
}

impl Default for CitizenConfig {
    fn default() -> Self {
        Self {
            name: "Ciudadano".to_string(),
            avatar: "char1".to_string(),
            personality: "amable y curioso".to_string(),
            traits: None,
            goals: vec![],
            permissions: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMode {
    #[default]
    Heuristic,
    Llm,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecisionLoopConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub mode: DecisionMode,
}

impl Default for DecisionLoopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 20_000,
            mode: DecisionMode::Heuristic,
        }
    }
}

impl DecisionLoopConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(2_000))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    pub auto_explore: bool,
    pub explore_interval_ms: u64,
    pub decision_loop: DecisionLoopConfig,
    /// Minimum seconds between two replies in the same conversation.
    pub conversation_cooldown_secs: u64,
    /// Live conversations quiet for longer than this are ended.
    pub conversation_stale_secs: u64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            auto_explore: true,
            explore_interval_ms: 30_000,
            decision_loop: DecisionLoopConfig::default(),
            conversation_cooldown_secs: 0,
            conversation_stale_secs: 120,
        }
    }
}

impl BehaviorConfig {
    pub fn explore_interval(&self) -> Duration {
        Duration::from_millis(self.explore_interval_ms.max(1_000))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: f64,
    /// Extra attempts after the first one.
    pub retries: u32,
    pub backoff_secs: f64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 6.0,
            retries: 2,
            backoff_secs: 0.4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// `openai`, `anthropic`, `ollama`, `mock`; empty disables text generation.
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: String::new(),
            model: String::new(),
            api_key: None,
            base_url: None,
            temperature: 0.4,
            max_tokens: 300,
            timeout_secs: 20,
        }
    }
}

impl LlmConfig {
    /// A provider is usable once named with a model; hosted providers also need a key.
    pub fn is_usable(&self) -> bool {
        if self.provider.is_empty() || self.model.is_empty() {
            return false;
        }
        match self.provider.as_str() {
            "ollama" | "mock" => true,
            _ => self
                .api_key
                .as_deref()
                .map(|k| !k.trim().is_empty())
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub decision_secs: u64,
    pub action_secs: u64,
    pub conversation_secs: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            decision_secs: 8,
            action_secs: 20,
            conversation_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_size: usize,
    pub default_ttl_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 40,
            default_ttl_secs: 90,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub db_path: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: "agora.db".to_string(),
        }
    }
}
