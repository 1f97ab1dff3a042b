//! Mutable per-citizen state threaded through every cycle.
//!
//! Everything the decision, action and conversation paths share lives in
//! one [`AgentContext`]; the persisted parts round-trip through the store
//! sections listed in `agora_core::store::section`.

use agora_core::store::section;
use agora_core::{is_meta_content, ActionCandidate, AgentConfig, Profile, Traits};
use agora_memory::{
    Desire, GoalState, HealthMetrics, IntentQueue, JobStrategyState, MotivationState, PlanState,
    RelationshipLedger,
};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

use crate::candidates::{CoordCooldowns, WorldGoal};
use crate::conversation::ConversationTracker;
use crate::hotspots::HotspotPicker;
use crate::intent::IntentState;

/// Executed kinds remembered for repetition checks.
pub const RECENT_ACTIONS_KEPT: usize = 12;
pub const UTTERANCES_KEPT: usize = 12;
const UTTERANCE_CHARS: usize = 280;
/// Queue items written to the `pending_actions` section.
pub const PENDING_SNAPSHOT_KEPT: usize = 40;
const FOLLOWUP_TTL_MS: i64 = 120_000;
const INITIATION_COOLDOWN_MS: i64 = 60_000;
const ANALYSIS_COOLDOWN_MS: i64 = 8_000;

/// Something heard nearby or inside a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Utterance {
    pub speaker_id: String,
    pub message: String,
    pub at: i64,
}

#[derive(Debug, Clone)]
struct Followup {
    action: ActionCandidate,
    expires_at: i64,
}

pub struct AgentContext {
    pub agent_id: Option<String>,
    pub name: String,
    pub personality: String,
    pub traits: Traits,
    pub profile: Option<Profile>,
    pub motivation: MotivationState,
    pub plan: PlanState,
    pub goal: GoalState,
    pub job_strategy: JobStrategyState,
    pub queue: IntentQueue,
    pub conversations: ConversationTracker,
    pub relationships: RelationshipLedger,
    pub health: HealthMetrics,
    pub intent: IntentState,
    pub hotspots: HotspotPicker,
    pub coord: CoordCooldowns,
    pub world_goals: Vec<WorldGoal>,
    pub candidate_registered: bool,
    recent_actions: Vec<String>,
    utterances: Vec<Utterance>,
    followup: Option<Followup>,
    initiation_stamps: HashMap<String, i64>,
    analysis_stamps: HashMap<String, i64>,
}

impl AgentContext {
    pub fn new(config: &AgentConfig, rng: StdRng, now_ms: i64) -> Self {
        let traits = Traits::resolve(&config.agent.name, config.agent.traits.as_ref());
        let desire = Desire::infer(&config.agent.goals, &traits);
        let motivation = MotivationState::initialize(desire, now_ms);
        let plan = PlanState::from_motivation(&motivation, now_ms);
        let goal = GoalState::new(desire.as_str(), now_ms);
        Self {
            agent_id: None,
            name: config.agent.name.clone(),
            personality: config.agent.personality.clone(),
            traits,
            profile: None,
            motivation,
            plan,
            goal,
            job_strategy: JobStrategyState::default(),
            queue: IntentQueue::new(
                config.queue.max_size,
                Duration::from_secs(config.queue.default_ttl_secs),
            ),
            conversations: ConversationTracker::new(
                (config.behavior.conversation_cooldown_secs * 1000) as i64,
            ),
            relationships: RelationshipLedger::default(),
            health: HealthMetrics::default(),
            intent: IntentState::default(),
            hotspots: HotspotPicker::new(rng),
            coord: CoordCooldowns::default(),
            world_goals: Vec::new(),
            candidate_registered: false,
            recent_actions: Vec::new(),
            utterances: Vec::new(),
            followup: None,
            initiation_stamps: HashMap::new(),
            analysis_stamps: HashMap::new(),
        }
    }

    /// Adopt a stored or generated profile: its traits win, its goals
    /// re-derive the desire when the chain has not started moving.
    pub fn adopt_profile(&mut self, profile: Profile, now_ms: i64) {
        if let Some(overrides) = profile.traits.as_ref().filter(|t| !t.is_empty()) {
            self.traits = self.traits.merged(overrides);
        }
        let untouched = self.motivation.chain.iter().all(|s| !s.is_done());
        if untouched && !profile.goals.is_empty() {
            let desire = Desire::infer(&profile.goals, &self.traits);
            if desire != self.motivation.desire {
                self.motivation = MotivationState::initialize(desire, now_ms);
                self.plan = PlanState::from_motivation(&self.motivation, now_ms);
                self.goal = GoalState::new(desire.as_str(), now_ms);
            }
        }
        self.profile = Some(profile);
    }

    // ------------------------------------------------------------------
    // Recent actions and utterances
    // ------------------------------------------------------------------

    pub fn remember_action(&mut self, kind: &str) {
        self.recent_actions.push(kind.to_string());
        let excess = self.recent_actions.len().saturating_sub(RECENT_ACTIONS_KEPT);
        self.recent_actions.drain(..excess);
    }

    /// Executed kinds, oldest first.
    pub fn recent_actions(&self) -> &[String] {
        &self.recent_actions
    }

    /// Store a line heard in the world. Out-of-world talk is not kept.
    pub fn remember_utterance(&mut self, speaker_id: &str, message: &str, now_ms: i64) -> bool {
        let message = message.trim();
        if message.is_empty() || is_meta_content(message) {
            return false;
        }
        self.utterances.push(Utterance {
            speaker_id: speaker_id.to_string(),
            message: message.chars().take(UTTERANCE_CHARS).collect(),
            at: now_ms,
        });
        let excess = self.utterances.len().saturating_sub(UTTERANCES_KEPT);
        self.utterances.drain(..excess);
        true
    }

    pub fn utterances(&self) -> &[Utterance] {
        &self.utterances
    }

    /// Last `n` lines, oldest first.
    pub fn last_utterances(&self, n: usize) -> &[Utterance] {
        &self.utterances[self.utterances.len().saturating_sub(n)..]
    }

    // ------------------------------------------------------------------
    // Follow-ups and rate limits
    // ------------------------------------------------------------------

    pub fn set_followup(&mut self, action: ActionCandidate, now_ms: i64) {
        tracing::debug!(stage = "followup_set", action = action.kind(), "pending follow-up");
        self.followup = Some(Followup {
            action,
            expires_at: now_ms + FOLLOWUP_TTL_MS,
        });
    }

    /// Pending follow-up, unless it expired.
    pub fn take_followup(&mut self, now_ms: i64) -> Option<ActionCandidate> {
        let followup = self.followup.take()?;
        (now_ms <= followup.expires_at).then_some(followup.action)
    }

    /// Stamp `target` and report whether an opener may be sent now.
    /// The stamp is kept even if the opener later fails.
    pub fn claim_initiation(&mut self, target: &str, now_ms: i64) -> bool {
        claim(&mut self.initiation_stamps, target, now_ms, INITIATION_COOLDOWN_MS)
    }

    pub fn claim_analysis(&mut self, speaker: &str, now_ms: i64) -> bool {
        claim(&mut self.analysis_stamps, speaker, now_ms, ANALYSIS_COOLDOWN_MS)
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Section name and body for everything persisted between runs.
    pub fn sections(&mut self, now_ms: i64) -> Vec<(&'static str, Value)> {
        let mut pending: Vec<Value> = self
            .queue
            .snapshot(now_ms)
            .into_iter()
            .filter_map(|item| serde_json::to_value(item).ok())
            .collect();
        pending.truncate(PENDING_SNAPSHOT_KEPT);

        let mut out = vec![
            (section::MOTIVATION, to_json(&self.motivation)),
            (section::PLAN, to_json(&self.plan)),
            (section::GOAL, to_json(&self.goal)),
            (section::JOB_STRATEGY, to_json(&self.job_strategy)),
            (section::PENDING_ACTIONS, Value::Array(pending)),
            (section::RELATIONSHIPS, to_json(&self.relationships)),
            (section::HEALTH, to_json(&self.health)),
        ];
        if let Some(id) = &self.agent_id {
            out.push((section::AGENT_ID, json!(id)));
        }
        if let Some(profile) = &self.profile {
            out.push((section::PROFILE, to_json(profile)));
        }
        out
    }

    /// Restore one section. Unreadable bodies are skipped with a warning.
    pub fn restore_section(&mut self, name: &str, body: Value, now_ms: i64) {
        let outcome: Result<(), serde_json::Error> = (|| {
            match name {
                section::AGENT_ID => self.agent_id = body.as_str().map(str::to_string),
                section::PROFILE => {
                    let profile: Profile = serde_json::from_value(body)?;
                    self.adopt_profile(profile, now_ms);
                }
                section::MOTIVATION => {
                    let restored: MotivationState = serde_json::from_value(body)?;
                    if !restored.chain.is_empty() {
                        self.motivation = restored;
                    }
                }
                section::PLAN => self.plan = serde_json::from_value(body)?,
                section::GOAL => self.goal = serde_json::from_value(body)?,
                section::JOB_STRATEGY => self.job_strategy = serde_json::from_value(body)?,
                section::PENDING_ACTIONS => {
                    let items = body.as_array().cloned().unwrap_or_default();
                    let restored = self.queue.restore(&items, now_ms);
                    tracing::info!(restored, "pending actions restored");
                }
                section::RELATIONSHIPS => self.relationships = serde_json::from_value(body)?,
                section::HEALTH => self.health = serde_json::from_value(body)?,
                other => tracing::debug!(section = other, "unknown section ignored"),
            }
            Ok(())
        })();
        if let Err(e) = outcome {
            tracing::warn!(section = name, error = %e, "stored section unreadable, keeping defaults");
        }
    }

    /// Public profile pushed to the world.
    pub fn public_profile(&self) -> Value {
        json!({
            "agentId": self.agent_id,
            "profile": self.profile,
            "traits": self.traits,
            "motivation": self.motivation,
            "plan": self.plan,
        })
    }
}

fn claim(stamps: &mut HashMap<String, i64>, key: &str, now_ms: i64, cooldown_ms: i64) -> bool {
    if let Some(at) = stamps.get(key) {
        if now_ms - at < cooldown_ms {
            return false;
        }
    }
    stamps.insert(key.to_string(), now_ms);
    true
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
