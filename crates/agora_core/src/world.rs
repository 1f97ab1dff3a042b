//! World-facing data: the perception snapshot, economy/coordination listings,
//! the normalized `Reply` envelope, and the `World` collaborator trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

// ============================================================================
// Reply envelope
// ============================================================================

/// Normalized response from any world call: `{..., error?, status?}`.
///
/// `status == Some(0)` marks a transport failure after retries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub status: Option<u16>,
    pub error: Option<String>,
    pub body: Value,
}

impl Reply {
    pub fn ok(body: Value) -> Self {
        Self {
            status: None,
            error: None,
            body,
        }
    }

    pub fn failed(status: u16, error: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            error: Some(error.into()),
            body: Value::Null,
        }
    }

    pub fn transport(error: impl Into<String>) -> Self {
        Self::failed(0, error)
    }

    /// Any status ≥400 or a non-empty error counts as a protocol failure.
    pub fn is_failure(&self) -> bool {
        self.error.as_deref().map(|e| !e.is_empty()).unwrap_or(false)
            || self.status.map(|s| s >= 400).unwrap_or(false)
    }

    /// Flat JSON view, with `error`/`status` merged into the body object.
    pub fn to_value(&self) -> Value {
        let mut out = match &self.body {
            Value::Object(map) => Value::Object(map.clone()),
            Value::Null => json!({}),
            other => json!({ "data": other }),
        };
        if let Some(err) = &self.error {
            out["error"] = json!(err);
        }
        if let Some(status) = self.status {
            out["status"] = json!(status);
        }
        out
    }
}

// ============================================================================
// Perception snapshot
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i64,
    pub y: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Needs {
    pub social: f64,
    pub hunger: f64,
    pub energy: f64,
}

impl Default for Needs {
    fn default() -> Self {
        Self {
            social: 100.0,
            hunger: 0.0,
            energy: 100.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NearbyAgent {
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Building {
    pub id: String,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub position: Option<Position>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

impl Building {
    /// Entrance tile: horizontally centred, just below the footprint.
    pub fn entrance(&self) -> Position {
        let origin = self.position.unwrap_or_default();
        Position {
            x: origin.x + (self.width.unwrap_or(1) / 2).max(0),
            y: origin.y + self.height.unwrap_or(1).max(1),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConversationLine {
    #[serde(alias = "fromId")]
    pub from: Option<String>,
    pub message: String,
    pub timestamp: i64,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub id: String,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub messages: Vec<ConversationLine>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub last_activity: Option<i64>,
    #[serde(default)]
    pub started_at: Option<i64>,
}

impl ConversationView {
    pub fn last_seen_ms(&self) -> Option<i64> {
        self.last_activity.or(self.started_at)
    }

    pub fn involves(&self, agent_id: &str) -> bool {
        self.participants.iter().any(|p| p == agent_id)
    }

    /// Most recent line by timestamp.
    pub fn latest_line(&self) -> Option<&ConversationLine> {
        self.messages.iter().max_by_key(|m| m.timestamp)
    }

    /// Most recent line not written by `agent_id`.
    pub fn latest_incoming(&self, agent_id: &str) -> Option<&ConversationLine> {
        self.messages
            .iter()
            .filter(|m| m.from.as_deref() != Some(agent_id))
            .max_by_key(|m| m.timestamp)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldEventInfo {
    pub id: String,
    pub name: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationshipView {
    pub affinity: f64,
    pub trust: f64,
    pub respect: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Economy {
    pub balance: f64,
    /// Either a job object with an `id`, a bare id string, or absent.
    pub job: Option<Value>,
    pub properties: Vec<Value>,
}

impl Economy {
    pub fn has_job(&self) -> bool {
        match &self.job {
            Some(Value::Object(map)) => map
                .get("id")
                .map(|id| !id.is_null() && id != &json!(""))
                .unwrap_or(false),
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Bool(b)) => *b,
            _ => false,
        }
    }

    pub fn has_property(&self) -> bool {
        !self.properties.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerceptionContext {
    pub economy: Economy,
    pub relationships: HashMap<String, RelationshipView>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorldTime {
    pub phase: Option<String>,
    pub day_progress: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SuggestedGoal {
    pub target_types: Vec<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Perception {
    pub position: Option<Position>,
    pub needs: Needs,
    pub nearby_agents: Vec<NearbyAgent>,
    pub nearby_buildings: Vec<Building>,
    pub current_building: Option<Building>,
    pub conversations: Vec<ConversationView>,
    pub events: Vec<WorldEventInfo>,
    pub context: PerceptionContext,
    pub world_time: Option<WorldTime>,
    pub suggested_goals: Vec<SuggestedGoal>,
}

impl Perception {
    /// Live conversations this agent takes part in, most recent first.
    pub fn own_live_conversations(&self, agent_id: &str) -> Vec<&ConversationView> {
        let mut own: Vec<&ConversationView> = self
            .conversations
            .iter()
            .filter(|c| c.active && c.involves(agent_id))
            .collect();
        own.sort_by_key(|c| std::cmp::Reverse(c.last_seen_ms().unwrap_or(0)));
        own
    }

    pub fn active_events(&self) -> impl Iterator<Item = &WorldEventInfo> {
        self.events.iter().filter(|e| e.status == "active")
    }

    pub fn first_nearby(&self) -> Option<&NearbyAgent> {
        self.nearby_agents.iter().find(|a| !a.id.is_empty())
    }
}

// ============================================================================
// Listings
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JobApplication {
    pub applicant_id: Option<String>,
    pub votes: i64,
    pub status: Option<String>,
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub role: Option<String>,
    pub building_name: Option<String>,
    pub assigned_to: Option<String>,
    pub application: Option<JobApplication>,
}

impl Job {
    pub fn is_open(&self) -> bool {
        self.assigned_to.as_deref().map(str::is_empty).unwrap_or(true)
    }

    pub fn applicant(&self) -> Option<&str> {
        self.application
            .as_ref()
            .and_then(|a| a.applicant_id.as_deref())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Property {
    pub id: String,
    pub price: f64,
    pub for_sale: bool,
}

/// Cheapest for-sale property, if any.
pub fn cheapest_for_sale(properties: &[Property]) -> Option<&Property> {
    properties
        .iter()
        .filter(|p| p.for_sale && !p.id.is_empty())
        .min_by(|a, b| a.price.total_cmp(&b.price))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProposalMember {
    pub agent_id: String,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Commitment {
    pub id: String,
    pub agent_id: String,
    pub status: String,
    pub progress: Option<f64>,
}

impl Commitment {
    pub fn is_open(&self) -> bool {
        matches!(self.status.as_str(), "pending" | "in_progress")
    }

    pub fn is_done(&self) -> bool {
        self.status == "done"
    }
}

fn default_role_min() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleSlot {
    pub role: String,
    #[serde(default = "default_role_min")]
    pub min: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Proposal {
    pub id: String,
    pub title: Option<String>,
    pub status: String,
    pub category: Option<String>,
    pub members: Vec<ProposalMember>,
    pub commitments: Vec<Commitment>,
    pub required_roles: Vec<RoleSlot>,
    pub updated_at: Option<i64>,
}

impl Proposal {
    pub fn is_active(&self) -> bool {
        matches!(self.status.as_str(), "pending" | "in_progress")
    }

    pub fn has_member(&self, agent_id: &str) -> bool {
        self.members.iter().any(|m| m.agent_id == agent_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldState {
    pub buildings: Vec<Building>,
}

impl WorldState {
    pub fn building_position(&self, building_id: &str) -> Option<Position> {
        self.buildings
            .iter()
            .find(|b| b.id == building_id)
            .and_then(|b| b.position)
    }
}

// ============================================================================
// Request payloads
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProposalQuery {
    pub limit: u32,
    pub mine: bool,
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitmentUpdate {
    pub status: String,
    pub progress: u8,
    pub notes: String,
}

// ============================================================================
// Collaborator trait
// ============================================================================

/// Everything the decision core asks of the virtual world.
///
/// Action calls never fail at the type level: transport and protocol
/// problems come back inside the `Reply`. Listing calls return `Err`
/// when the reply was a failure.
#[async_trait]
pub trait World: Send + Sync {
    async fn perceive(&self) -> anyhow::Result<Perception>;

    async fn move_to(&self, target: Position) -> Reply;
    async fn speak(&self, message: &str) -> Reply;
    async fn enter_building(&self, building_id: &str) -> Reply;

    async fn start_conversation(&self, target_id: &str, message: &str) -> Reply;
    async fn send_conversation_message(&self, conversation_id: &str, message: &str) -> Reply;
    async fn end_conversation(&self, conversation_id: &str) -> Reply;

    async fn list_jobs(&self) -> anyhow::Result<Vec<Job>>;
    async fn apply_job(&self, job_id: &str) -> Reply;
    async fn vote_job(&self, applicant_id: &str, job_id: &str) -> Reply;
    async fn list_properties(&self) -> anyhow::Result<Vec<Property>>;
    async fn buy_property(&self, property_id: &str) -> Reply;

    async fn list_proposals(&self, query: &ProposalQuery) -> anyhow::Result<Vec<Proposal>>;
    async fn create_proposal(
        &self,
        title: &str,
        description: &str,
        category: &str,
        required_roles: &[RoleSlot],
    ) -> Reply;
    async fn join_proposal(&self, proposal_id: &str, role: &str) -> Reply;
    async fn commit_to_proposal(&self, proposal_id: &str, task: &str, role: &str) -> Reply;
    async fn update_commitment(
        &self,
        proposal_id: &str,
        commitment_id: &str,
        update: &CommitmentUpdate,
    ) -> Reply;
    async fn set_proposal_status(&self, proposal_id: &str, status: &str, summary: &str) -> Reply;

    async fn create_event(&self, event: &Value) -> Reply;
    async fn join_event(&self, event_id: &str) -> Reply;

    async fn register_candidate(&self, name: &str, platform: &str) -> Reply;
    async fn propose_negotiation(&self, target_id: &str, job_id: Option<&str>) -> Reply;

    /// Building layout; implementations may cache it.
    async fn world_state(&self) -> anyhow::Result<WorldState>;

    /// Push the agent's public profile (traits, motivation, plan). Best effort.
    async fn publish_profile(&self, _profile: &Value) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_failure_rules() {
        assert!(!Reply::ok(json!({"ok": true})).is_failure());
        assert!(Reply::failed(404, "nope").is_failure());
        assert!(Reply::transport("timeout").is_failure());
        let odd = Reply {
            status: Some(500),
            error: None,
            body: Value::Null,
        };
        assert!(odd.is_failure());
        let v = Reply::failed(403, "denied").to_value();
        assert_eq!(v["status"], 403);
        assert_eq!(v["error"], "denied");
    }

    #[test]
    fn test_perception_parses_camel_case_with_defaults() {
        let raw = json!({
            "position": {"x": 3, "y": 4},
            "nearbyAgents": [{"id": "a2", "name": "Ana"}],
            "conversations": [{
                "id": "c1",
                "participants": ["me", "a2"],
                "messages": [{"fromId": "a2", "message": "hola", "timestamp": 5}],
                "lastActivity": 10
            }],
            "context": {"economy": {"balance": 12.5, "job": {"id": "j1"}}}
        });
        let p: Perception = serde_json::from_value(raw).unwrap();
        assert_eq!(p.position, Some(Position { x: 3, y: 4 }));
        assert_eq!(p.needs.social, 100.0);
        assert!(p.context.economy.has_job());
        let own = p.own_live_conversations("me");
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].latest_incoming("me").unwrap().message, "hola");
    }

    #[test]
    fn test_job_flag_shapes() {
        let mut e = Economy::default();
        assert!(!e.has_job());
        e.job = Some(json!("j9"));
        assert!(e.has_job());
        e.job = Some(json!({"id": null}));
        assert!(!e.has_job());
    }

    #[test]
    fn test_building_entrance() {
        let b = Building {
            id: "cafe".into(),
            position: Some(Position { x: 10, y: 6 }),
            width: Some(4),
            height: Some(2),
            ..Default::default()
        };
        assert_eq!(b.entrance(), Position { x: 12, y: 8 });
    }
}
