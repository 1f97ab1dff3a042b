use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Rejection;
use crate::safety::is_meta_content;
use crate::world::{Position, RoleSlot};

/// A validated action request.
///
/// Serialized as `{"type": "...", "params": {...}}`, which is also the shape
/// persisted in the pending-actions snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum ActionCandidate {
    MoveTo {
        x: i64,
        y: i64,
    },
    /// Move toward a building whose coordinates are resolved at execution.
    MoveToBuilding {
        building_id: String,
    },
    EnterBuilding {
        building_id: String,
    },
    Speak {
        message: String,
    },
    StartConversation {
        target_id: String,
        message: String,
    },
    ConversationMessage {
        conversation_id: String,
        message: String,
    },
    EndConversation {
        conversation_id: String,
    },
    ApplyJob {
        job_id: String,
    },
    BuyProperty {
        property_id: String,
    },
    VoteJob {
        applicant_id: String,
        job_id: String,
    },
    CreateEvent {
        name: String,
        #[serde(rename = "type")]
        kind: String,
        #[serde(rename = "startAt", default)]
        start_at: Option<Value>,
        #[serde(rename = "endAt", default)]
        end_at: Option<Value>,
        #[serde(default)]
        location: Value,
        #[serde(default)]
        description: String,
        #[serde(rename = "goalScope")]
        goal_scope: String,
    },
    JoinEvent {
        event_id: String,
    },
    CoordCreateProposal {
        title: String,
        description: String,
        category: String,
        required_roles: Vec<RoleSlot>,
    },
    CoordJoin {
        proposal_id: String,
        role: String,
    },
    CoordCommit {
        proposal_id: String,
        task: String,
        role: String,
    },
    CoordUpdateCommit {
        proposal_id: String,
        commitment_id: String,
        status: String,
        progress: u8,
        notes: String,
    },
    CoordSetStatus {
        proposal_id: String,
        status: String,
        summary: String,
    },
    RegisterCandidate {
        platform: String,
    },
    Wait {},
}

fn required(kind: &'static str, field: &'static str, value: &str) -> Result<String, Rejection> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Rejection::MissingField { kind, field });
    }
    Ok(trimmed.to_string())
}

fn in_world(kind: &'static str, message: &str) -> Result<String, Rejection> {
    let text = required(kind, "message", message)?;
    if is_meta_content(&text) {
        return Err(Rejection::MetaContent);
    }
    Ok(text)
}

impl ActionCandidate {
    pub fn move_to(target: Position) -> Self {
        ActionCandidate::MoveTo {
            x: target.x,
            y: target.y,
        }
    }

    pub fn wait() -> Self {
        ActionCandidate::Wait {}
    }

    pub fn move_to_building(building_id: &str) -> Result<Self, Rejection> {
        Ok(ActionCandidate::MoveToBuilding {
            building_id: required("move_to", "building_id", building_id)?,
        })
    }

    pub fn enter_building(building_id: &str) -> Result<Self, Rejection> {
        Ok(ActionCandidate::EnterBuilding {
            building_id: required("enter_building", "building_id", building_id)?,
        })
    }

    pub fn speak(message: &str) -> Result<Self, Rejection> {
        Ok(ActionCandidate::Speak {
            message: in_world("speak", message)?,
        })
    }

    pub fn start_conversation(target_id: &str, message: &str) -> Result<Self, Rejection> {
        Ok(ActionCandidate::StartConversation {
            target_id: required("start_conversation", "target_id", target_id)?,
            message: in_world("start_conversation", message)?,
        })
    }

    pub fn conversation_message(conversation_id: &str, message: &str) -> Result<Self, Rejection> {
        Ok(ActionCandidate::ConversationMessage {
            conversation_id: required("conversation_message", "conversation_id", conversation_id)?,
            message: in_world("conversation_message", message)?,
        })
    }

    pub fn end_conversation(conversation_id: &str) -> Result<Self, Rejection> {
        Ok(ActionCandidate::EndConversation {
            conversation_id: required("end_conversation", "conversation_id", conversation_id)?,
        })
    }

    pub fn apply_job(job_id: &str) -> Result<Self, Rejection> {
        Ok(ActionCandidate::ApplyJob {
            job_id: required("apply_job", "job_id", job_id)?,
        })
    }

    pub fn buy_property(property_id: &str) -> Result<Self, Rejection> {
        Ok(ActionCandidate::BuyProperty {
            property_id: required("buy_property", "property_id", property_id)?,
        })
    }

    pub fn vote_job(applicant_id: &str, job_id: &str) -> Result<Self, Rejection> {
        Ok(ActionCandidate::VoteJob {
            applicant_id: required("vote_job", "applicant_id", applicant_id)?,
            job_id: required("vote_job", "job_id", job_id)?,
        })
    }

    pub fn join_event(event_id: &str) -> Result<Self, Rejection> {
        Ok(ActionCandidate::JoinEvent {
            event_id: required("join_event", "event_id", event_id)?,
        })
    }

    /// Wire name of the action kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ActionCandidate::MoveTo { .. } | ActionCandidate::MoveToBuilding { .. } => "move_to",
            ActionCandidate::EnterBuilding { .. } => "enter_building",
            ActionCandidate::Speak { .. } => "speak",
            ActionCandidate::StartConversation { .. } => "start_conversation",
            ActionCandidate::ConversationMessage { .. } => "conversation_message",
            ActionCandidate::EndConversation { .. } => "end_conversation",
            ActionCandidate::ApplyJob { .. } => "apply_job",
            ActionCandidate::BuyProperty { .. } => "buy_property",
            ActionCandidate::VoteJob { .. } => "vote_job",
            ActionCandidate::CreateEvent { .. } => "create_event",
            ActionCandidate::JoinEvent { .. } => "join_event",
            ActionCandidate::CoordCreateProposal { .. } => "coord_create_proposal",
            ActionCandidate::CoordJoin { .. } => "coord_join",
            ActionCandidate::CoordCommit { .. } => "coord_commit",
            ActionCandidate::CoordUpdateCommit { .. } => "coord_update_commit",
            ActionCandidate::CoordSetStatus { .. } => "coord_set_status",
            ActionCandidate::RegisterCandidate { .. } => "register_candidate",
            ActionCandidate::Wait {} => "wait",
        }
    }

    /// Kinds allowed as a deferred follow-up after a conversation move.
    pub fn is_followup_kind(&self) -> bool {
        matches!(
            self,
            ActionCandidate::MoveTo { .. }
                | ActionCandidate::MoveToBuilding { .. }
                | ActionCandidate::EnterBuilding { .. }
                | ActionCandidate::JoinEvent { .. }
                | ActionCandidate::Wait {}
        )
    }

    pub fn is_conversation_reply(&self) -> bool {
        matches!(
            self,
            ActionCandidate::ConversationMessage { .. } | ActionCandidate::EndConversation { .. }
        )
    }

    /// Main identifier the action is about, for logs.
    pub fn target(&self) -> Option<&str> {
        match self {
            ActionCandidate::StartConversation { target_id, .. } => Some(target_id),
            ActionCandidate::MoveToBuilding { building_id }
            | ActionCandidate::EnterBuilding { building_id } => Some(building_id),
            ActionCandidate::ApplyJob { job_id } | ActionCandidate::VoteJob { job_id, .. } => {
                Some(job_id)
            }
            ActionCandidate::BuyProperty { property_id } => Some(property_id),
            ActionCandidate::CoordJoin { proposal_id, .. }
            | ActionCandidate::CoordCommit { proposal_id, .. }
            | ActionCandidate::CoordUpdateCommit { proposal_id, .. }
            | ActionCandidate::CoordSetStatus { proposal_id, .. } => Some(proposal_id),
            ActionCandidate::ConversationMessage { conversation_id, .. }
            | ActionCandidate::EndConversation { conversation_id } => Some(conversation_id),
            ActionCandidate::JoinEvent { event_id } => Some(event_id),
            _ => None,
        }
    }
}
