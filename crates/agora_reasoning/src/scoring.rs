//! Utility scoring for competing candidates.
//!
//! Each action kind maps to a fixed six-component vector; weights shift
//! with the citizen's situation. The final score subtracts a penalty for
//! kinds repeated in the recent window.

use agora_core::{ActionCandidate, Perception};
use serde::Serialize;

use crate::candidates::CoordSnapshot;

/// Executed kinds inspected for repetition.
pub const REPEAT_WINDOW: usize = 6;
const REPEAT_STEP: f64 = 0.45;
const REPEAT_CAP: f64 = 1.8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UtilityVector {
    pub econ_progress: f64,
    pub social_progress: f64,
    pub coord_progress: f64,
    pub survival: f64,
    pub event_progress: f64,
    pub risk: f64,
}

impl UtilityVector {
    pub fn dot(&self, w: &UtilityVector) -> f64 {
        w.econ_progress * self.econ_progress
            + w.social_progress * self.social_progress
            + w.coord_progress * self.coord_progress
            + w.survival * self.survival
            + w.event_progress * self.event_progress
            - w.risk * self.risk
    }
}

/// The slice of world state scoring depends on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringInputs {
    pub has_job: bool,
    pub has_property: bool,
    pub balance: f64,
    pub social_need: f64,
    pub hunger: f64,
    pub energy: f64,
    pub any_active_event: bool,
    pub coord: CoordSnapshot,
}

impl ScoringInputs {
    pub fn from_perception(perception: &Perception, coord: CoordSnapshot) -> Self {
        let economy = &perception.context.economy;
        Self {
            has_job: economy.has_job(),
            has_property: economy.has_property(),
            balance: economy.balance,
            social_need: perception.needs.social,
            hunger: perception.needs.hunger,
            energy: perception.needs.energy,
            any_active_event: perception.active_events().next().is_some(),
            coord,
        }
    }
}

pub fn components(action: &ActionCandidate, s: &ScoringInputs) -> UtilityVector {
    let mut v = UtilityVector::default();
    match action {
        ActionCandidate::ApplyJob { .. } => {
            v.econ_progress = if s.has_job { -0.3 } else { 1.2 };
            v.risk = if s.has_job { 0.2 } else { 0.05 };
        }
        ActionCandidate::BuyProperty { .. } => {
            v.econ_progress = if s.has_job && !s.has_property && s.balance >= 90.0 {
                1.1
            } else {
                -0.2
            };
            v.risk = if s.balance < 110.0 { 0.35 } else { 0.15 };
        }
        ActionCandidate::VoteJob { .. } => {
            v.econ_progress = 0.95;
            v.social_progress = 0.25;
            v.risk = 0.05;
        }
        ActionCandidate::StartConversation { .. } | ActionCandidate::ConversationMessage { .. } => {
            v.social_progress = 0.75 + (100.0 - s.social_need) / 120.0;
            v.risk = 0.1;
        }
        ActionCandidate::CoordUpdateCommit { .. }
        | ActionCandidate::CoordCommit { .. }
        | ActionCandidate::CoordJoin { .. }
        | ActionCandidate::CoordCreateProposal { .. } => {
            let open = s.coord.my_open_commitments as f64;
            let active = s.coord.active_count as f64;
            let adjust = match action {
                ActionCandidate::CoordUpdateCommit { .. } => 0.35 - 0.2 * (open - 1.0).max(0.0),
                ActionCandidate::CoordCommit { .. } => 0.2 - 0.15 * open,
                ActionCandidate::CoordJoin { .. } => 0.1 - 0.1 * (active - 1.0).max(0.0),
                _ if s.coord.active_count == 0 => 0.15,
                _ => -0.15,
            };
            v.coord_progress = 0.9 + adjust;
            v.risk = 0.1;
        }
        ActionCandidate::JoinEvent { .. } | ActionCandidate::CreateEvent { .. } => {
            v.event_progress = 0.75 + if s.any_active_event { 0.25 } else { 0.0 };
            v.social_progress = 0.2;
            v.risk = 0.1;
        }
        ActionCandidate::MoveTo { .. } | ActionCandidate::MoveToBuilding { .. } => {
            v.survival = 0.45 + if s.hunger > 65.0 { 0.2 } else { 0.0 }
                - if s.energy < 35.0 { 0.2 } else { 0.0 };
            v.risk = 0.05;
        }
        ActionCandidate::Wait {} => {
            v.survival = if s.energy < 30.0 { 0.35 } else { 0.05 };
        }
        _ => {
            v.social_progress = 0.2;
            v.risk = 0.1;
        }
    }
    v
}

pub fn weights(s: &ScoringInputs) -> UtilityVector {
    UtilityVector {
        econ_progress: if !s.has_job {
            1.15
        } else if !s.has_property {
            0.95
        } else {
            0.7
        },
        social_progress: if s.social_need < 55.0 { 0.9 } else { 0.65 },
        coord_progress: 0.85,
        survival: if s.hunger > 60.0 || s.energy < 40.0 { 0.7 } else { 0.45 },
        event_progress: 0.55,
        risk: 0.9,
    }
}

/// Penalty for `kind` given executed kinds, oldest first.
pub fn repeat_penalty(kind: &str, recent: &[String]) -> f64 {
    let tail = &recent[recent.len().saturating_sub(REPEAT_WINDOW)..];
    let repeats = tail.iter().filter(|k| k.as_str() == kind).count();
    if repeats <= 1 {
        return 0.0;
    }
    (REPEAT_STEP * (repeats - 1) as f64).min(REPEAT_CAP)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    pub action: ActionCandidate,
    pub score: f64,
    pub penalty: f64,
    pub vector: UtilityVector,
}

/// Score every candidate, best first. Equal scores keep generator order.
pub fn rank(candidates: Vec<ActionCandidate>, inputs: &ScoringInputs, recent: &[String]) -> Vec<Scored> {
    let w = weights(inputs);
    let mut scored: Vec<Scored> = candidates
        .into_iter()
        .map(|action| {
            let vector = components(&action, inputs);
            let penalty = repeat_penalty(action.kind(), recent);
            Scored {
                score: vector.dot(&w) - penalty,
                penalty,
                vector,
                action,
            }
        })
        .collect();
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored
}
