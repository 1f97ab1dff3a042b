//! Candidate generators.
//!
//! Each generator looks at one concern (coordination, motivation, economy,
//! events, work) and proposes at most one action. Generators never touch
//! the network; listings are fetched by the caller and passed in.
//! Candidates that need natural-language text come back as a
//! [`ConverseDraft`] for the caller to realize.

use agora_core::{
    cheapest_for_sale, ActionCandidate, Job, Perception, Position, Proposal, Property, RoleSlot,
    Traits,
};
use agora_memory::{BlockCode, Desire, JobStrategyState, Step};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::hotspots::{mentioned_place, HotspotPicker};
use crate::intent::Intent;

const COORD_CREATE_COOLDOWN_MS: i64 = 120_000;
const COORD_UPDATE_COOLDOWN_MS: i64 = 45_000;
const COORD_CREATE_MIN_NEARBY: usize = 3;
const DEFAULT_ROLE_CAPACITY: u32 = 3;
const PURCHASE_MIN_BALANCE: f64 = 90.0;
const GOAL_TTL_MS: i64 = 15 * 60 * 1000;
const GOALS_KEPT: usize = 10;

// ============================================================================
// Drafts
// ============================================================================

/// A conversation opener whose text still has to be generated.
#[derive(Debug, Clone, PartialEq)]
pub struct ConverseDraft {
    pub target_id: String,
    /// Message purpose, e.g. `help_citizens` or `job_recovery`.
    pub kind: &'static str,
    pub extra: Value,
    /// Job to file a vote negotiation for before asking.
    pub negotiate_job: Option<String>,
    /// Used when no message can be produced.
    pub fallback: ActionCandidate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Draft {
    Ready(ActionCandidate),
    Converse(ConverseDraft),
}

impl From<ActionCandidate> for Draft {
    fn from(action: ActionCandidate) -> Self {
        Draft::Ready(action)
    }
}

fn converse_or_move(
    perception: &Perception,
    kind: &'static str,
    extra: Value,
    negotiate_job: Option<String>,
    picker: &mut HotspotPicker,
) -> Draft {
    let fallback = ActionCandidate::move_to(picker.next(Intent::Social));
    match perception.first_nearby() {
        Some(agent) => {
            let mut extra = extra;
            extra["target"] = json!(agent.id);
            Draft::Converse(ConverseDraft {
                target_id: agent.id.clone(),
                kind,
                extra,
                negotiate_job,
                fallback,
            })
        }
        None => Draft::Ready(fallback),
    }
}

// ============================================================================
// Coordination
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordSnapshot {
    pub active_count: usize,
    pub my_open_commitments: usize,
}

/// Per-agent pacing for coordination moves.
#[derive(Debug, Clone, Default)]
pub struct CoordCooldowns {
    pub last_create_at: Option<i64>,
    pub last_update_at: HashMap<String, i64>,
}

fn proposal_score(proposal: &Proposal, agent_id: &str) -> i64 {
    let open = proposal.commitments.iter().filter(|c| c.is_open()).count() as i64;
    let done = proposal.commitments.iter().filter(|c| c.is_done()).count() as i64;
    let joined = if proposal.has_member(agent_id) { 1000 } else { 0 };
    joined + (10 - open).max(0) + done
}

pub fn coordination_candidate(
    proposals: &[Proposal],
    agent_id: &str,
    agent_name: &str,
    nearby_count: usize,
    cooldowns: &mut CoordCooldowns,
    now_ms: i64,
) -> (CoordSnapshot, Option<ActionCandidate>) {
    let mut active: Vec<&Proposal> = proposals.iter().filter(|p| p.is_active()).collect();
    let snapshot = CoordSnapshot {
        active_count: active.len(),
        my_open_commitments: active
            .iter()
            .flat_map(|p| p.commitments.iter())
            .filter(|c| c.agent_id == agent_id && c.is_open())
            .count(),
    };

    if active.is_empty() {
        let cooled = cooldowns
            .last_create_at
            .map(|at| now_ms - at >= COORD_CREATE_COOLDOWN_MS)
            .unwrap_or(true);
        if nearby_count >= COORD_CREATE_MIN_NEARBY && cooled {
            cooldowns.last_create_at = Some(now_ms);
            return (
                snapshot,
                Some(ActionCandidate::CoordCreateProposal {
                    title: format!("Asamblea vecinal liderada por {}", agent_name),
                    description: "Coordinar tareas comunitarias y repartir responsabilidades".to_string(),
                    category: "community".to_string(),
                    required_roles: vec![
                        RoleSlot {
                            role: "organizer".into(),
                            min: 1,
                        },
                        RoleSlot {
                            role: "support".into(),
                            min: 2,
                        },
                    ],
                }),
            );
        }
        return (snapshot, None);
    }

    // Most recently updated first, so equal scores favour fresh proposals.
    active.sort_by_key(|p| std::cmp::Reverse(p.updated_at.unwrap_or(0)));
    let Some(target) = active
        .iter()
        .copied()
        .reduce(|best, p| if proposal_score(p, agent_id) > proposal_score(best, agent_id) { p } else { best })
    else {
        return (snapshot, None);
    };
    if target.id.is_empty() {
        return (snapshot, None);
    }

    let capacity = match target.required_roles.iter().map(|r| r.min).sum::<u32>() {
        0 => DEFAULT_ROLE_CAPACITY,
        n => n,
    };
    let joined = target.has_member(agent_id);
    if !joined && (target.members.len() as u32) < capacity {
        return (
            snapshot,
            Some(ActionCandidate::CoordJoin {
                proposal_id: target.id.clone(),
                role: "participant".into(),
            }),
        );
    }

    let own_open = target
        .commitments
        .iter()
        .find(|c| c.agent_id == agent_id && c.is_open());
    let own_done = target
        .commitments
        .iter()
        .any(|c| c.agent_id == agent_id && c.is_done());

    if own_open.is_none() && !own_done {
        let open_total = target.commitments.iter().filter(|c| c.is_open()).count() as u32;
        if open_total < capacity.max(2) {
            let category = target.category.as_deref().filter(|c| !c.is_empty()).unwrap_or("community");
            return (
                snapshot,
                Some(ActionCandidate::CoordCommit {
                    proposal_id: target.id.clone(),
                    task: format!("support_{}", category),
                    role: "participant".into(),
                }),
            );
        }
        return (snapshot, None);
    }

    if let Some(own) = own_open {
        if own.id.is_empty() {
            return (snapshot, None);
        }
        if let Some(at) = cooldowns.last_update_at.get(&own.id) {
            if now_ms - at < COORD_UPDATE_COOLDOWN_MS {
                return (snapshot, None);
            }
        }
        let progress = own.progress.unwrap_or(100.0);
        if progress < 100.0 || own.progress.is_none() {
            let next = if own.progress.is_none() || progress >= 70.0 {
                100
            } else {
                (progress as u8).saturating_add(30).min(100)
            };
            cooldowns.last_update_at.insert(own.id.clone(), now_ms);
            return (
                snapshot,
                Some(ActionCandidate::CoordUpdateCommit {
                    proposal_id: target.id.clone(),
                    commitment_id: own.id.clone(),
                    status: if next >= 100 { "done" } else { "in_progress" }.to_string(),
                    progress: next,
                    notes: "avance_autonomo".into(),
                }),
            );
        }
    }

    if !target.commitments.is_empty() && target.commitments.iter().all(|c| c.is_done()) {
        return (
            snapshot,
            Some(ActionCandidate::CoordSetStatus {
                proposal_id: target.id.clone(),
                status: "done".into(),
                summary: "objetivo comunitario completado".into(),
            }),
        );
    }
    (snapshot, None)
}

// ============================================================================
// Economy and events
// ============================================================================

/// Open job we applied to, derived from the listings.
pub fn own_application<'a>(jobs: &'a [Job], agent_id: &str) -> Option<&'a Job> {
    jobs.iter().find(|j| {
        j.is_open()
            && j.applicant() == Some(agent_id)
            && j.application
                .as_ref()
                .and_then(|a| a.status.as_deref())
                .map(|s| s == "pending")
                .unwrap_or(true)
    })
}

/// Others' pending applications, fewest votes first.
fn vote_target(jobs: &[Job], agent_id: &str) -> Option<ActionCandidate> {
    jobs.iter()
        .filter(|j| j.is_open())
        .filter_map(|j| {
            let applicant = j.applicant()?;
            (applicant != agent_id).then_some((j, applicant))
        })
        .min_by_key(|(j, _)| j.application.as_ref().map(|a| a.votes).unwrap_or(0))
        .and_then(|(j, applicant)| ActionCandidate::vote_job(applicant, &j.id).ok())
}

/// First open job nobody has applied to.
pub fn first_vacancy(jobs: &[Job]) -> Option<&Job> {
    jobs.iter()
        .find(|j| j.is_open() && j.application.is_none() && !j.id.is_empty())
}

pub fn economy_candidate(
    perception: &Perception,
    jobs: &[Job],
    properties: Option<&[Property]>,
    agent_id: &str,
) -> Option<ActionCandidate> {
    if let Some(vote) = vote_target(jobs, agent_id) {
        return Some(vote);
    }
    let economy = &perception.context.economy;
    if !economy.has_job() {
        if let Some(job) = first_vacancy(jobs) {
            return ActionCandidate::apply_job(&job.id).ok();
        }
    }
    if wants_property(perception) {
        let balance = economy.balance;
        let affordable: Vec<Property> = properties
            .unwrap_or_default()
            .iter()
            .filter(|p| p.price <= balance)
            .cloned()
            .collect();
        if let Some(p) = cheapest_for_sale(&affordable) {
            return ActionCandidate::buy_property(&p.id).ok();
        }
    }
    None
}

/// Employed, without property and solvent enough to look at the market.
pub fn wants_property(perception: &Perception) -> bool {
    let economy = &perception.context.economy;
    economy.has_job() && !economy.has_property() && economy.balance >= PURCHASE_MIN_BALANCE
}

pub fn event_candidate(perception: &Perception) -> Option<ActionCandidate> {
    perception
        .active_events()
        .find_map(|e| ActionCandidate::join_event(&e.id).ok())
}

// ============================================================================
// Motivation
// ============================================================================

pub fn motivation_draft(
    step: Option<&Step>,
    perception: &Perception,
    jobs: &[Job],
    properties: Option<&[Property]>,
    agent_id: &str,
    candidacy: Option<ActionCandidate>,
    picker: &mut HotspotPicker,
) -> Option<Draft> {
    let step = step?;
    let economy = &perception.context.economy;
    let draft = match step.id.as_str() {
        "build_support" | "build_reputation" | "help_citizens" | "build_relationship" => {
            converse_or_move(perception, "help_citizens", json!({}), None, picker)
        }
        "get_job" | "get_votes" | "need_money" | "need_capital" => {
            match own_application(jobs, agent_id) {
                Some(job) => converse_or_move(
                    perception,
                    "job_support",
                    json!({ "jobId": job.id }),
                    Some(job.id.clone()),
                    picker,
                ),
                None if !economy.has_job() => match first_vacancy(jobs) {
                    Some(job) => ActionCandidate::apply_job(&job.id).ok()?.into(),
                    None => ActionCandidate::move_to(picker.next(Intent::Work)).into(),
                },
                None => ActionCandidate::move_to(picker.next(Intent::Work)).into(),
            }
        }
        "buy_house" => {
            let affordable = properties
                .and_then(cheapest_for_sale)
                .filter(|p| economy.balance >= p.price);
            match affordable {
                Some(p) => ActionCandidate::buy_property(&p.id).ok()?.into(),
                None => ActionCandidate::move_to(picker.next(Intent::Work)).into(),
            }
        }
        "open_business" => ActionCandidate::move_to(picker.next(Intent::Work)).into(),
        "register_candidate" => candidacy.unwrap_or_else(ActionCandidate::wait).into(),
        "win_votes" => converse_or_move(perception, "campaign", json!({}), None, picker),
        "plan_date" => converse_or_move(perception, "plan_date", json!({}), None, picker),
        _ => return None,
    };
    Some(draft)
}

/// Candidacy registration, when ambitious and liked enough.
pub fn candidacy(
    traits: &Traits,
    approval: f64,
    already_registered: bool,
    desire: Desire,
    personality: &str,
) -> Option<ActionCandidate> {
    if already_registered || traits.ambition < 0.7 || approval < 0.2 {
        return None;
    }
    let personality = if personality.trim().is_empty() {
        "comunidad local"
    } else {
        personality.trim()
    };
    Some(ActionCandidate::RegisterCandidate {
        platform: format!(
            "Programa orientado a {} con enfoque {}.",
            desire.as_str(),
            personality
        ),
    })
}

// ============================================================================
// Work
// ============================================================================

pub fn recovery_draft(perception: &Perception, code: Option<BlockCode>, picker: &mut HotspotPicker) -> Draft {
    let reason = code.map(|c| c.as_str());
    let target = perception.first_nearby().map(|a| a.id.clone());
    converse_or_move(
        perception,
        "job_recovery",
        json!({ "reasonCode": reason, "targetId": target }),
        None,
        picker,
    )
}

/// Next step on the labor market, or `None` when employed or nothing fits.
///
/// Employment clears any block; a block pivots to recovery; a pending own
/// application votes for others or recovers; otherwise apply to a vacancy.
pub fn work_draft(
    perception: &Perception,
    jobs: &[Job],
    agent_id: &str,
    strategy: &mut JobStrategyState,
    picker: &mut HotspotPicker,
    now_ms: i64,
) -> Option<Draft> {
    if perception.context.economy.has_job() {
        strategy.clear();
        return None;
    }
    if strategy.is_blocked(now_ms) {
        return Some(recovery_draft(perception, strategy.code, picker));
    }
    if let Some(mine) = own_application(jobs, agent_id) {
        strategy.target_job_id = Some(mine.id.clone());
        return Some(match vote_target(jobs, agent_id) {
            Some(vote) => vote.into(),
            None => recovery_draft(perception, strategy.code, picker),
        });
    }
    let job = first_vacancy(jobs)?;
    strategy.target_job_id = Some(job.id.clone());
    ActionCandidate::apply_job(&job.id).ok().map(Draft::Ready)
}

// ============================================================================
// World goals and heuristic pieces
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GoalLocation {
    pub x: Option<i64>,
    pub y: Option<i64>,
    pub building_id: Option<String>,
}

/// A goal pushed by the world through `agent:goal`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorldGoal {
    pub id: Option<String>,
    pub urgency: f64,
    pub location: GoalLocation,
    pub ttl_ms: Option<i64>,
    pub received_at: i64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Drop expired goals and keep the newest ten.
pub fn prune_goals(goals: &mut Vec<WorldGoal>, now_ms: i64) {
    goals.retain(|g| now_ms - g.received_at <= g.ttl_ms.unwrap_or(GOAL_TTL_MS));
    let excess = goals.len().saturating_sub(GOALS_KEPT);
    goals.drain(..excess);
}

pub fn most_urgent(goals: &[WorldGoal]) -> Option<&WorldGoal> {
    goals
        .iter()
        .rev()
        .max_by(|a, b| a.urgency.total_cmp(&b.urgency))
}

#[derive(Debug, Clone, PartialEq)]
pub enum GoalMove {
    /// Standing in the goal's building.
    Arrived { building_id: String },
    MoveTo(Position),
}

pub fn goal_move(goal: &WorldGoal, perception: &Perception) -> Option<GoalMove> {
    if let Some(building_id) = goal.location.building_id.as_deref() {
        let inside = perception
            .current_building
            .as_ref()
            .map(|b| b.id == building_id)
            .unwrap_or(false);
        if inside {
            return Some(GoalMove::Arrived {
                building_id: building_id.to_string(),
            });
        }
    }
    Some(GoalMove::MoveTo(Position {
        x: goal.location.x?,
        y: goal.location.y?,
    }))
}

#[derive(Debug, Clone, PartialEq)]
pub enum SuggestedMove {
    Arrived { reason: Option<String>, building_id: String },
    MoveTo(Position),
}

/// First suggested goal with a matching nearby building.
pub fn suggested_move(perception: &Perception) -> Option<SuggestedMove> {
    perception.suggested_goals.iter().find_map(|goal| {
        let building = perception.nearby_buildings.iter().find(|b| {
            b.kind
                .as_deref()
                .map(|k| goal.target_types.iter().any(|t| t == k))
                .unwrap_or(false)
        })?;
        let inside = perception
            .current_building
            .as_ref()
            .map(|c| c.id == building.id)
            .unwrap_or(false);
        Some(if inside {
            SuggestedMove::Arrived {
                reason: goal.reason.clone(),
                building_id: building.id.clone(),
            }
        } else {
            SuggestedMove::MoveTo(building.entrance())
        })
    })
}

/// Random step of at most `reach` tiles per axis, never zero.
pub fn wander<R: Rng + ?Sized>(from: Position, reach: i64, rng: &mut R) -> Position {
    let mut dx = rng.gen_range(-reach..=reach);
    let dy = rng.gen_range(-reach..=reach);
    if dx == 0 && dy == 0 {
        dx = 1;
    }
    Position {
        x: from.x + dx,
        y: from.y + dy,
    }
}

const MEETING_WORDS: &[&str] = &["ir", "vamos", "ven", "quedemos", "encuentro", "cita", "reun"];

/// Move towards a place an incoming message proposes meeting at.
pub fn infer_followup(message: &str) -> Option<ActionCandidate> {
    let text = message.trim().to_lowercase();
    if text.is_empty() || !MEETING_WORDS.iter().any(|w| text.contains(w)) {
        return None;
    }
    mentioned_place(&text).map(ActionCandidate::move_to)
}
