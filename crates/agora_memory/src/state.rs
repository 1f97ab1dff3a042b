//! Shapes persisted between runs, one per store section.

use agora_core::{ActionCandidate, Perception};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::motivation::MotivationState;

/// How close a move must land to count as arrived.
const ARRIVAL_TOLERANCE: i64 = 2;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlanState {
    pub primary_goal: String,
    pub secondary_goals: Vec<String>,
    pub last_plan_at: Option<i64>,
    pub last_action: Option<ActionCandidate>,
    pub last_action_at: Option<i64>,
}

impl PlanState {
    /// Fresh plan headed by the desire and its first two step labels.
    pub fn from_motivation(motivation: &MotivationState, now_ms: i64) -> Self {
        let secondary: Vec<String> = if motivation.chain.is_empty() {
            vec![
                "Generar conexiones".to_string(),
                "Aprender sobre la ciudad".to_string(),
            ]
        } else {
            motivation
                .chain
                .iter()
                .take(2)
                .map(|s| s.label.chars().take(120).collect())
                .collect()
        };
        Self {
            primary_goal: motivation.desire.as_str().replace('_', " "),
            secondary_goals: secondary,
            last_plan_at: Some(now_ms),
            last_action: None,
            last_action_at: None,
        }
    }

    pub fn is_expired(&self, now_ms: i64, ttl_ms: i64) -> bool {
        match self.last_plan_at {
            Some(at) => now_ms - at > ttl_ms,
            None => true,
        }
    }

    pub fn record_action(&mut self, action: &ActionCandidate, now_ms: i64) {
        self.last_action = Some(action.clone());
        self.last_action_at = Some(now_ms);
    }

    /// Whether the world reflects the last executed action.
    pub fn last_action_landed(&self, perception: &Perception) -> bool {
        match &self.last_action {
            Some(ActionCandidate::MoveTo { x, y }) => match perception.position {
                Some(pos) => {
                    (pos.x - x).abs() <= ARRIVAL_TOLERANCE && (pos.y - y).abs() <= ARRIVAL_TOLERANCE
                }
                None => true,
            },
            Some(ActionCandidate::EnterBuilding { building_id }) => perception
                .current_building
                .as_ref()
                .map(|b| &b.id == building_id)
                .unwrap_or(false),
            Some(ActionCandidate::StartConversation { target_id, .. }) => perception
                .conversations
                .iter()
                .any(|c| c.involves(target_id)),
            _ => true,
        }
    }

    /// Replan once the last action is older than `action_timeout_ms` and
    /// did not land.
    pub fn should_replan(&self, perception: &Perception, now_ms: i64, action_timeout_ms: i64) -> bool {
        match self.last_action_at {
            Some(at) if now_ms - at >= action_timeout_ms => !self.last_action_landed(perception),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GoalState {
    pub primary: String,
    pub status: String,
    /// Cheapest for-sale property seen; fetched once.
    pub target_price: Option<f64>,
    pub updated_at: i64,
}

impl GoalState {
    pub fn new(primary: &str, now_ms: i64) -> Self {
        Self {
            primary: primary.to_string(),
            status: "active".to_string(),
            target_price: None,
            updated_at: now_ms,
        }
    }

    pub fn needs_price(&self) -> bool {
        self.target_price.map(|p| p <= 0.0).unwrap_or(true)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HealthEntry {
    pub ok: u64,
    pub error: u64,
    pub last_at: Option<i64>,
}

/// Per-key ok/error counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HealthMetrics(pub HashMap<String, HealthEntry>);

impl HealthMetrics {
    pub fn record(&mut self, key: &str, ok: bool, now_ms: i64) {
        let entry = self.0.entry(key.to_string()).or_default();
        if ok {
            entry.ok += 1;
        } else {
            entry.error += 1;
        }
        entry.last_at = Some(now_ms);
    }

    pub fn get(&self, key: &str) -> Option<&HealthEntry> {
        self.0.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motivation::Desire;
    use agora_core::{Building, Position};

    #[test]
    fn test_plan_from_motivation() {
        let m = MotivationState::initialize(Desire::StartBusiness, 0);
        let plan = PlanState::from_motivation(&m, 5);
        assert_eq!(plan.primary_goal, "start business");
        assert_eq!(plan.secondary_goals.len(), 2);
        assert!(!plan.is_expired(5 + 180_000, 180_000));
        assert!(plan.is_expired(5 + 180_001, 180_000));
        assert!(PlanState::default().is_expired(0, 180_000));
    }

    #[test]
    fn test_replan_only_after_timeout_and_miss() {
        let mut plan = PlanState::default();
        plan.record_action(&ActionCandidate::MoveTo { x: 10, y: 10 }, 0);
        let mut p = Perception {
            position: Some(Position { x: 0, y: 0 }),
            ..Default::default()
        };
        assert!(!plan.should_replan(&p, 44_999, 45_000));
        assert!(plan.should_replan(&p, 45_000, 45_000));
        p.position = Some(Position { x: 9, y: 12 });
        assert!(!plan.should_replan(&p, 45_000, 45_000));
    }

    #[test]
    fn test_enter_building_landing() {
        let mut plan = PlanState::default();
        plan.record_action(&ActionCandidate::enter_building("cafe").unwrap(), 0);
        let p = Perception {
            current_building: Some(Building {
                id: "cafe".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(plan.last_action_landed(&p));
        assert!(!plan.last_action_landed(&Perception::default()));
    }

    #[test]
    fn test_health_counters() {
        let mut h = HealthMetrics::default();
        h.record("http", true, 1);
        h.record("http", false, 2);
        let e = h.get("http").unwrap();
        assert_eq!((e.ok, e.error, e.last_at), (1, 1, Some(2)));
    }
}
