//! Per-counterpart relationship ledger.

use agora_core::RelationshipView;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

const LEDGER_MIN: i32 = -10;
const LEDGER_MAX: i32 = 10;
const NOTE_CHARS: usize = 80;
const MESSAGE_CHARS: usize = 160;

static POSITIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(gracias|genial|perfecto|me encanta|bien|claro)\b")
        .expect("positive word pattern is valid")
});
static NEGATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(no|mal|nunca|molesta|odio|mentira)\b")
        .expect("negative word pattern is valid")
});

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Change to apply after one exchange. Each delta is within `-2..=2`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationshipDelta {
    pub affinity: i32,
    pub trust: i32,
    pub respect: i32,
    pub note: String,
}

impl RelationshipDelta {
    /// Read `{affinityDelta, trustDelta, respectDelta, note}`. Returns `None`
    /// when none of the deltas is present.
    pub fn from_value(value: &Value) -> Option<Self> {
        let read = |key: &str| {
            value.get(key).and_then(|v| {
                v.as_f64()
                    .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
                    .map(|f| (f.round() as i32).clamp(-2, 2))
            })
        };
        let (a, t, r) = (read("affinityDelta"), read("trustDelta"), read("respectDelta"));
        if a.is_none() && t.is_none() && r.is_none() {
            return None;
        }
        Some(Self {
            affinity: a.unwrap_or(0),
            trust: t.unwrap_or(0),
            respect: r.unwrap_or(0),
            note: value
                .get("note")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
        })
    }

    /// Keyword tone when no text generator is available.
    pub fn heuristic(message: &str) -> Self {
        let score = if POSITIVE.is_match(message) {
            1
        } else if NEGATIVE.is_match(message) {
            -1
        } else {
            0
        };
        let note = match score {
            1 => "buena impresión",
            -1 => "tenso",
            _ => "neutral",
        };
        Self {
            affinity: score,
            trust: score,
            respect: 0,
            note: note.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RelationshipEntry {
    pub affinity: i32,
    pub trust: i32,
    pub respect: i32,
    pub last_note: String,
    pub last_message: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl RelationshipEntry {
    pub fn bond(&self) -> i32 {
        self.affinity + self.trust + self.respect
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationshipLedger {
    entries: HashMap<String, RelationshipEntry>,
}

impl RelationshipLedger {
    pub fn get(&self, other_id: &str) -> Option<&RelationshipEntry> {
        self.entries.get(other_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fold one analysed message into the entry for `other_id`.
    pub fn apply(&mut self, other_id: &str, message: &str, delta: &RelationshipDelta) {
        if other_id.is_empty() {
            return;
        }
        let entry = self.entries.entry(other_id.to_string()).or_default();
        entry.affinity = (entry.affinity + delta.affinity).clamp(LEDGER_MIN, LEDGER_MAX);
        entry.trust = (entry.trust + delta.trust).clamp(LEDGER_MIN, LEDGER_MAX);
        entry.respect = (entry.respect + delta.respect).clamp(LEDGER_MIN, LEDGER_MAX);
        entry.last_note = truncate_chars(&delta.note, NOTE_CHARS);
        entry.last_message = truncate_chars(message, MESSAGE_CHARS);
    }

    /// Highest affinity + trust + respect, never below zero.
    pub fn best_bond(&self) -> i32 {
        self.entries.values().map(RelationshipEntry::bond).max().unwrap_or(0).max(0)
    }
}

/// Share of live relationships with affinity ≥ 2 or trust ≥ 2.
pub fn approval_ratio(relationships: &HashMap<String, RelationshipView>) -> f64 {
    if relationships.is_empty() {
        return 0.0;
    }
    let approvals = relationships
        .values()
        .filter(|r| r.affinity >= 2.0 || r.trust >= 2.0)
        .count();
    approvals as f64 / relationships.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_heuristic_tone() {
        assert_eq!(RelationshipDelta::heuristic("¡Muchas gracias!").affinity, 1);
        assert_eq!(RelationshipDelta::heuristic("No me gusta eso").trust, -1);
        let neutral = RelationshipDelta::heuristic("Bueno, ya veremos");
        assert_eq!(neutral.affinity, 0);
        assert_eq!(neutral.note, "neutral");
    }

    #[test]
    fn test_generated_deltas_are_clamped() {
        let d = RelationshipDelta::from_value(&json!({
            "affinityDelta": 5, "trustDelta": "-3", "note": "muy amable"
        }))
        .unwrap();
        assert_eq!((d.affinity, d.trust, d.respect), (2, -2, 0));
        assert!(RelationshipDelta::from_value(&json!({"note": "x"})).is_none());
    }

    #[test]
    fn test_ledger_clamps_and_truncates() {
        let mut ledger = RelationshipLedger::default();
        let delta = RelationshipDelta {
            affinity: 2,
            trust: 2,
            respect: 2,
            note: "n".repeat(200),
        };
        for _ in 0..8 {
            ledger.apply("a1", &"m".repeat(300), &delta);
        }
        let e = ledger.get("a1").unwrap();
        assert_eq!(e.affinity, 10);
        assert_eq!(e.last_note.chars().count(), 80);
        assert_eq!(e.last_message.chars().count(), 160);
        assert_eq!(ledger.best_bond(), 30);
    }

    #[test]
    fn test_approval_ratio() {
        let mut rels = HashMap::new();
        assert_eq!(approval_ratio(&rels), 0.0);
        rels.insert("a".to_string(), RelationshipView { affinity: 2.0, ..Default::default() });
        rels.insert("b".to_string(), RelationshipView::default());
        rels.insert("c".to_string(), RelationshipView { trust: 3.0, ..Default::default() });
        rels.insert("d".to_string(), RelationshipView::default());
        assert_eq!(approval_ratio(&rels), 0.5);
    }

    #[test]
    fn test_ledger_keeps_unknown_fields() {
        let raw = json!({"a1": {"affinity": 3, "trust": 1, "respect": 0, "met": "plaza"}});
        let ledger: RelationshipLedger = serde_json::from_value(raw).unwrap();
        assert_eq!(ledger.best_bond(), 4);
        assert!(ledger.get("a1").unwrap().extra.contains_key("met"));
    }
}
