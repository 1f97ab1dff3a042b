//! Short-lived intent: what kind of place the citizen wants to be in.

use agora_core::{Perception, Traits};
use rand::Rng;

const INTENT_BASE_TTL_MS: i64 = 240_000;
const INTENT_JITTER_MS: i64 = 180_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Social,
    Work,
    Leisure,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Social => "social",
            Intent::Work => "work",
            Intent::Leisure => "leisure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayPhase {
    Morning,
    Afternoon,
    Night,
    Other,
}

pub fn day_phase(perception: &Perception) -> DayPhase {
    let Some(time) = &perception.world_time else {
        return DayPhase::Morning;
    };
    if let Some(phase) = time.phase.as_deref().filter(|p| !p.is_empty()) {
        return match phase {
            "morning" => DayPhase::Morning,
            "afternoon" => DayPhase::Afternoon,
            "night" => DayPhase::Night,
            _ => DayPhase::Other,
        };
    }
    match time.day_progress.unwrap_or(0.0) {
        p if p < 0.35 => DayPhase::Morning,
        p if p < 0.7 => DayPhase::Afternoon,
        _ => DayPhase::Night,
    }
}

/// Weighted choice between the three intents; ties go to social, then work.
pub fn select_intent(perception: &Perception, traits: &Traits) -> Intent {
    let needs = perception.needs;
    let phase = day_phase(perception);

    let mut social = 0.4 + (1.0 - needs.social / 100.0) * 0.7 + traits.sociability * 0.3;
    let mut work = 0.3
        + traits.discipline * 0.4
        + if phase == DayPhase::Morning { 0.2 } else { 0.0 };
    let mut leisure = 0.2
        + traits.curiosity * 0.4
        + if phase == DayPhase::Night { 0.2 } else { 0.0 };

    if needs.hunger > 60.0 {
        work *= 0.7;
        leisure *= 0.6;
    }
    if needs.energy < 35.0 {
        social *= 0.7;
        work *= 0.5;
    }

    if social >= work && social >= leisure {
        Intent::Social
    } else if work >= leisure {
        Intent::Work
    } else {
        Intent::Leisure
    }
}

/// Current intent with its expiry.
#[derive(Debug, Clone, Default)]
pub struct IntentState {
    current: Option<Intent>,
    expires_at_ms: i64,
}

impl IntentState {
    pub fn current(&self) -> Option<Intent> {
        self.current
    }

    /// Re-select when unset or expired; otherwise keep the current intent.
    pub fn refresh<R: Rng + ?Sized>(
        &mut self,
        perception: &Perception,
        traits: &Traits,
        now_ms: i64,
        rng: &mut R,
    ) -> Intent {
        match self.current {
            Some(intent) if now_ms < self.expires_at_ms => intent,
            _ => {
                let intent = select_intent(perception, traits);
                self.current = Some(intent);
                self.expires_at_ms = now_ms + INTENT_BASE_TTL_MS + rng.gen_range(0..=INTENT_JITTER_MS);
                tracing::debug!(intent = intent.as_str(), "intent refreshed");
                intent
            }
        }
    }

    pub fn is(&self, intent: Intent) -> bool {
        self.current == Some(intent)
    }
}
