use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Personality traits, each in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Traits {
    pub ambition: f64,
    pub sociability: f64,
    pub curiosity: f64,
    pub discipline: f64,
    pub morality: f64,
    pub aggression: f64,
    pub deception: f64,
    pub empathy: f64,
    pub risk: f64,
}

impl Default for Traits {
    fn default() -> Self {
        Self {
            ambition: 0.5,
            sociability: 0.6,
            curiosity: 0.5,
            discipline: 0.5,
            morality: 0.6,
            aggression: 0.3,
            deception: 0.2,
            empathy: 0.6,
            risk: 0.4,
        }
    }
}

/// Partial trait table as found in config files and generated profiles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraitOverrides {
    pub ambition: Option<f64>,
    pub sociability: Option<f64>,
    pub curiosity: Option<f64>,
    pub discipline: Option<f64>,
    pub morality: Option<f64>,
    pub aggression: Option<f64>,
    pub deception: Option<f64>,
    pub empathy: Option<f64>,
    pub risk: Option<f64>,
}

impl TraitOverrides {
    pub fn is_empty(&self) -> bool {
        *self == TraitOverrides::default()
    }
}

impl Traits {
    /// Apply every field present in `overrides`, keeping the rest.
    pub fn merged(self, overrides: &TraitOverrides) -> Self {
        let pick = |v: Option<f64>, fallback: f64| v.map(|x| x.clamp(0.0, 1.0)).unwrap_or(fallback);
        Self {
            ambition: pick(overrides.ambition, self.ambition),
            sociability: pick(overrides.sociability, self.sociability),
            curiosity: pick(overrides.curiosity, self.curiosity),
            discipline: pick(overrides.discipline, self.discipline),
            morality: pick(overrides.morality, self.morality),
            aggression: pick(overrides.aggression, self.aggression),
            deception: pick(overrides.deception, self.deception),
            empathy: pick(overrides.empathy, self.empathy),
            risk: pick(overrides.risk, self.risk),
        }
    }

    /// Stable traits for an agent without configured ones.
    ///
    /// Seeded from the code-point sum of `name`, so the same citizen keeps
    /// the same temperament across restarts.
    pub fn seeded(name: &str) -> Self {
        let seed: u64 = name.chars().map(|c| c as u64).sum();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut draw = |lo: f64, hi: f64| (rng.gen_range(lo..hi) * 100.0).round() / 100.0;
        Self {
            ambition: draw(0.3, 0.9),
            sociability: draw(0.3, 0.9),
            curiosity: draw(0.3, 0.9),
            discipline: draw(0.3, 0.9),
            morality: draw(0.2, 0.9),
            aggression: draw(0.1, 0.9),
            deception: draw(0.1, 0.9),
            empathy: draw(0.2, 0.9),
            risk: draw(0.1, 0.9),
        }
    }

    /// Configured traits win over the seeded fallback.
    pub fn resolve(name: &str, configured: Option<&TraitOverrides>) -> Self {
        match configured {
            Some(overrides) if !overrides.is_empty() => Traits::default().merged(overrides),
            _ => Traits::seeded(name),
        }
    }
}

/// Self-authored citizen profile. Unknown fields are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub traits: Option<TraitOverrides>,
    pub goals: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
