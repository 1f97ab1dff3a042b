//! Motivation chains.
//!
//! A desire is unfolded into an ordered list of steps with prerequisite
//! edges. The current step is the first pending step, in chain order,
//! whose prerequisites are all done.

use agora_core::Traits;
use serde::{Deserialize, Serialize};

// ============================================================================
// Desire
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Desire {
    BePresident,
    StartBusiness,
    FindLove,
    BuyHouse,
}

impl Desire {
    pub fn as_str(&self) -> &'static str {
        match self {
            Desire::BePresident => "be_president",
            Desire::StartBusiness => "start_business",
            Desire::FindLove => "find_love",
            Desire::BuyHouse => "buy_house",
        }
    }

    /// Keyword match over profile goals, then a trait fallback.
    pub fn infer(goals: &[String], traits: &Traits) -> Self {
        let text = goals
            .iter()
            .map(|g| g.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");
        let any = |tokens: &[&str]| tokens.iter().any(|t| text.contains(t));

        if any(&["president", "alcald", "polit"]) {
            Desire::BePresident
        } else if any(&["negocio", "empresa", "emprend", "tienda", "cafe"]) {
            Desire::StartBusiness
        } else if any(&["cita", "amor", "pareja", "romance"]) {
            Desire::FindLove
        } else if any(&["casa", "hogar", "vivienda"]) {
            Desire::BuyHouse
        } else if traits.ambition >= 0.75 {
            Desire::BePresident
        } else if traits.curiosity >= 0.7 {
            Desire::StartBusiness
        } else {
            Desire::BuyHouse
        }
    }

    fn blueprint(&self) -> &'static [(&'static str, &'static str, &'static [&'static str])] {
        match self {
            Desire::BePresident => &[
                ("desire_president", "Quiero liderar la ciudad", &[]),
                ("build_reputation", "Necesito reputación positiva", &["desire_president"]),
                ("help_citizens", "Debo ayudar a ciudadanos concretos", &["build_reputation"]),
                ("register_candidate", "Registrarme como candidato", &["help_citizens"]),
                ("win_votes", "Conseguir votos reales", &["register_candidate"]),
            ],
            Desire::StartBusiness => &[
                ("desire_business", "Quiero abrir un negocio", &[]),
                ("need_capital", "Necesito capital", &["desire_business"]),
                ("get_job", "Necesito un trabajo estable", &["need_capital"]),
                ("get_votes", "Necesito votos para conseguir ese trabajo", &["get_job"]),
                ("open_business", "Proponer y votar un nuevo local", &["need_capital"]),
            ],
            Desire::FindLove => &[
                ("desire_date", "Quiero tener una cita", &[]),
                ("build_relationship", "Necesito ganar confianza con alguien", &["desire_date"]),
                ("need_money", "Necesito dinero para planear la cita", &["build_relationship"]),
                ("get_job", "Necesito un trabajo estable", &["need_money"]),
                ("get_votes", "Necesito votos para el trabajo", &["get_job"]),
                ("plan_date", "Proponer la cita en un lugar concreto", &["need_money"]),
            ],
            Desire::BuyHouse => &[
                ("desire_house", "Quiero un hogar propio", &[]),
                ("need_money", "Necesito dinero", &["desire_house"]),
                ("get_job", "Necesito un trabajo estable", &["need_money"]),
                ("get_votes", "Necesito votos para el trabajo", &["get_job"]),
                ("build_support", "Debo ganarme apoyo ayudando a otros", &["get_votes"]),
                ("buy_house", "Comprar casa", &["need_money"]),
            ],
        }
    }
}

// ============================================================================
// Steps
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub requires: Vec<String>,
    pub status: StepStatus,
}

impl Step {
    pub fn is_done(&self) -> bool {
        self.status == StepStatus::Done
    }
}

/// Steps satisfied by a strong personal bond.
pub const BONDING_STEPS: &[&str] = &[
    "build_support",
    "build_reputation",
    "help_citizens",
    "build_relationship",
];

/// Steps satisfied by broad approval.
pub const VOTE_STEPS: &[&str] = &["get_votes", "win_votes"];

/// Steps on which an economic action makes no sense.
pub const SOCIAL_STEPS: &[&str] = &[
    "build_support",
    "build_reputation",
    "help_citizens",
    "build_relationship",
    "get_votes",
    "win_votes",
];

const BOND_THRESHOLD: f64 = 4.0;
const APPROVAL_THRESHOLD: f64 = 0.25;

/// What the text generator should try to achieve on a given step.
pub fn required_outcome(step_id: &str) -> &'static str {
    match step_id {
        "build_support" => "Ganar apoyo de otro ciudadano y acordar una ayuda concreta",
        "build_reputation" => "Ganar reputación ayudando a alguien de forma visible",
        "help_citizens" => "Ofrecer ayuda real a otro ciudadano y definir la ayuda",
        "build_relationship" => "Profundizar vínculo con alguien y acordar próxima acción",
        "get_votes" => "Solicitar apoyo/voto para un objetivo concreto",
        "win_votes" => "Asegurar apoyo explícito o acuerdo de voto",
        "register_candidate" => "Registrarte como candidato o definir cómo hacerlo",
        "need_money" | "need_capital" => "Conseguir una acción concreta para obtener dinero",
        "get_job" => "Solicitar/asegurar un trabajo concreto",
        "open_business" => "Definir pasos concretos para abrir el negocio",
        "buy_house" => "Avanzar en compra de vivienda (propiedad específica o fondos)",
        "plan_date" => "Proponer una cita en un lugar y momento concretos",
        _ => "",
    }
}

// ============================================================================
// State machine
// ============================================================================

/// World facts that can complete steps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressSignals {
    pub has_job: bool,
    pub balance: f64,
    /// Cheapest known property price; zero when unknown.
    pub target_price: f64,
    /// Best affinity + trust + respect over the relationship ledger.
    pub best_bond: f64,
    /// Share of known relationships with affinity or trust ≥ 2.
    pub approval: f64,
    pub candidate_registered: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotivationState {
    pub desire: Desire,
    pub chain: Vec<Step>,
    pub started_at: i64,
}

impl MotivationState {
    pub fn initialize(desire: Desire, now_ms: i64) -> Self {
        let chain = desire
            .blueprint()
            .iter()
            .map(|(id, label, requires)| Step {
                id: id.to_string(),
                label: label.to_string(),
                requires: requires.iter().map(|r| r.to_string()).collect(),
                status: StepStatus::Pending,
            })
            .collect();
        Self {
            desire,
            chain,
            started_at: now_ms,
        }
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.chain.iter().find(|s| s.id == id)
    }

    /// All prerequisites of `step` exist and are done.
    pub fn is_ready(&self, step: &Step) -> bool {
        step.requires
            .iter()
            .all(|req| self.step(req).map(Step::is_done).unwrap_or(false))
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.chain
            .iter()
            .find(|s| !s.is_done() && self.is_ready(s))
    }

    pub fn is_terminal(&self) -> bool {
        self.chain.iter().all(Step::is_done)
    }

    /// Mark a step done. Returns true only if its status changed.
    pub fn mark_done(&mut self, id: &str) -> bool {
        match self.chain.iter_mut().find(|s| s.id == id) {
            Some(step) if !step.is_done() => {
                step.status = StepStatus::Done;
                true
            }
            _ => false,
        }
    }

    fn mark_if_ready(&mut self, id: &str) -> bool {
        let ready = self.step(id).map(|s| self.is_ready(s)).unwrap_or(false);
        ready && self.mark_done(id)
    }

    /// Apply threshold rules and return the ids completed by this call.
    pub fn update_progress(&mut self, signals: &ProgressSignals) -> Vec<String> {
        let mut completed = Vec::new();
        let mut note = |changed: bool, id: &str| {
            if changed {
                completed.push(id.to_string());
            }
        };

        let roots: Vec<String> = self
            .chain
            .iter()
            .filter(|s| s.id.starts_with("desire_"))
            .map(|s| s.id.clone())
            .collect();
        for id in &roots {
            note(self.mark_done(id), id);
        }

        if signals.has_job {
            note(self.mark_done("get_job"), "get_job");
        }
        if signals.target_price > 0.0 && signals.balance >= signals.target_price {
            note(self.mark_done("need_money"), "need_money");
            note(self.mark_done("need_capital"), "need_capital");
        }

        // Chain order, so a bond can carry through consecutive bonding steps.
        let ids: Vec<String> = self.chain.iter().map(|s| s.id.clone()).collect();
        for id in &ids {
            let id = id.as_str();
            let eligible = (BONDING_STEPS.contains(&id) && signals.best_bond >= BOND_THRESHOLD)
                || (VOTE_STEPS.contains(&id) && signals.approval >= APPROVAL_THRESHOLD)
                || (id == "register_candidate" && signals.candidate_registered);
            if eligible {
                note(self.mark_if_ready(id), id);
            }
        }
        completed
    }
}
