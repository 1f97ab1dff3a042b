//! The decision core of one citizen.
//!
//! `Citizen` owns the shared [`AgentContext`] and the three guarded
//! sections. The context lock is only held for short synchronous stretches;
//! world and text-generation calls happen outside it.

use agora_core::store::section;
use agora_core::{
    is_meta_content, ActionCandidate, AgentConfig, AgentError, Clock, CommitmentUpdate,
    DecisionMode, Episode, Job, Perception, Position, Profile, Property, ProposalQuery, Reply,
    StateStore, World,
};
use agora_memory::{
    approval_ratio, required_outcome, Feedback, JobAction, PlanState, ProgressSignals,
    RelationshipDelta,
};
use anyhow::{anyhow, Context as _};
use rand::rngs::StdRng;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::candidates::{
    self, candidacy, coordination_candidate, economy_candidate, event_candidate, first_vacancy,
    goal_move, infer_followup, most_urgent, motivation_draft, own_application, prune_goals,
    recovery_draft, suggested_move, wander, wants_property, work_draft, Draft, GoalMove,
    SuggestedMove,
};
use crate::context::AgentContext;
use crate::conversation::stale_conversation_ids;
use crate::extraction::{extract_message, extract_object};
use crate::guard::TimedMutex;
use crate::intent::Intent;
use crate::llm::{CompletionParams, LlmClient};
use crate::prompts;
use crate::sanitize::{check_step, parse_conversation_reply, parse_generated, ParseContext};
use crate::scoring::{rank, ScoringInputs};

const PLAN_TTL_MS: i64 = 180_000;
const PLAN_ACTION_TIMEOUT_MS: i64 = 45_000;
const PROFILE_PUSH_INTERVAL_MS: i64 = 5_000;
const TRANSITION_MESSAGES: usize = 4;
const TRANSITION_QUIET_MS: i64 = 90_000;
const LOCK_TIMEOUT_PRIORITY: f64 = 1.8;
const RECOVERY_PRIORITY: f64 = 1.6;
const BUFFER_MIN_PRIORITY: f64 = 0.1;
const BUFFERED_ALTERNATIVES: usize = 2;
const EPISODES_IN_CONTEXT: usize = 10;
const HOTSPOT_ARRIVAL: i64 = 2;
const PROPOSAL_LIMIT: u32 = 20;

/// Whether the citizen is mid-conversation, has work to do, or neither.
#[derive(Debug)]
enum Engagement {
    Talk,
    Act(ActionCandidate),
    Defer,
}

/// Priority for an action requeued after a failed call.
fn requeue_priority(action: &ActionCandidate) -> f64 {
    match action {
        ActionCandidate::ApplyJob { .. }
        | ActionCandidate::BuyProperty { .. }
        | ActionCandidate::VoteJob { .. }
        | ActionCandidate::CoordCommit { .. }
        | ActionCandidate::CoordUpdateCommit { .. } => 2.4,
        _ => 1.2,
    }
}

fn spoken_text(action: &ActionCandidate) -> Option<&str> {
    match action {
        ActionCandidate::Speak { message }
        | ActionCandidate::StartConversation { message, .. }
        | ActionCandidate::ConversationMessage { message, .. } => Some(message),
        _ => None,
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub struct Citizen {
    world: Arc<dyn World>,
    llm: Option<Arc<dyn LlmClient>>,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    config: AgentConfig,
    params: CompletionParams,
    ctx: Mutex<AgentContext>,
    last_seen: Mutex<Perception>,
    decision_guard: TimedMutex<()>,
    action_guard: TimedMutex<()>,
    conversation_guard: TimedMutex<()>,
    profile_pushed_at: AtomicI64,
    price_checked: AtomicBool,
}

impl Citizen {
    pub fn new(
        world: Arc<dyn World>,
        llm: Option<Arc<dyn LlmClient>>,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        config: AgentConfig,
        rng: StdRng,
    ) -> Self {
        let now = clock.now_ms();
        let guards = &config.guards;
        Self {
            ctx: Mutex::new(AgentContext::new(&config, rng, now)),
            last_seen: Mutex::new(Perception::default()),
            decision_guard: TimedMutex::new("decision", Duration::from_secs(guards.decision_secs), ()),
            action_guard: TimedMutex::new("action", Duration::from_secs(guards.action_secs), ()),
            conversation_guard: TimedMutex::new(
                "conversation",
                Duration::from_secs(guards.conversation_secs),
                (),
            ),
            params: CompletionParams::from_config(&config.llm),
            world,
            llm,
            store,
            clock,
            config,
            profile_pushed_at: AtomicI64::new(i64::MIN / 2),
            price_checked: AtomicBool::new(false),
        }
    }

    fn now(&self) -> i64 {
        self.clock.now_ms()
    }

    fn llm_mode(&self) -> bool {
        self.config.behavior.decision_loop.mode == DecisionMode::Llm && self.llm.is_some()
    }

    /// Direct access to the shared context.
    pub fn context(&self) -> &Mutex<AgentContext> {
        &self.ctx
    }

    pub async fn agent_id(&self) -> String {
        self.ctx.lock().await.agent_id.clone().unwrap_or_default()
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Restore every stored section into the context.
    pub async fn load(&self) -> anyhow::Result<()> {
        let names = [
            section::AGENT_ID,
            section::PROFILE,
            section::MOTIVATION,
            section::PLAN,
            section::GOAL,
            section::JOB_STRATEGY,
            section::PENDING_ACTIONS,
            section::RELATIONSHIPS,
            section::HEALTH,
        ];
        let mut loaded = Vec::new();
        for name in names {
            if let Some(body) = self
                .store
                .load_section(name)
                .await
                .with_context(|| format!("loading section {name}"))?
            {
                loaded.push((name, body));
            }
        }
        let now = self.now();
        let mut ctx = self.ctx.lock().await;
        for (name, body) in loaded {
            ctx.restore_section(name, body, now);
        }
        let depth = ctx.queue.depth(now);
        tracing::info!(
            agent_id = ctx.agent_id.as_deref().unwrap_or(""),
            desire = ctx.motivation.desire.as_str(),
            queue = depth,
            "citizen state loaded"
        );
        Ok(())
    }

    pub async fn persist(&self) {
        let sections = {
            let now = self.now();
            self.ctx.lock().await.sections(now)
        };
        for (name, body) in sections {
            if let Err(e) = self.store.save_section(name, &body).await {
                tracing::warn!(section = name, error = %e, "failed to persist section");
            }
        }
    }

    async fn record_episode(&self, kind: &str, data: Value) {
        if let Err(e) = self.store.record_episode(&Episode::new(kind, data)).await {
            tracing::warn!(kind, error = %e, "failed to record episode");
        }
    }

    // ========================================================================
    // Text generation
    // ========================================================================

    async fn generate(&self, stage: &'static str, system: &str, payload: &Value) -> Option<String> {
        let llm = self.llm.as_ref()?;
        match llm.complete(system, &payload.to_string(), self.params.clone()).await {
            Ok(text) => Some(text),
            Err(e) => {
                let err = AgentError::Decision {
                    stage,
                    message: e.to_string(),
                };
                tracing::warn!(stage, error = %err, "text generation failed");
                None
            }
        }
    }

    async fn generate_message(&self, stage: &'static str, system: &str, payload: &Value) -> Option<String> {
        let raw = self.generate(stage, system, payload).await?;
        let message = extract_message(&raw);
        if message.is_none() {
            tracing::debug!(stage, "generated text had no usable message");
        }
        message
    }

    /// Ask for a self-authored profile on first run.
    pub async fn ensure_profile(&self) {
        let (missing, name, personality) = {
            let ctx = self.ctx.lock().await;
            (ctx.profile.is_none(), ctx.name.clone(), ctx.personality.clone())
        };
        if !missing || self.llm.is_none() {
            return;
        }
        let payload = json!({ "name": name, "personality_hint": personality });
        let Some(raw) = self.generate("profile", prompts::PROFILE, &payload).await else {
            return;
        };
        let Some(object) = extract_object(&raw) else {
            tracing::warn!("generated profile was not JSON");
            return;
        };
        let profile: Profile = match serde_json::from_value(Value::Object(object)) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "generated profile unreadable");
                return;
            }
        };
        let body = serde_json::to_value(&profile).unwrap_or(Value::Null);
        {
            let now = self.now();
            self.ctx.lock().await.adopt_profile(profile, now);
        }
        if let Err(e) = self.store.save_section(section::PROFILE, &body).await {
            tracing::warn!(error = %e, "failed to persist profile");
        }
        tracing::info!("profile generated");
    }

    async fn publish_profile(&self) {
        let now = self.now();
        let last = self.profile_pushed_at.load(Ordering::SeqCst);
        if now - last < PROFILE_PUSH_INTERVAL_MS {
            return;
        }
        self.profile_pushed_at.store(now, Ordering::SeqCst);
        let profile = self.ctx.lock().await.public_profile();
        self.world.publish_profile(&profile).await;
    }

    // ========================================================================
    // Cycle
    // ========================================================================

    async fn observe(&self) -> anyhow::Result<Perception> {
        let now = self.now();
        match self.world.perceive().await {
            Ok(p) => {
                self.ctx.lock().await.health.record("perceive", true, now);
                *self.last_seen.lock().await = p.clone();
                Ok(p)
            }
            Err(e) => {
                self.ctx.lock().await.health.record("perceive", false, now);
                Err(e.context("perceive failed"))
            }
        }
    }

    /// One decision cycle: perceive, reconcile, decide, execute.
    pub async fn tick(&self) -> anyhow::Result<Option<ActionCandidate>> {
        let perception = self.observe().await?;

        self.purge_stale(&perception).await;
        self.ensure_plan(&perception).await;
        self.update_progress(&perception).await;
        self.publish_profile().await;

        let decided = {
            let _decision = match self.decision_guard.acquire().await {
                Ok(guard) => guard,
                Err(e) => {
                    tracing::info!(stage = "decision_skip", reason = %e, "decision skipped");
                    return Ok(None);
                }
            };
            let action = self.decide(&perception).await;
            match &action {
                Some(action) => {
                    let (intent, depth) = {
                        let now = self.now();
                        let mut ctx = self.ctx.lock().await;
                        (ctx.intent.current().map(|i| i.as_str()), ctx.queue.depth(now))
                    };
                    tracing::info!(
                        stage = "decision",
                        action = action.kind(),
                        intent = intent.unwrap_or(""),
                        queue_depth = depth,
                        "decided"
                    );
                    self.execute(action.clone()).await;
                }
                None => tracing::info!(stage = "decision_none", "nothing to do"),
            }
            action
        };
        self.persist().await;
        Ok(decided)
    }

    /// Random nearby step, used when the decision loop is off.
    pub async fn explore_step(&self) -> anyhow::Result<Option<Reply>> {
        let perception = self.world.perceive().await?;
        let Some(position) = perception.position else {
            return Ok(None);
        };
        let target = {
            let mut ctx = self.ctx.lock().await;
            wander(position, 3, ctx.hotspots.rng())
        };
        Ok(Some(self.world.move_to(target).await))
    }

    async fn purge_stale(&self, perception: &Perception) {
        let now = self.now();
        let stale_ms = (self.config.behavior.conversation_stale_secs * 1000) as i64;
        let stale = stale_conversation_ids(perception, now, stale_ms);
        for id in &stale {
            let reply = self.world.end_conversation(id).await;
            tracing::info!(
                stage = "conversation_stale_end",
                conversation_id = %id,
                ok = !reply.is_failure(),
                "ended quiet conversation"
            );
        }
        let live: HashSet<&str> = perception
            .conversations
            .iter()
            .filter(|c| c.active && !stale.contains(&c.id))
            .map(|c| c.id.as_str())
            .collect();
        self.ctx.lock().await.conversations.retain_active(&live);
    }

    async fn ensure_plan(&self, perception: &Perception) {
        let now = self.now();
        let mut ctx = self.ctx.lock().await;
        if ctx.plan.is_expired(now, PLAN_TTL_MS)
            || ctx.plan.should_replan(perception, now, PLAN_ACTION_TIMEOUT_MS)
        {
            ctx.plan = PlanState::from_motivation(&ctx.motivation, now);
            tracing::debug!(stage = "plan_refreshed", primary = %ctx.plan.primary_goal, "plan refreshed");
        }
    }

    async fn update_progress(&self, perception: &Perception) {
        let needs_price = self.ctx.lock().await.goal.needs_price();
        if needs_price && !self.price_checked.swap(true, Ordering::SeqCst) {
            match self.world.list_properties().await {
                Ok(properties) => {
                    if let Some(p) = agora_core::cheapest_for_sale(&properties) {
                        self.ctx.lock().await.goal.target_price = Some(p.price);
                    }
                }
                Err(e) => tracing::debug!(error = %e, "property listing unavailable"),
            }
        }

        let now = self.now();
        let mut ctx = self.ctx.lock().await;
        let economy = &perception.context.economy;
        let signals = ProgressSignals {
            has_job: economy.has_job(),
            balance: economy.balance,
            target_price: ctx.goal.target_price.unwrap_or(0.0),
            best_bond: ctx.relationships.best_bond() as f64,
            approval: approval_ratio(&perception.context.relationships),
            candidate_registered: ctx.candidate_registered,
        };
        ctx.goal.updated_at = now;
        for step in ctx.motivation.update_progress(&signals) {
            tracing::info!(stage = "step_completed", step = %step, "motivation advanced");
        }
    }

    async fn jobs(&self) -> Vec<Job> {
        match self.world.list_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::debug!(error = %e, "job listing unavailable");
                Vec::new()
            }
        }
    }

    async fn properties(&self) -> Option<Vec<Property>> {
        match self.world.list_properties().await {
            Ok(p) => Some(p),
            Err(e) => {
                tracing::debug!(error = %e, "property listing unavailable");
                None
            }
        }
    }

    // ========================================================================
    // Decision pipeline
    // ========================================================================

    /// Pick the next action. Never fails; each stage falls through.
    pub async fn decide(&self, perception: &Perception) -> Option<ActionCandidate> {
        let now = self.now();
        {
            let mut ctx = self.ctx.lock().await;
            if let Some(item) = ctx.queue.dequeue(now) {
                tracing::info!(stage = "queue_dequeue", source = %item.source, action = item.action.kind(), "queued action");
                return Some(item.action);
            }
            if let Some(followup) = ctx.take_followup(now) {
                tracing::info!(stage = "followup", action = followup.kind(), "pending follow-up");
                return Some(followup);
            }
        }

        let jobs = self.jobs().await;

        if let Some(action) = self.transition(perception, &jobs).await {
            return Some(action);
        }

        let talking = match self.pre_interaction(perception, &jobs).await {
            Engagement::Act(action) => {
                tracing::info!(stage = "pre_interaction_act", action = action.kind(), "acting on work");
                return Some(action);
            }
            Engagement::Talk => true,
            Engagement::Defer => false,
        };

        let (agent_id, work) = {
            let ctx = self.ctx.lock().await;
            (ctx.agent_id.clone().unwrap_or_default(), ctx.intent.is(Intent::Work))
        };

        if work && !talking {
            let properties = if wants_property(perception) {
                self.properties().await
            } else {
                None
            };
            if let Some(action) = economy_candidate(perception, &jobs, properties.as_deref(), &agent_id) {
                tracing::info!(stage = "economy_priority", action = action.kind(), "work intent economy");
                return Some(action);
            }
        }

        if self.llm_mode() {
            let live = perception
                .own_live_conversations(&agent_id)
                .first()
                .map(|c| c.id.clone());
            if let Some(conversation_id) = live {
                if let Some(action) = self.llm_decide(perception, Some(&conversation_id), &jobs).await {
                    return Some(action);
                }
                let fallback = self.ctx.lock().await.conversations.fallback_reply(
                    perception,
                    &conversation_id,
                    &agent_id,
                );
                if fallback.is_some() {
                    tracing::info!(stage = "fallback_reply", conversation_id = %conversation_id, "fallback reply");
                    return fallback;
                }
                return self.heuristic(perception, &jobs).await;
            }

            if let Some(action) = self.llm_decide(perception, None, &jobs).await {
                return Some(action);
            }
            if work {
                if let Some(action) = self.work_candidate(perception, &jobs).await {
                    return Some(action);
                }
            }
            if let Some(action) = self.maybe_start_conversation(perception).await {
                return Some(action);
            }
            if let Some(action) = self.goal_action(perception, &jobs).await {
                return Some(action);
            }
            return self.heuristic(perception, &jobs).await;
        }

        if let Some(action) = self.goal_action(perception, &jobs).await {
            return Some(action);
        }
        self.heuristic(perception, &jobs).await
    }

    /// End a conversation that has run its course; with a work intent, the
    /// next labor-market step is lined up as the follow-up.
    async fn transition(&self, perception: &Perception, jobs: &[Job]) -> Option<ActionCandidate> {
        let now = self.now();
        let agent_id = self.agent_id().await;
        let own = perception.own_live_conversations(&agent_id);
        let conversation = own.first()?;
        let quiet = now - conversation.last_seen_ms().unwrap_or(now);
        if conversation.messages.len() < TRANSITION_MESSAGES && quiet < TRANSITION_QUIET_MS {
            return None;
        }
        let end = ActionCandidate::end_conversation(&conversation.id).ok()?;

        let draft = {
            let mut guard = self.ctx.lock().await;
            let ctx = &mut *guard;
            if ctx.intent.is(Intent::Work) {
                work_draft(perception, jobs, &agent_id, &mut ctx.job_strategy, &mut ctx.hotspots, now)
            } else {
                None
            }
        };
        if let Some(draft) = draft {
            if let Some(next) = self.realize(draft, perception).await {
                tracing::info!(
                    stage = "conversation_to_action_followup",
                    action = next.kind(),
                    "work follow-up after conversation"
                );
                self.ctx.lock().await.set_followup(next, now);
            }
        }
        tracing::info!(stage = "conversation_end", conversation_id = %conversation.id, "conversation wrapped up");
        Some(end)
    }

    async fn pre_interaction(&self, perception: &Perception, jobs: &[Job]) -> Engagement {
        let now = self.now();
        let (talking, draft) = {
            let mut guard = self.ctx.lock().await;
            let ctx = &mut *guard;
            ctx.intent
                .refresh(perception, &ctx.traits, now, ctx.hotspots.rng());
            let agent_id = ctx.agent_id.clone().unwrap_or_default();
            let talking = !ctx.conversations.is_empty()
                || !perception.own_live_conversations(&agent_id).is_empty();
            let draft = if !talking && ctx.intent.is(Intent::Work) {
                work_draft(perception, jobs, &agent_id, &mut ctx.job_strategy, &mut ctx.hotspots, now)
            } else {
                None
            };
            (talking, draft)
        };
        if talking {
            return Engagement::Talk;
        }
        match draft {
            Some(draft) => match self.realize(draft, perception).await {
                Some(action) => Engagement::Act(action),
                None => Engagement::Defer,
            },
            None => Engagement::Defer,
        }
    }

    async fn work_candidate(&self, perception: &Perception, jobs: &[Job]) -> Option<ActionCandidate> {
        let now = self.now();
        let draft = {
            let mut guard = self.ctx.lock().await;
            let ctx = &mut *guard;
            let agent_id = ctx.agent_id.clone().unwrap_or_default();
            work_draft(perception, jobs, &agent_id, &mut ctx.job_strategy, &mut ctx.hotspots, now)
        }?;
        self.realize(draft, perception).await
    }

    /// Turn a draft into an action, generating any message it needs.
    async fn realize(&self, draft: Draft, perception: &Perception) -> Option<ActionCandidate> {
        let draft = match draft {
            Draft::Ready(action) => return Some(action),
            Draft::Converse(draft) => draft,
        };
        if let Some(job_id) = &draft.negotiate_job {
            let reply = self
                .world
                .propose_negotiation(&draft.target_id, Some(job_id))
                .await;
            tracing::info!(
                stage = "job_negotiation",
                target = %draft.target_id,
                job_id = %job_id,
                ok = !reply.is_failure(),
                "asked for job support"
            );
        }
        let (payload, existing) = {
            let ctx = self.ctx.lock().await;
            let step = ctx.motivation.current_step().cloned();
            let payload = json!({
                "kind": draft.kind,
                "self": { "id": ctx.agent_id, "name": ctx.name, "personality": ctx.personality },
                "desire": ctx.motivation.desire.as_str(),
                "currentStep": step,
                "requiredOutcome": step.as_ref().map(|s| required_outcome(&s.id)),
                "context": draft.extra,
                "nearby": perception.nearby_agents,
            });
            let existing = ctx
                .conversations
                .conversation_with(&draft.target_id)
                .map(str::to_string);
            (payload, existing)
        };
        let message = self
            .generate_message("social_message", prompts::SOCIAL_MESSAGE, &payload)
            .await;
        let action = message.and_then(|m| match &existing {
            Some(cid) => ActionCandidate::conversation_message(cid, &m).ok(),
            None => ActionCandidate::start_conversation(&draft.target_id, &m).ok(),
        });
        match action {
            Some(action) => Some(action),
            None => {
                tracing::debug!(stage = "converse_fallback", kind = draft.kind, "no message, moving instead");
                Some(draft.fallback)
            }
        }
    }

    /// Build the full context object handed to the text generator.
    async fn decision_payload(
        &self,
        perception: &Perception,
        forced_conversation_id: Option<&str>,
        jobs: &[Job],
    ) -> Value {
        let episodes: Vec<Value> = match self.store.recent_episodes(EPISODES_IN_CONTEXT).await {
            Ok(list) => list
                .into_iter()
                .map(|e| json!({ "kind": e.kind, "data": e.data, "at": e.at.to_rfc3339() }))
                .collect(),
            Err(e) => {
                tracing::debug!(error = %e, "episodes unavailable");
                Vec::new()
            }
        };
        let ctx = self.ctx.lock().await;
        let agent_id = ctx.agent_id.clone().unwrap_or_default();
        let step = ctx.motivation.current_step().cloned();
        let goals: Vec<&candidates::WorldGoal> = ctx.world_goals.iter().rev().take(5).collect();
        let live: Vec<Value> = perception
            .own_live_conversations(&agent_id)
            .into_iter()
            .map(|c| serde_json::to_value(c).unwrap_or(Value::Null))
            .collect();
        let notes: Value = serde_json::to_value(&ctx.relationships).unwrap_or(Value::Null);
        json!({
            "agent": { "id": agent_id, "name": ctx.name, "personality": ctx.personality },
            "perception": perception,
            "events": perception.events,
            "goals": goals,
            "recentContext": {
                "recentUtterances": ctx.utterances(),
                "episodes": episodes,
                "relationshipNotes": notes,
                "planState": ctx.plan,
                "goalState": ctx.goal,
            },
            "profile": ctx.profile,
            "traits": ctx.traits,
            "motivation": ctx.motivation,
            "currentStep": step,
            "requiredOutcome": step.as_ref().map(|s| required_outcome(&s.id)),
            "activeConversations": ctx.conversations.mapping(),
            "activeConversationsLive": live,
            "forcedConversationId": forced_conversation_id,
            "jobApplications": own_application(jobs, &agent_id),
        })
    }

    /// Ask the text generator for an action and validate it. With a forced
    /// conversation only a reply or an end is accepted.
    async fn llm_decide(
        &self,
        perception: &Perception,
        forced_conversation_id: Option<&str>,
        jobs: &[Job],
    ) -> Option<ActionCandidate> {
        self.llm.as_ref()?;
        let payload = self
            .decision_payload(perception, forced_conversation_id, jobs)
            .await;
        let system = if forced_conversation_id.is_some() {
            prompts::FORCED_REPLY
        } else {
            prompts::OPEN_DECISION
        };
        let raw = self.generate("llm_decision", system, &payload).await?;

        let now = self.now();
        let mut ctx = self.ctx.lock().await;
        let mapping = ctx.conversations.mapping().clone();
        let parse_ctx = ParseContext {
            nearby_buildings: &perception.nearby_buildings,
            conversations: &mapping,
            forced_conversation_id,
        };
        let parsed = if forced_conversation_id.is_some() {
            parse_conversation_reply(&raw, &parse_ctx)
        } else {
            parse_generated(&raw, &parse_ctx)
        };
        let step_id = ctx.motivation.current_step().map(|s| s.id.clone());
        let parsed = parsed.and_then(|p| check_step(&p.action, step_id.as_deref()).map(|_| p));
        let parsed = match parsed {
            Ok(parsed) => parsed,
            Err(rejection) => {
                let err = AgentError::from(rejection);
                tracing::info!(stage = "llm_rejected", reason = %err, "generated action discarded");
                return None;
            }
        };
        if spoken_text(&parsed.action).map(is_meta_content).unwrap_or(false) {
            tracing::info!(stage = "llm_meta_rejected", action = parsed.action.kind(), "out-of-world text");
            return None;
        }
        if let Some(next) = parsed.followup {
            ctx.set_followup(next, now);
        }
        tracing::info!(stage = "llm_decision", action = parsed.action.kind(), "generated action accepted");
        Some(parsed.action)
    }

    /// Greeting when the plan itself is about talking to people.
    async fn maybe_start_conversation(&self, perception: &Perception) -> Option<ActionCandidate> {
        let (payload, target) = {
            let ctx = self.ctx.lock().await;
            if !prompts::is_conversational_goal(&ctx.plan.primary_goal) {
                return None;
            }
            let other = perception.first_nearby()?;
            if ctx.conversations.is_tracking(&other.id) {
                return None;
            }
            let payload = json!({
                "self": { "id": ctx.agent_id, "name": ctx.name },
                "other": other,
                "plan": ctx.plan,
            });
            (payload, other.id.clone())
        };
        let message = self
            .generate_message("greeting", prompts::GREETING, &payload)
            .await?;
        ActionCandidate::start_conversation(&target, &message).ok()
    }

    /// Run every generator, rank, and buffer the runners-up.
    pub async fn goal_action(&self, perception: &Perception, jobs: &[Job]) -> Option<ActionCandidate> {
        let now = self.now();
        let proposals = match self
            .world
            .list_proposals(&ProposalQuery {
                limit: PROPOSAL_LIMIT,
                mine: false,
                status: None,
            })
            .await
        {
            Ok(list) => list,
            Err(e) => {
                tracing::debug!(error = %e, "proposal listing unavailable");
                Vec::new()
            }
        };
        let step_is_purchase = {
            let ctx = self.ctx.lock().await;
            ctx.motivation.current_step().map(|s| s.id == "buy_house").unwrap_or(false)
        };
        let properties = if step_is_purchase || wants_property(perception) {
            self.properties().await
        } else {
            None
        };

        let (coordination, draft, rest, coord) = {
            let mut guard = self.ctx.lock().await;
            let ctx = &mut *guard;
            let agent_id = ctx.agent_id.clone().unwrap_or_default();
            let (coord, coordination) = coordination_candidate(
                &proposals,
                &agent_id,
                &ctx.name,
                perception.nearby_agents.len(),
                &mut ctx.coord,
                now,
            );
            let approval = approval_ratio(&perception.context.relationships);
            let registration = candidacy(
                &ctx.traits,
                approval,
                ctx.candidate_registered,
                ctx.motivation.desire,
                &ctx.personality,
            );
            let step = ctx.motivation.current_step().cloned();
            let draft = motivation_draft(
                step.as_ref(),
                perception,
                jobs,
                properties.as_deref(),
                &agent_id,
                registration,
                &mut ctx.hotspots,
            );
            let rest: Vec<ActionCandidate> = economy_candidate(perception, jobs, properties.as_deref(), &agent_id)
                .into_iter()
                .chain(event_candidate(perception))
                .collect();
            (coordination, draft, rest, coord)
        };
        let motivated = match draft {
            Some(draft) => self.realize(draft, perception).await,
            None => None,
        };
        // Generator order breaks ties: coordination, motivation, economy, events.
        let pool: Vec<ActionCandidate> = coordination
            .into_iter()
            .chain(motivated)
            .chain(rest)
            .collect();
        if pool.is_empty() {
            return None;
        }

        let inputs = ScoringInputs::from_perception(perception, coord);
        let mut ctx = self.ctx.lock().await;
        let ranked = rank(pool, &inputs, ctx.recent_actions());
        let top = Value::Array(
            ranked
                .iter()
                .take(3)
                .map(|s| json!({ "type": s.action.kind(), "score": round2(s.score), "penalty": round2(s.penalty), "vector": s.vector }))
                .collect(),
        );
        tracing::info!(stage = "goal_vector_scores", top = %top, "candidates ranked");

        let mut ranked = ranked.into_iter();
        let best = ranked.next()?;
        for runner_up in ranked.take(BUFFERED_ALTERNATIVES) {
            let priority = runner_up.score.max(BUFFER_MIN_PRIORITY);
            ctx.queue
                .enqueue(runner_up.action, "goal_buffer", priority, None, now);
        }
        Some(best.action)
    }

    /// Rule-based fallback that always has an answer while a position or
    /// intent is known.
    pub async fn heuristic(&self, perception: &Perception, jobs: &[Job]) -> Option<ActionCandidate> {
        let now = self.now();
        let (registration, goal, intent) = {
            let mut guard = self.ctx.lock().await;
            let ctx = &mut *guard;
            prune_goals(&mut ctx.world_goals, now);
            let intent = ctx
                .intent
                .refresh(perception, &ctx.traits, now, ctx.hotspots.rng());
            let registration = candidacy(
                &ctx.traits,
                approval_ratio(&perception.context.relationships),
                ctx.candidate_registered,
                ctx.motivation.desire,
                &ctx.personality,
            );
            (registration, most_urgent(&ctx.world_goals).cloned(), intent)
        };
        if let Some(action) = registration {
            tracing::info!(stage = "candidacy", "registering as candidate");
            return Some(action);
        }

        if let Some(goal) = goal {
            match goal_move(&goal, perception) {
                Some(GoalMove::Arrived { building_id }) => {
                    let payload = json!({ "kind": "goal_arrival", "goal": goal, "buildingId": building_id });
                    if let Some(action) = self.arrival_speech(&payload).await {
                        return Some(action);
                    }
                }
                Some(GoalMove::MoveTo(target)) => return Some(ActionCandidate::move_to(target)),
                None => {}
            }
        }

        match suggested_move(perception) {
            Some(SuggestedMove::Arrived { reason, building_id }) => {
                let payload = json!({ "kind": "suggested_goal_arrival", "reason": reason, "buildingId": building_id });
                if let Some(action) = self.arrival_speech(&payload).await {
                    return Some(action);
                }
            }
            Some(SuggestedMove::MoveTo(target)) => return Some(ActionCandidate::move_to(target)),
            None => {}
        }

        let economy = &perception.context.economy;
        if economy.balance < 5.0 && !economy.has_job() {
            if let Some(action) = first_vacancy(jobs).and_then(|j| ActionCandidate::apply_job(&j.id).ok()) {
                return Some(action);
            }
        }

        if !perception.nearby_agents.is_empty() && perception.conversations.is_empty() {
            if let Some(action) = self.social_initiation(perception).await {
                return Some(action);
            }
        }

        let mut ctx = self.ctx.lock().await;
        let hotspot = ctx.hotspots.next(intent);
        let target = match perception.position {
            Some(here) if near(here, hotspot) => wander(here, 2, ctx.hotspots.rng()),
            _ => hotspot,
        };
        Some(ActionCandidate::move_to(target))
    }

    async fn arrival_speech(&self, payload: &Value) -> Option<ActionCandidate> {
        let message = self
            .generate_message("arrival_speech", prompts::SOCIAL_MESSAGE, payload)
            .await?;
        ActionCandidate::speak(&message).ok()
    }

    /// Opener for the first nearby citizen not already talked to recently.
    async fn social_initiation(&self, perception: &Perception) -> Option<ActionCandidate> {
        let now = self.now();
        for other in &perception.nearby_agents {
            let payload = {
                let mut ctx = self.ctx.lock().await;
                if other.id.is_empty()
                    || ctx.conversations.is_tracking(&other.id)
                    || !ctx.claim_initiation(&other.id, now)
                {
                    continue;
                }
                let t = ctx.traits;
                let step = ctx.motivation.current_step().map(|s| s.label.clone());
                json!({
                    "yo": { "id": ctx.agent_id, "name": ctx.name },
                    "miDeseo": ctx.motivation.desire.as_str(),
                    "miPasoActual": step,
                    "misRasgos": {
                        "ambition": round2(t.ambition),
                        "sociability": round2(t.sociability),
                        "curiosity": round2(t.curiosity),
                        "discipline": round2(t.discipline),
                    },
                    "otraCiudadana": other,
                    "contextoPrevio": ctx.last_utterances(2),
                })
            };
            if let Some(message) = self.generate_message("opener", prompts::OPENER, &payload).await {
                if let Ok(action) = ActionCandidate::start_conversation(&other.id, &message) {
                    tracing::info!(stage = "social_initiation", target = %other.id, "opening conversation");
                    return Some(action);
                }
            }
        }
        None
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Run `action` under the action guard. Returns `None` when the guard
    /// was busy; the action is then queued for a later tick.
    pub async fn execute(&self, action: ActionCandidate) -> Option<Reply> {
        let _action = match self.action_guard.acquire().await {
            Ok(guard) => guard,
            Err(e) => {
                let now = self.now();
                tracing::info!(stage = "action_skip", action = action.kind(), reason = %e, "action requeued");
                self.ctx.lock().await.queue.enqueue(
                    action,
                    "action_lock_timeout",
                    LOCK_TIMEOUT_PRIORITY,
                    None,
                    now,
                );
                return None;
            }
        };

        let result = self.dispatch(&action).await;
        let now = self.now();
        let reply = match result {
            Ok(reply) if reply.status == Some(0) => {
                self.requeue_failed(&action, reply.error.as_deref().unwrap_or("transport"), now)
                    .await;
                reply
            }
            Ok(reply) => {
                self.reconcile(&action, &reply, now).await;
                reply
            }
            Err(e) => {
                let message = format!("{e:#}");
                self.requeue_failed(&action, &message, now).await;
                Reply::transport(message)
            }
        };
        self.publish_profile().await;
        Some(reply)
    }

    async fn requeue_failed(&self, action: &ActionCandidate, error: &str, now: i64) {
        tracing::warn!(stage = "execute_error", action = action.kind(), error, "action failed, requeued");
        let mut ctx = self.ctx.lock().await;
        ctx.health.record("execute_action", false, now);
        ctx.queue
            .enqueue(action.clone(), "execute_error", requeue_priority(action), None, now);
    }

    async fn job_gate(&self) -> Option<Reply> {
        let now = self.now();
        self.ctx.lock().await.job_strategy.gate(now)
    }

    async fn dispatch(&self, action: &ActionCandidate) -> anyhow::Result<Reply> {
        let world = &self.world;
        let reply = match action {
            ActionCandidate::MoveTo { x, y } => world.move_to(Position { x: *x, y: *y }).await,
            ActionCandidate::MoveToBuilding { building_id } => {
                let state = world.world_state().await?;
                let target = state
                    .building_position(building_id)
                    .ok_or_else(|| anyhow!("unknown building {building_id}"))?;
                world.move_to(target).await
            }
            ActionCandidate::EnterBuilding { building_id } => world.enter_building(building_id).await,
            ActionCandidate::Speak { message } => world.speak(message).await,
            ActionCandidate::StartConversation { target_id, message } => {
                world.start_conversation(target_id, message).await
            }
            ActionCandidate::ConversationMessage {
                conversation_id,
                message,
            } => world.send_conversation_message(conversation_id, message).await,
            ActionCandidate::EndConversation { conversation_id } => {
                world.end_conversation(conversation_id).await
            }
            ActionCandidate::ApplyJob { job_id } => match self.job_gate().await {
                Some(blocked) => {
                    tracing::info!(stage = "job_apply_blocked", job_id = %job_id, "apply held back by cooldown");
                    blocked
                }
                None => world.apply_job(job_id).await,
            },
            ActionCandidate::BuyProperty { property_id } => world.buy_property(property_id).await,
            ActionCandidate::VoteJob {
                applicant_id,
                job_id,
            } => match self.job_gate().await {
                Some(blocked) => {
                    tracing::info!(stage = "job_vote_blocked", job_id = %job_id, "vote held back by cooldown");
                    blocked
                }
                None => world.vote_job(applicant_id, job_id).await,
            },
            ActionCandidate::CreateEvent {
                name,
                kind,
                start_at,
                end_at,
                location,
                description,
                goal_scope,
            } => {
                let event = json!({
                    "name": name,
                    "type": kind,
                    "startAt": start_at,
                    "endAt": end_at,
                    "location": location,
                    "description": description,
                    "goalScope": goal_scope,
                });
                world.create_event(&event).await
            }
            ActionCandidate::JoinEvent { event_id } => world.join_event(event_id).await,
            ActionCandidate::CoordCreateProposal {
                title,
                description,
                category,
                required_roles,
            } => {
                world
                    .create_proposal(title, description, category, required_roles)
                    .await
            }
            ActionCandidate::CoordJoin { proposal_id, role } => world.join_proposal(proposal_id, role).await,
            ActionCandidate::CoordCommit {
                proposal_id,
                task,
                role,
            } => world.commit_to_proposal(proposal_id, task, role).await,
            ActionCandidate::CoordUpdateCommit {
                proposal_id,
                commitment_id,
                status,
                progress,
                notes,
            } => {
                let update = CommitmentUpdate {
                    status: status.clone(),
                    progress: *progress,
                    notes: notes.clone(),
                };
                world
                    .update_commitment(proposal_id, commitment_id, &update)
                    .await
            }
            ActionCandidate::CoordSetStatus {
                proposal_id,
                status,
                summary,
            } => world.set_proposal_status(proposal_id, status, summary).await,
            ActionCandidate::RegisterCandidate { platform } => {
                let name = self.ctx.lock().await.name.clone();
                world.register_candidate(&name, platform).await
            }
            ActionCandidate::Wait {} => Reply::ok(json!({ "waited": true })),
        };
        Ok(reply)
    }

    /// Fold a completed call back into the context.
    async fn reconcile(&self, action: &ActionCandidate, reply: &Reply, now: i64) {
        let failed = reply.is_failure();
        let mut recovery = None;
        let perception = self.last_seen.lock().await.clone();
        {
            let mut guard = self.ctx.lock().await;
            let ctx = &mut *guard;
            match action {
                ActionCandidate::ApplyJob { .. } | ActionCandidate::VoteJob { .. }
                    if reply.status == Some(429) && ctx.job_strategy.is_blocked(now) =>
                {
                    // Held back locally; the block already stands.
                }
                ActionCandidate::ApplyJob { job_id } => {
                    let feedback = ctx
                        .job_strategy
                        .register_feedback(JobAction::Apply, reply, Some(job_id), now);
                    if failed {
                        let code = match feedback {
                            Feedback::Blocked(code) => Some(code),
                            Feedback::Cleared => None,
                        };
                        recovery = Some(recovery_draft(&perception, code, &mut ctx.hotspots));
                    }
                }
                ActionCandidate::VoteJob { job_id, .. } => {
                    ctx.job_strategy
                        .register_feedback(JobAction::Vote, reply, Some(job_id), now);
                }
                ActionCandidate::StartConversation { target_id, .. } if !failed => {
                    let id = reply
                        .body
                        .pointer("/conversation/id")
                        .or_else(|| reply.body.get("conversationId"))
                        .and_then(Value::as_str);
                    if let Some(id) = id {
                        ctx.conversations.started(target_id, id);
                    }
                }
                ActionCandidate::EndConversation { conversation_id } => {
                    ctx.conversations.ended(conversation_id);
                }
                ActionCandidate::RegisterCandidate { .. } if !failed => {
                    ctx.candidate_registered = true;
                    ctx.motivation.mark_done("register_candidate");
                }
                _ => {}
            }
            ctx.remember_action(action.kind());
            ctx.plan.record_action(action, now);
            ctx.health.record("execute_action", !failed, now);
        }
        tracing::info!(
            stage = "action_executed",
            action = action.kind(),
            ok = !failed,
            status = reply.status.unwrap_or(0),
            error = reply.error.as_deref().unwrap_or(""),
            "action executed"
        );

        if let Some(draft) = recovery {
            if let Some(next) = self.realize(draft, &perception).await {
                tracing::info!(stage = "job_recovery", action = next.kind(), "recovery queued");
                self.ctx
                    .lock()
                    .await
                    .queue
                    .enqueue(next, "job_recovery", RECOVERY_PRIORITY, None, now);
            }
        }
    }

    // ========================================================================
    // Conversations and events
    // ========================================================================

    /// Reply to the latest message in `conversation_id`, once.
    pub async fn respond_to_conversation(&self, conversation_id: &str) {
        let _conversation = match self.conversation_guard.acquire().await {
            Ok(guard) => guard,
            Err(e) => {
                tracing::info!(stage = "conversation_skip", conversation_id, reason = %e, "reply skipped");
                return;
            }
        };
        let perception = match self.observe().await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "perceive failed before reply");
                return;
            }
        };
        let agent_id = self.agent_id().await;
        let Some(conversation) = perception
            .conversations
            .iter()
            .find(|c| c.id == conversation_id)
        else {
            return;
        };
        let Some(latest) = conversation.latest_line() else {
            return;
        };
        let incoming = latest.message.trim().to_string();
        if incoming.is_empty() || latest.from.as_deref() == Some(agent_id.as_str()) {
            return;
        }
        let now = self.now();
        if !self
            .ctx
            .lock()
            .await
            .conversations
            .should_reply(conversation_id, &incoming, now)
        {
            tracing::debug!(stage = "reply_deduped", conversation_id, "already answered");
            return;
        }

        match self.llm_decide(&perception, Some(conversation_id), &[]).await {
            Some(action) => {
                let outgoing = spoken_text(&action).map(str::to_string);
                match self.execute(action).await {
                    Some(reply) if !reply.is_failure() => {
                        self.ctx.lock().await.conversations.record_reply(
                            conversation_id,
                            &incoming,
                            outgoing.as_deref(),
                            now,
                        );
                    }
                    _ => tracing::info!(stage = "reply_not_sent", conversation_id, "reply left unrecorded"),
                }
            }
            None => {
                tracing::info!(stage = "respond_llm_fail", conversation_id, "no generated reply");
                let fallback = {
                    let mut ctx = self.ctx.lock().await;
                    ctx.conversations.clear_response_stamp(conversation_id);
                    ctx.conversations
                        .fallback_reply(&perception, conversation_id, &agent_id)
                };
                if let Some(action) = fallback {
                    self.execute(action).await;
                }
            }
        }
    }

    /// Update the ledger entry for `speaker_id` from one message.
    pub async fn analyze_relationship(&self, speaker_id: &str, message: &str) {
        let self_view = {
            let ctx = self.ctx.lock().await;
            json!({ "id": ctx.agent_id, "name": ctx.name, "traits": ctx.traits })
        };
        let payload = json!({ "self": self_view, "otherId": speaker_id, "message": message });
        let generated = self
            .generate("relationship", prompts::RELATIONSHIP, &payload)
            .await
            .and_then(|raw| extract_object(&raw))
            .and_then(|object| RelationshipDelta::from_value(&Value::Object(object)));
        let delta = generated.unwrap_or_else(|| RelationshipDelta::heuristic(message));
        let body = {
            let mut ctx = self.ctx.lock().await;
            ctx.relationships.apply(speaker_id, message, &delta);
            serde_json::to_value(&ctx.relationships).unwrap_or(Value::Null)
        };
        tracing::debug!(
            stage = "relationship_update",
            other = speaker_id,
            affinity = delta.affinity,
            trust = delta.trust,
            respect = delta.respect,
            "relationship updated"
        );
        if let Err(e) = self.store.save_section(section::RELATIONSHIPS, &body).await {
            tracing::warn!(error = %e, "failed to persist relationships");
        }
    }

    pub async fn on_registered(&self, agent_id: &str) {
        self.ctx.lock().await.agent_id = Some(agent_id.to_string());
        if let Err(e) = self.store.save_section(section::AGENT_ID, &json!(agent_id)).await {
            tracing::warn!(error = %e, "failed to persist agent id");
        }
        tracing::info!(agent_id, "registered in the world");
    }

    pub async fn on_speech(&self, speaker_id: &str, message: &str) {
        let now = self.now();
        let kept = self.ctx.lock().await.remember_utterance(speaker_id, message, now);
        if kept {
            self.record_episode("heard_speech", json!({ "from": speaker_id, "message": message }))
                .await;
        }
    }

    pub async fn on_conversation_started(&self, conversation_id: &str, other_id: &str) {
        self.ctx.lock().await.conversations.started(other_id, conversation_id);
        self.record_episode(
            "conversation_started",
            json!({ "conversationId": conversation_id, "with": other_id }),
        )
        .await;
    }

    /// Remember the line; for lines from others, analyse and reply in the
    /// background.
    pub async fn on_conversation_message(self: &Arc<Self>, conversation_id: &str, from_id: &str, message: &str) {
        let now = self.now();
        let (mine, analyse) = {
            let mut ctx = self.ctx.lock().await;
            ctx.remember_utterance(from_id, message, now);
            let mine = ctx.agent_id.as_deref() == Some(from_id);
            let analyse = !mine && ctx.claim_analysis(from_id, now);
            (mine, analyse)
        };
        self.record_episode(
            "conversation_message",
            json!({ "conversationId": conversation_id, "from": from_id, "message": message }),
        )
        .await;
        if mine {
            return;
        }
        if analyse {
            let citizen = Arc::clone(self);
            let (from, text) = (from_id.to_string(), message.to_string());
            tokio::spawn(async move { citizen.analyze_relationship(&from, &text).await });
        }
        let citizen = Arc::clone(self);
        let cid = conversation_id.to_string();
        tokio::spawn(async move { citizen.respond_to_conversation(&cid).await });

        if let Some(next) = infer_followup(message) {
            self.ctx.lock().await.set_followup(next, now);
        }
    }

    pub async fn on_conversation_ended(&self, conversation_id: &str) {
        self.ctx.lock().await.conversations.ended(conversation_id);
        self.record_episode("conversation_ended", json!({ "conversationId": conversation_id }))
            .await;
    }

    /// Accept a world-pushed goal.
    pub async fn on_goal(&self, goal: Value) {
        let mut parsed: candidates::WorldGoal = match serde_json::from_value(goal) {
            Ok(g) => g,
            Err(e) => {
                tracing::warn!(error = %e, "unreadable goal");
                return;
            }
        };
        let now = self.now();
        parsed.received_at = now;
        let mut ctx = self.ctx.lock().await;
        ctx.world_goals.push(parsed);
        prune_goals(&mut ctx.world_goals, now);
    }
}

fn near(a: Position, b: Position) -> bool {
    (a.x - b.x).abs() <= HOTSPOT_ARRIVAL && (a.y - b.y).abs() <= HOTSPOT_ARRIVAL
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockProvider;
    use crate::testing::FakeWorld;
    use agora_core::{
        ConversationLine, ConversationView, Economy, JobApplication, ManualClock, NearbyAgent, Needs,
        PerceptionContext,
    };
    use agora_memory::{BlockCode, MemoryStore};
    use rand::SeedableRng;

    fn config(mode: DecisionMode) -> AgentConfig {
        let mut config = AgentConfig::default();
        config.agent.name = "Lucia".into();
        config.behavior.decision_loop.mode = mode;
        config
    }

    fn citizen_with(
        world: Arc<FakeWorld>,
        llm: Option<Arc<dyn LlmClient>>,
        mode: DecisionMode,
        clock: ManualClock,
    ) -> Arc<Citizen> {
        Arc::new(Citizen::new(
            world,
            llm,
            Arc::new(MemoryStore::new()),
            Arc::new(clock),
            config(mode),
            StdRng::seed_from_u64(11),
        ))
    }

    async fn registered(citizen: &Citizen) {
        citizen.on_registered("me").await;
    }

    fn jobless(balance: f64) -> Perception {
        Perception {
            position: Some(Position { x: 0, y: 0 }),
            context: PerceptionContext {
                economy: Economy {
                    balance,
                    job: None,
                    properties: vec![],
                },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn open_job(id: &str) -> Job {
        Job {
            id: id.into(),
            ..Default::default()
        }
    }

    fn conversation(id: &str, lines: &[(&str, &str, i64)]) -> ConversationView {
        ConversationView {
            id: id.into(),
            participants: vec!["me".into(), "a2".into()],
            messages: lines
                .iter()
                .map(|(from, message, at)| ConversationLine {
                    from: Some(from.to_string()),
                    message: message.to_string(),
                    timestamp: *at,
                })
                .collect(),
            active: true,
            last_activity: lines.last().map(|l| l.2),
            started_at: None,
        }
    }

    #[tokio::test]
    async fn test_blocked_apply_never_reaches_the_network() {
        let world = Arc::new(FakeWorld::new(jobless(0.0)));
        world.set_apply_reply(Reply::failed(409, "already applied"));
        let clock = ManualClock::starting_at(1_000_000);
        let citizen = citizen_with(world.clone(), None, DecisionMode::Heuristic, clock.clone());
        registered(&citizen).await;

        let apply = ActionCandidate::apply_job("j1").unwrap();
        let first = citizen.execute(apply.clone()).await.unwrap();
        assert!(first.is_failure());
        assert_eq!(world.count("apply_job"), 1);
        {
            let ctx = citizen.context().lock().await;
            assert_eq!(ctx.job_strategy.code, Some(BlockCode::AlreadyAppliedOrVoted));
        }

        clock.advance(Duration::from_secs(30));
        let second = citizen.execute(apply.clone()).await.unwrap();
        assert_eq!(second.status, Some(429));
        assert_eq!(world.count("apply_job"), 1);

        clock.advance(Duration::from_secs(120));
        world.set_apply_reply(Reply::ok(json!({ "ok": true })));
        let third = citizen.execute(apply).await.unwrap();
        assert!(!third.is_failure());
        assert_eq!(world.count("apply_job"), 2);
        assert!(!citizen.context().lock().await.job_strategy.blocked);
    }

    #[tokio::test]
    async fn test_open_breaker_holds_back_votes() {
        let world = Arc::new(FakeWorld::new(jobless(0.0)));
        world.set_apply_reply(Reply::failed(409, "already applied"));
        let clock = ManualClock::starting_at(1_000_000);
        let citizen = citizen_with(world.clone(), None, DecisionMode::Heuristic, clock.clone());
        registered(&citizen).await;
        citizen.execute(ActionCandidate::apply_job("j1").unwrap()).await;

        clock.advance(Duration::from_secs(10));
        let vote = citizen
            .execute(ActionCandidate::vote_job("a2", "j2").unwrap())
            .await
            .unwrap();
        assert_eq!(vote.status, Some(429));
        assert_eq!(vote.body["code"], json!("ALREADY_APPLIED_OR_VOTED"));
        assert!(vote.body["retryAfterMs"].as_i64().unwrap() > 1_010_000);
        assert_eq!(world.count("vote_job"), 0);

        clock.advance(Duration::from_secs(120));
        let later = citizen
            .execute(ActionCandidate::vote_job("a2", "j2").unwrap())
            .await
            .unwrap();
        assert!(!later.is_failure());
        assert_eq!(world.count("vote_job"), 1);
    }

    #[tokio::test]
    async fn test_failed_apply_queues_recovery() {
        let world = Arc::new(FakeWorld::new(jobless(0.0)));
        world.set_apply_reply(Reply::failed(403, "forbidden"));
        let citizen = citizen_with(world, None, DecisionMode::Heuristic, ManualClock::starting_at(0));
        registered(&citizen).await;
        citizen.execute(ActionCandidate::apply_job("j1").unwrap()).await;
        let mut ctx = citizen.context().lock().await;
        let queued = ctx.queue.snapshot(0);
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].source, "job_recovery");
        assert!((queued[0].priority - 1.6).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_action_guard_requeues_at_elevated_priority() {
        let world = Arc::new(FakeWorld::new(jobless(0.0)));
        let citizen = citizen_with(world.clone(), None, DecisionMode::Heuristic, ManualClock::starting_at(0));
        let held = citizen.action_guard.acquire().await.unwrap();

        let reply = citizen
            .execute(ActionCandidate::speak("buenos días").unwrap())
            .await;
        assert!(reply.is_none());
        assert_eq!(world.count("speak"), 0);
        drop(held);

        let mut ctx = citizen.context().lock().await;
        let item = ctx.queue.dequeue(0).unwrap();
        assert_eq!(item.source, "action_lock_timeout");
        assert!((item.priority - 1.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_transport_failure_requeues_economy_high() {
        let world = Arc::new(FakeWorld::new(jobless(0.0)));
        world.set_apply_reply(Reply::transport("timeout"));
        let citizen = citizen_with(world, None, DecisionMode::Heuristic, ManualClock::starting_at(0));
        citizen.execute(ActionCandidate::apply_job("j1").unwrap()).await;
        let mut ctx = citizen.context().lock().await;
        let item = ctx.queue.dequeue(0).unwrap();
        assert_eq!(item.source, "execute_error");
        assert!((item.priority - 2.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_queue_is_served_before_fresh_candidates() {
        let world = Arc::new(FakeWorld::new(jobless(0.0)));
        let citizen = citizen_with(world, None, DecisionMode::Heuristic, ManualClock::starting_at(0));
        citizen
            .context()
            .lock()
            .await
            .queue
            .enqueue(ActionCandidate::wait(), "test", 1.0, None, 0);
        let action = citizen.decide(&jobless(0.0)).await;
        assert_eq!(action, Some(ActionCandidate::wait()));
    }

    #[tokio::test]
    async fn test_persisted_state_loads_back() {
        let store = Arc::new(MemoryStore::new());
        let build = || {
            Citizen::new(
                Arc::new(FakeWorld::new(jobless(0.0))),
                None,
                store.clone(),
                Arc::new(ManualClock::starting_at(0)),
                config(DecisionMode::Heuristic),
                StdRng::seed_from_u64(11),
            )
        };
        let first = build();
        registered(&first).await;
        first
            .context()
            .lock()
            .await
            .queue
            .enqueue(ActionCandidate::wait(), "test", 1.0, None, 0);
        first.persist().await;

        let second = build();
        second.load().await.unwrap();
        let mut ctx = second.context().lock().await;
        assert_eq!(ctx.agent_id.as_deref(), Some("me"));
        assert_eq!(ctx.queue.depth(0), 1);
    }

    #[tokio::test]
    async fn test_jobless_broke_citizen_applies() {
        let world = Arc::new(FakeWorld::new(jobless(0.0)));
        world.set_jobs(vec![open_job("j7")]);
        world.set_properties(vec![Property {
            id: "p1".into(),
            price: 100.0,
            for_sale: true,
        }]);
        let citizen = citizen_with(world.clone(), None, DecisionMode::Heuristic, ManualClock::starting_at(0));
        registered(&citizen).await;
        let action = citizen.goal_action(&jobless(0.0), &world.jobs()).await;
        assert_eq!(action.as_ref().map(|a| a.kind()), Some("apply_job"));
    }

    #[tokio::test]
    async fn test_stale_conversations_are_ended() {
        let mut perception = jobless(10.0);
        perception.conversations = vec![conversation("c1", &[("a2", "hola", 0)])];
        let world = Arc::new(FakeWorld::new(perception));
        let citizen = citizen_with(world.clone(), None, DecisionMode::Heuristic, ManualClock::starting_at(200_000));
        registered(&citizen).await;
        citizen.on_conversation_started("c1", "a2").await;
        citizen.tick().await.unwrap();
        assert!(world.count("end_conversation") >= 1);
        assert!(!citizen.context().lock().await.conversations.is_tracking("a2"));
    }

    #[tokio::test]
    async fn test_same_text_gets_one_reply() {
        let mut perception = jobless(10.0);
        perception.conversations = vec![conversation("c1", &[("a2", "hola", 5)])];
        let world = Arc::new(FakeWorld::new(perception));
        let llm: Arc<dyn LlmClient> = Arc::new(MockProvider::scripted([
            r#"{"type":"conversation_message","params":{"conversation_id":"c1","message":"¡Hola! ¿Qué tal tu día?"}}"#,
            r#"{"type":"conversation_message","params":{"conversation_id":"c1","message":"Otra vez hola"}}"#,
        ]));
        let citizen = citizen_with(world.clone(), Some(llm), DecisionMode::Llm, ManualClock::starting_at(10));
        registered(&citizen).await;

        citizen.respond_to_conversation("c1").await;
        citizen.respond_to_conversation("c1").await;
        assert_eq!(world.count("send_conversation_message"), 1);
        assert_eq!(world.messages_sent(), vec!["¡Hola! ¿Qué tal tu día?".to_string()]);
    }

    #[tokio::test]
    async fn test_fallback_reply_without_generator() {
        let mut perception = jobless(10.0);
        perception.conversations = vec![conversation("c1", &[("a2", "¿me ayudas?", 5)])];
        let world = Arc::new(FakeWorld::new(perception));
        let citizen = citizen_with(world.clone(), None, DecisionMode::Heuristic, ManualClock::starting_at(10));
        registered(&citizen).await;
        citizen.respond_to_conversation("c1").await;
        citizen.respond_to_conversation("c1").await;
        assert_eq!(world.count("send_conversation_message"), 1);
        assert_eq!(world.messages_sent()[0], crate::conversation::FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn test_fallback_goes_to_the_conversation_being_answered() {
        let mut perception = jobless(10.0);
        perception.conversations = vec![
            conversation("c1", &[("a2", "¿me oyes?", 50)]),
            conversation("c2", &[("a2", "hola", 5)]),
        ];
        let world = Arc::new(FakeWorld::new(perception));
        let citizen = citizen_with(world.clone(), None, DecisionMode::Heuristic, ManualClock::starting_at(60));
        registered(&citizen).await;

        citizen.respond_to_conversation("c2").await;
        assert_eq!(world.conversations_messaged(), vec!["c2".to_string()]);
        {
            let ctx = citizen.context().lock().await;
            let c2 = ctx.conversations.session("c2").unwrap();
            assert_eq!(c2.last_fallback_for.as_deref(), Some("hola"));
            assert!(ctx.conversations.session("c1").map_or(true, |s| s.last_fallback_for.is_none()));
        }

        citizen.respond_to_conversation("c1").await;
        assert_eq!(world.conversations_messaged(), vec!["c2".to_string(), "c1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_held_by_busy_guard_is_not_recorded() {
        let mut perception = jobless(10.0);
        perception.conversations = vec![conversation("c1", &[("a2", "hola", 5)])];
        let world = Arc::new(FakeWorld::new(perception));
        let llm: Arc<dyn LlmClient> = Arc::new(MockProvider::scripted([
            r#"{"type":"conversation_message","params":{"conversation_id":"c1","message":"¡Hola! ¿Qué tal tu día?"}}"#,
        ]));
        let citizen = citizen_with(world.clone(), Some(llm), DecisionMode::Llm, ManualClock::starting_at(10));
        registered(&citizen).await;
        let held = citizen.action_guard.acquire().await.unwrap();

        citizen.respond_to_conversation("c1").await;
        drop(held);
        assert_eq!(world.count("send_conversation_message"), 0);
        let mut ctx = citizen.context().lock().await;
        assert!(ctx.conversations.should_reply("c1", "hola", 10));
        assert_eq!(ctx.queue.dequeue(10).map(|i| i.source), Some("action_lock_timeout".to_string()));
    }

    #[tokio::test]
    async fn test_conversation_followup_runs_once() {
        let mut perception = jobless(0.0);
        perception.needs = Needs {
            social: 100.0,
            hunger: 0.0,
            energy: 100.0,
        };
        perception.conversations = vec![conversation(
            "c1",
            &[("a2", "hola", 1), ("me", "hola", 2), ("a2", "¿qué tal?", 3), ("me", "bien", 4)],
        )];
        let world = Arc::new(FakeWorld::new(perception.clone()));
        world.set_jobs(vec![open_job("j1")]);
        let citizen = citizen_with(world, None, DecisionMode::Heuristic, ManualClock::starting_at(10));
        registered(&citizen).await;
        {
            let mut guard = citizen.context().lock().await;
            let ctx = &mut *guard;
            ctx.traits.sociability = 0.3;
            ctx.traits.discipline = 0.9;
            let traits = ctx.traits;
            let intent = ctx.intent.refresh(&perception, &traits, 10, ctx.hotspots.rng());
            assert_eq!(intent, Intent::Work);
        }

        let first = citizen.decide(&perception).await;
        assert_eq!(first, ActionCandidate::end_conversation("c1").ok());
        let second = citizen.decide(&perception).await;
        assert_eq!(second, ActionCandidate::apply_job("j1").ok());

        let mut ctx = citizen.context().lock().await;
        assert_eq!(ctx.queue.depth(10), 0);
        assert_eq!(ctx.take_followup(10), None);
    }

    #[tokio::test]
    async fn test_rejected_generation_falls_back_to_heuristic() {
        let mut perception = jobless(50.0);
        perception.nearby_agents = vec![];
        let world = Arc::new(FakeWorld::new(perception.clone()));
        // Meta content and an incoherent step pairing are both discarded.
        let llm: Arc<dyn LlmClient> = Arc::new(MockProvider::scripted([
            r#"{"type":"speak","params":{"message":"Soy un modelo de IA"}}"#,
        ]));
        let citizen = citizen_with(world, Some(llm), DecisionMode::Llm, ManualClock::starting_at(0));
        registered(&citizen).await;
        let action = citizen.decide(&perception).await.unwrap();
        assert_ne!(
            action,
            ActionCandidate::Speak {
                message: "Soy un modelo de IA".into()
            }
        );
    }

    #[tokio::test]
    async fn test_start_conversation_records_mapping() {
        let world = Arc::new(FakeWorld::new(jobless(0.0)));
        let citizen = citizen_with(world, None, DecisionMode::Heuristic, ManualClock::starting_at(0));
        citizen
            .execute(ActionCandidate::start_conversation("a2", "hola").unwrap())
            .await;
        let ctx = citizen.context().lock().await;
        assert_eq!(ctx.conversations.conversation_with("a2"), Some("conv-a2"));
        assert_eq!(ctx.recent_actions().last().map(String::as_str), Some("start_conversation"));
    }

    #[tokio::test]
    async fn test_long_conversation_transitions_to_end() {
        let mut perception = jobless(10.0);
        perception.nearby_agents = vec![NearbyAgent {
            id: "a2".into(),
            name: None,
        }];
        perception.conversations = vec![conversation(
            "c1",
            &[("a2", "hola", 1), ("me", "hola", 2), ("a2", "¿qué tal?", 3), ("me", "bien", 4)],
        )];
        let world = Arc::new(FakeWorld::new(perception.clone()));
        let citizen = citizen_with(world, None, DecisionMode::Heuristic, ManualClock::starting_at(10));
        registered(&citizen).await;
        let action = citizen.decide(&perception).await;
        assert_eq!(action, ActionCandidate::end_conversation("c1").ok());
    }

    #[tokio::test]
    async fn test_own_application_negotiates_before_asking() {
        let mut perception = jobless(10.0);
        perception.nearby_agents = vec![NearbyAgent {
            id: "a2".into(),
            name: None,
        }];
        let world = Arc::new(FakeWorld::new(perception.clone()));
        world.set_jobs(vec![Job {
            id: "j1".into(),
            application: Some(JobApplication {
                applicant_id: Some("me".into()),
                votes: 0,
                status: Some("pending".into()),
                created_at: None,
            }),
            ..Default::default()
        }]);
        let llm: Arc<dyn LlmClient> = Arc::new(MockProvider::scripted([
            r#"{"message":"¿Me apoyarías en mi solicitud del café?"}"#,
        ]));
        let citizen = citizen_with(world.clone(), Some(llm), DecisionMode::Heuristic, ManualClock::starting_at(0));
        registered(&citizen).await;
        {
            let mut ctx = citizen.context().lock().await;
            ctx.motivation = agora_memory::MotivationState::initialize(agora_memory::Desire::BuyHouse, 0);
            ctx.motivation.mark_done("desire_house");
        }
        let action = citizen.goal_action(&perception, &world.jobs()).await.unwrap();
        assert_eq!(world.count("propose_negotiation"), 1);
        assert_eq!(action.kind(), "start_conversation");
    }

    #[tokio::test]
    async fn test_incoming_message_updates_ledger_and_followup() {
        let mut perception = jobless(10.0);
        perception.conversations = vec![conversation("c1", &[("a2", "Gracias, vamos al mercado", 5)])];
        let world = Arc::new(FakeWorld::new(perception));
        let citizen = citizen_with(world, None, DecisionMode::Heuristic, ManualClock::starting_at(10));
        registered(&citizen).await;
        citizen.analyze_relationship("a2", "Gracias, genial").await;
        {
            let ctx = citizen.context().lock().await;
            let entry = ctx.relationships.get("a2").unwrap();
            assert_eq!(entry.affinity, 1);
            assert_eq!(entry.last_note, "buena impresión");
        }
        citizen
            .on_conversation_message("c1", "a2", "Gracias, vamos al mercado")
            .await;
        let mut ctx = citizen.context().lock().await;
        assert_eq!(ctx.take_followup(10), Some(ActionCandidate::MoveTo { x: 36, y: 28 }));
    }
}
