//! In-memory world for exercising the decision core.

use agora_core::{
    CommitmentUpdate, Job, Perception, Position, Property, Proposal, ProposalQuery, Reply, RoleSlot,
    World, WorldState,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;

/// Records every call by name. Replies succeed unless overridden.
pub struct FakeWorld {
    perception: Mutex<Perception>,
    jobs: Mutex<Vec<Job>>,
    properties: Mutex<Vec<Property>>,
    apply_reply: Mutex<Reply>,
    calls: Mutex<HashMap<&'static str, usize>>,
    sent: Mutex<Vec<(String, String)>>,
}

impl FakeWorld {
    pub fn new(perception: Perception) -> Self {
        Self {
            perception: Mutex::new(perception),
            jobs: Mutex::new(Vec::new()),
            properties: Mutex::new(Vec::new()),
            apply_reply: Mutex::new(Reply::ok(json!({ "ok": true }))),
            calls: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_jobs(&self, jobs: Vec<Job>) {
        *self.jobs.lock().unwrap() = jobs;
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn set_properties(&self, properties: Vec<Property>) {
        *self.properties.lock().unwrap() = properties;
    }

    pub fn set_apply_reply(&self, reply: Reply) {
        *self.apply_reply.lock().unwrap() = reply;
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().unwrap().get(call).copied().unwrap_or(0)
    }

    /// Conversation messages sent, in order.
    pub fn messages_sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, m)| m.clone()).collect()
    }

    /// Conversation ids messages were sent into, in order.
    pub fn conversations_messaged(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
    }

    fn hit(&self, call: &'static str) {
        *self.calls.lock().unwrap().entry(call).or_default() += 1;
    }

    fn ok(&self, call: &'static str) -> Reply {
        self.hit(call);
        Reply::ok(json!({ "ok": true }))
    }
}

#[async_trait]
impl World for FakeWorld {
    async fn perceive(&self) -> anyhow::Result<Perception> {
        self.hit("perceive");
        Ok(self.perception.lock().unwrap().clone())
    }

    async fn move_to(&self, _target: Position) -> Reply {
        self.ok("move_to")
    }

    async fn speak(&self, _message: &str) -> Reply {
        self.ok("speak")
    }

    async fn enter_building(&self, _building_id: &str) -> Reply {
        self.ok("enter_building")
    }

    async fn start_conversation(&self, target_id: &str, _message: &str) -> Reply {
        self.hit("start_conversation");
        Reply::ok(json!({ "conversation": { "id": format!("conv-{target_id}") } }))
    }

    async fn send_conversation_message(&self, conversation_id: &str, message: &str) -> Reply {
        self.sent
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), message.to_string()));
        self.ok("send_conversation_message")
    }

    async fn end_conversation(&self, _conversation_id: &str) -> Reply {
        self.ok("end_conversation")
    }

    async fn list_jobs(&self) -> anyhow::Result<Vec<Job>> {
        self.hit("list_jobs");
        Ok(self.jobs())
    }

    async fn apply_job(&self, _job_id: &str) -> Reply {
        self.hit("apply_job");
        self.apply_reply.lock().unwrap().clone()
    }

    async fn vote_job(&self, _applicant_id: &str, _job_id: &str) -> Reply {
        self.ok("vote_job")
    }

    async fn list_properties(&self) -> anyhow::Result<Vec<Property>> {
        self.hit("list_properties");
        Ok(self.properties.lock().unwrap().clone())
    }

    async fn buy_property(&self, _property_id: &str) -> Reply {
        self.ok("buy_property")
    }

    async fn list_proposals(&self, _query: &ProposalQuery) -> anyhow::Result<Vec<Proposal>> {
        self.hit("list_proposals");
        Ok(Vec::new())
    }

    async fn create_proposal(
        &self,
        _title: &str,
        _description: &str,
        _category: &str,
        _required_roles: &[RoleSlot],
    ) -> Reply {
        self.ok("create_proposal")
    }

    async fn join_proposal(&self, _proposal_id: &str, _role: &str) -> Reply {
        self.ok("join_proposal")
    }

    async fn commit_to_proposal(&self, _proposal_id: &str, _task: &str, _role: &str) -> Reply {
        self.ok("commit_to_proposal")
    }

    async fn update_commitment(
        &self,
        _proposal_id: &str,
        _commitment_id: &str,
        _update: &CommitmentUpdate,
    ) -> Reply {
        self.ok("update_commitment")
    }

    async fn set_proposal_status(&self, _proposal_id: &str, _status: &str, _summary: &str) -> Reply {
        self.ok("set_proposal_status")
    }

    async fn create_event(&self, _event: &Value) -> Reply {
        self.ok("create_event")
    }

    async fn join_event(&self, _event_id: &str) -> Reply {
        self.ok("join_event")
    }

    async fn register_candidate(&self, _name: &str, _platform: &str) -> Reply {
        self.ok("register_candidate")
    }

    async fn propose_negotiation(&self, _target_id: &str, _job_id: Option<&str>) -> Reply {
        self.ok("propose_negotiation")
    }

    async fn world_state(&self) -> anyhow::Result<WorldState> {
        self.hit("world_state");
        Ok(WorldState::default())
    }
}
