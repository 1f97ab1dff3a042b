//! Concrete `World`: socket events for presence and movement, REST for the
//! economy, coordination, conversations and governance.

use crate::event::{frame, ServerEvent};
use crate::http::{ApiKey, HttpTransport};
use crate::socket::EventStream;
use agora_core::{
    AgentConfig, CommitmentUpdate, Job, Perception, Position, Property, Proposal, ProposalQuery,
    Reply, RoleSlot, World, WorldState,
};
use anyhow::{bail, Context, Result};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

pub const PERCEIVE_WAIT: Duration = Duration::from_millis(500);
pub const WORLD_STATE_TTL: Duration = Duration::from_secs(30);

const NOT_REGISTERED: &str = "Agent not registered";

pub struct WorldClient {
    http: HttpTransport,
    outgoing: mpsc::Sender<String>,
    api_key: ApiKey,
    agent_id: Arc<ArcSwapOption<String>>,
    latest: Mutex<Option<Value>>,
    world_cache: Mutex<Option<(Instant, WorldState)>>,
    perceive_wait: Duration,
}

impl WorldClient {
    /// Open the event stream and build the REST transport from config.
    /// A previously assigned id is offered in the handshake so the world
    /// can resume the same citizen. Returns the client and the inbound
    /// event channel.
    pub fn connect(
        config: &AgentConfig,
        known_agent_id: Option<String>,
    ) -> Result<(Self, mpsc::Receiver<ServerEvent>)> {
        let api_key: ApiKey = Arc::new(ArcSwapOption::from(
            config.server.api_key.clone().map(Arc::new),
        ));
        // Only used for the handshake until the world confirms it.
        let offered = known_agent_id.filter(|id| !id.is_empty());
        let agent_id: Arc<ArcSwapOption<String>> = Arc::new(ArcSwapOption::empty());

        let handshake = {
            let api_key = api_key.clone();
            let agent_id = agent_id.clone();
            let agent = config.agent.clone();
            move || {
                let id = agent_id
                    .load_full()
                    .map(|id| id.to_string())
                    .or_else(|| offered.clone());
                frame(
                    "agent:connect",
                    json!({
                        "apiKey": api_key.load_full().map(|k| k.to_string()),
                        "agentId": id,
                        "agentName": agent.name,
                        "avatar": agent.avatar,
                        "permissions": agent.permissions,
                    }),
                )
            }
        };
        let (outgoing, events) = EventStream::spawn(&config.server.url, handshake)?;
        let http = HttpTransport::new(&config.server.http_base_url(), &config.http, api_key.clone())?;

        Ok((Self::assemble(http, outgoing, api_key, agent_id), events))
    }

    /// Assemble from an existing transport and outgoing frame channel.
    pub fn from_parts(http: HttpTransport, outgoing: mpsc::Sender<String>, api_key: ApiKey) -> Self {
        Self::assemble(http, outgoing, api_key, Arc::new(ArcSwapOption::empty()))
    }

    fn assemble(
        http: HttpTransport,
        outgoing: mpsc::Sender<String>,
        api_key: ApiKey,
        agent_id: Arc<ArcSwapOption<String>>,
    ) -> Self {
        Self {
            http,
            outgoing,
            api_key,
            agent_id,
            latest: Mutex::new(None),
            world_cache: Mutex::new(None),
            perceive_wait: PERCEIVE_WAIT,
        }
    }

    pub fn with_perceive_wait(mut self, wait: Duration) -> Self {
        self.perceive_wait = wait;
        self
    }

    pub fn agent_id(&self) -> Option<String> {
        self.agent_id
            .load_full()
            .map(|id| id.to_string())
            .filter(|id| !id.is_empty())
    }

    /// Fold connection-level state out of an inbound event.
    pub fn absorb(&self, event: &ServerEvent) {
        match event {
            ServerEvent::Registered { agent_id, snapshot } => {
                tracing::info!(agent_id = %agent_id, "registered with world");
                self.agent_id.store(Some(Arc::new(agent_id.clone())));
                if let Some(snapshot) = snapshot {
                    self.store_snapshot(snapshot.clone());
                }
            }
            ServerEvent::AuthRotated { api_key } if !api_key.is_empty() => {
                tracing::info!("API key rotated");
                self.api_key.store(Some(Arc::new(api_key.clone())));
            }
            ServerEvent::PerceptionUpdate(snapshot) => self.store_snapshot(snapshot.clone()),
            ServerEvent::Error { message } => tracing::warn!(error = %message, "world reported an error"),
            _ => {}
        }
    }

    fn store_snapshot(&self, snapshot: Value) {
        if let Ok(mut latest) = self.latest.lock() {
            *latest = Some(snapshot);
        }
    }

    fn require_agent(&self) -> std::result::Result<String, Reply> {
        self.agent_id().ok_or_else(|| Reply {
            status: None,
            error: Some(NOT_REGISTERED.to_string()),
            body: Value::Null,
        })
    }

    async fn emit(&self, event: &str, data: Value) -> std::result::Result<(), Reply> {
        self.outgoing
            .send(frame(event, data))
            .await
            .map_err(|_| Reply::transport("event stream closed"))
    }

    async fn emit_action(&self, event: &str, data: Value, ok: Value) -> Reply {
        if let Err(reply) = self.require_agent() {
            return reply;
        }
        match self.emit(event, data).await {
            Ok(()) => Reply::ok(ok),
            Err(reply) => reply,
        }
    }

    fn listing<T: DeserializeOwned>(reply: Reply, key: &str) -> Result<Vec<T>> {
        if reply.is_failure() {
            bail!(
                "listing {} failed: {}",
                key,
                reply.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        match reply.body.get(key) {
            Some(items) if !items.is_null() => serde_json::from_value(items.clone())
                .with_context(|| format!("Malformed {key} listing")),
            _ => Ok(Vec::new()),
        }
    }

    fn proposal_path(query: &ProposalQuery) -> String {
        let mut params = url::form_urlencoded::Serializer::new(String::new());
        params.append_pair("limit", &query.limit.max(1).to_string());
        if query.mine {
            params.append_pair("mine", "true");
        }
        if let Some(status) = query.status.as_deref().filter(|s| !s.is_empty()) {
            params.append_pair("status", status);
        }
        format!("/api/coordination/proposals?{}", params.finish())
    }
}

#[async_trait]
impl World for WorldClient {
    async fn perceive(&self) -> Result<Perception> {
        if self.agent_id().is_none() {
            bail!(NOT_REGISTERED);
        }
        if self.emit("agent:perceive", json!({})).await.is_err() {
            bail!("event stream closed");
        }
        tokio::time::sleep(self.perceive_wait).await;
        let snapshot = self
            .latest
            .lock()
            .ok()
            .and_then(|latest| latest.clone())
            .context("No perception received yet")?;
        serde_json::from_value(snapshot).context("Malformed perception snapshot")
    }

    async fn move_to(&self, target: Position) -> Reply {
        self.emit_action(
            "agent:moveTo",
            json!({ "targetX": target.x, "targetY": target.y }),
            json!({ "success": true, "target": { "x": target.x, "y": target.y } }),
        )
        .await
    }

    async fn speak(&self, message: &str) -> Reply {
        self.emit_action(
            "agent:speak",
            json!({ "message": message }),
            json!({ "success": true }),
        )
        .await
    }

    async fn enter_building(&self, building_id: &str) -> Reply {
        self.emit_action(
            "agent:action",
            json!({ "actionType": "enter_building", "target": building_id, "params": {} }),
            json!({ "success": true, "building": building_id }),
        )
        .await
    }

    async fn start_conversation(&self, target_id: &str, message: &str) -> Reply {
        let agent_id = match self.require_agent() {
            Ok(id) => id,
            Err(reply) => return reply,
        };
        self.http
            .post(
                &format!("/api/moltbot/{agent_id}/conversations/start"),
                &json!({ "targetId": target_id, "message": message }),
            )
            .await
    }

    async fn send_conversation_message(&self, conversation_id: &str, message: &str) -> Reply {
        let agent_id = match self.require_agent() {
            Ok(id) => id,
            Err(reply) => return reply,
        };
        self.http
            .post(
                &format!("/api/moltbot/{agent_id}/conversations/{conversation_id}/message"),
                &json!({ "message": message }),
            )
            .await
    }

    async fn end_conversation(&self, conversation_id: &str) -> Reply {
        let agent_id = match self.require_agent() {
            Ok(id) => id,
            Err(reply) => return reply,
        };
        self.http
            .post(
                &format!("/api/moltbot/{agent_id}/conversations/{conversation_id}/end"),
                &json!({}),
            )
            .await
    }

    async fn list_jobs(&self) -> Result<Vec<Job>> {
        Self::listing(self.http.get("/api/economy/jobs").await, "jobs")
    }

    async fn apply_job(&self, job_id: &str) -> Reply {
        let agent_id = match self.require_agent() {
            Ok(id) => id,
            Err(reply) => return reply,
        };
        self.http
            .post(
                "/api/economy/jobs/apply",
                &json!({ "agentId": agent_id, "jobId": job_id }),
            )
            .await
    }

    async fn vote_job(&self, applicant_id: &str, job_id: &str) -> Reply {
        let agent_id = match self.require_agent() {
            Ok(id) => id,
            Err(reply) => return reply,
        };
        self.http
            .post(
                "/api/economy/jobs/vote",
                &json!({ "applicantId": applicant_id, "voterId": agent_id, "jobId": job_id }),
            )
            .await
    }

    async fn list_properties(&self) -> Result<Vec<Property>> {
        Self::listing(self.http.get("/api/economy/properties").await, "properties")
    }

    async fn buy_property(&self, property_id: &str) -> Reply {
        let agent_id = match self.require_agent() {
            Ok(id) => id,
            Err(reply) => return reply,
        };
        self.http
            .post(
                "/api/economy/properties/buy",
                &json!({ "agentId": agent_id, "propertyId": property_id }),
            )
            .await
    }

    async fn list_proposals(&self, query: &ProposalQuery) -> Result<Vec<Proposal>> {
        Self::listing(self.http.get(&Self::proposal_path(query)).await, "proposals")
    }

    async fn create_proposal(
        &self,
        title: &str,
        description: &str,
        category: &str,
        required_roles: &[RoleSlot],
    ) -> Reply {
        self.http
            .post(
                "/api/coordination/proposals",
                &json!({
                    "title": title,
                    "description": description,
                    "category": category,
                    "requiredRoles": required_roles,
                }),
            )
            .await
    }

    async fn join_proposal(&self, proposal_id: &str, role: &str) -> Reply {
        self.http
            .post(
                &format!("/api/coordination/proposals/{proposal_id}/join"),
                &json!({ "role": role }),
            )
            .await
    }

    async fn commit_to_proposal(&self, proposal_id: &str, task: &str, role: &str) -> Reply {
        self.http
            .post(
                &format!("/api/coordination/proposals/{proposal_id}/commit"),
                &json!({ "task": task, "role": role }),
            )
            .await
    }

    async fn update_commitment(
        &self,
        proposal_id: &str,
        commitment_id: &str,
        update: &CommitmentUpdate,
    ) -> Reply {
        let mut payload = json!({ "notes": update.notes, "progress": update.progress });
        if !update.status.is_empty() {
            payload["status"] = json!(update.status);
        }
        self.http
            .patch(
                &format!("/api/coordination/proposals/{proposal_id}/commit/{commitment_id}"),
                &payload,
            )
            .await
    }

    async fn set_proposal_status(&self, proposal_id: &str, status: &str, summary: &str) -> Reply {
        self.http
            .patch(
                &format!("/api/coordination/proposals/{proposal_id}/status"),
                &json!({ "status": status, "summary": summary }),
            )
            .await
    }

    async fn create_event(&self, event: &Value) -> Reply {
        self.http.post("/api/events", event).await
    }

    async fn join_event(&self, event_id: &str) -> Reply {
        self.http
            .post(&format!("/api/events/{event_id}/join"), &json!({}))
            .await
    }

    async fn register_candidate(&self, name: &str, platform: &str) -> Reply {
        let agent_id = match self.require_agent() {
            Ok(id) => id,
            Err(reply) => return reply,
        };
        self.http
            .post(
                "/api/governance/candidate",
                &json!({ "agentId": agent_id, "name": name, "platform": platform }),
            )
            .await
    }

    async fn propose_negotiation(&self, target_id: &str, job_id: Option<&str>) -> Reply {
        let agent_id = match self.require_agent() {
            Ok(id) => id,
            Err(reply) => return reply,
        };
        if target_id.is_empty() {
            return Reply {
                status: None,
                error: Some("Missing target".to_string()),
                body: Value::Null,
            };
        }
        self.http
            .post(
                "/api/negotiation/propose",
                &json!({
                    "from": agent_id,
                    "to": target_id,
                    "ask": { "type": "vote_job", "jobId": job_id },
                    "offer": { "type": "favor", "value": 1, "reason": "voto" },
                    "reason": "negociacion_trabajo",
                }),
            )
            .await
    }

    async fn world_state(&self) -> Result<WorldState> {
        if let Ok(cache) = self.world_cache.lock() {
            if let Some((at, state)) = cache.as_ref() {
                if at.elapsed() <= WORLD_STATE_TTL {
                    return Ok(state.clone());
                }
            }
        }
        let reply = self.http.get("/api/world/state").await;
        if reply.is_failure() {
            bail!(
                "world state unavailable: {}",
                reply.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        let state: WorldState =
            serde_json::from_value(reply.body).context("Malformed world state")?;
        if let Ok(mut cache) = self.world_cache.lock() {
            *cache = Some((Instant::now(), state.clone()));
        }
        Ok(state)
    }

    async fn publish_profile(&self, profile: &Value) {
        if self.agent_id().is_none() {
            return;
        }
        if self.emit("agent:profile", profile.clone()).await.is_err() {
            tracing::debug!("profile not sent: event stream closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::HttpConfig;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(uri: &str) -> (WorldClient, mpsc::Receiver<String>) {
        let config = HttpConfig {
            timeout_secs: 2.0,
            retries: 0,
            backoff_secs: 0.0,
        };
        let api_key: ApiKey = Arc::new(ArcSwapOption::empty());
        let http = HttpTransport::new(uri, &config, api_key.clone()).unwrap();
        let (tx, rx) = mpsc::channel(16);
        let client = WorldClient::from_parts(http, tx, api_key).with_perceive_wait(Duration::ZERO);
        (client, rx)
    }

    fn register(client: &WorldClient) {
        client.absorb(&ServerEvent::Registered {
            agent_id: "me".into(),
            snapshot: None,
        });
    }

    #[tokio::test]
    async fn test_unregistered_calls_are_refused_locally() {
        let (client, _rx) = client("http://127.0.0.1:9");
        let reply = client.apply_job("j1").await;
        assert_eq!(reply.error.as_deref(), Some(NOT_REGISTERED));
        assert_eq!(reply.status, None);
        assert!(client.perceive().await.is_err());
    }

    #[tokio::test]
    async fn test_perceive_returns_latest_snapshot() {
        let (client, mut rx) = client("http://127.0.0.1:9");
        register(&client);
        assert!(client.perceive().await.is_err(), "no snapshot yet");

        client.absorb(&ServerEvent::PerceptionUpdate(json!({
            "position": { "x": 4, "y": 9 },
            "nearbyAgents": [{ "id": "b" }]
        })));
        let perception = client.perceive().await.unwrap();
        assert_eq!(perception.position, Some(Position { x: 4, y: 9 }));
        assert_eq!(perception.nearby_agents.len(), 1);

        let sent = rx.recv().await.unwrap();
        assert!(sent.contains("agent:perceive"));
    }

    #[tokio::test]
    async fn test_move_emits_frame_and_echoes_target() {
        let (client, mut rx) = client("http://127.0.0.1:9");
        register(&client);
        let reply = client.move_to(Position { x: 3, y: 7 }).await;
        assert_eq!(reply.body["target"], json!({ "x": 3, "y": 7 }));
        let sent: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(sent["event"], "agent:moveTo");
        assert_eq!(sent["data"], json!({ "targetX": 3, "targetY": 7 }));
    }

    #[tokio::test]
    async fn test_rotated_key_is_used_by_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/economy/properties"))
            .and(wiremock::matchers::header("x-api-key", "fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "properties": [{ "id": "p1", "price": 120.0, "forSale": true }]
            })))
            .mount(&server)
            .await;

        let (client, _rx) = client(&server.uri());
        client.absorb(&ServerEvent::AuthRotated { api_key: "fresh".into() });
        let properties = client.list_properties().await.unwrap();
        assert_eq!(properties.len(), 1);
        assert!(properties[0].for_sale);
    }

    #[tokio::test]
    async fn test_job_endpoints() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/economy/jobs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jobs": [{ "id": "j1", "role": "barista", "application": { "applicantId": "b", "votes": 1 } }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/economy/jobs/vote"))
            .and(body_json(json!({ "applicantId": "b", "voterId": "me", "jobId": "j1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        let (client, _rx) = client(&server.uri());
        register(&client);
        let jobs = client.list_jobs().await.unwrap();
        assert_eq!(jobs[0].applicant(), Some("b"));
        let reply = client.vote_job("b", "j1").await;
        assert!(!reply.is_failure());
    }

    #[tokio::test]
    async fn test_listing_failure_is_err() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/economy/jobs"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "error": "forbidden" })))
            .mount(&server)
            .await;
        let (client, _rx) = client(&server.uri());
        let err = client.list_jobs().await.unwrap_err();
        assert!(err.to_string().contains("forbidden"));
    }

    #[tokio::test]
    async fn test_proposal_query_string() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/coordination/proposals"))
            .and(query_param("limit", "20"))
            .and(query_param("mine", "true"))
            .and(query_param("status", "in_progress"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "proposals": [{ "id": "pr1", "status": "in_progress" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (client, _rx) = client(&server.uri());
        let proposals = client
            .list_proposals(&ProposalQuery {
                limit: 20,
                mine: true,
                status: Some("in_progress".into()),
            })
            .await
            .unwrap();
        assert!(proposals[0].is_active());
    }

    #[tokio::test]
    async fn test_conversation_start_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/moltbot/me/conversations/start"))
            .and(body_json(json!({ "targetId": "b", "message": "hola" })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "conversation": { "id": "c1" } })),
            )
            .mount(&server)
            .await;

        let (client, _rx) = client(&server.uri());
        register(&client);
        let reply = client.start_conversation("b", "hola").await;
        assert_eq!(reply.body["conversation"]["id"], "c1");
    }

    #[tokio::test]
    async fn test_world_state_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/world/state"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "buildings": [{ "id": "cafe", "position": { "x": 10, "y": 6 } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (client, _rx) = client(&server.uri());
        let first = client.world_state().await.unwrap();
        let second = client.world_state().await.unwrap();
        assert_eq!(first.building_position("cafe"), Some(Position { x: 10, y: 6 }));
        assert_eq!(first, second);
    }
}
