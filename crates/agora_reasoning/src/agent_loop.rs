use crate::citizen::Citizen;
use agora_core::BehaviorConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;

// ============================================================================
// LoopEvent
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum LoopEvent {
    /// A decision cycle finished; carries the executed action kind, if any.
    Decided(Option<&'static str>),
    /// A decision cycle failed before deciding.
    TickFailed(String),
    /// An auto-explore step was sent.
    Explored,
}

/// Which periodic task drives the citizen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    Decision(Duration),
    Explore(Duration),
    Idle,
}

impl LoopMode {
    pub fn from_config(behavior: &BehaviorConfig) -> Self {
        if behavior.decision_loop.enabled {
            LoopMode::Decision(behavior.decision_loop.interval())
        } else if behavior.auto_explore {
            LoopMode::Explore(behavior.explore_interval())
        } else {
            LoopMode::Idle
        }
    }
}

// ============================================================================
// AgentLoop
// ============================================================================

pub struct AgentLoop {
    citizen: Arc<Citizen>,
    mode: LoopMode,
    event_tx: tokio::sync::mpsc::Sender<LoopEvent>,
}

impl AgentLoop {
    /// Create a new AgentLoop.
    ///
    /// Returns `(AgentLoop, Receiver)`; dropping the receiver stops the loop
    /// after its current cycle.
    pub fn new(
        citizen: Arc<Citizen>,
        behavior: &BehaviorConfig,
    ) -> (Self, tokio::sync::mpsc::Receiver<LoopEvent>) {
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let agent = Self {
            citizen,
            mode: LoopMode::from_config(behavior),
            event_tx: tx,
        };
        (agent, rx)
    }

    pub fn mode(&self) -> LoopMode {
        self.mode
    }

    async fn cycle(&self) -> Option<LoopEvent> {
        // Nothing can be perceived before the world assigns an id.
        if self.citizen.agent_id().await.is_empty() {
            return None;
        }
        match self.mode {
            LoopMode::Decision(_) => Some(match self.citizen.tick().await {
                Ok(action) => LoopEvent::Decided(action.map(|a| a.kind())),
                Err(e) => {
                    tracing::warn!(stage = "decision_error", error = %format!("{e:#}"), "decision cycle failed");
                    LoopEvent::TickFailed(e.to_string())
                }
            }),
            LoopMode::Explore(_) => match self.citizen.explore_step().await {
                Ok(Some(_)) => Some(LoopEvent::Explored),
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!(error = %e, "explore step failed");
                    None
                }
            },
            LoopMode::Idle => None,
        }
    }

    /// Spawn the background loop. Runs until the receiver is dropped or the
    /// handle is aborted. Returns `None` when no periodic task is configured.
    pub fn spawn(self) -> Option<tokio::task::JoinHandle<()>> {
        let period = match self.mode {
            LoopMode::Decision(d) | LoopMode::Explore(d) => d,
            LoopMode::Idle => return None,
        };
        Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                let Some(event) = self.cycle().await else {
                    continue;
                };
                match self.event_tx.try_send(event) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!("AgentLoop: event channel full, dropping event");
                    }
                    Err(TrySendError::Closed(_)) => {
                        tracing::info!("AgentLoop: receiver dropped, shutting down");
                        return;
                    }
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeWorld;
    use agora_core::{AgentConfig, ManualClock, Perception, Position};
    use agora_memory::MemoryStore;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn citizen(config: &AgentConfig) -> (Arc<Citizen>, Arc<FakeWorld>) {
        let world = Arc::new(FakeWorld::new(Perception {
            position: Some(Position { x: 5, y: 5 }),
            ..Default::default()
        }));
        let citizen = Arc::new(Citizen::new(
            world.clone(),
            None,
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::starting_at(0)),
            config.clone(),
            StdRng::seed_from_u64(3),
        ));
        (citizen, world)
    }

    #[test]
    fn test_mode_selection() {
        let mut behavior = BehaviorConfig::default();
        assert!(matches!(LoopMode::from_config(&behavior), LoopMode::Decision(_)));
        behavior.decision_loop.enabled = false;
        assert_eq!(
            LoopMode::from_config(&behavior),
            LoopMode::Explore(Duration::from_millis(30_000))
        );
        behavior.auto_explore = false;
        assert_eq!(LoopMode::from_config(&behavior), LoopMode::Idle);
    }

    #[tokio::test]
    async fn test_idle_loop_spawns_nothing() {
        let mut config = AgentConfig::default();
        config.behavior.decision_loop.enabled = false;
        config.behavior.auto_explore = false;
        let (citizen, _world) = citizen(&config);
        let (agent, _rx) = AgentLoop::new(citizen, &config.behavior);
        assert!(agent.spawn().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregistered_citizen_does_not_tick() {
        let config = AgentConfig::default();
        let (citizen, world) = citizen(&config);
        let (agent, _rx) = AgentLoop::new(citizen, &config.behavior);
        let handle = agent.spawn().unwrap();
        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(world.count("perceive"), 0);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_decision_loop_reports_each_cycle() {
        let config = AgentConfig::default();
        let (citizen, world) = citizen(&config);
        citizen.on_registered("me").await;
        let (agent, mut rx) = AgentLoop::new(citizen, &config.behavior);
        let handle = agent.spawn().unwrap();

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, LoopEvent::Decided(Some(_))));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, LoopEvent::Decided(_)));
        assert!(world.count("perceive") >= 2);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_explore_loop_moves() {
        let mut config = AgentConfig::default();
        config.behavior.decision_loop.enabled = false;
        let (citizen, world) = citizen(&config);
        citizen.on_registered("me").await;
        let (agent, mut rx) = AgentLoop::new(citizen, &config.behavior);
        let handle = agent.spawn().unwrap();
        assert_eq!(rx.recv().await, Some(LoopEvent::Explored));
        assert_eq!(world.count("move_to"), 1);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_stops_when_receiver_dropped() {
        let config = AgentConfig::default();
        let (citizen, _world) = citizen(&config);
        citizen.on_registered("me").await;
        let (agent, rx) = AgentLoop::new(citizen, &config.behavior);
        drop(rx);
        let handle = agent.spawn().unwrap();
        let result = tokio::time::timeout(Duration::from_secs(120), handle).await;
        assert!(result.is_ok(), "loop should exit after the first send fails");
    }
}
