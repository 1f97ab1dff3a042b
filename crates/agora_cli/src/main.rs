use agora_core::store::section;
use agora_core::{AgentConfig, StateStore, SystemClock, World};
use agora_memory::SqliteStore;
use agora_reasoning::{create_client, AgentLoop, Citizen, LoopEvent};
use agora_world::{ServerEvent, WorldClient};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the agent config file
    #[arg(short, long, default_value = "agent.toml")]
    config: PathBuf,

    /// Path to the state database (overrides the config file)
    #[arg(short, long)]
    db: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, env = "AGORA_JSON_LOGS")]
    json_logs: bool,

    /// Also write daily-rolled log files into this directory
    #[arg(long, env = "AGORA_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

fn init_logging(json: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "agora.log"));
            (
                Some(fmt::layer().json().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(|| fmt::layer()))
        .with(file_layer)
        .init();
    guard
}

/// `agent.toml` in the working directory, else the per-user config dir.
fn resolve_config(path: &Path) -> PathBuf {
    if path.exists() || path != Path::new("agent.toml") {
        return path.to_path_buf();
    }
    dirs::config_dir()
        .map(|dir| dir.join("agora").join("agent.toml"))
        .filter(|p| p.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

async fn dispatch(citizen: &Arc<Citizen>, world: &WorldClient, event: ServerEvent) {
    match event {
        ServerEvent::Registered { agent_id, .. } => citizen.on_registered(&agent_id).await,
        ServerEvent::Speech { from, message } => citizen.on_speech(&from, &message).await,
        ServerEvent::ConversationStarted { id, participants } => {
            let me = world.agent_id();
            if let Some(other) = participants.iter().find(|p| Some(p.as_str()) != me.as_deref()) {
                citizen.on_conversation_started(&id, other).await;
            }
        }
        ServerEvent::ConversationMessage {
            conversation_id,
            from_id,
            message,
        } => {
            citizen
                .on_conversation_message(&conversation_id, &from_id, &message)
                .await
        }
        ServerEvent::ConversationEnded { conversation_id } => {
            citizen.on_conversation_ended(&conversation_id).await
        }
        ServerEvent::Goal(goal) => citizen.on_goal(goal).await,
        _ => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    let _log_guard = init_logging(args.json_logs, args.log_dir.as_deref());

    info!("Initializing Agora...");

    // 1. Config
    let config_path = resolve_config(&args.config);
    let mut config = AgentConfig::load_or_default(&config_path);
    if let Some(db) = args.db {
        config.memory.db_path = db;
    }
    info!(name = %config.agent.name, server = %config.server.url, "config loaded from {}", config_path.display());

    // 2. State store
    info!("Opening state at {}...", config.memory.db_path);
    let store = Arc::new(SqliteStore::new(&config.memory.db_path).await?);
    let known_id = store
        .load_section(section::AGENT_ID)
        .await?
        .and_then(|v| v.as_str().map(str::to_string));

    // 3. World connection
    let (world, mut events) = WorldClient::connect(&config, known_id)?;
    let world = Arc::new(world);

    // 4. Citizen
    let llm = create_client(&config.llm);
    if llm.is_none() {
        info!("No text generator configured; running heuristics only");
    }
    let citizen = Arc::new(Citizen::new(
        world.clone() as Arc<dyn World>,
        llm,
        store,
        Arc::new(SystemClock),
        config.clone(),
        StdRng::from_entropy(),
    ));
    citizen.load().await?;
    citizen.ensure_profile().await;

    // 5. Periodic loop
    let (agent_loop, mut loop_events) = AgentLoop::new(citizen.clone(), &config.behavior);
    info!(mode = ?agent_loop.mode(), "starting agent loop");
    let loop_handle = agent_loop.spawn();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    error!("World connection closed");
                    break;
                };
                world.absorb(&event);
                if event.is_revocation() {
                    error!("API key revoked; disconnecting");
                    break;
                }
                dispatch(&citizen, &world, event).await;
            }
            Some(report) = loop_events.recv() => {
                match report {
                    LoopEvent::TickFailed(e) => warn!(error = %e, "decision cycle failed"),
                    other => tracing::debug!(event = ?other, "loop"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    if let Some(handle) = loop_handle {
        handle.abort();
    }
    citizen.persist().await;
    info!("State saved. Goodbye.");
    Ok(())
}
