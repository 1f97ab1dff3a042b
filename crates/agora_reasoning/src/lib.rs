pub mod agent_loop;
pub mod candidates;
pub mod citizen;
pub mod context;
pub mod conversation;
pub mod extraction;
pub mod guard;
pub mod hotspots;
pub mod intent;
pub mod llm;
pub mod prompts;
pub mod providers;
pub mod retry;
pub mod sanitize;
pub mod scoring;

#[cfg(test)]
mod testing;

pub use agent_loop::{AgentLoop, LoopEvent, LoopMode};
pub use citizen::Citizen;
pub use llm::{CompletionParams, LlmClient};
pub use providers::create_client;
