pub mod intent_queue;
pub mod job_strategy;
pub mod memory_store;
pub mod motivation;
pub mod relationships;
pub mod sqlite;
pub mod state;

pub use intent_queue::{IntentQueue, QueueItem, QueueMetrics};
pub use job_strategy::{reply_succeeded, BlockCode, Feedback, JobAction, JobStrategyState};
pub use memory_store::MemoryStore;
pub use motivation::{required_outcome, Desire, MotivationState, ProgressSignals, Step, StepStatus};
pub use relationships::{approval_ratio, RelationshipDelta, RelationshipEntry, RelationshipLedger};
pub use sqlite::SqliteStore;
pub use state::{GoalState, HealthEntry, HealthMetrics, PlanState};
