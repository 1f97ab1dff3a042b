pub mod action;
pub mod clock;
pub mod config;
pub mod error;
pub mod safety;
pub mod store;
pub mod traits;
pub mod world;

pub use action::ActionCandidate;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::*;
pub use error::{AgentError, Rejection};
pub use safety::is_meta_content;
pub use store::{Episode, StateStore, EPISODE_CAP};
pub use traits::{Profile, TraitOverrides, Traits};
pub use world::*;
