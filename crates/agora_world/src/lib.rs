pub mod client;
pub mod event;
pub mod http;
pub mod socket;

pub use client::WorldClient;
pub use event::ServerEvent;
pub use http::{ApiKey, HttpTransport};
pub use socket::EventStream;
