//! Session Lifecycle
//!
//! Discovery, readiness and heartbeat-stability gating of one vehicle link.

mod controller;
mod discovery;
mod gates;

pub use controller::{SessionConfig, SessionController};
pub use discovery::DiscoveryConfig;
pub use gates::HeartbeatGateConfig;
