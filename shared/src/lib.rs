//! Sortie Shared Mission Types
//!
//! This crate provides the value types, mission phase state machine and
//! error taxonomy shared by the link adapter, the session lifecycle and the
//! mission sequencer.

pub mod error;
pub mod geo;
pub mod state_machine;

pub use error::{Capability, ErrorKind, GeoError, LinkError, MissionError};
pub use geo::{GeoPoint, PositionSample};
pub use state_machine::{MissionPhase, PhaseTracker, TransitionResult};

/// Timing and policy parameters for the link and the mission
pub mod policy {
    /// Overall wall-clock bound on device discovery
    pub const DISCOVERY_TIMEOUT_MS: u64 = 60_000;

    /// A discovered device not heard from for this long is considered stale
    pub const DEVICE_TIMEOUT_MS: u64 = 1_000;

    /// Delay before reopening a transport that failed or dropped during discovery
    pub const TRANSPORT_RETRY_INTERVAL_MS: u64 = 2_000;

    /// Interval between stale-device sweeps of the browser
    pub const DEVICE_CHECK_INTERVAL_MS: u64 = 30_000;

    /// Heartbeats closer together than this are coalesced into one sample
    pub const HEARTBEAT_MIN_INTERVAL_MS: u64 = 100;

    /// Accepted heartbeat samples required before the link counts as stable
    pub const HEARTBEAT_REQUIRED_SAMPLES: u32 = 20;

    /// Hover settle delay after a mode change and after takeoff
    pub const SETTLE_DELAY_MS: u64 = 5_000;

    /// Command ACK timeout in milliseconds
    pub const COMMAND_ACK_TIMEOUT_MS: u64 = 3_000;

    /// Command resends after the first send before giving up
    pub const COMMAND_MAX_RETRIES: u32 = 3;

    /// Interval of the ground station heartbeat sent to the vehicle
    pub const GCS_HEARTBEAT_INTERVAL_MS: u64 = 1_000;

    /// Requested interval of GLOBAL_POSITION_INT telemetry
    pub const POSITION_STREAM_INTERVAL_MS: u64 = 200;

    /// Horizontal distance at which a go-to target counts as reached
    pub const ARRIVAL_RADIUS_M: f64 = 2.0;
}
