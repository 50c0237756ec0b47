//! Mission Execution
//!
//! Flight phase sequencing over an established session, and position
//! telemetry observation during navigation.

mod observer;
mod sequencer;

pub use observer::{LogSink, PositionObserver, PositionSink};
pub use sequencer::{MissionConfig, MissionSequencer};
