//! Mission log sink
//!
//! The mission sequencer reports through four message kinds. The default
//! implementation forwards them to `tracing`.

use std::error::Error;
use tracing::{error, info};

/// Receives mission-level log messages
pub trait MissionLog: Send + Sync {
    fn info(&self, message: &str);

    fn error(&self, message: &str, cause: Option<&dyn Error>);

    fn mission_start(&self, name: &str);

    fn mission_end(&self, name: &str);
}

/// Forwards mission messages to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl MissionLog for TracingLog {
    fn info(&self, message: &str) {
        info!("[MISSION] {}", message);
    }

    fn error(&self, message: &str, cause: Option<&dyn Error>) {
        match cause {
            Some(cause) => error!(cause = %cause, "[MISSION] {}", message),
            None => error!("[MISSION] {}", message),
        }
    }

    fn mission_start(&self, name: &str) {
        info!(mission = name, "[MISSION START] {}", name);
    }

    fn mission_end(&self, name: &str) {
        info!(mission = name, "[MISSION END] {}", name);
    }
}
