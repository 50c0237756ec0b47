//! Error taxonomy for the link and the mission

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::state_machine::MissionPhase;

/// Device capabilities looked up at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Readiness state stream
    State,
    /// Raw heartbeat stream
    Heartbeat,
    /// Global position telemetry stream
    Position,
    /// Flight command interface
    FlightControl,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::State => write!(f, "state"),
            Capability::Heartbeat => write!(f, "heartbeat"),
            Capability::Position => write!(f, "position"),
            Capability::FlightControl => write!(f, "flight control"),
        }
    }
}

/// Errors raised by the protocol collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Failed to open {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("Invalid endpoint {0:?}, expected tcp://host:port, udp://host:port or serial://port@baud")]
    InvalidEndpoint(String),

    #[error("Link I/O error: {0}")]
    Io(String),

    #[error("Link closed")]
    Closed,

    #[error("{command} rejected by vehicle: {result}")]
    Rejected { command: String, result: String },

    #[error("No acknowledgement for {command} after {attempts} attempts")]
    AckTimeout { command: String, attempts: u32 },
}

/// Errors that end a session or a mission
#[derive(Error, Debug)]
pub enum MissionError {
    #[error("No device discovered within {0:?}")]
    DiscoveryTimeout(Duration),

    #[error("Device has no {0} capability")]
    CapabilityMissing(Capability),

    #[error("Command {command} failed: {source}")]
    CommandFailure {
        command: &'static str,
        #[source]
        source: LinkError,
    },

    #[error("Cancelled during {0}")]
    Cancelled(&'static str),

    #[error("{operation} is not allowed in phase {phase}")]
    InvalidState {
        operation: &'static str,
        phase: MissionPhase,
    },

    #[error("Device stream closed during {0}")]
    Disconnected(&'static str),
}

/// Flat kind of a [`MissionError`], for logging and matching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DiscoveryTimeout,
    CapabilityMissing,
    CommandFailure,
    Cancelled,
    InvalidState,
    Disconnected,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl MissionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MissionError::DiscoveryTimeout(_) => ErrorKind::DiscoveryTimeout,
            MissionError::CapabilityMissing(_) => ErrorKind::CapabilityMissing,
            MissionError::CommandFailure { .. } => ErrorKind::CommandFailure,
            MissionError::Cancelled(_) => ErrorKind::Cancelled,
            MissionError::InvalidState { .. } => ErrorKind::InvalidState,
            MissionError::Disconnected(_) => ErrorKind::Disconnected,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}

/// Errors building a [`GeoPoint`](crate::GeoPoint)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeoError {
    #[error("{axis} {value} micro-degrees is outside ±{limit}")]
    OutOfRange {
        axis: &'static str,
        value: i32,
        limit: i32,
    },

    #[error("{axis} is not a finite number")]
    NotFinite { axis: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_kinds_are_distinct() {
        let timeout = MissionError::DiscoveryTimeout(Duration::from_secs(60));
        let cancelled = MissionError::Cancelled("discovery");
        let missing = MissionError::CapabilityMissing(Capability::Heartbeat);

        assert_eq!(timeout.kind(), ErrorKind::DiscoveryTimeout);
        assert_eq!(missing.kind(), ErrorKind::CapabilityMissing);
        assert!(cancelled.is_cancelled());
        assert!(!timeout.is_cancelled());
    }

    #[test]
    fn test_command_failure_keeps_cause() {
        let err = MissionError::CommandFailure {
            command: "land",
            source: LinkError::Closed,
        };
        assert_eq!(err.to_string(), "Command land failed: Link closed");
        assert_eq!(err.source().map(|s| s.to_string()), Some("Link closed".into()));
    }

    #[test]
    fn test_invalid_state_message() {
        let err = MissionError::InvalidState {
            operation: "take off",
            phase: MissionPhase::NotStarted,
        };
        assert_eq!(err.to_string(), "take off is not allowed in phase NotStarted");
    }
}
