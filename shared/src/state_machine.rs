//! Mission Phase State Machine
//!
//! Phases advance strictly forward one step at a time. `Failed` is reachable
//! from every non-terminal phase; nothing leaves `Complete` or `Failed`.

use std::fmt;

/// Stages of a session and its scripted flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MissionPhase {
    NotStarted,
    Connecting,
    Connected,
    TakingOff,
    EnRoute,
    Landing,
    Complete,
    Failed,
}

impl MissionPhase {
    /// Whether no further transition is possible
    pub fn is_terminal(self) -> bool {
        matches!(self, MissionPhase::Complete | MissionPhase::Failed)
    }

    /// The phase that normally follows this one
    pub fn successor(self) -> Option<MissionPhase> {
        use MissionPhase::*;

        match self {
            NotStarted => Some(Connecting),
            Connecting => Some(Connected),
            Connected => Some(TakingOff),
            TakingOff => Some(EnRoute),
            EnRoute => Some(Landing),
            Landing => Some(Complete),
            Complete | Failed => None,
        }
    }
}

impl fmt::Display for MissionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result of a phase transition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid and the phase changed
    Success(MissionPhase),
    /// Transition was invalid from the current phase
    Invalid {
        from: MissionPhase,
        to: MissionPhase,
    },
}

impl TransitionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TransitionResult::Success(_))
    }
}

/// Tracks the current phase and enforces monotonic progression
#[derive(Debug)]
pub struct PhaseTracker {
    current: MissionPhase,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    /// Create a new tracker in `NotStarted`
    pub fn new() -> Self {
        Self {
            current: MissionPhase::NotStarted,
        }
    }

    /// Get current phase
    pub fn phase(&self) -> MissionPhase {
        self.current
    }

    /// Attempt to move to `to`
    pub fn advance(&mut self, to: MissionPhase) -> TransitionResult {
        let valid = if to == MissionPhase::Failed {
            !self.current.is_terminal()
        } else {
            self.current.successor() == Some(to)
        };

        if valid {
            self.current = to;
            TransitionResult::Success(to)
        } else {
            TransitionResult::Invalid {
                from: self.current,
                to,
            }
        }
    }

    /// Move to `Failed` unless already terminal
    pub fn fail(&mut self) -> TransitionResult {
        self.advance(MissionPhase::Failed)
    }
}
