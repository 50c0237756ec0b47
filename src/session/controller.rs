//! Session lifecycle
//!
//! A [`Session`] is one connect-through-disposal lifetime. The
//! [`SessionController`] composes discovery, readiness and heartbeat
//! stability into a single `connect` and owns teardown.

use super::discovery::{DiscoveryConfig, DiscoveryLink, DiscoveryManager};
use super::gates::{wait_until_ready, HeartbeatGate, HeartbeatGateConfig};
use crate::link::{Device, Protocol};
use sortie_shared::{MissionError, MissionPhase, PhaseTracker, TransitionResult};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Configuration for session establishment
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub discovery: DiscoveryConfig,
    pub heartbeat: HeartbeatGateConfig,
}

/// Resources and lifecycle phase of one connection attempt
pub struct Session {
    phase: PhaseTracker,
    link: Option<DiscoveryLink>,
    device: Option<Arc<dyn Device>>,
    disposed: bool,
}

impl Session {
    fn new() -> Self {
        Self {
            phase: PhaseTracker::new(),
            link: None,
            device: None,
            disposed: false,
        }
    }

    pub fn phase(&self) -> MissionPhase {
        self.phase.phase()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn advance(&mut self, to: MissionPhase, operation: &'static str) -> Result<(), MissionError> {
        match self.phase.advance(to) {
            TransitionResult::Success(phase) => {
                debug!("[SESSION] Phase -> {}", phase);
                Ok(())
            }
            TransitionResult::Invalid { from, .. } => Err(MissionError::InvalidState {
                operation,
                phase: from,
            }),
        }
    }

    fn fail(&mut self) {
        if let TransitionResult::Success(_) = self.phase.fail() {
            debug!("[SESSION] Phase -> {}", MissionPhase::Failed);
        }
    }

    /// Drop the device handle and browser, then close the transport
    async fn release(&mut self) {
        self.device = None;
        if let Some(link) = self.link.take() {
            link.close().await;
        }
        self.disposed = true;
    }
}

/// Drives a session from discovery to a stable link
pub struct SessionController {
    protocol: Arc<dyn Protocol>,
    discovery: DiscoveryManager,
    heartbeat: HeartbeatGate,
    session: Option<Session>,
}

impl SessionController {
    pub fn new(protocol: Arc<dyn Protocol>, config: SessionConfig) -> Self {
        Self {
            protocol,
            discovery: DiscoveryManager::new(config.discovery),
            heartbeat: HeartbeatGate::new(config.heartbeat),
            session: None,
        }
    }

    /// Phase of the current (or last) session
    pub fn phase(&self) -> MissionPhase {
        self.session
            .as_ref()
            .map_or(MissionPhase::NotStarted, Session::phase)
    }

    /// Connect: discovery, then readiness, then heartbeat stability.
    ///
    /// Fails with `InvalidState` while an undisposed session exists. Any
    /// failure or cancellation leaves the session `Failed`; its transport
    /// stays open until [`dispose`](Self::dispose).
    pub async fn connect(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn Device>, MissionError> {
        if let Some(existing) = &self.session {
            if !existing.is_disposed() {
                return Err(MissionError::InvalidState {
                    operation: "connect",
                    phase: existing.phase(),
                });
            }
        }

        let session = self.session.insert(Session::new());
        session.advance(MissionPhase::Connecting, "connect")?;
        info!("[SESSION] Starting drone connection process...");

        match establish(
            self.protocol.as_ref(),
            &self.discovery,
            &self.heartbeat,
            session,
            cancel,
        )
        .await
        {
            Ok(device) => {
                session.advance(MissionPhase::Connected, "connect")?;
                info!("[SESSION] Drone connection established");
                Ok(device)
            }
            Err(e) => {
                session.fail();
                error!("[SESSION] Connection failed: {}", e);
                Err(e)
            }
        }
    }

    /// The connected device, for an operation that needs it
    pub fn device(&self, operation: &'static str) -> Result<Arc<dyn Device>, MissionError> {
        let session = self.session.as_ref().ok_or(MissionError::InvalidState {
            operation,
            phase: MissionPhase::NotStarted,
        })?;

        let connected = session.phase() >= MissionPhase::Connected && !session.phase().is_terminal();
        match (&session.device, connected && !session.is_disposed()) {
            (Some(device), true) => Ok(device.clone()),
            _ => Err(MissionError::InvalidState {
                operation,
                phase: session.phase(),
            }),
        }
    }

    /// Move the current session to the next phase
    pub fn advance(&mut self, to: MissionPhase, operation: &'static str) -> Result<(), MissionError> {
        match self.session.as_mut() {
            Some(session) => session.advance(to, operation),
            None => Err(MissionError::InvalidState {
                operation,
                phase: MissionPhase::NotStarted,
            }),
        }
    }

    /// Mark the current session failed
    pub fn fail(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.fail();
        }
    }

    /// Release every resource of the current session. Idempotent.
    pub async fn dispose(&mut self) {
        if let Some(session) = self.session.as_mut() {
            if !session.is_disposed() {
                session.release().await;
                info!("[SESSION] Session disposed in phase {}", session.phase());
            }
        }
    }
}

async fn establish(
    protocol: &dyn Protocol,
    discovery: &DiscoveryManager,
    heartbeat: &HeartbeatGate,
    session: &mut Session,
    cancel: &CancellationToken,
) -> Result<Arc<dyn Device>, MissionError> {
    let device = discovery.run(protocol, &mut session.link, cancel).await?;
    session.device = Some(device.clone());

    wait_until_ready(device.as_ref(), cancel).await?;
    heartbeat.wait(device.as_ref(), cancel).await?;

    Ok(device)
}
