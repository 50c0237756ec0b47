//! Readiness and link-stability gates
//!
//! Each gate holds its subscription only for the duration of the wait; the
//! subscription is released on every exit path when the gate returns.

use crate::link::{Device, DeviceState};
use sortie_shared::{policy, Capability, MissionError};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Wait until the device reports `DeviceState::Complete`.
///
/// Other states are ignored. No internal timeout; only `cancel` ends the wait early.
pub async fn wait_until_ready(
    device: &dyn Device,
    cancel: &CancellationToken,
) -> Result<(), MissionError> {
    let mut states = device
        .subscribe_state()
        .ok_or(MissionError::CapabilityMissing(Capability::State))?;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => return Err(MissionError::Cancelled("readiness wait")),

            state = states.recv() => match state {
                Some(DeviceState::Complete) => {
                    info!("[SESSION] Device {} ready", device.id());
                    return Ok(());
                }
                Some(other) => debug!("[SESSION] Device {} state {:?}", device.id(), other),
                None => return Err(MissionError::Disconnected("readiness wait")),
            },
        }
    }
}

/// Configuration for the heartbeat stability gate
#[derive(Debug, Clone)]
pub struct HeartbeatGateConfig {
    /// Heartbeats closer together than this are coalesced
    pub min_interval: Duration,
    /// Accepted samples needed before the link counts as stable
    pub required_samples: u32,
}

impl Default for HeartbeatGateConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(policy::HEARTBEAT_MIN_INTERVAL_MS),
            required_samples: policy::HEARTBEAT_REQUIRED_SAMPLES,
        }
    }
}

/// Counts throttled heartbeats until the link is proven stable
pub struct HeartbeatGate {
    config: HeartbeatGateConfig,
}

impl HeartbeatGate {
    pub fn new(config: HeartbeatGateConfig) -> Self {
        Self { config }
    }

    /// Wait for the configured number of accepted heartbeat samples.
    ///
    /// The first heartbeat after an idle period opens a window of
    /// `min_interval`; every heartbeat inside the window collapses into one
    /// sample, accepted when the window closes. Returns the accepted count.
    pub async fn wait(
        &self,
        device: &dyn Device,
        cancel: &CancellationToken,
    ) -> Result<u32, MissionError> {
        let mut beats = device
            .subscribe_heartbeat()
            .ok_or(MissionError::CapabilityMissing(Capability::Heartbeat))?;

        let required = self.config.required_samples;
        let mut accepted = 0u32;
        let mut window_end: Option<Instant> = None;

        while accepted < required {
            tokio::select! {
                biased;

                () = cancel.cancelled() => return Err(MissionError::Cancelled("heartbeat wait")),

                () = sleep_until(window_end.unwrap_or_else(Instant::now)), if window_end.is_some() => {
                    window_end = None;
                    accepted += 1;
                    debug!("[SESSION] Heartbeat sample {}/{}", accepted, required);
                }

                beat = beats.recv() => match beat {
                    Some(_) => {
                        if window_end.is_none() {
                            window_end = Some(Instant::now() + self.config.min_interval);
                        }
                    }
                    None => return Err(MissionError::Disconnected("heartbeat wait")),
                },
            }
        }

        info!("[SESSION] Link stable after {} heartbeat samples", accepted);
        Ok(accepted)
    }
}
