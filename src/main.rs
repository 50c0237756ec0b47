mod link;
mod logging;
mod mavlink;
mod mission;
mod session;

#[cfg(test)]
mod testing;

use anyhow::{anyhow, Result};
use logging::TracingLog;
use self::mavlink::{FcConfig, MavlinkProtocol};
use link::Endpoint;
use mission::{LogSink, MissionConfig, MissionSequencer, PositionObserver, PositionSink};
use session::{DiscoveryConfig, HeartbeatGateConfig, SessionConfig, SessionController};
use sortie_shared::GeoPoint;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Takeoff altitude of the reference mission
const MISSION_ALTITUDE_M: f64 = 20.0;

/// Overrides the vehicle link, e.g. `udp://0.0.0.0:14550`
const ENDPOINT_VAR: &str = "SORTIE_ENDPOINT";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let endpoint = match std::env::var(ENDPOINT_VAR) {
        Ok(value) => value.parse::<Endpoint>()?,
        Err(_) => Endpoint::default(),
    };
    let session_config = SessionConfig {
        discovery: DiscoveryConfig {
            endpoint,
            ..Default::default()
        },
        heartbeat: HeartbeatGateConfig::default(),
    };
    info!("Sortie starting");
    info!("  Vehicle link: {}", session_config.discovery.endpoint);

    let protocol = Arc::new(MavlinkProtocol::new(FcConfig::default()));
    let sink: Arc<dyn PositionSink> = Arc::new(LogSink);
    let mut sequencer = MissionSequencer::new(
        SessionController::new(protocol, session_config),
        PositionObserver::new(sink),
        MissionConfig::default(),
        Arc::new(TracingLog),
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, cancelling mission");
                on_signal.cancel();
            }
            Err(e) => error!("Failed to listen for interrupt: {}", e),
        }
    });

    let target = GeoPoint::from_degrees(55.7558, 37.6173, 20.0)?;
    let result = sequencer
        .run_mission(MISSION_ALTITUDE_M, target, &cancel)
        .await;
    sequencer.dispose().await;
    info!("Final phase: {}", sequencer.phase());

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            error!(kind = %e.kind(), "Mission aborted: {}", e);
            Err(anyhow!(e))
        }
    }
}
