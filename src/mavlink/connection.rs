//! Flight Controller Connection
//!
//! Opens the async MAVLink connection for an endpoint and keeps it serviced:
//! one reader task fans inbound frames out to subscribers, one task announces
//! this ground station at 1 Hz.

use super::browser::MavBrowser;
use crate::link::{Browser, BrowserConfig, Endpoint, Feed, Protocol, Subscription, Transport};
use async_trait::async_trait;
use mavlink::ardupilotmega::{
    MavAutopilot, MavMessage, MavModeFlag, MavState, MavType, HEARTBEAT_DATA,
};
use mavlink::error::MessageReadError;
use mavlink::{AsyncMavConnection, MavHeader};
use sortie_shared::{policy, LinkError};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration of this ground station on the link
#[derive(Debug, Clone)]
pub struct FcConfig {
    /// System ID we send as
    pub system_id: u8,
    /// Component ID we send as
    pub component_id: u8,
    /// Wait for a COMMAND_ACK before resending
    pub ack_timeout: Duration,
    /// Resends of one command after the first send before giving up
    pub max_retries: u32,
    /// Distance at which a go-to target counts as reached
    pub arrival_radius_m: f64,
    /// Requested GLOBAL_POSITION_INT interval
    pub position_interval: Duration,
    /// Interval of our own HEARTBEAT
    pub gcs_heartbeat_interval: Duration,
}

impl Default for FcConfig {
    fn default() -> Self {
        Self {
            system_id: 255,    // Ground station
            component_id: 190, // MAV_COMP_ID_MISSIONPLANNER
            ack_timeout: Duration::from_millis(policy::COMMAND_ACK_TIMEOUT_MS),
            max_retries: policy::COMMAND_MAX_RETRIES,
            arrival_radius_m: policy::ARRIVAL_RADIUS_M,
            position_interval: Duration::from_millis(policy::POSITION_STREAM_INTERVAL_MS),
            gcs_heartbeat_interval: Duration::from_millis(policy::GCS_HEARTBEAT_INTERVAL_MS),
        }
    }
}

/// MAVLink connection string for an endpoint
pub fn connection_string(endpoint: &Endpoint) -> String {
    match endpoint {
        Endpoint::Tcp { address } => format!("tcpout:{}", address),
        Endpoint::Udp { address } => format!("udpin:{}", address),
        Endpoint::Serial { port, baud } => format!("serial:{}:{}", port, baud),
    }
}

/// An open MAVLink connection shared by the transport's tasks
pub(crate) struct MavLink {
    connection: Box<dyn AsyncMavConnection<MavMessage> + Sync + Send>,
    system_id: u8,
    component_id: u8,
    sequence: AtomicU8,
    inbound: Feed<(MavHeader, MavMessage)>,
    config: FcConfig,
}

impl MavLink {
    pub(super) fn new(
        connection: Box<dyn AsyncMavConnection<MavMessage> + Sync + Send>,
        config: FcConfig,
    ) -> Self {
        Self {
            connection,
            system_id: config.system_id,
            component_id: config.component_id,
            sequence: AtomicU8::new(0),
            inbound: Feed::new(),
            config,
        }
    }

    /// Send a message as this ground station
    pub async fn send(&self, msg: &MavMessage) -> Result<(), LinkError> {
        let header = MavHeader {
            system_id: self.system_id,
            component_id: self.component_id,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        };
        self.connection
            .send(&header, msg)
            .await
            .map(|_| ())
            .map_err(|e| LinkError::Io(e.to_string()))
    }

    /// Every frame received from now on
    pub fn subscribe(&self) -> Subscription<(MavHeader, MavMessage)> {
        self.inbound.subscribe()
    }

    pub fn config(&self) -> &FcConfig {
        &self.config
    }

    fn close(&self) {
        self.inbound.close();
    }
}

/// Opens MAVLink transports
pub struct MavlinkProtocol {
    config: FcConfig,
}

impl MavlinkProtocol {
    pub fn new(config: FcConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Protocol for MavlinkProtocol {
    async fn open_transport(&self, endpoint: &Endpoint) -> Result<Box<dyn Transport>, LinkError> {
        let address = connection_string(endpoint);
        info!("[MAVLink] Connecting to flight controller at {}", address);

        let connection = mavlink::connect_async::<MavMessage>(&address)
            .await
            .map_err(|e| LinkError::Connect {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;
        info!("[MAVLink] Connected to {}", endpoint);

        let link = Arc::new(MavLink::new(connection, self.config.clone()));
        let cancel = CancellationToken::new();
        tokio::spawn(read_loop(link.clone(), cancel.clone()));
        tokio::spawn(gcs_heartbeat_loop(link.clone(), cancel.clone()));

        Ok(Box::new(MavTransport {
            link,
            cancel,
            name: endpoint.to_string(),
        }))
    }
}

/// Publish every inbound frame until cancelled or the connection fails
async fn read_loop(link: Arc<MavLink>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            frame = link.connection.recv() => match frame {
                Ok(frame) => {
                    link.inbound.publish(frame);
                }
                Err(MessageReadError::Io(e)) => {
                    warn!("[MAVLink] Connection error: {}", e);
                    break;
                }
                Err(e) => debug!("[MAVLink] Dropping unparsable frame: {}", e),
            },
        }
    }
    link.close();
    debug!("[MAVLink] Reader stopped");
}

/// Announce this ground station so the autopilot keeps streaming to us
async fn gcs_heartbeat_loop(link: Arc<MavLink>, cancel: CancellationToken) {
    let heartbeat = MavMessage::HEARTBEAT(HEARTBEAT_DATA {
        custom_mode: 0,
        mavtype: MavType::MAV_TYPE_GCS,
        autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
        base_mode: MavModeFlag::empty(),
        system_status: MavState::MAV_STATE_ACTIVE,
        mavlink_version: 3,
    });
    let mut ticker = interval(link.config().gcs_heartbeat_interval);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = link.send(&heartbeat).await {
                    warn!("[MAVLink] Failed to send heartbeat: {}", e);
                }
            }
        }
    }
}

/// An open MAVLink connection. Dropping it stops its tasks.
pub struct MavTransport {
    link: Arc<MavLink>,
    cancel: CancellationToken,
    name: String,
}

#[async_trait]
impl Transport for MavTransport {
    fn start_discovery(&self, config: &BrowserConfig) -> Result<Box<dyn Browser>, LinkError> {
        if self.cancel.is_cancelled() {
            return Err(LinkError::Closed);
        }
        Ok(Box::new(MavBrowser::start(
            self.link.clone(),
            config.clone(),
            self.cancel.child_token(),
        )))
    }

    async fn shutdown(&mut self) -> Result<(), LinkError> {
        self.cancel.cancel();
        self.link.close();
        info!("[MAVLink] Disconnected from {}", self.name);
        Ok(())
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

impl Drop for MavTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
