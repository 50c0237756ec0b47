//! MAVLink Flight Commands
//!
//! COMMAND_LONG delivery with acknowledgement and retry, and the ArduPilot
//! flight control built on top of it.

use super::connection::MavLink;
use super::telemetry::{distance_m, e7_from_micro};
use crate::link::{DeviceId, Feed, FlightControl, RawPosition, Subscription};
use async_trait::async_trait;
use mavlink::ardupilotmega::{
    MavCmd, MavFrame, MavMessage, MavResult, COMMAND_LONG_DATA, MISSION_ITEM_INT_DATA,
};
use sortie_shared::{GeoPoint, LinkError};
use std::sync::Arc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// ArduPilot Copter GUIDED mode number
const GUIDED_MODE: f32 = 4.0;

/// MAVLink message id of GLOBAL_POSITION_INT
const GLOBAL_POSITION_INT_ID: f32 = 33.0;

/// Build a COMMAND_LONG for `target`
pub fn command_long(target: DeviceId, command: MavCmd, confirmation: u8, params: [f32; 7]) -> MavMessage {
    MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
        target_system: target.system_id,
        target_component: target.component_id,
        command,
        confirmation,
        param1: params[0],
        param2: params[1],
        param3: params[2],
        param4: params[3],
        param5: params[4],
        param6: params[5],
        param7: params[6],
    })
}

/// Build a guided-mode waypoint towards `point`
pub fn guided_waypoint(target: DeviceId, point: &GeoPoint) -> MavMessage {
    MavMessage::MISSION_ITEM_INT(MISSION_ITEM_INT_DATA {
        target_system: target.system_id,
        target_component: target.component_id,
        seq: 0,
        frame: MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT_INT,
        command: MavCmd::MAV_CMD_NAV_WAYPOINT,
        current: 2, // Guided mode waypoint
        autocontinue: 0,
        param1: 0.0,
        param2: 0.0,
        param3: 0.0,
        param4: 0.0,
        x: e7_from_micro(point.latitude()),
        y: e7_from_micro(point.longitude()),
        z: point.altitude_m() as f32,
        ..Default::default()
    })
}

/// Sends commands to one vehicle and waits for their acknowledgement
pub(crate) struct CommandSender {
    link: Arc<MavLink>,
    target: DeviceId,
    acks: Arc<Feed<(MavCmd, MavResult)>>,
}

impl CommandSender {
    pub fn new(link: Arc<MavLink>, target: DeviceId, acks: Arc<Feed<(MavCmd, MavResult)>>) -> Self {
        Self { link, target, acks }
    }

    /// Send a COMMAND_LONG and wait until the vehicle accepts it.
    ///
    /// Resent after each ack timeout, up to `max_retries` times after the
    /// first send. `IN_PROGRESS` restarts the wait without resending.
    pub async fn send(&self, command: MavCmd, params: [f32; 7]) -> Result<(), LinkError> {
        let config = self.link.config();
        let attempts = config.max_retries.saturating_add(1);
        let mut acks = self.acks.subscribe();

        for attempt in 0..attempts {
            debug!("[MAVLink] Sending {:?} (attempt {}/{})", command, attempt + 1, attempts);
            let confirmation = u8::try_from(attempt).unwrap_or(u8::MAX);
            self.link
                .send(&command_long(self.target, command, confirmation, params))
                .await?;

            let mut deadline = Instant::now() + config.ack_timeout;
            loop {
                match timeout_at(deadline, acks.recv()).await {
                    Err(_) => break,
                    Ok(None) => return Err(LinkError::Closed),
                    Ok(Some((acked, _))) if acked != command => {}
                    Ok(Some((_, MavResult::MAV_RESULT_ACCEPTED))) => return Ok(()),
                    Ok(Some((_, MavResult::MAV_RESULT_IN_PROGRESS))) => {
                        deadline = Instant::now() + config.ack_timeout;
                    }
                    Ok(Some((_, result))) => {
                        return Err(LinkError::Rejected {
                            command: format!("{:?}", command),
                            result: format!("{:?}", result),
                        })
                    }
                }
            }
            warn!("[MAVLink] No ACK for {:?} within {:?}", command, config.ack_timeout);
        }

        Err(LinkError::AckTimeout {
            command: format!("{:?}", command),
            attempts,
        })
    }

    /// Ask the vehicle to stream GLOBAL_POSITION_INT
    pub async fn request_position_stream(&self) -> Result<(), LinkError> {
        let interval_us = self.link.config().position_interval.as_micros() as f32;
        self.send(
            MavCmd::MAV_CMD_SET_MESSAGE_INTERVAL,
            [GLOBAL_POSITION_INT_ID, interval_us, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
        .await
    }
}

/// Flight control of an ArduPilot vehicle
pub(crate) struct MavControl {
    sender: CommandSender,
    position: Arc<Feed<Option<RawPosition>>>,
}

impl MavControl {
    pub fn new(sender: CommandSender, position: Arc<Feed<Option<RawPosition>>>) -> Self {
        Self { sender, position }
    }

    /// Resolve once the vehicle is within the arrival radius of `target`
    async fn wait_for_arrival(
        &self,
        mut positions: Subscription<Option<RawPosition>>,
        target: &GeoPoint,
    ) -> Result<(), LinkError> {
        let radius = self.sender.link.config().arrival_radius_m;

        while let Some(position) = positions.recv().await {
            let Some(position) = position else { continue };
            let distance = distance_m(
                position.latitude,
                position.longitude,
                target.latitude(),
                target.longitude(),
            );
            debug!("[MAVLink] {:.1}m to target", distance);
            if distance <= radius {
                info!("[MAVLink] Reached target ({:.1}m)", distance);
                return Ok(());
            }
        }
        Err(LinkError::Closed)
    }
}

#[async_trait]
impl FlightControl for MavControl {
    async fn set_guided_mode(&self) -> Result<(), LinkError> {
        info!("[MAVLink] Setting mode to GUIDED");
        self.sender
            .send(
                MavCmd::MAV_CMD_DO_SET_MODE,
                // MAV_MODE_FLAG_CUSTOM_MODE_ENABLED
                [1.0, GUIDED_MODE, 0.0, 0.0, 0.0, 0.0, 0.0],
            )
            .await
    }

    async fn take_off(&self, altitude_m: f64) -> Result<(), LinkError> {
        info!("[MAVLink] Arming");
        self.sender
            .send(
                MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
                [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            )
            .await?;

        info!("[MAVLink] Taking off to {}m", altitude_m);
        self.sender
            .send(
                MavCmd::MAV_CMD_NAV_TAKEOFF,
                [
                    0.0,
                    0.0,
                    0.0,
                    f32::NAN, // Yaw (current)
                    f32::NAN, // Latitude (current)
                    f32::NAN, // Longitude (current)
                    altitude_m as f32,
                ],
            )
            .await
    }

    async fn go_to(&self, target: GeoPoint) -> Result<(), LinkError> {
        info!("[MAVLink] Going to position: {}", target);
        let positions = self.position.subscribe();
        self.sender
            .link
            .send(&guided_waypoint(self.sender.target, &target))
            .await?;
        self.wait_for_arrival(positions, &target).await
    }

    async fn land(&self) -> Result<(), LinkError> {
        info!("[MAVLink] Landing");
        self.sender
            .send(
                MavCmd::MAV_CMD_NAV_LAND,
                [0.0, 0.0, 0.0, f32::NAN, f32::NAN, f32::NAN, 0.0],
            )
            .await
    }
}
