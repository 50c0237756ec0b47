//! MAVLink Vehicle
//!
//! One vehicle seen on the link, with its state, heartbeat, position and
//! acknowledgement streams.

use super::commands::{CommandSender, MavControl};
use super::connection::MavLink;
use super::telemetry::{log_status_text, mode_to_string, raw_heartbeat, raw_position};
use crate::link::{Device, DeviceId, DeviceState, Feed, FlightControl, RawHeartbeat, RawPosition, Subscription};
use mavlink::ardupilotmega::{MavAutopilot, MavCmd, MavMessage, MavResult};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub(crate) struct MavDevice {
    id: DeviceId,
    state: Feed<DeviceState>,
    heartbeat: Feed<RawHeartbeat>,
    position: Arc<Feed<Option<RawPosition>>>,
    acks: Arc<Feed<(MavCmd, MavResult)>>,
    sender: CommandSender,
    control: Option<Arc<MavControl>>,
    mode: AtomicU32,
}

impl MavDevice {
    pub fn new(link: Arc<MavLink>, id: DeviceId, autopilot: MavAutopilot) -> Self {
        let position = Arc::new(Feed::with_value(None));
        let acks = Arc::new(Feed::new());

        // Only ArduPilot understands the guided-mode commands we send
        let control = (autopilot == MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA).then(|| {
            Arc::new(MavControl::new(
                CommandSender::new(link.clone(), id, acks.clone()),
                position.clone(),
            ))
        });

        Self {
            id,
            state: Feed::with_value(DeviceState::Uninitialized),
            heartbeat: Feed::new(),
            position,
            sender: CommandSender::new(link, id, acks.clone()),
            acks,
            control,
            mode: AtomicU32::new(u32::MAX),
        }
    }

    /// Route a frame sent by this vehicle
    pub fn handle(&self, msg: &MavMessage) {
        match msg {
            MavMessage::HEARTBEAT(hb) => {
                let previous = self.mode.swap(hb.custom_mode, Ordering::Relaxed);
                if previous != hb.custom_mode {
                    info!("[FC {}] Mode {}", self.id, mode_to_string(hb.custom_mode));
                }
                self.heartbeat.publish(raw_heartbeat(hb));
            }
            MavMessage::GLOBAL_POSITION_INT(pos) => {
                self.position.publish(Some(raw_position(pos)));
            }
            MavMessage::COMMAND_ACK(ack) => {
                debug!("[FC {}] ACK {:?}: {:?}", self.id, ack.command, ack.result);
                self.acks.publish((ack.command, ack.result));
            }
            MavMessage::STATUSTEXT(text) => log_status_text(self.id.system_id, text),
            _ => {}
        }
    }

    /// Request the telemetry the session relies on
    pub async fn initialize(&self) {
        self.state.publish(DeviceState::InProgress);
        match self.sender.request_position_stream().await {
            Ok(()) => {
                debug!("[FC {}] Position stream requested", self.id);
                self.state.publish(DeviceState::Complete);
            }
            Err(e) => {
                warn!("[FC {}] Initialisation failed: {}", self.id, e);
                self.state.publish(DeviceState::Failed);
            }
        }
    }

    /// End every stream of this device
    pub fn close(&self) {
        self.state.close();
        self.heartbeat.close();
        self.position.close();
        self.acks.close();
    }
}

impl Device for MavDevice {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn subscribe_state(&self) -> Option<Subscription<DeviceState>> {
        Some(self.state.subscribe())
    }

    fn subscribe_heartbeat(&self) -> Option<Subscription<RawHeartbeat>> {
        Some(self.heartbeat.subscribe())
    }

    fn subscribe_position(&self) -> Option<Subscription<Option<RawPosition>>> {
        Some(self.position.subscribe())
    }

    fn control(&self) -> Option<Arc<dyn FlightControl>> {
        self.control
            .clone()
            .map(|control| control as Arc<dyn FlightControl>)
    }
}
