//! MAVLink Vehicle Discovery
//!
//! Any non-GCS sender of HEARTBEAT is a vehicle. Vehicles not heard from
//! within the device timeout are dropped on each sweep.

use super::connection::MavLink;
use super::device::MavDevice;
use super::telemetry::is_vehicle;
use crate::link::{Browser, BrowserConfig, DeviceId, DiscoveryEvent, Feed, Subscription};
use mavlink::ardupilotmega::MavMessage;
use mavlink::MavHeader;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info};

struct Tracked {
    device: Arc<MavDevice>,
    last_seen: Instant,
}

/// A running discovery. Dropping it stops browsing and closes its devices.
pub(crate) struct MavBrowser {
    events: Arc<Feed<DiscoveryEvent>>,
    _guard: DropGuard,
}

impl MavBrowser {
    pub fn start(link: Arc<MavLink>, config: BrowserConfig, cancel: CancellationToken) -> Self {
        let events = Arc::new(Feed::with_first_replay());
        tokio::spawn(browse(link, config, events.clone(), cancel.clone()));
        Self {
            events,
            _guard: cancel.drop_guard(),
        }
    }
}

impl Browser for MavBrowser {
    fn events(&self) -> Subscription<DiscoveryEvent> {
        self.events.subscribe()
    }
}

async fn browse(
    link: Arc<MavLink>,
    config: BrowserConfig,
    events: Arc<Feed<DiscoveryEvent>>,
    cancel: CancellationToken,
) {
    let mut inbound = link.subscribe();
    let mut sweep = interval_at(Instant::now() + config.check_interval, config.check_interval);
    let mut devices: HashMap<DeviceId, Tracked> = HashMap::new();

    info!("[DISCOVERY] Listening for vehicle heartbeats");
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            _ = sweep.tick() => {
                let now = Instant::now();
                devices.retain(|id, tracked| {
                    let fresh = now.duration_since(tracked.last_seen) <= config.device_timeout;
                    if !fresh {
                        info!("[DISCOVERY] Vehicle {} lost", id);
                        tracked.device.close();
                        events.publish(DiscoveryEvent::Removed(*id));
                    }
                    fresh
                });
            }

            frame = inbound.recv() => match frame {
                Some((header, msg)) => route(&link, &events, &mut devices, &cancel, header, &msg),
                None => break,
            },
        }
    }

    for tracked in devices.values() {
        tracked.device.close();
    }
    events.close();
    debug!("[DISCOVERY] Browser stopped");
}

fn route(
    link: &Arc<MavLink>,
    events: &Feed<DiscoveryEvent>,
    devices: &mut HashMap<DeviceId, Tracked>,
    cancel: &CancellationToken,
    header: MavHeader,
    msg: &MavMessage,
) {
    let id = DeviceId {
        system_id: header.system_id,
        component_id: header.component_id,
    };

    if let MavMessage::HEARTBEAT(hb) = msg {
        if is_vehicle(hb) && !devices.contains_key(&id) {
            info!(
                "[DISCOVERY] Vehicle {} found: type={:?} autopilot={:?}",
                id, hb.mavtype, hb.autopilot
            );
            let device = Arc::new(MavDevice::new(link.clone(), id, hb.autopilot));
            devices.insert(
                id,
                Tracked {
                    device: device.clone(),
                    last_seen: Instant::now(),
                },
            );
            events.publish(DiscoveryEvent::Added(device.clone()));

            let stop = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = stop.cancelled() => {}
                    () = device.initialize() => {}
                }
            });
        }
    }

    if let Some(tracked) = devices.get_mut(&id) {
        tracked.last_seen = Instant::now();
        tracked.device.handle(msg);
    }
}
