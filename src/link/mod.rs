//! Link Interfaces
//!
//! Narrow interfaces to the protocol collaborator: transports, device
//! discovery, per-device state and telemetry streams, and flight commands.

mod feed;
mod traits;

pub use feed::{Feed, Subscription};
pub use traits::{Browser, Device, FlightControl, Protocol, Transport};

use sortie_shared::{policy, LinkError};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Endpoint of the vehicle link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP client (e.g. "127.0.0.1:5760")
    Tcp { address: String },
    /// UDP listener (e.g. "0.0.0.0:14550")
    Udp { address: String },
    /// Serial port (e.g. "/dev/ttyACM0")
    Serial { port: String, baud: u32 },
}

impl Default for Endpoint {
    fn default() -> Self {
        // ArduPilot SITL serves its primary link on TCP 5760
        Self::Tcp {
            address: "127.0.0.1:5760".into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { address } => write!(f, "tcp://{}", address),
            Endpoint::Udp { address } => write!(f, "udp://{}", address),
            Endpoint::Serial { port, baud } => write!(f, "serial://{}@{}", port, baud),
        }
    }
}

impl FromStr for Endpoint {
    type Err = LinkError;

    /// Parse the form produced by `Display`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LinkError::InvalidEndpoint(s.to_string());
        let (scheme, rest) = s.split_once("://").ok_or_else(invalid)?;
        if rest.is_empty() {
            return Err(invalid());
        }

        match scheme {
            "tcp" => Ok(Endpoint::Tcp {
                address: rest.to_string(),
            }),
            "udp" => Ok(Endpoint::Udp {
                address: rest.to_string(),
            }),
            "serial" => {
                let (port, baud) = rest.rsplit_once('@').ok_or_else(invalid)?;
                let baud = baud.parse().map_err(|_| invalid())?;
                if port.is_empty() {
                    return Err(invalid());
                }
                Ok(Endpoint::Serial {
                    port: port.to_string(),
                    baud,
                })
            }
            _ => Err(invalid()),
        }
    }
}

/// Policy knobs of the discovery process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserConfig {
    /// A device not heard from for this long is dropped
    pub device_timeout: Duration,
    /// How often stale devices are swept
    pub check_interval: Duration,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            device_timeout: Duration::from_millis(policy::DEVICE_TIMEOUT_MS),
            check_interval: Duration::from_millis(policy::DEVICE_CHECK_INTERVAL_MS),
        }
    }
}

/// Identity of a device on the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId {
    pub system_id: u8,
    pub component_id: u8,
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.system_id, self.component_id)
    }
}

/// Initialisation state of a discovered device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Uninitialized,
    InProgress,
    Complete,
    Failed,
}

/// One liveness signal as received from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawHeartbeat {
    pub custom_mode: u32,
    pub base_mode: u8,
    pub system_status: u8,
}

/// One position fix in wire units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawPosition {
    /// Latitude in micro-degrees
    pub latitude: i32,
    /// Longitude in micro-degrees
    pub longitude: i32,
    /// Altitude above mean sea level in millimeters
    pub altitude_mm: i32,
}

/// Changes in the set of discovered devices
#[derive(Clone)]
pub enum DiscoveryEvent {
    Added(Arc<dyn Device>),
    Removed(DeviceId),
}

impl fmt::Debug for DiscoveryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryEvent::Added(device) => f.debug_tuple("Added").field(&device.id()).finish(),
            DiscoveryEvent::Removed(id) => f.debug_tuple("Removed").field(id).finish(),
        }
    }
}
