//! Trait seams between the session core and the protocol collaborator

use async_trait::async_trait;
use sortie_shared::{GeoPoint, LinkError};
use std::sync::Arc;

use super::feed::Subscription;
use super::{BrowserConfig, DeviceId, DeviceState, DiscoveryEvent, Endpoint, RawHeartbeat, RawPosition};

/// Factory for transport connections
#[async_trait]
pub trait Protocol: Send + Sync {
    /// Open a transport to the given endpoint
    async fn open_transport(&self, endpoint: &Endpoint) -> Result<Box<dyn Transport>, LinkError>;
}

/// An open link to one endpoint
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start browsing for devices on this transport
    fn start_discovery(&self, config: &BrowserConfig) -> Result<Box<dyn Browser>, LinkError>;

    /// Close the transport gracefully
    async fn shutdown(&mut self) -> Result<(), LinkError>;

    /// Human-readable description of the endpoint
    fn name(&self) -> String;
}

/// A running discovery process. Dropping it stops browsing.
pub trait Browser: Send + Sync {
    fn events(&self) -> Subscription<DiscoveryEvent>;
}

/// A discovered remote device.
///
/// Capability lookups return `None` when the device does not offer them.
pub trait Device: Send + Sync {
    fn id(&self) -> DeviceId;

    fn subscribe_state(&self) -> Option<Subscription<DeviceState>>;

    fn subscribe_heartbeat(&self) -> Option<Subscription<RawHeartbeat>>;

    fn subscribe_position(&self) -> Option<Subscription<Option<RawPosition>>>;

    fn control(&self) -> Option<Arc<dyn FlightControl>>;
}

/// Flight commands. Each resolves when the vehicle has completed or
/// acknowledged the command.
#[async_trait]
pub trait FlightControl: Send + Sync {
    async fn set_guided_mode(&self) -> Result<(), LinkError>;

    async fn take_off(&self, altitude_m: f64) -> Result<(), LinkError>;

    async fn go_to(&self, target: GeoPoint) -> Result<(), LinkError>;

    async fn land(&self) -> Result<(), LinkError>;
}
