//! MAVLink Bridge Module
//!
//! Implements the link interfaces over MAVLink for ArduPilot flight
//! controllers. Supports TCP, UDP and serial connections.

mod browser;
mod commands;
mod connection;
mod device;
mod telemetry;

pub use connection::{FcConfig, MavlinkProtocol};
