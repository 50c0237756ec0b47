//! MAVLink Telemetry Conversion
//!
//! Converts MAVLink frames into the link's wire-neutral records.

use crate::link::{RawHeartbeat, RawPosition};
use mavlink::ardupilotmega::{
    MavAutopilot, MavType, GLOBAL_POSITION_INT_DATA, HEARTBEAT_DATA, STATUSTEXT_DATA,
};
use tracing::{debug, error, info, warn};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// degE7 to micro-degrees
pub fn micro_from_e7(value: i32) -> i32 {
    value / 10
}

/// Micro-degrees to degE7
pub fn e7_from_micro(value: i32) -> i32 {
    value.saturating_mul(10)
}

pub fn raw_position(pos: &GLOBAL_POSITION_INT_DATA) -> RawPosition {
    RawPosition {
        latitude: micro_from_e7(pos.lat),
        longitude: micro_from_e7(pos.lon),
        altitude_mm: pos.alt,
    }
}

pub fn raw_heartbeat(hb: &HEARTBEAT_DATA) -> RawHeartbeat {
    RawHeartbeat {
        custom_mode: hb.custom_mode,
        base_mode: hb.base_mode.bits(),
        system_status: hb.system_status as u8,
    }
}

/// Whether a heartbeat comes from a vehicle rather than another ground station
pub fn is_vehicle(hb: &HEARTBEAT_DATA) -> bool {
    !matches!(
        hb.mavtype,
        MavType::MAV_TYPE_GCS | MavType::MAV_TYPE_ONBOARD_CONTROLLER
    ) && hb.autopilot != MavAutopilot::MAV_AUTOPILOT_INVALID
}

/// Great-circle distance between two points given in micro-degrees
pub fn distance_m(lat1: i32, lon1: i32, lat2: i32, lon2: i32) -> f64 {
    let to_rad = |micro: i32| (micro as f64 / 1_000_000.0).to_radians();
    let (phi1, phi2) = (to_rad(lat1), to_rad(lat2));
    let d_phi = phi2 - phi1;
    let d_lambda = to_rad(lon2) - to_rad(lon1);

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

/// Log a STATUSTEXT at a level matching its severity
pub fn log_status_text(system_id: u8, text: &STATUSTEXT_DATA) {
    let raw = String::from_utf8_lossy(&text.text[..]);
    let message = raw.trim_end_matches('\0');
    let severity = text.severity as u8;
    let label = severity_to_string(severity);

    match severity {
        0..=3 => error!("[FC {}] {}: {}", system_id, label, message),
        4 => warn!("[FC {}] {}: {}", system_id, label, message),
        5 | 6 => info!("[FC {}] {}: {}", system_id, label, message),
        _ => debug!("[FC {}] {}: {}", system_id, label, message),
    }
}

/// Convert ArduPilot Copter mode number to string
pub fn mode_to_string(mode: u32) -> String {
    match mode {
        0 => "STABILIZE".to_string(),
        1 => "ACRO".to_string(),
        2 => "ALT_HOLD".to_string(),
        3 => "AUTO".to_string(),
        4 => "GUIDED".to_string(),
        5 => "LOITER".to_string(),
        6 => "RTL".to_string(),
        7 => "CIRCLE".to_string(),
        9 => "LAND".to_string(),
        16 => "POSHOLD".to_string(),
        17 => "BRAKE".to_string(),
        21 => "SMART_RTL".to_string(),
        _ => format!("UNKNOWN({})", mode),
    }
}

/// Convert MAVLink severity to string
fn severity_to_string(severity: u8) -> &'static str {
    match severity {
        0 => "EMERGENCY",
        1 => "ALERT",
        2 => "CRITICAL",
        3 => "ERROR",
        4 => "WARNING",
        5 => "NOTICE",
        6 => "INFO",
        7 => "DEBUG",
        _ => "UNKNOWN",
    }
}
