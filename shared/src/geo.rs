//! Geographic value types
//!
//! Coordinates cross the link boundary as integer micro-degrees so that a
//! target point is reproduced exactly on the vehicle side.

use crate::error::GeoError;
use std::fmt;

/// Micro-degrees per degree
pub const MICRODEGREES_PER_DEGREE: f64 = 1_000_000.0;

/// Millimeters per meter
pub const MILLIMETERS_PER_METER: f64 = 1_000.0;

const LATITUDE_LIMIT: i32 = 90_000_000;
const LONGITUDE_LIMIT: i32 = 180_000_000;

/// An immutable geographic point.
///
/// Latitude and longitude are stored in micro-degrees, altitude in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    latitude: i32,
    longitude: i32,
    altitude_m: f64,
}

impl GeoPoint {
    /// Create a point from micro-degree coordinates
    pub fn new(latitude: i32, longitude: i32, altitude_m: f64) -> Result<Self, GeoError> {
        if !(-LATITUDE_LIMIT..=LATITUDE_LIMIT).contains(&latitude) {
            return Err(GeoError::OutOfRange {
                axis: "latitude",
                value: latitude,
                limit: LATITUDE_LIMIT,
            });
        }
        if !(-LONGITUDE_LIMIT..=LONGITUDE_LIMIT).contains(&longitude) {
            return Err(GeoError::OutOfRange {
                axis: "longitude",
                value: longitude,
                limit: LONGITUDE_LIMIT,
            });
        }
        if !altitude_m.is_finite() {
            return Err(GeoError::NotFinite { axis: "altitude" });
        }

        Ok(Self {
            latitude,
            longitude,
            altitude_m,
        })
    }

    /// Create a point from decimal degrees, rounding to the nearest micro-degree
    pub fn from_degrees(latitude: f64, longitude: f64, altitude_m: f64) -> Result<Self, GeoError> {
        let latitude = to_micro("latitude", latitude)?;
        let longitude = to_micro("longitude", longitude)?;
        Self::new(latitude, longitude, altitude_m)
    }

    /// Latitude in micro-degrees
    pub fn latitude(&self) -> i32 {
        self.latitude
    }

    /// Longitude in micro-degrees
    pub fn longitude(&self) -> i32 {
        self.longitude
    }

    /// Altitude in meters
    pub fn altitude_m(&self) -> f64 {
        self.altitude_m
    }

    pub fn latitude_deg(&self) -> f64 {
        self.latitude as f64 / MICRODEGREES_PER_DEGREE
    }

    pub fn longitude_deg(&self) -> f64 {
        self.longitude as f64 / MICRODEGREES_PER_DEGREE
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lat={:.6}, lon={:.6}, alt={:.2}m",
            self.latitude_deg(),
            self.longitude_deg(),
            self.altitude_m
        )
    }
}

fn to_micro(axis: &'static str, degrees: f64) -> Result<i32, GeoError> {
    if !degrees.is_finite() {
        return Err(GeoError::NotFinite { axis });
    }
    // Saturating cast; out-of-range values are rejected by `GeoPoint::new`
    Ok((degrees * MICRODEGREES_PER_DEGREE).round() as i32)
}

/// A single position reading converted to physical units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSample {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_m: f64,
}

impl PositionSample {
    /// Convert a raw fix (micro-degrees, millimeters) to degrees and meters
    pub fn from_raw(latitude: i32, longitude: i32, altitude_mm: i32) -> Self {
        Self {
            latitude_deg: latitude as f64 / MICRODEGREES_PER_DEGREE,
            longitude_deg: longitude as f64 / MICRODEGREES_PER_DEGREE,
            altitude_m: altitude_mm as f64 / MILLIMETERS_PER_METER,
        }
    }
}

impl fmt::Display for PositionSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Lat={:.6}, Lon={:.6}, Alt={:.2}",
            self.latitude_deg, self.longitude_deg, self.altitude_m
        )
    }
}
