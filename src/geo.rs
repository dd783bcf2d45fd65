//! Great-circle helpers and speed unit conversion.
//!
//! Everything here is a pure function over plain values. Distances use the
//! haversine formula on a spherical earth, which is far more precise than the
//! 3-15 m a consumer GPS fix can offer.

use serde::{Deserialize, Serialize};
use uom::si::f64::Velocity;
use uom::si::velocity::{kilometer_per_hour, knot, meter_per_second, mile_per_hour};

use crate::ingest::PositionSample;

/// Mean earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A latitude/longitude pair in decimal degrees
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// True when both coordinates are finite and inside their valid ranges
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl From<&PositionSample> for GeoPoint {
    fn from(sample: &PositionSample) -> Self {
        GeoPoint::new(sample.latitude, sample.longitude)
    }
}

/// Great-circle distance between two points in meters
pub fn distance_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // clamp guards against h drifting a hair above 1.0 for antipodal points
    let c = 2.0 * h.sqrt().min(1.0).asin();
    EARTH_RADIUS_M * c
}

/// Initial bearing from `a` towards `b`, degrees clockwise from true north in [0, 360)
pub fn initial_bearing_degrees(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    y.atan2(x).to_degrees().rem_euclid(360.0)
}

/// Midpoint of two nearby points.
///
/// Plain coordinate averaging, only meant for short segments such as a
/// start/finish line.
pub fn midpoint(a: GeoPoint, b: GeoPoint) -> GeoPoint {
    GeoPoint::new(
        (a.latitude + b.latitude) / 2.0,
        (a.longitude + b.longitude) / 2.0,
    )
}

/// Speed in m/s implied by the displacement between two samples.
///
/// Returns 0 when `curr` is not strictly later than `prev`.
pub fn speed_from_displacement(prev: &PositionSample, curr: &PositionSample) -> f64 {
    let dt_ms = curr.timestamp_ms - prev.timestamp_ms;
    if dt_ms <= 0 {
        return 0.0;
    }
    let distance = distance_meters(prev.into(), curr.into());
    distance / (dt_ms.max(1) as f64 / 1000.0)
}

/// Units a location provider may report speed in
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedUnit {
    #[default]
    MetersPerSecond,
    KilometersPerHour,
    MilesPerHour,
    Knots,
}

impl SpeedUnit {
    /// Convert a value expressed in this unit to meters per second
    pub fn to_mps(self, value: f64) -> f64 {
        let velocity = match self {
            SpeedUnit::MetersPerSecond => return value,
            SpeedUnit::KilometersPerHour => Velocity::new::<kilometer_per_hour>(value),
            SpeedUnit::MilesPerHour => Velocity::new::<mile_per_hour>(value),
            SpeedUnit::Knots => Velocity::new::<knot>(value),
        };
        velocity.get::<meter_per_second>()
    }
}

pub fn kph_to_mps(kph: f64) -> f64 {
    SpeedUnit::KilometersPerHour.to_mps(kph)
}

pub fn mps_to_kph(mps: f64) -> f64 {
    Velocity::new::<meter_per_second>(mps).get::<kilometer_per_hour>()
}
