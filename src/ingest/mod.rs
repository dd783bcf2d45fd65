pub mod source;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::geo::{self, GeoPoint, SpeedUnit};

pub use source::{PositionSource, ReplaySource, SourceEvent};

/// A location update as delivered by an external location provider
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawFix {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp_ms: i64,
    /// Reported speed, `None` when the provider has no velocity estimate
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub speed_unit: SpeedUnit,
    /// Horizontal accuracy radius in meters
    #[serde(default)]
    pub accuracy: f64,
    #[serde(default)]
    pub heading: Option<f64>,
}

impl RawFix {
    pub fn new(latitude: f64, longitude: f64, timestamp_ms: i64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp_ms,
            speed: None,
            speed_unit: SpeedUnit::MetersPerSecond,
            accuracy: 0.0,
            heading: None,
        }
    }

    pub fn with_speed(mut self, speed: f64, unit: SpeedUnit) -> Self {
        self.speed = Some(speed);
        self.speed_unit = unit;
        self
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = accuracy;
        self
    }

    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = Some(heading);
        self
    }
}

/// Where a sample's speed came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedSource {
    /// Reported by the location provider
    Reported,
    /// Provider omitted it (or sent a non-positive value), `speed_mps` is 0
    Unknown,
    /// Derived from the displacement to the previous sample
    Estimated,
}

/// Canonical position sample consumed by the timing engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp_ms: i64,
    pub speed_mps: f64,
    pub accuracy_m: f64,
    pub heading_deg: Option<f64>,
    pub speed_source: SpeedSource,
}

impl PositionSample {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// Convert an external fix into the canonical sample.
///
/// Speed is converted to m/s. A negative, zero, missing or non-finite speed is
/// flagged as [`SpeedSource::Unknown`] so the caller can substitute an estimate.
/// No filtering happens here, accuracy is passed through untouched.
pub fn normalize(raw: &RawFix) -> PositionSample {
    let (speed_mps, speed_source) = match raw.speed {
        Some(speed) if speed.is_finite() && speed > 0.0 => {
            (raw.speed_unit.to_mps(speed), SpeedSource::Reported)
        }
        _ => (0.0, SpeedSource::Unknown),
    };

    PositionSample {
        latitude: raw.latitude,
        longitude: raw.longitude,
        timestamp_ms: raw.timestamp_ms,
        speed_mps,
        accuracy_m: raw.accuracy,
        heading_deg: raw.heading.filter(|h| h.is_finite()),
        speed_source,
    }
}

/// Stateful front door of the engine: normalizes fixes and keeps the accepted
/// stream strictly ordered.
#[derive(Debug, Default)]
pub struct PositionIngest {
    last: Option<PositionSample>,
    dropped: usize,
}

impl PositionIngest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize a fix and decide whether it enters the timing pipeline.
    ///
    /// Returns `None` for fixes with unusable coordinates and for fixes that are
    /// not strictly newer than the last accepted one (duplicates, out-of-order
    /// deliveries). Unknown speeds are replaced by a displacement estimate and a
    /// missing heading by the bearing from the previous sample.
    pub fn accept(&mut self, raw: &RawFix) -> Option<PositionSample> {
        let mut sample = normalize(raw);

        if !sample.point().is_valid() {
            debug!(
                "Dropping fix with invalid coordinates ({}, {})",
                raw.latitude, raw.longitude
            );
            self.dropped += 1;
            return None;
        }

        if let Some(prev) = &self.last {
            if sample.timestamp_ms <= prev.timestamp_ms {
                debug!(
                    "Dropping out-of-order fix at {}ms (last accepted {}ms)",
                    sample.timestamp_ms, prev.timestamp_ms
                );
                self.dropped += 1;
                return None;
            }

            if sample.speed_source == SpeedSource::Unknown {
                sample.speed_mps = geo::speed_from_displacement(prev, &sample);
                sample.speed_source = SpeedSource::Estimated;
            }

            if sample.heading_deg.is_none() && prev.point() != sample.point() {
                sample.heading_deg = Some(geo::initial_bearing_degrees(
                    prev.point(),
                    sample.point(),
                ));
            }
        }

        self.last = Some(sample.clone());
        Some(sample)
    }

    /// Number of fixes rejected so far
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}
