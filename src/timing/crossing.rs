//! Start/finish and sector crossing detection.
//!
//! Consumer GPS at ~1 Hz rarely places a fix on the line itself, so instead of
//! intersecting the movement segment with the line geometry the detectors work
//! on distances to a target point:
//!
//! - the start/finish line arms once the vehicle has been more than
//!   `line_far_threshold_m` away from the line midpoint, and fires on the
//!   first sample closer than `line_near_threshold_m` while moving faster than
//!   `min_crossing_speed_kph`. Firing disarms it, so noise while parked or
//!   crawling near the line cannot produce a second crossing.
//! - sector waypoints are single sided proximity checks, armed one at a time
//!   in driving order and each recorded at most once per lap.
//!
//! The crossing time is the timestamp of the sample that fired. There is no
//! sub-sample interpolation.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::TimingConfig;
use crate::geo::{self, GeoPoint};
use crate::ingest::PositionSample;

/// A detected start/finish crossing
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LineCrossing {
    pub timestamp_ms: i64,
    /// Distance from the line midpoint when the crossing fired
    pub distance_m: f64,
}

/// Distance-threshold detector with hysteresis for the start/finish line
#[derive(Clone, Debug, Default)]
pub struct LineCrossingDetector {
    armed: bool,
}

impl LineCrossingDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Check whether moving from `prev` to `curr` crossed the line at `target`.
    ///
    /// Without a previous sample no crossing can be declared.
    pub fn check(
        &mut self,
        prev: Option<&PositionSample>,
        curr: &PositionSample,
        target: GeoPoint,
        config: &TimingConfig,
    ) -> Option<LineCrossing> {
        let prev = prev?;

        let d_prev = geo::distance_meters(prev.point(), target);
        let d_curr = geo::distance_meters(curr.point(), target);

        if d_prev > config.line_far_threshold_m {
            self.armed = true;
        }

        if self.armed
            && d_curr < config.line_near_threshold_m
            && curr.speed_mps > config.min_crossing_speed_mps()
        {
            self.armed = false;
            debug!(
                "Start/finish crossed at {}ms, {:.1}m from the line",
                curr.timestamp_ms, d_curr
            );
            return Some(LineCrossing {
                timestamp_ms: curr.timestamp_ms,
                distance_m: d_curr,
            });
        }

        None
    }
}

/// A sector waypoint reached during the current lap
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SectorCrossing {
    /// Index of the waypoint in the track's list
    pub index: usize,
    pub timestamp_ms: i64,
    pub distance_m: f64,
}

/// Tracks which sector waypoints the current lap has passed
#[derive(Clone, Debug, Default)]
pub struct SectorTracker {
    crossings: Vec<SectorCrossing>,
}

impl SectorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the crossings of the previous lap
    pub fn reset(&mut self) {
        self.crossings.clear();
    }

    pub fn crossings(&self) -> &[SectorCrossing] {
        &self.crossings
    }

    /// Index of the waypoint currently armed
    pub fn next_index(&self) -> usize {
        self.crossings.len()
    }

    /// Test the next armed waypoint against `curr`, recording and returning a hit
    pub fn check(
        &mut self,
        curr: &PositionSample,
        waypoints: &[GeoPoint],
        threshold_m: f64,
    ) -> Option<SectorCrossing> {
        let index = self.next_index();
        let waypoint = waypoints.get(index)?;

        let distance_m = geo::distance_meters(curr.point(), *waypoint);
        if distance_m > threshold_m {
            return None;
        }

        let crossing = SectorCrossing {
            index,
            timestamp_ms: curr.timestamp_ms,
            distance_m,
        };
        debug!(
            "Sector waypoint {} reached at {}ms ({:.1}m)",
            index, curr.timestamp_ms, distance_m
        );
        self.crossings.push(crossing);
        Some(crossing)
    }
}
