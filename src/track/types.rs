// Core data structures for track definitions

use serde::{Deserialize, Serialize};

use crate::geo::{self, GeoPoint};

/// Kind of venue a track definition describes
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrackType {
    /// Permanent road course
    Circuit,
    /// Cone course laid out for the day; also the template for ad hoc tracks
    Autocross,
    /// Anything registered at runtime
    Custom,
}

impl TrackType {
    pub fn description(&self) -> &'static str {
        match self {
            TrackType::Circuit => "Circuit",
            TrackType::Autocross => "Autocross",
            TrackType::Custom => "Custom track",
        }
    }
}

/// Driving direction around the lap
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Clockwise,
    CounterClockwise,
    #[default]
    Unspecified,
}

/// Two GPS endpoints of a timing line
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct StartFinishLine {
    pub point1: GeoPoint,
    pub point2: GeoPoint,
}

impl StartFinishLine {
    pub fn new(point1: GeoPoint, point2: GeoPoint) -> Self {
        Self { point1, point2 }
    }

    /// The point crossings are measured against
    pub fn midpoint(&self) -> GeoPoint {
        geo::midpoint(self.point1, self.point2)
    }

    /// Width of the line in meters
    pub fn width_m(&self) -> f64 {
        geo::distance_meters(self.point1, self.point2)
    }
}

/// Geometry and metadata of a track the engine can time laps on
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TrackDefinition {
    /// Unique identifier used for lookup and storage
    pub id: String,
    /// Human-readable name (e.g., "Silverstone Grand Prix Circuit")
    pub name: String,
    pub track_type: TrackType,
    /// `None` only for templates whose line is assigned at runtime
    pub start_finish_line: Option<StartFinishLine>,
    /// Sector checkpoints in driving order; the last one sits just before the line
    #[serde(default)]
    pub sector_waypoints: Vec<GeoPoint>,
    pub length_m: f64,
    #[serde(default)]
    pub direction: Direction,
}

impl TrackDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, track_type: TrackType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            track_type,
            start_finish_line: None,
            sector_waypoints: Vec::new(),
            length_m: 0.0,
            direction: Direction::Unspecified,
        }
    }

    pub fn with_start_finish(mut self, point1: GeoPoint, point2: GeoPoint) -> Self {
        self.start_finish_line = Some(StartFinishLine::new(point1, point2));
        self
    }

    pub fn with_sector_waypoints(mut self, waypoints: Vec<GeoPoint>) -> Self {
        self.sector_waypoints = waypoints;
        self
    }

    pub fn with_length(mut self, length_m: f64) -> Self {
        self.length_m = length_m;
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Midpoint of the start/finish line, if the track has one
    pub fn start_finish_midpoint(&self) -> Option<GeoPoint> {
        self.start_finish_line.map(|line| line.midpoint())
    }

    pub fn sector_count(&self) -> usize {
        self.sector_waypoints.len()
    }

    /// Templates carry no geometry until instantiated
    pub fn is_template(&self) -> bool {
        self.start_finish_line.is_none()
    }

    /// Check the coordinates are usable
    pub fn validate_geometry(&self) -> Result<(), String> {
        if let Some(line) = &self.start_finish_line {
            if !line.point1.is_valid() || !line.point2.is_valid() {
                return Err(format!(
                    "Start/finish line of {} has out of range coordinates",
                    self.id
                ));
            }
        }
        if let Some(idx) = self.sector_waypoints.iter().position(|w| !w.is_valid()) {
            return Err(format!(
                "Sector waypoint {} of {} has out of range coordinates",
                idx, self.id
            ));
        }
        if !self.length_m.is_finite() || self.length_m < 0.0 {
            return Err(format!("Track length of {} must be positive", self.id));
        }
        Ok(())
    }
}
