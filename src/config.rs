use std::fs::File;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::PitwallError;
use crate::geo;
use crate::track::TrackDetection;

const CONFIG_DIR_NAME: &str = "pitwall";
const CONFIG_FILE_NAME: &str = "config.json";

/// How sector times are derived when a lap is finalized
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SectorSplitMode {
    /// Waypoint crossing timestamps, falling back to sample count when a waypoint was missed
    #[default]
    Waypoints,
    /// Equal sample-count slices only
    SampleCount,
}

/// Thresholds of the crossing detector, lap validator and track detection.
///
/// Speeds are expressed in km/h, the unit these limits are usually quoted in;
/// they are converted once to m/s when compared against samples.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    /// Distance the vehicle must reach from the line before a crossing can arm
    pub line_far_threshold_m: f64,
    /// Distance under which an armed line counts as crossed
    pub line_near_threshold_m: f64,
    pub min_crossing_speed_kph: f64,
    /// Proximity radius of a sector waypoint
    pub sector_threshold_m: f64,
    pub min_lap_samples: usize,
    pub min_lap_duration_ms: i64,
    pub min_lap_max_speed_kph: f64,
    /// Laps shorter than this are not finalized when the session stops
    pub min_samples_to_finalize: usize,
    pub track_detection_radius_m: f64,
    pub track_detection: TrackDetection,
    pub sector_split: SectorSplitMode,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            line_far_threshold_m: 50.0,
            line_near_threshold_m: 20.0,
            min_crossing_speed_kph: 10.0,
            sector_threshold_m: 100.0,
            min_lap_samples: 10,
            min_lap_duration_ms: 30_000,
            min_lap_max_speed_kph: 20.0,
            min_samples_to_finalize: 2,
            track_detection_radius_m: 1_000.0,
            track_detection: TrackDetection::Nearest,
            sector_split: SectorSplitMode::Waypoints,
        }
    }
}

impl TimingConfig {
    pub fn min_crossing_speed_mps(&self) -> f64 {
        geo::kph_to_mps(self.min_crossing_speed_kph)
    }

    pub fn min_lap_max_speed_mps(&self) -> f64 {
        geo::kph_to_mps(self.min_lap_max_speed_kph)
    }
}

/// Top level configuration of an engine instance
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub timing: TimingConfig,
    /// Directory of imported track definitions, defaults to the data dir
    pub track_storage_path: Option<PathBuf>,
}

impl EngineConfig {
    pub fn default_path() -> Option<PathBuf> {
        Some(
            dirs::config_dir()?
                .join(CONFIG_DIR_NAME)
                .join(CONFIG_FILE_NAME),
        )
    }

    /// Load the user's config file, `None` when it does not exist or cannot be parsed
    pub fn from_local_file() -> Option<Self> {
        let config_path = Self::default_path()?;
        if !config_path.exists() {
            return None;
        }
        match Self::from_file(&config_path) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!("Ignoring unreadable config file {:?}: {}", config_path, e);
                None
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, PitwallError> {
        debug!("Loading config from {:?}", path);
        let file = File::open(path).map_err(|e| PitwallError::ConfigIOError { source: e })?;
        serde_json::from_reader(file).map_err(|e| PitwallError::ConfigSerializeError { source: e })
    }

    pub fn save(&self) -> Result<(), PitwallError> {
        let config_path = Self::default_path().ok_or(PitwallError::NoConfigDir)?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), PitwallError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| PitwallError::ConfigIOError { source: e })?;
            }
        }

        let file = File::create(path).map_err(|e| PitwallError::ConfigIOError { source: e })?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| PitwallError::ConfigSerializeError { source: e })
    }
}
