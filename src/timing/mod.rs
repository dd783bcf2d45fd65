// Lap timing: line and sector crossing, lap bookkeeping and per lap metrics

pub mod crossing;
pub mod metrics;
pub mod state_machine;

use serde::{Deserialize, Serialize};

pub use crossing::{LineCrossing, LineCrossingDetector, SectorCrossing, SectorTracker};
pub use metrics::{
    Lap, LapEndReason, LapInvalidReason, LiveMetrics, LiveMetricsSnapshot, SectorTime,
};
pub use state_machine::{LapState, LapStateMachine};

/// A sector waypoint reached during a timed lap
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SectorSplit {
    pub lap_number: u32,
    pub sector_index: usize,
    pub crossed_at_ms: i64,
    /// Time since the lap started
    pub elapsed_ms: i64,
}

/// What processing a sample produced, in the order it happened
#[derive(Clone, Debug, PartialEq)]
pub enum TimingEvent {
    TrackDetected { track_id: String, name: String },
    LapStarted { lap_number: u32, timestamp_ms: i64 },
    SectorCompleted(SectorSplit),
    LapCompleted { lap: Lap, is_new_best: bool },
}
