use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};
use simple_moving_average::{SMA, SumTreeSMA};

use crate::config::{SectorSplitMode, TimingConfig};
use crate::geo::{self, mps_to_kph};
use crate::ingest::PositionSample;
use crate::track::TrackDefinition;

use super::crossing::SectorCrossing;

/// Number of samples averaged by the smoothed live speed
pub const SPEED_SMOOTHING_WINDOW: usize = 5;

/// Why a lap was closed
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LapEndReason {
    StartFinishCrossing,
    SessionStopped,
}

/// A validation rule the lap failed
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum LapInvalidReason {
    TooFewSamples { count: usize },
    TooShort { duration_ms: i64 },
    TooSlow { max_speed_kph: f64 },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SectorTime {
    pub time_ms: i64,
    pub max_speed_mps: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Lap {
    pub lap_number: u32,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub duration_ms: i64,
    pub max_speed_mps: f64,
    /// Mean of the samples that reported movement
    pub average_speed_mps: f64,
    pub distance_m: f64,
    pub sector_times: Vec<SectorTime>,
    pub positions: Vec<PositionSample>,
    pub track_id: Option<String>,
    pub is_valid: bool,
    pub invalid_reasons: Vec<LapInvalidReason>,
    pub end_reason: LapEndReason,
}

impl Lap {
    pub fn max_speed_kph(&self) -> f64 {
        mps_to_kph(self.max_speed_mps)
    }

    pub fn average_speed_kph(&self) -> f64 {
        mps_to_kph(self.average_speed_mps)
    }
}

/// Close a lap over its ordered samples.
///
/// `sector_crossings` are the waypoints reached during this lap, in order.
pub fn finalize_lap(
    lap_number: u32,
    positions: Vec<PositionSample>,
    track: Option<&TrackDefinition>,
    sector_crossings: &[SectorCrossing],
    end_reason: LapEndReason,
    config: &TimingConfig,
) -> Lap {
    let start_time_ms = positions.first().map_or(0, |p| p.timestamp_ms);
    let end_time_ms = positions.last().map_or(0, |p| p.timestamp_ms);
    let duration_ms = end_time_ms - start_time_ms;

    let max_speed_mps = max_speed(&positions);
    let average_speed_mps = average_moving_speed(&positions);
    let distance_m = path_distance(&positions);

    let sector_times = match track {
        Some(track) if track.sector_count() > 0 => {
            let count = track.sector_count();
            let all_crossed = sector_crossings.len() >= count;
            if config.sector_split == SectorSplitMode::Waypoints && all_crossed {
                split_by_waypoints(&positions, &sector_crossings[..count])
            } else {
                split_by_sample_count(&positions, count)
            }
        }
        _ => Vec::new(),
    };

    let invalid_reasons = validate(positions.len(), duration_ms, max_speed_mps, config);
    let is_valid = invalid_reasons.is_empty();
    debug!(
        "Lap {} finalized: {}ms, {} samples, valid={}",
        lap_number,
        duration_ms,
        positions.len(),
        is_valid
    );

    Lap {
        lap_number,
        start_time_ms,
        end_time_ms,
        duration_ms,
        max_speed_mps,
        average_speed_mps,
        distance_m,
        sector_times,
        positions,
        track_id: track.map(|t| t.id.clone()),
        is_valid,
        invalid_reasons,
        end_reason,
    }
}

/// Every rule the lap breaks, empty for a valid lap.
///
/// How the lap ended plays no part: a lap cut short by stopping the session
/// is judged by the same thresholds as a full one.
pub fn validate(
    sample_count: usize,
    duration_ms: i64,
    max_speed_mps: f64,
    config: &TimingConfig,
) -> Vec<LapInvalidReason> {
    let mut reasons = Vec::new();
    if sample_count < config.min_lap_samples {
        reasons.push(LapInvalidReason::TooFewSamples {
            count: sample_count,
        });
    }
    if duration_ms < config.min_lap_duration_ms {
        reasons.push(LapInvalidReason::TooShort { duration_ms });
    }
    if max_speed_mps < config.min_lap_max_speed_mps() {
        reasons.push(LapInvalidReason::TooSlow {
            max_speed_kph: mps_to_kph(max_speed_mps),
        });
    }
    reasons
}

/// Whether `candidate` replaces `best` as the session's fastest valid lap
pub fn is_new_best(candidate: &Lap, best: Option<&Lap>) -> bool {
    candidate.is_valid && best.is_none_or(|best| candidate.duration_ms < best.duration_ms)
}

/// Split the samples into `parts` slices of near equal sample count.
///
/// Adjacent slices share their boundary sample so the slice times add up to
/// the lap duration.
pub fn split_by_sample_count(positions: &[PositionSample], parts: usize) -> Vec<SectorTime> {
    if parts == 0 {
        return Vec::new();
    }
    if positions.is_empty() {
        return vec![
            SectorTime {
                time_ms: 0,
                max_speed_mps: 0.0,
            };
            parts
        ];
    }

    let last = positions.len() - 1;
    (0..=parts)
        .map(|i| i * last / parts)
        .tuple_windows()
        .map(|(from, to)| sector_over(&positions[from..=to]))
        .collect()
}

/// Split the lap at the waypoint crossings.
///
/// Sector `i` ends when waypoint `i` was reached; the last waypoint marks the
/// run to the finish so the final sector ends with the lap.
pub fn split_by_waypoints(
    positions: &[PositionSample],
    crossings: &[SectorCrossing],
) -> Vec<SectorTime> {
    let (Some(first), Some(last)) = (positions.first(), positions.last()) else {
        return Vec::new();
    };
    if crossings.is_empty() {
        return Vec::new();
    }

    let inner = &crossings[..crossings.len() - 1];
    std::iter::once(first.timestamp_ms)
        .chain(inner.iter().map(|c| c.timestamp_ms))
        .chain(std::iter::once(last.timestamp_ms))
        .tuple_windows()
        .map(|(from, to)| {
            let max_speed_mps = positions
                .iter()
                .filter(|p| p.timestamp_ms >= from && p.timestamp_ms <= to)
                .map(|p| p.speed_mps)
                .fold(0.0, f64::max);
            SectorTime {
                time_ms: to - from,
                max_speed_mps,
            }
        })
        .collect()
}

fn sector_over(slice: &[PositionSample]) -> SectorTime {
    let time_ms = match (slice.first(), slice.last()) {
        (Some(first), Some(last)) => last.timestamp_ms - first.timestamp_ms,
        _ => 0,
    };
    SectorTime {
        time_ms,
        max_speed_mps: max_speed(slice),
    }
}

fn max_speed(positions: &[PositionSample]) -> f64 {
    positions.iter().map(|p| p.speed_mps).fold(0.0, f64::max)
}

fn average_moving_speed(positions: &[PositionSample]) -> f64 {
    let (sum, count) = positions
        .iter()
        .filter(|p| p.speed_mps > 0.0)
        .fold((0.0, 0usize), |(sum, count), p| (sum + p.speed_mps, count + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

/// Sum of the great-circle distances between consecutive samples
pub fn path_distance(positions: &[PositionSample]) -> f64 {
    positions
        .iter()
        .tuple_windows()
        .map(|(a, b)| geo::distance_meters(a.point(), b.point()))
        .sum()
}

/// Point in time copy of the live metrics
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct LiveMetricsSnapshot {
    pub current_speed_mps: f64,
    pub smoothed_speed_mps: f64,
    pub lap_distance_m: f64,
    pub session_distance_m: f64,
    pub current_lap_elapsed_ms: i64,
}

/// Running values updated on every accepted sample
pub struct LiveMetrics {
    speed_window: SumTreeSMA<f64, f64, SPEED_SMOOTHING_WINDOW>,
    last: Option<PositionSample>,
    lap_start_ms: Option<i64>,
    snapshot: LiveMetricsSnapshot,
}

impl Default for LiveMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self {
            speed_window: SumTreeSMA::new(),
            last: None,
            lap_start_ms: None,
            snapshot: LiveMetricsSnapshot::default(),
        }
    }

    pub fn update(&mut self, sample: &PositionSample) {
        if let Some(last) = &self.last {
            let step = geo::distance_meters(last.point(), sample.point());
            self.snapshot.session_distance_m += step;
            if self.lap_start_ms.is_some() {
                self.snapshot.lap_distance_m += step;
            }
        }

        self.speed_window.add_sample(sample.speed_mps);
        self.snapshot.current_speed_mps = sample.speed_mps;
        self.snapshot.smoothed_speed_mps = self.speed_window.get_average();
        self.snapshot.current_lap_elapsed_ms = self
            .lap_start_ms
            .map_or(0, |start| sample.timestamp_ms - start);
        self.last = Some(sample.clone());
    }

    /// Restart the per-lap counters at `timestamp_ms`
    pub fn start_lap(&mut self, timestamp_ms: i64) {
        self.lap_start_ms = Some(timestamp_ms);
        self.snapshot.lap_distance_m = 0.0;
        self.snapshot.current_lap_elapsed_ms = 0;
    }

    pub fn snapshot(&self) -> LiveMetricsSnapshot {
        self.snapshot.clone()
    }
}
