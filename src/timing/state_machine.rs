use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::TimingConfig;
use crate::ingest::PositionSample;
use crate::track::{TrackDefinition, TrackRegistry};

use super::crossing::{LineCrossingDetector, SectorTracker};
use super::metrics::{self, Lap, LapEndReason, LiveMetrics, LiveMetricsSnapshot};
use super::{SectorSplit, TimingEvent};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LapState {
    /// No session started
    Idle,
    /// Recording, but no track selected or detected yet
    AwaitingTrack,
    Recording,
    Stopped,
}

/// Per session lap bookkeeping.
///
/// Lap 0 is the out lap driven before the first start/finish crossing; its
/// samples are dropped when the line is first crossed. Every later crossing
/// closes the running lap and opens the next one.
pub struct LapStateMachine {
    config: TimingConfig,
    state: LapState,
    track: Option<TrackDefinition>,
    line: LineCrossingDetector,
    sectors: SectorTracker,
    prev_sample: Option<PositionSample>,
    current_lap_number: u32,
    current_lap_positions: Vec<PositionSample>,
    completed_laps: Vec<Lap>,
    best_lap: Option<usize>,
    last_crossed_start_finish_ms: Option<i64>,
    live: LiveMetrics,
}

impl LapStateMachine {
    pub fn new(config: TimingConfig) -> Self {
        Self {
            config,
            state: LapState::Idle,
            track: None,
            line: LineCrossingDetector::new(),
            sectors: SectorTracker::new(),
            prev_sample: None,
            current_lap_number: 0,
            current_lap_positions: Vec::new(),
            completed_laps: Vec::new(),
            best_lap: None,
            last_crossed_start_finish_ms: None,
            live: LiveMetrics::new(),
        }
    }

    /// Begin a fresh session, on a known track or detecting it from the first samples
    pub fn start(&mut self, track: Option<TrackDefinition>) {
        let config = self.config.clone();
        *self = Self::new(config);
        self.state = match track {
            Some(_) => LapState::Recording,
            None => LapState::AwaitingTrack,
        };
        self.track = track;
    }

    /// Feed one accepted sample, returning what it triggered
    pub fn process(&mut self, sample: PositionSample, registry: &TrackRegistry) -> Vec<TimingEvent> {
        let mut events = Vec::new();
        match self.state {
            LapState::Idle | LapState::Stopped => {
                debug!("Ignoring sample at {}ms, not recording", sample.timestamp_ms);
                return events;
            }
            LapState::AwaitingTrack => {
                let detected = registry
                    .detect(
                        &sample,
                        self.config.track_detection_radius_m,
                        self.config.track_detection,
                    )
                    .cloned();
                match detected {
                    Some(track) => {
                        info!("Detected track {} ({})", track.name, track.id);
                        events.push(TimingEvent::TrackDetected {
                            track_id: track.id.clone(),
                            name: track.name.clone(),
                        });
                        self.track = Some(track);
                        self.state = LapState::Recording;
                    }
                    None => {
                        self.live.update(&sample);
                        self.prev_sample = Some(sample);
                        return events;
                    }
                }
            }
            LapState::Recording => {}
        }

        self.record(sample, &mut events);
        events
    }

    fn record(&mut self, sample: PositionSample, events: &mut Vec<TimingEvent>) {
        self.live.update(&sample);
        self.current_lap_positions.push(sample.clone());

        // Waypoints first: the last one usually sits on the finish line and
        // belongs to the lap this sample may close
        if self.current_lap_number > 0 {
            if let (Some(track), Some(lap_start)) =
                (&self.track, self.last_crossed_start_finish_ms)
            {
                if let Some(hit) = self.sectors.check(
                    &sample,
                    &track.sector_waypoints,
                    self.config.sector_threshold_m,
                ) {
                    events.push(TimingEvent::SectorCompleted(SectorSplit {
                        lap_number: self.current_lap_number,
                        sector_index: hit.index,
                        crossed_at_ms: hit.timestamp_ms,
                        elapsed_ms: hit.timestamp_ms - lap_start,
                    }));
                }
            }
        }

        let target = self.track.as_ref().and_then(|t| t.start_finish_midpoint());
        let crossing = target.and_then(|target| {
            self.line
                .check(self.prev_sample.as_ref(), &sample, target, &self.config)
        });

        if let Some(crossing) = crossing {
            if self.current_lap_number > 0 {
                let positions = std::mem::take(&mut self.current_lap_positions);
                let (lap, is_new_best) =
                    self.complete_lap(positions, LapEndReason::StartFinishCrossing);
                events.push(TimingEvent::LapCompleted { lap, is_new_best });
            } else {
                debug!(
                    "Out lap ended, discarding {} samples",
                    self.current_lap_positions.len().saturating_sub(1)
                );
            }

            self.current_lap_number += 1;
            self.current_lap_positions = vec![sample.clone()];
            self.last_crossed_start_finish_ms = Some(crossing.timestamp_ms);
            self.sectors.reset();
            self.live.start_lap(crossing.timestamp_ms);
            events.push(TimingEvent::LapStarted {
                lap_number: self.current_lap_number,
                timestamp_ms: crossing.timestamp_ms,
            });
        }

        self.prev_sample = Some(sample);
    }

    fn complete_lap(&mut self, positions: Vec<PositionSample>, end_reason: LapEndReason) -> (Lap, bool) {
        let lap_number = self.completed_laps.len() as u32 + 1;
        let lap = metrics::finalize_lap(
            lap_number,
            positions,
            self.track.as_ref(),
            self.sectors.crossings(),
            end_reason,
            &self.config,
        );

        if !lap.is_valid {
            warn!(
                "Invalid lap {} discarded from best lap: {:?}",
                lap.lap_number, lap.invalid_reasons
            );
        }

        let is_new_best = metrics::is_new_best(&lap, self.best_lap());
        self.completed_laps.push(lap.clone());
        if is_new_best {
            info!("New best lap {}: {}ms", lap.lap_number, lap.duration_ms);
            self.best_lap = Some(self.completed_laps.len() - 1);
        }
        (lap, is_new_best)
    }

    /// End the session, closing the running lap if it has enough samples
    pub fn stop(&mut self) -> Vec<TimingEvent> {
        let mut events = Vec::new();
        match self.state {
            LapState::Idle | LapState::Stopped => return events,
            LapState::AwaitingTrack => {}
            LapState::Recording => {
                if self.current_lap_positions.len() >= self.config.min_samples_to_finalize {
                    let positions = std::mem::take(&mut self.current_lap_positions);
                    let (lap, is_new_best) =
                        self.complete_lap(positions, LapEndReason::SessionStopped);
                    events.push(TimingEvent::LapCompleted { lap, is_new_best });
                }
            }
        }
        self.current_lap_positions.clear();
        self.state = LapState::Stopped;
        events
    }

    pub fn state(&self) -> LapState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, LapState::AwaitingTrack | LapState::Recording)
    }

    pub fn track(&self) -> Option<&TrackDefinition> {
        self.track.as_ref()
    }

    pub fn config(&self) -> &TimingConfig {
        &self.config
    }

    pub fn current_lap_number(&self) -> u32 {
        self.current_lap_number
    }

    pub fn current_lap_positions(&self) -> &[PositionSample] {
        &self.current_lap_positions
    }

    pub fn completed_laps(&self) -> &[Lap] {
        &self.completed_laps
    }

    pub fn best_lap(&self) -> Option<&Lap> {
        self.best_lap.and_then(|i| self.completed_laps.get(i))
    }

    pub fn last_crossed_start_finish_ms(&self) -> Option<i64> {
        self.last_crossed_start_finish_ms
    }

    pub fn live_metrics(&self) -> LiveMetricsSnapshot {
        self.live.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{GeoPoint, kph_to_mps};
    use crate::ingest::SpeedSource;
    use crate::timing::LapInvalidReason;
    use crate::track::TrackType;
    use proptest::prelude::*;
    use std::f64::consts::PI;

    const LINE: GeoPoint = GeoPoint::new(45.0, 9.0);
    const M_PER_DEG_LAT: f64 = 111_194.93;

    fn at(meters_north: f64, timestamp_ms: i64) -> PositionSample {
        PositionSample {
            latitude: LINE.latitude + meters_north / M_PER_DEG_LAT,
            longitude: LINE.longitude,
            timestamp_ms,
            speed_mps: kph_to_mps(100.0),
            accuracy_m: 5.0,
            heading_deg: None,
            speed_source: SpeedSource::Reported,
        }
    }

    fn test_track(waypoints: Vec<GeoPoint>) -> TrackDefinition {
        TrackDefinition::new("test_ring", "Test Ring", TrackType::Circuit)
            .with_start_finish(
                GeoPoint::new(LINE.latitude, LINE.longitude - 0.0001),
                GeoPoint::new(LINE.latitude, LINE.longitude + 0.0001),
            )
            .with_sector_waypoints(waypoints)
    }

    /// Out and back laps from the line, `n` samples per lap peaking `peak_m` away
    fn session_samples(lap_durations: &[i64], n: i64, peak_m: f64) -> Vec<PositionSample> {
        let mut samples = vec![at(300.0, 0), at(0.0, 5_000)];
        let mut t = 5_000;
        for duration in lap_durations {
            let step = duration / n;
            for k in 1..=n {
                let d = peak_m * (PI * k as f64 / n as f64).sin();
                samples.push(at(d, t + k * step));
            }
            t += step * n;
        }
        samples
    }

    fn run(machine: &mut LapStateMachine, samples: Vec<PositionSample>) -> Vec<TimingEvent> {
        let registry = TrackRegistry::empty();
        samples
            .into_iter()
            .flat_map(|s| machine.process(s, &registry))
            .collect()
    }

    #[test]
    fn test_two_laps_with_best_lap() {
        let mut machine = LapStateMachine::new(TimingConfig::default());
        machine.start(Some(test_track(vec![])));
        let events = run(&mut machine, session_samples(&[85_000, 83_500], 20, 1_000.0));

        let laps = machine.completed_laps();
        assert_eq!(laps.len(), 2);
        assert_eq!(laps[0].duration_ms, 85_000);
        assert_eq!(laps[1].duration_ms, 83_500);
        assert!(laps.iter().all(|l| l.is_valid));
        assert_eq!(machine.best_lap().map(|l| l.lap_number), Some(2));
        assert_eq!(machine.current_lap_number(), 3);

        let started: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                TimingEvent::LapStarted { lap_number, .. } => Some(*lap_number),
                _ => None,
            })
            .collect();
        assert_eq!(started, vec![1, 2, 3]);

        let bests: Vec<bool> = events
            .iter()
            .filter_map(|e| match e {
                TimingEvent::LapCompleted { is_new_best, .. } => Some(*is_new_best),
                _ => None,
            })
            .collect();
        assert_eq!(bests, vec![true, true]);
    }

    #[test]
    fn test_out_lap_is_discarded() {
        let mut machine = LapStateMachine::new(TimingConfig::default());
        machine.start(Some(test_track(vec![])));
        let samples = session_samples(&[85_000], 20, 1_000.0);
        run(&mut machine, samples);

        let lap = &machine.completed_laps()[0];
        // Crossing sample plus the 20 lap samples, the approach is dropped
        assert_eq!(lap.positions.len(), 21);
        assert_eq!(lap.start_time_ms, 5_000);
        // The closing crossing opens the next lap
        assert_eq!(machine.current_lap_positions().len(), 1);
        assert_eq!(machine.last_crossed_start_finish_ms(), Some(90_000));
    }

    #[test]
    fn test_lap_numbers_are_contiguous() {
        let mut machine = LapStateMachine::new(TimingConfig::default());
        machine.start(Some(test_track(vec![])));
        // The short second lap is invalid but still numbered
        run(
            &mut machine,
            session_samples(&[60_000, 20_000, 70_000, 65_000], 20, 800.0),
        );
        let numbers: Vec<u32> = machine.completed_laps().iter().map(|l| l.lap_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
        assert!(!machine.completed_laps()[1].is_valid);
        assert_eq!(machine.best_lap().map(|l| l.lap_number), Some(1));
    }

    #[test]
    fn test_sector_splits() {
        let waypoints = vec![
            GeoPoint::new(LINE.latitude + 1_000.0 / M_PER_DEG_LAT, LINE.longitude),
            LINE,
        ];
        let mut machine = LapStateMachine::new(TimingConfig::default());
        machine.start(Some(test_track(waypoints)));
        let events = run(&mut machine, session_samples(&[80_000], 20, 1_000.0));

        let splits: Vec<&SectorSplit> = events
            .iter()
            .filter_map(|e| match e {
                TimingEvent::SectorCompleted(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(splits.len(), 2);
        // Sample 8 of 20 is the first within 100m of the far waypoint
        assert_eq!(splits[0].sector_index, 0);
        assert_eq!(splits[0].elapsed_ms, 32_000);
        assert_eq!(splits[1].sector_index, 1);
        assert_eq!(splits[1].lap_number, 1);

        let lap = &machine.completed_laps()[0];
        assert_eq!(lap.sector_times.len(), 2);
        assert_eq!(lap.sector_times[0].time_ms, 32_000);
        assert_eq!(
            lap.sector_times.iter().map(|s| s.time_ms).sum::<i64>(),
            lap.duration_ms
        );
    }

    #[test]
    fn test_stop_finalizes_partial_lap() {
        let mut machine = LapStateMachine::new(TimingConfig::default());
        machine.start(Some(test_track(vec![])));
        let mut samples = session_samples(&[85_000], 20, 1_000.0);
        samples.push(at(150.0, 95_000));
        samples.push(at(400.0, 100_000));
        run(&mut machine, samples);

        let events = machine.stop();
        assert_eq!(machine.state(), LapState::Stopped);
        assert!(!machine.is_recording());
        let [TimingEvent::LapCompleted { lap, is_new_best }] = events.as_slice() else {
            panic!("expected one lap, got {events:?}");
        };
        assert_eq!(lap.lap_number, 2);
        assert_eq!(lap.end_reason, LapEndReason::SessionStopped);
        // Judged like any other lap, and three samples are too few
        assert!(
            lap.invalid_reasons
                .iter()
                .any(|r| matches!(r, LapInvalidReason::TooFewSamples { .. }))
        );
        assert!(!is_new_best);
        assert_eq!(machine.completed_laps().len(), 2);
        assert!(machine.current_lap_positions().is_empty());

        // Stopping again is a no-op
        assert!(machine.stop().is_empty());
        assert_eq!(machine.completed_laps().len(), 2);
    }

    #[test]
    fn test_stop_with_single_sample_keeps_nothing() {
        let mut machine = LapStateMachine::new(TimingConfig::default());
        machine.start(Some(test_track(vec![])));
        run(&mut machine, vec![at(500.0, 0)]);
        assert!(machine.stop().is_empty());
        assert!(machine.completed_laps().is_empty());
    }

    #[test]
    fn test_track_detection_while_awaiting() {
        let mut registry = TrackRegistry::empty();
        registry.register(test_track(vec![])).unwrap();

        let mut machine = LapStateMachine::new(TimingConfig::default());
        machine.start(None);
        assert_eq!(machine.state(), LapState::AwaitingTrack);

        // Far away, nothing detected
        assert!(machine.process(at(5_000.0, 0), &registry).is_empty());
        assert_eq!(machine.state(), LapState::AwaitingTrack);

        let events = machine.process(at(400.0, 1_000), &registry);
        assert_eq!(
            events,
            vec![TimingEvent::TrackDetected {
                track_id: "test_ring".to_string(),
                name: "Test Ring".to_string(),
            }]
        );
        assert_eq!(machine.state(), LapState::Recording);
        assert_eq!(machine.current_lap_positions().len(), 1);

        let events = machine.process(at(300.0, 2_000), &registry);
        assert!(events.is_empty());
        assert_eq!(machine.track().map(|t| t.id.as_str()), Some("test_ring"));
    }

    #[test]
    fn test_samples_ignored_when_idle() {
        let mut machine = LapStateMachine::new(TimingConfig::default());
        assert!(machine.process(at(0.0, 0), &TrackRegistry::empty()).is_empty());
        assert_eq!(machine.state(), LapState::Idle);
        assert!(machine.current_lap_positions().is_empty());
    }

    #[test]
    fn test_restart_clears_previous_session() {
        let mut machine = LapStateMachine::new(TimingConfig::default());
        machine.start(Some(test_track(vec![])));
        run(&mut machine, session_samples(&[85_000], 20, 1_000.0));
        machine.stop();

        machine.start(Some(test_track(vec![])));
        assert!(machine.completed_laps().is_empty());
        assert!(machine.best_lap().is_none());
        assert_eq!(machine.current_lap_number(), 0);
        assert_eq!(machine.state(), LapState::Recording);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_lap_numbers_contiguous_and_best_is_fastest_valid(
            durations in prop::collection::vec(10_000i64..150_000, 1..6)
        ) {
            let mut machine = LapStateMachine::new(TimingConfig::default());
            machine.start(Some(test_track(vec![])));
            run(&mut machine, session_samples(&durations, 20, 800.0));
            machine.stop();

            let laps = machine.completed_laps();
            prop_assert_eq!(laps.len(), durations.len());
            for (i, lap) in laps.iter().enumerate() {
                prop_assert_eq!(lap.lap_number, i as u32 + 1);
            }

            let fastest_valid = laps.iter().filter(|l| l.is_valid).map(|l| l.duration_ms).min();
            prop_assert_eq!(machine.best_lap().map(|l| l.duration_ms), fastest_valid);
        }
    }
}
