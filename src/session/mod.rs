pub mod events;

use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::errors::{PitwallError, PositionSourceError};
use crate::ingest::{PositionIngest, PositionSample, PositionSource, RawFix};
use crate::timing::{
    Lap, LapState, LapStateMachine, LiveMetricsSnapshot, SectorSplit, TimingEvent,
};
use crate::track::{TrackDefinition, TrackRegistry};

pub use events::{EventBus, Subscription};

/// Owned snapshot of a session, as published to subscribers
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Session {
    pub session_id: Uuid,
    pub track_id: Option<String>,
    pub track_name: Option<String>,
    /// Wall clock start, milliseconds since the Unix epoch
    pub start_time_ms: i64,
    pub state: LapState,
    pub is_recording: bool,
    pub current_lap_number: u32,
    pub current_lap_positions: Vec<PositionSample>,
    pub completed_laps: Vec<Lap>,
    pub best_lap: Option<Lap>,
    pub last_crossed_start_finish_ms: Option<i64>,
    pub live: LiveMetricsSnapshot,
    /// Fixes rejected by ingest (invalid or out of order)
    pub dropped_fixes: usize,
}

/// Outcome of a single [`SessionController::poll`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollStatus {
    /// A fix was accepted and run through the timing engine
    Processed,
    /// A fix was delivered but rejected by ingest
    Ignored,
    /// No active session
    Idle,
    /// The source has nothing left
    Exhausted,
    /// Recording is halted after a source error, see [`SessionController::resume`]
    Halted,
}

struct ActiveSession {
    session_id: Uuid,
    start_time_ms: i64,
    machine: LapStateMachine,
    ingest: PositionIngest,
    halted: bool,
}

impl ActiveSession {
    fn snapshot(&self) -> Session {
        let track = self.machine.track();
        Session {
            session_id: self.session_id,
            track_id: track.map(|t| t.id.clone()),
            track_name: track.map(|t| t.name.clone()),
            start_time_ms: self.start_time_ms,
            state: self.machine.state(),
            is_recording: self.machine.is_recording() && !self.halted,
            current_lap_number: self.machine.current_lap_number(),
            current_lap_positions: self.machine.current_lap_positions().to_vec(),
            completed_laps: self.machine.completed_laps().to_vec(),
            best_lap: self.machine.best_lap().cloned(),
            last_crossed_start_finish_ms: self.machine.last_crossed_start_finish_ms(),
            live: self.machine.live_metrics(),
            dropped_fixes: self.ingest.dropped(),
        }
    }
}

/// Owns the position source, the track registry and at most one active session.
///
/// Fixes flow either by pushing them through [`SessionController::process_fix`]
/// or by letting the controller pull from the attached source with
/// [`SessionController::poll`]. Every accepted fix is processed to completion,
/// subscribers included, before the next one is looked at.
pub struct SessionController {
    registry: TrackRegistry,
    config: EngineConfig,
    source: Option<Box<dyn PositionSource>>,
    active: Option<ActiveSession>,
    session_updates: EventBus<Session>,
    lap_completions: EventBus<Lap>,
    track_detections: EventBus<TrackDefinition>,
    sector_completions: EventBus<SectorSplit>,
    source_errors: EventBus<PositionSourceError>,
}

impl SessionController {
    pub fn new(registry: TrackRegistry, config: EngineConfig) -> Self {
        Self {
            registry,
            config,
            source: None,
            active: None,
            session_updates: EventBus::new("session update"),
            lap_completions: EventBus::new("lap complete"),
            track_detections: EventBus::new("track detected"),
            sector_completions: EventBus::new("sector complete"),
            source_errors: EventBus::new("source error"),
        }
    }

    /// Set the source the next session will read from.
    ///
    /// # Errors
    ///
    /// Fails with `SessionAlreadyActive` while a session is running.
    pub fn attach_source(&mut self, source: Box<dyn PositionSource>) -> Result<(), PitwallError> {
        if self.active.is_some() {
            return Err(PitwallError::SessionAlreadyActive);
        }
        self.source = Some(source);
        Ok(())
    }

    pub fn registry(&self) -> &TrackRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut TrackRegistry {
        &mut self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Start a session on `track_id`, or detect the track from the first fixes when `None`.
    ///
    /// # Errors
    ///
    /// - `NoPositionSource` when no source is attached
    /// - `SessionAlreadyActive` when a session is running
    /// - `TrackNotFound` for an id the registry does not know
    /// - `PositionSource` when the source refuses to start
    pub fn start_session(&mut self, track_id: Option<&str>) -> Result<Uuid, PitwallError> {
        if self.active.is_some() {
            return Err(PitwallError::SessionAlreadyActive);
        }
        let source = self.source.as_mut().ok_or(PitwallError::NoPositionSource)?;

        let track = match track_id {
            Some(id) => Some(self.registry.get(id).cloned().ok_or_else(|| {
                PitwallError::TrackNotFound {
                    track_id: id.to_string(),
                }
            })?),
            None => None,
        };

        source.start()?;

        let mut machine = LapStateMachine::new(self.config.timing.clone());
        let track_name = track.as_ref().map(|t| t.name.clone());
        machine.start(track);

        let session_id = Uuid::new_v4();
        let active = ActiveSession {
            session_id,
            start_time_ms: now_ms(),
            machine,
            ingest: PositionIngest::new(),
            halted: false,
        };
        match track_name {
            Some(name) => info!("Session {} started on {}", session_id, name),
            None => info!("Session {} started, waiting for track detection", session_id),
        }

        self.publish_update(&active);
        self.active = Some(active);
        Ok(session_id)
    }

    /// Deliver one fix to the active session
    pub fn process_fix(&mut self, raw: &RawFix) -> PollStatus {
        let Some(active) = self.active.as_mut() else {
            debug!("No active session, ignoring fix at {}ms", raw.timestamp_ms);
            return PollStatus::Idle;
        };
        if active.halted {
            return PollStatus::Halted;
        }
        let Some(sample) = active.ingest.accept(raw) else {
            return PollStatus::Ignored;
        };

        let events = active.machine.process(sample, &self.registry);

        if let Some(active) = self.active.as_ref() {
            self.dispatch(events, active.machine.track());
            self.publish_update(active);
        }
        PollStatus::Processed
    }

    /// Pull and process the next fix from the attached source
    pub fn poll(&mut self) -> PollStatus {
        let Some(active) = self.active.as_ref() else {
            return PollStatus::Idle;
        };
        if active.halted {
            return PollStatus::Halted;
        }
        let Some(source) = self.source.as_mut() else {
            return PollStatus::Idle;
        };

        match source.next_fix() {
            Ok(Some(raw)) => self.process_fix(&raw),
            Ok(None) => PollStatus::Exhausted,
            Err(e) => {
                self.report_source_error(e);
                PollStatus::Halted
            }
        }
    }

    /// Poll until the source runs dry, recording halts or there is no session
    pub fn run_until_exhausted(&mut self) -> PollStatus {
        loop {
            match self.poll() {
                PollStatus::Processed | PollStatus::Ignored => continue,
                status => return status,
            }
        }
    }

    /// Halt recording and forward a source failure to subscribers
    pub fn report_source_error(&mut self, err: PositionSourceError) {
        warn!("Position source error: {}", err);
        if let Some(active) = self.active.as_mut() {
            active.halted = true;
        }
        self.source_errors.publish(&err);
        if let Some(active) = self.active.as_ref() {
            self.publish_update(active);
        }
    }

    /// Restart the source after an error and continue recording.
    ///
    /// Does nothing unless the active session is halted.
    ///
    /// # Errors
    ///
    /// Returns `PositionSource` if the source fails to start again; the
    /// session stays halted.
    pub fn resume(&mut self) -> Result<(), PitwallError> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        if !active.halted {
            return Ok(());
        }
        let source = self.source.as_mut().ok_or(PitwallError::NoPositionSource)?;
        if let Err(e) = source.start() {
            self.report_source_error(e.clone());
            return Err(e.into());
        }

        active.halted = false;
        info!("Session {} resumed", active.session_id);
        if let Some(active) = self.active.as_ref() {
            self.publish_update(active);
        }
        Ok(())
    }

    /// Stop the source, close the running lap and release the session.
    ///
    /// Returns the final snapshot, or `None` when no session was active.
    pub fn stop_session(&mut self) -> Option<Session> {
        let mut active = self.active.take()?;
        if let Some(source) = self.source.as_mut() {
            source.stop();
        }

        let events = active.machine.stop();
        self.dispatch(events, active.machine.track());

        let session = active.snapshot();
        info!(
            "Session {} stopped after {} laps",
            session.session_id,
            session.completed_laps.len()
        );
        self.session_updates.publish(&session);
        Some(session)
    }

    pub fn current_session(&self) -> Option<Session> {
        self.active.as_ref().map(ActiveSession::snapshot)
    }

    pub fn on_session_update<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        self.session_updates.subscribe(listener)
    }

    pub fn on_lap_complete<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Lap) + Send + Sync + 'static,
    {
        self.lap_completions.subscribe(listener)
    }

    pub fn on_track_detected<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&TrackDefinition) + Send + Sync + 'static,
    {
        self.track_detections.subscribe(listener)
    }

    pub fn on_sector_complete<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SectorSplit) + Send + Sync + 'static,
    {
        self.sector_completions.subscribe(listener)
    }

    pub fn on_source_error<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&PositionSourceError) + Send + Sync + 'static,
    {
        self.source_errors.subscribe(listener)
    }

    fn dispatch(&self, events: Vec<TimingEvent>, track: Option<&TrackDefinition>) {
        for event in events {
            match event {
                TimingEvent::TrackDetected { track_id, .. } => {
                    match track.filter(|t| t.id == track_id) {
                        Some(track) => self.track_detections.publish(track),
                        None => warn!("Detected track {} is no longer available", track_id),
                    }
                }
                TimingEvent::LapStarted {
                    lap_number,
                    timestamp_ms,
                } => info!("Lap {} started at {}ms", lap_number, timestamp_ms),
                TimingEvent::SectorCompleted(split) => self.sector_completions.publish(&split),
                TimingEvent::LapCompleted { lap, .. } => {
                    info!(
                        "Lap {} completed in {}ms (valid: {})",
                        lap.lap_number, lap.duration_ms, lap.is_valid
                    );
                    self.lap_completions.publish(&lap);
                }
            }
        }
    }

    fn publish_update(&self, active: &ActiveSession) {
        if self.session_updates.listener_count() > 0 {
            self.session_updates.publish(&active.snapshot());
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(source) = self.source.as_mut() {
            source.stop();
        }
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
