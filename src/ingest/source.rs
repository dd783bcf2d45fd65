use std::collections::VecDeque;
use std::path::Path;

use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::errors::{PitwallError, PositionSourceError};

use super::RawFix;

/// Interface for anything that can feed location fixes to a session.
///
/// # Lifecycle
///
/// 1. `start()` acquires the feed (permission prompts, opening a device...)
/// 2. `next_fix()` is called repeatedly by the session controller
/// 3. `stop()` releases the feed when the session ends
///
/// Retry and backoff belong to the implementation; errors returned here are
/// surfaced to subscribers as they are.
pub trait PositionSource {
    /// Acquire the feed.
    ///
    /// # Errors
    ///
    /// Returns the reason the feed could not be acquired.
    fn start(&mut self) -> Result<(), PositionSourceError>;

    /// Next available fix, `Ok(None)` once the source has nothing left to deliver.
    fn next_fix(&mut self) -> Result<Option<RawFix>, PositionSourceError>;

    /// Release the feed. Must be safe to call more than once.
    fn stop(&mut self);
}

/// One line of a replay log
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceEvent {
    Fix(RawFix),
    Error(PositionSourceError),
}

/// Replays a recorded or scripted list of fixes and source errors.
///
/// Useful for offline timing of a previously logged drive and for
/// reproducible test scenarios.
#[derive(Debug, Default)]
pub struct ReplaySource {
    events: VecDeque<SourceEvent>,
    started: bool,
    start_error: Option<PositionSourceError>,
}

impl ReplaySource {
    pub fn from_events(events: Vec<SourceEvent>) -> Self {
        Self {
            events: events.into(),
            started: false,
            start_error: None,
        }
    }

    pub fn from_fixes(fixes: Vec<RawFix>) -> Self {
        Self::from_events(fixes.into_iter().map(SourceEvent::Fix).collect())
    }

    /// Load a JSON lines file holding one [`SourceEvent`] per line.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or a line does not parse.
    pub fn from_file(file: &Path) -> Result<Self, PitwallError> {
        let events = serde_jsonlines::json_lines(file)
            .map_err(|e| PitwallError::ReplayLoaderError { source: e })?
            .collect::<Result<Vec<SourceEvent>, std::io::Error>>()
            .map_err(|e| {
                error!("Could not parse replay file {:?}: {}", file, e);
                PitwallError::ReplayLoaderError { source: e }
            })?;
        info!("Loaded {} replay events from {:?}", events.len(), file);
        Ok(Self::from_events(events))
    }

    /// Make the next `start()` call fail with the given error
    pub fn fail_start_with(mut self, err: PositionSourceError) -> Self {
        self.start_error = Some(err);
        self
    }

    /// Events not yet delivered
    pub fn remaining(&self) -> usize {
        self.events.len()
    }
}

impl PositionSource for ReplaySource {
    fn start(&mut self) -> Result<(), PositionSourceError> {
        if let Some(err) = self.start_error.take() {
            return Err(err);
        }
        self.started = true;
        Ok(())
    }

    fn next_fix(&mut self) -> Result<Option<RawFix>, PositionSourceError> {
        if !self.started {
            return Ok(None);
        }
        match self.events.pop_front() {
            Some(SourceEvent::Fix(fix)) => Ok(Some(fix)),
            Some(SourceEvent::Error(err)) => Err(err),
            None => Ok(None),
        }
    }

    fn stop(&mut self) {
        self.started = false;
    }
}
