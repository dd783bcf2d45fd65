// Error types for pitwall

use crate::writer::SessionRecord;
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use std::{io, sync::mpsc::SendError};

/// Failures reported by a position source.
///
/// These are surfaced to subscribers unmodified. Retrying is the source's
/// concern, the engine only halts recording until the caller resumes.
#[derive(Debug, Snafu, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PositionSourceError {
    #[snafu(display("Location permission denied"))]
    PermissionDenied,
    #[snafu(display("Location signal unavailable: {reason}"))]
    Unavailable { reason: String },
    #[snafu(display("Timed out waiting for a location fix after {waited_ms}ms"))]
    Timeout { waited_ms: u64 },
}

#[derive(Debug, Snafu)]
pub enum PitwallError {
    // Session lifecycle errors
    #[snafu(display("No position source attached, cannot start a session"))]
    NoPositionSource,
    #[snafu(display("A session is already active"))]
    SessionAlreadyActive,
    #[snafu(display("Unknown track: {track_id}"))]
    TrackNotFound { track_id: String },
    #[snafu(display("Position source error"))]
    PositionSource { source: PositionSourceError },

    // Track registry and storage errors
    #[snafu(display("Invalid track definition: {reason}"))]
    InvalidTrackDefinition { reason: String },
    #[snafu(display("Track storage error: {reason}"))]
    TrackStorageError { reason: String },
    #[snafu(display("File operation failed: {operation} - {reason}"))]
    FileOperationError { operation: String, reason: String },

    // Config management errors
    #[snafu(display("Could not find application data directory"))]
    NoConfigDir,
    #[snafu(display("Error reading or writing config file"))]
    ConfigIOError { source: io::Error },
    #[snafu(display("Error serializing config file"))]
    ConfigSerializeError { source: serde_json::Error },

    // Replay and record log errors
    #[snafu(display("Error loading replay file"))]
    ReplayLoaderError { source: io::Error },
    #[snafu(display("Error writing session records"))]
    WriterError { source: io::Error },
    #[snafu(display("Error broadcasting session record"))]
    RecordBroadcastError {
        source: Box<SendError<SessionRecord>>,
    },
}

impl From<SendError<SessionRecord>> for PitwallError {
    fn from(value: SendError<SessionRecord>) -> Self {
        PitwallError::RecordBroadcastError {
            source: Box::new(value),
        }
    }
}

impl From<PositionSourceError> for PitwallError {
    fn from(value: PositionSourceError) -> Self {
        PitwallError::PositionSource { source: value }
    }
}
