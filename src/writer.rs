use std::{
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
    sync::mpsc::Receiver,
};

use log::{error, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    PitwallError,
    errors::PositionSourceError,
    session::Session,
    timing::{Lap, SectorSplit},
};

/// One line of the session record log
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum SessionRecord {
    SessionStarted {
        session_id: Uuid,
        track_id: Option<String>,
    },
    TrackDetected {
        track_id: String,
        name: String,
    },
    LapCompleted(Box<Lap>),
    SectorCompleted(SectorSplit),
    SourceError(PositionSourceError),
    SessionStopped(Box<Session>),
}

/// Write every record received on `record_receiver` as a JSON line until the
/// sending side hangs up.
pub fn write_records(
    file: &PathBuf,
    record_receiver: Receiver<SessionRecord>,
) -> Result<(), PitwallError> {
    let record_file = File::create(file).map_err(|e| PitwallError::WriterError { source: e })?;
    let mut record_file_writer = BufWriter::new(record_file);
    let mut written = 0usize;
    for record in &record_receiver {
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                error!("Could not serialize session record: {}", e);
                continue;
            }
        };
        match writeln!(record_file_writer, "{}", line) {
            Ok(()) => written += 1,
            Err(e) => error!("Error while writing session record to output file: {}", e),
        }
    }
    record_file_writer
        .flush()
        .map_err(|e| PitwallError::WriterError { source: e })?;
    info!("Wrote {} session records to {:?}", written, file);
    Ok(())
}
