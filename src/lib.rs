// Library interface for pitwall
// This allows integration tests and benches to access internal modules

pub mod config;
pub mod errors;
pub mod geo;
pub mod ingest;
pub mod session;
pub mod timing;
pub mod track;
pub mod writer;

// Re-export commonly used types
pub use config::{EngineConfig, SectorSplitMode, TimingConfig};
pub use errors::{PitwallError, PositionSourceError};
pub use geo::{GeoPoint, SpeedUnit};
pub use ingest::{PositionSample, PositionSource, RawFix, ReplaySource, SourceEvent};
pub use session::{PollStatus, Session, SessionController, Subscription};
pub use timing::{Lap, LapEndReason, LapInvalidReason, LapState, SectorSplit, SectorTime};
pub use track::{
    FileBasedTrackStorage, StartFinishLine, TrackDefinition, TrackRegistry, TrackStorage,
    TrackType,
};
pub use writer::SessionRecord;
