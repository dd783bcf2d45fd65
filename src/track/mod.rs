// Track definitions: the built-in catalog, runtime registration and persisted imports

pub mod registry;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use registry::{AUTOCROSS_TEMPLATE_ID, TrackDetection, TrackRegistry};
pub use storage::{FileBasedTrackStorage, TrackStorage};
pub use types::{Direction, StartFinishLine, TrackDefinition, TrackType};
