// Persistence for user supplied track definitions

use crate::errors::PitwallError;
use crate::track::types::TrackDefinition;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const MAX_SECTOR_WAYPOINTS: usize = 32;
const MAX_TRACK_NAME_LEN: usize = 100;

/// Trait defining the interface for track definition storage operations
pub trait TrackStorage {
    /// Save a track definition to persistent storage
    fn save_track(&mut self, track: &TrackDefinition) -> Result<(), PitwallError>;

    /// Load a track definition by id
    fn load_track(&self, track_id: &str) -> Result<Option<TrackDefinition>, PitwallError>;

    /// List the ids of all stored tracks
    fn list_tracks(&self) -> Result<Vec<String>, PitwallError>;

    /// Delete a track definition from storage
    fn delete_track(&mut self, track_id: &str) -> Result<(), PitwallError>;

    /// Check if a definition exists for a given track id
    fn track_exists(&self, track_id: &str) -> Result<bool, PitwallError>;
}

/// One JSON file per track id in a directory
pub struct FileBasedTrackStorage {
    storage_path: PathBuf,
    cache: HashMap<String, TrackDefinition>,
}

impl FileBasedTrackStorage {
    /// Create a new file-based storage instance, creating the directory if needed
    pub fn new(storage_path: PathBuf) -> Result<Self, PitwallError> {
        if !storage_path.exists() {
            fs::create_dir_all(&storage_path)
                .map_err(|e| PitwallError::ConfigIOError { source: e })?;
        }

        Ok(Self {
            storage_path,
            cache: HashMap::new(),
        })
    }

    /// Create storage in the default application data directory
    pub fn new_default() -> Result<Self, PitwallError> {
        Self::new(Self::default_storage_path()?)
    }

    pub fn default_storage_path() -> Result<PathBuf, PitwallError> {
        let app_data_dir = dirs::data_dir().ok_or(PitwallError::NoConfigDir)?;
        Ok(app_data_dir.join("pitwall").join("tracks"))
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Path of the track's file, refusing ids that would leave the storage directory
    fn file_path_for_track(&self, track_id: &str) -> Result<PathBuf, PitwallError> {
        check_track_id(track_id)?;
        Ok(self.storage_path.join(format!("{}.json", track_id)))
    }

    fn read_track_file(&self, file_path: &Path) -> Result<TrackDefinition, PitwallError> {
        let content =
            fs::read_to_string(file_path).map_err(|e| PitwallError::FileOperationError {
                operation: "read_track_file".to_string(),
                reason: format!("Failed to read {:?}: {}", file_path, e),
            })?;

        if content.trim().is_empty() {
            return Err(PitwallError::TrackStorageError {
                reason: format!("Track file {:?} is empty", file_path),
            });
        }

        serde_json::from_str(&content).map_err(|e| PitwallError::TrackStorageError {
            reason: format!("Failed to parse {:?}: {}", file_path, e),
        })
    }

    /// Validate a definition before it is written
    fn validate_for_save(&self, track: &TrackDefinition) -> Result<(), PitwallError> {
        debug!("Validating track definition: {}", track.id);

        check_track_id(&track.id)?;

        if track.name.trim().is_empty() {
            return Err(PitwallError::InvalidTrackDefinition {
                reason: "Track name cannot be empty".to_string(),
            });
        }

        if track.name.len() > MAX_TRACK_NAME_LEN {
            return Err(PitwallError::InvalidTrackDefinition {
                reason: format!(
                    "Track name too long ({} characters, max {})",
                    track.name.len(),
                    MAX_TRACK_NAME_LEN
                ),
            });
        }

        if track.sector_waypoints.len() > MAX_SECTOR_WAYPOINTS {
            return Err(PitwallError::InvalidTrackDefinition {
                reason: format!(
                    "Too many sector waypoints ({}, max {})",
                    track.sector_waypoints.len(),
                    MAX_SECTOR_WAYPOINTS
                ),
            });
        }

        track
            .validate_geometry()
            .map_err(|reason| PitwallError::InvalidTrackDefinition { reason })
    }

    /// Write to a temporary file then rename over the destination
    fn write_atomically(&self, track: &TrackDefinition) -> Result<(), PitwallError> {
        let file_path = self.file_path_for_track(&track.id)?;
        let temp_path = file_path.with_extension("json.tmp");

        let content = serde_json::to_string_pretty(track)
            .map_err(|e| PitwallError::ConfigSerializeError { source: e })?;

        {
            let mut temp_file =
                fs::File::create(&temp_path).map_err(|e| PitwallError::FileOperationError {
                    operation: "create_temp_file".to_string(),
                    reason: format!("Failed to create temporary file: {}", e),
                })?;

            temp_file
                .write_all(content.as_bytes())
                .map_err(|e| PitwallError::FileOperationError {
                    operation: "write_temp_file".to_string(),
                    reason: format!("Failed to write to temporary file: {}", e),
                })?;

            temp_file
                .sync_all()
                .map_err(|e| PitwallError::FileOperationError {
                    operation: "sync_temp_file".to_string(),
                    reason: format!("Failed to sync temporary file: {}", e),
                })?;
        }

        fs::rename(&temp_path, &file_path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            PitwallError::FileOperationError {
                operation: "atomic_move".to_string(),
                reason: format!("Failed to move temporary file to final location: {}", e),
            }
        })
    }
}

// ids double as file names
fn check_track_id(track_id: &str) -> Result<(), PitwallError> {
    if track_id.is_empty() {
        return Err(PitwallError::InvalidTrackDefinition {
            reason: "Track id cannot be empty".to_string(),
        });
    }

    if !track_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(PitwallError::InvalidTrackDefinition {
            reason: "Track id must contain only alphanumeric characters, underscores, and hyphens"
                .to_string(),
        });
    }
    Ok(())
}

impl TrackStorage for FileBasedTrackStorage {
    fn save_track(&mut self, track: &TrackDefinition) -> Result<(), PitwallError> {
        info!("Saving track definition for: {}", track.name);

        if let Err(validation_error) = self.validate_for_save(track) {
            error!("Track validation failed: {}", validation_error);
            return Err(validation_error);
        }

        self.write_atomically(track)?;
        self.cache.insert(track.id.clone(), track.clone());
        Ok(())
    }

    fn load_track(&self, track_id: &str) -> Result<Option<TrackDefinition>, PitwallError> {
        let file_path = self.file_path_for_track(track_id)?;

        if let Some(track) = self.cache.get(track_id) {
            debug!("Found track {} in cache", track_id);
            return Ok(Some(track.clone()));
        }

        if !file_path.exists() {
            debug!("No track file found for: {}", track_id);
            return Ok(None);
        }

        let track = self.read_track_file(&file_path)?;
        if track.id != track_id {
            warn!(
                "Track file {:?} holds id {}, expected {}",
                file_path, track.id, track_id
            );
        }
        Ok(Some(track))
    }

    fn list_tracks(&self) -> Result<Vec<String>, PitwallError> {
        let entries = fs::read_dir(&self.storage_path).map_err(|e| {
            PitwallError::FileOperationError {
                operation: "list_tracks".to_string(),
                reason: format!("Cannot read directory: {}", e),
            }
        })?;

        let mut ids = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("json") {
                match path.file_stem().and_then(|s| s.to_str()) {
                    Some(stem) if check_track_id(stem).is_ok() => ids.push(stem.to_string()),
                    _ => debug!("Skipping {:?}, not a track id", path),
                }
            }
        }

        ids.sort();
        Ok(ids)
    }

    fn delete_track(&mut self, track_id: &str) -> Result<(), PitwallError> {
        let file_path = self.file_path_for_track(track_id)?;

        if file_path.exists() {
            fs::remove_file(&file_path).map_err(|e| PitwallError::ConfigIOError { source: e })?;
        }

        self.cache.remove(track_id);
        Ok(())
    }

    fn track_exists(&self, track_id: &str) -> Result<bool, PitwallError> {
        let file_path = self.file_path_for_track(track_id)?;
        if self.cache.contains_key(track_id) {
            return Ok(true);
        }
        Ok(file_path.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPoint;
    use crate::track::types::TrackType;
    use tempfile::TempDir;

    fn create_test_track(id: &str) -> TrackDefinition {
        TrackDefinition::new(id, "Test Track", TrackType::Custom)
            .with_start_finish(GeoPoint::new(51.0, 0.0), GeoPoint::new(51.0001, 0.0))
            .with_sector_waypoints(vec![GeoPoint::new(51.002, 0.001)])
            .with_length(1_500.0)
    }

    #[test]
    fn test_file_based_storage_creation() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a").join("b");
        let storage = FileBasedTrackStorage::new(nested.clone()).unwrap();

        assert_eq!(storage.storage_path(), nested.as_path());
        assert!(nested.exists());
    }

    #[test]
    fn test_save_and_load_track() {
        let temp_dir = TempDir::new().unwrap();
        let mut storage = FileBasedTrackStorage::new(temp_dir.path().to_path_buf()).unwrap();

        let track = create_test_track("test_track");
        storage.save_track(&track).unwrap();

        // Bypass the cache so the file round trip is exercised
        storage.clear_cache();
        let loaded = storage.load_track("test_track").unwrap().unwrap();
        assert_eq!(loaded, track);
        assert!(!temp_dir.path().join("test_track.json.tmp").exists());
    }

    #[test]
    fn test_save_rejects_invalid_tracks() {
        let temp_dir = TempDir::new().unwrap();
        let mut storage = FileBasedTrackStorage::new(temp_dir.path().to_path_buf()).unwrap();

        let bad_id = create_test_track("../escape");
        assert!(storage.save_track(&bad_id).is_err());

        let mut no_name = create_test_track("no_name");
        no_name.name = String::new();
        assert!(storage.save_track(&no_name).is_err());

        let too_many = create_test_track("too_many")
            .with_sector_waypoints(vec![GeoPoint::new(51.0, 0.0); MAX_SECTOR_WAYPOINTS + 1]);
        assert!(storage.save_track(&too_many).is_err());

        let bad_geometry = create_test_track("bad_geometry")
            .with_start_finish(GeoPoint::new(99.0, 0.0), GeoPoint::new(51.0, 0.0));
        assert!(storage.save_track(&bad_geometry).is_err());

        assert!(storage.list_tracks().unwrap().is_empty());
    }

    #[test]
    fn test_list_and_delete_tracks() {
        let temp_dir = TempDir::new().unwrap();
        let mut storage = FileBasedTrackStorage::new(temp_dir.path().to_path_buf()).unwrap();

        assert!(storage.list_tracks().unwrap().is_empty());

        storage.save_track(&create_test_track("track_b")).unwrap();
        storage.save_track(&create_test_track("track_a")).unwrap();
        assert_eq!(storage.list_tracks().unwrap(), vec!["track_a", "track_b"]);
        assert!(storage.track_exists("track_a").unwrap());

        storage.delete_track("track_a").unwrap();
        assert!(!storage.track_exists("track_a").unwrap());
        assert!(storage.load_track("track_a").unwrap().is_none());
        assert_eq!(storage.list_tracks().unwrap(), vec!["track_b"]);
    }

    #[test]
    fn test_corrupted_file_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileBasedTrackStorage::new(temp_dir.path().to_path_buf()).unwrap();
        fs::write(temp_dir.path().join("broken.json"), "{\"id\": ").unwrap();
        fs::write(temp_dir.path().join("empty.json"), "").unwrap();

        assert!(matches!(
            storage.load_track("broken"),
            Err(PitwallError::TrackStorageError { .. })
        ));
        assert!(matches!(
            storage.load_track("empty"),
            Err(PitwallError::TrackStorageError { .. })
        ));
    }

    #[test]
    fn test_ids_outside_the_storage_dir_are_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let storage_dir = temp_dir.path().join("tracks");
        let mut storage = FileBasedTrackStorage::new(storage_dir.clone()).unwrap();

        let outside = temp_dir.path().join("victim.json");
        fs::write(&outside, "keep me").unwrap();

        for id in ["../victim", "a/b", "..", ""] {
            assert!(matches!(
                storage.delete_track(id),
                Err(PitwallError::InvalidTrackDefinition { .. })
            ));
            assert!(matches!(
                storage.load_track(id),
                Err(PitwallError::InvalidTrackDefinition { .. })
            ));
            assert!(matches!(
                storage.track_exists(id),
                Err(PitwallError::InvalidTrackDefinition { .. })
            ));
        }
        assert_eq!(fs::read_to_string(&outside).unwrap(), "keep me");

        // Files whose names are not valid ids are not listed
        fs::write(storage_dir.join("not a track.json"), "{}").unwrap();
        storage.save_track(&create_test_track("club")).unwrap();
        assert_eq!(storage.list_tracks().unwrap(), vec!["club"]);
    }
}
