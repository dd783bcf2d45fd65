// Integration test for imported track definitions

use pitwall::track::AUTOCROSS_TEMPLATE_ID;
use pitwall::{
    EngineConfig, FileBasedTrackStorage, GeoPoint, PollStatus, RawFix, ReplaySource,
    SessionController, SpeedUnit, StartFinishLine, TrackDefinition, TrackRegistry, TrackStorage,
    TrackType,
};
use tempfile::TempDir;

const M_PER_DEG_LAT: f64 = 111_194.93;

fn kart_track() -> TrackDefinition {
    TrackDefinition::new("kartbahn_nord", "Kartbahn Nord", TrackType::Custom)
        .with_start_finish(GeoPoint::new(48.10000, 11.50000), GeoPoint::new(48.10000, 11.50020))
        .with_sector_waypoints(vec![
            GeoPoint::new(48.10300, 11.50010),
            GeoPoint::new(48.10000, 11.50010),
        ])
        .with_length(1_100.0)
}

fn fix(origin: GeoPoint, meters_north: f64, timestamp_ms: i64) -> RawFix {
    RawFix::new(
        origin.latitude + meters_north / M_PER_DEG_LAT,
        origin.longitude,
        timestamp_ms,
    )
    .with_speed(70.0, SpeedUnit::KilometersPerHour)
}

#[test]
fn test_stored_track_is_detected_and_timed() {
    let temp_dir = TempDir::new().unwrap();
    let mut storage = FileBasedTrackStorage::new(temp_dir.path().to_path_buf()).unwrap();
    storage.save_track(&kart_track()).unwrap();

    let mut registry = TrackRegistry::with_builtin_tracks();
    let builtin = registry.len();
    assert_eq!(registry.load_from_storage(&storage).unwrap(), 1);
    assert_eq!(registry.len(), builtin + 1);

    let line = registry
        .get("kartbahn_nord")
        .and_then(|t| t.start_finish_midpoint())
        .unwrap();

    // Approach, then one 40 second lap out to ~330m and back
    let mut fixes = vec![fix(line, 200.0, 0), fix(line, 5.0, 2_000)];
    for k in 1..=20 {
        let d = 330.0 * (std::f64::consts::PI * k as f64 / 20.0).sin();
        fixes.push(fix(line, d, 2_000 + k * 2_000));
    }

    let mut controller = SessionController::new(registry, EngineConfig::default());
    controller
        .attach_source(Box::new(ReplaySource::from_fixes(fixes)))
        .unwrap();
    controller.start_session(None).unwrap();
    assert_eq!(controller.run_until_exhausted(), PollStatus::Exhausted);

    let session = controller.stop_session().unwrap();
    assert_eq!(session.track_id.as_deref(), Some("kartbahn_nord"));
    let lap = &session.completed_laps[0];
    assert_eq!(lap.duration_ms, 40_000);
    assert!(lap.is_valid);
    assert_eq!(lap.sector_times.len(), 2);
    assert_eq!(lap.sector_times.iter().map(|s| s.time_ms).sum::<i64>(), 40_000);
}

#[test]
fn test_import_round_trip_from_json() {
    let json = r#"{
        "id": "club_circuit",
        "name": "Club Circuit",
        "track_type": "custom",
        "start_finish_line": {
            "point1": {"latitude": 51.5000, "longitude": -0.1000},
            "point2": {"latitude": 51.5001, "longitude": -0.1000}
        },
        "sector_waypoints": [
            {"latitude": 51.5050, "longitude": -0.1020},
            {"latitude": 51.5000, "longitude": -0.1000}
        ],
        "length_m": 1800.0
    }"#;
    let track: TrackDefinition = serde_json::from_str(json).unwrap();

    let temp_dir = TempDir::new().unwrap();
    let mut storage = FileBasedTrackStorage::new(temp_dir.path().to_path_buf()).unwrap();
    storage.save_track(&track).unwrap();
    assert!(storage.track_exists("club_circuit").unwrap());

    // A fresh instance reads back from disk rather than its cache
    let reopened = FileBasedTrackStorage::new(temp_dir.path().to_path_buf()).unwrap();
    let loaded = reopened.load_track("club_circuit").unwrap().unwrap();
    assert_eq!(loaded, track);
    assert_eq!(reopened.list_tracks().unwrap(), vec!["club_circuit".to_string()]);

    storage.delete_track("club_circuit").unwrap();
    assert!(!storage.track_exists("club_circuit").unwrap());
}

#[test]
fn test_autocross_template_session() {
    let mut registry = TrackRegistry::with_builtin_tracks();
    let start = GeoPoint::new(40.0, -75.0);
    registry
        .instantiate_template(
            AUTOCROSS_TEMPLATE_ID,
            "parking_lot_run",
            "Parking Lot Run",
            StartFinishLine::new(start, GeoPoint::new(40.0, -74.9998)),
            vec![],
        )
        .unwrap();

    let mut controller = SessionController::new(registry, EngineConfig::default());
    controller
        .attach_source(Box::new(ReplaySource::default()))
        .unwrap();
    controller.start_session(Some("parking_lot_run")).unwrap();

    let session = controller.current_session().unwrap();
    assert_eq!(session.track_name.as_deref(), Some("Parking Lot Run"));
    // The template itself cannot be driven, it has no line
    controller.stop_session();
    let template = controller.registry().get(AUTOCROSS_TEMPLATE_ID).unwrap();
    assert!(template.is_template());
}
