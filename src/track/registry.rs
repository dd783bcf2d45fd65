// In-memory catalog of known tracks

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::errors::PitwallError;
use crate::geo::{self, GeoPoint};
use crate::ingest::PositionSample;
use crate::track::storage::TrackStorage;
use crate::track::types::{Direction, StartFinishLine, TrackDefinition, TrackType};

/// Id of the waypoint-free template used for ad hoc tracks
pub const AUTOCROSS_TEMPLATE_ID: &str = "autocross";

/// How a registry resolves a position to a track
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrackDetection {
    /// Closest start/finish line within the radius
    #[default]
    Nearest,
    /// First registered track within the radius
    FirstMatch,
}

/// Ordered collection of track definitions.
///
/// Insertion order is significant: it breaks ties during detection, and
/// replacing a track keeps its original position.
#[derive(Clone, Debug, Default)]
pub struct TrackRegistry {
    tracks: Vec<TrackDefinition>,
}

impl TrackRegistry {
    /// Registry with no tracks at all
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry pre-populated with well-known circuits and the autocross template
    pub fn with_builtin_tracks() -> Self {
        Self {
            tracks: builtin_tracks(),
        }
    }

    /// Insert a track, replacing any existing track with the same id
    pub fn register(&mut self, track: TrackDefinition) -> Result<(), PitwallError> {
        if track.id.trim().is_empty() {
            return Err(PitwallError::InvalidTrackDefinition {
                reason: "Track id cannot be empty".to_string(),
            });
        }

        match self.tracks.iter_mut().find(|t| t.id == track.id) {
            Some(existing) => {
                debug!("Replacing track definition {}", track.id);
                *existing = track;
            }
            None => {
                debug!("Registering track definition {}", track.id);
                self.tracks.push(track);
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&TrackDefinition> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn list_all(&self) -> &[TrackDefinition] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// First registered track whose start/finish midpoint is within `max_distance_m`
    pub fn find_first_within(
        &self,
        position: &PositionSample,
        max_distance_m: f64,
    ) -> Option<&TrackDefinition> {
        let here = position.point();
        self.tracks.iter().find(|track| {
            track
                .start_finish_midpoint()
                .is_some_and(|mid| geo::distance_meters(here, mid) <= max_distance_m)
        })
    }

    /// Track with the closest start/finish midpoint within `max_distance_m`.
    ///
    /// Equal distances resolve to the track registered first.
    pub fn find_nearest(
        &self,
        position: &PositionSample,
        max_distance_m: f64,
    ) -> Option<&TrackDefinition> {
        let here = position.point();
        let mut best: Option<(&TrackDefinition, f64)> = None;
        for track in &self.tracks {
            let Some(mid) = track.start_finish_midpoint() else {
                continue;
            };
            let distance = geo::distance_meters(here, mid);
            if distance > max_distance_m {
                continue;
            }
            match best {
                Some((_, best_distance)) if distance >= best_distance => {}
                _ => best = Some((track, distance)),
            }
        }
        best.map(|(track, _)| track)
    }

    pub fn detect(
        &self,
        position: &PositionSample,
        max_distance_m: f64,
        mode: TrackDetection,
    ) -> Option<&TrackDefinition> {
        match mode {
            TrackDetection::Nearest => self.find_nearest(position, max_distance_m),
            TrackDetection::FirstMatch => self.find_first_within(position, max_distance_m),
        }
    }

    /// Create and register an ad hoc track from a template such as [`AUTOCROSS_TEMPLATE_ID`]
    pub fn instantiate_template(
        &mut self,
        template_id: &str,
        id: &str,
        name: &str,
        line: StartFinishLine,
        waypoints: Vec<GeoPoint>,
    ) -> Result<&TrackDefinition, PitwallError> {
        let template = self
            .get(template_id)
            .ok_or_else(|| PitwallError::TrackNotFound {
                track_id: template_id.to_string(),
            })?;
        if !template.is_template() {
            return Err(PitwallError::InvalidTrackDefinition {
                reason: format!("{} is not a template", template_id),
            });
        }

        let mut track = template.clone();
        track.id = id.to_string();
        track.name = name.to_string();
        track.start_finish_line = Some(line);
        track.sector_waypoints = waypoints;
        track
            .validate_geometry()
            .map_err(|reason| PitwallError::InvalidTrackDefinition { reason })?;

        info!("Instantiated {} from template {}", id, template_id);
        self.register(track)?;
        self.get(id).ok_or_else(|| PitwallError::TrackNotFound {
            track_id: id.to_string(),
        })
    }

    /// Register every definition held by a storage backend, returns how many were loaded
    pub fn load_from_storage(&mut self, storage: &dyn TrackStorage) -> Result<usize, PitwallError> {
        let mut loaded = 0;
        for id in storage.list_tracks()? {
            if let Some(track) = storage.load_track(&id)? {
                self.register(track)?;
                loaded += 1;
            }
        }
        info!("Loaded {} stored track definitions", loaded);
        Ok(loaded)
    }
}

fn circuit(
    id: &str,
    name: &str,
    line: [(f64, f64); 2],
    waypoints: [(f64, f64); 3],
    length_m: f64,
    direction: Direction,
) -> TrackDefinition {
    TrackDefinition::new(id, name, TrackType::Circuit)
        .with_start_finish(
            GeoPoint::new(line[0].0, line[0].1),
            GeoPoint::new(line[1].0, line[1].1),
        )
        .with_sector_waypoints(
            waypoints
                .iter()
                .map(|&(lat, lon)| GeoPoint::new(lat, lon))
                .collect(),
        )
        .with_length(length_m)
        .with_direction(direction)
}

// Simplified outlines: start/finish line endpoints and three sector checkpoints each
fn builtin_tracks() -> Vec<TrackDefinition> {
    vec![
        circuit(
            "silverstone",
            "Silverstone Grand Prix Circuit",
            [(52.06923, -1.02262), (52.06941, -1.02212)],
            [(52.07806, -1.01722), (52.06268, -1.01402), (52.06800, -1.02450)],
            5_891.0,
            Direction::Clockwise,
        ),
        circuit(
            "spa",
            "Circuit de Spa-Francorchamps",
            [(50.43723, 5.97128), (50.43738, 5.97162)],
            [(50.44570, 5.96350), (50.42850, 5.95480), (50.43600, 5.96980)],
            7_004.0,
            Direction::Clockwise,
        ),
        circuit(
            "monza",
            "Autodromo Nazionale Monza",
            [(45.61545, 9.28115), (45.61550, 9.28155)],
            [(45.62940, 9.28990), (45.61850, 9.29560), (45.61350, 9.28210)],
            5_793.0,
            Direction::Clockwise,
        ),
        circuit(
            "nurburgring_gp",
            "Nürburgring Grand Prix Circuit",
            [(50.33560, 6.94740), (50.33585, 6.94760)],
            [(50.33080, 6.94010), (50.33410, 6.93310), (50.33450, 6.94600)],
            5_148.0,
            Direction::Clockwise,
        ),
        circuit(
            "suzuka",
            "Suzuka International Racing Course",
            [(34.84310, 136.54070), (34.84330, 136.54095)],
            [(34.84780, 136.53690), (34.84540, 136.53000), (34.84180, 136.54210)],
            5_807.0,
            Direction::Clockwise,
        ),
        circuit(
            "laguna_seca",
            "WeatherTech Raceway Laguna Seca",
            [(36.58440, -121.75350), (36.58455, -121.75330)],
            [(36.58060, -121.75630), (36.58630, -121.75880), (36.58390, -121.75200)],
            3_602.0,
            Direction::CounterClockwise,
        ),
        TrackDefinition::new(
            AUTOCROSS_TEMPLATE_ID,
            "Autocross (ad hoc)",
            TrackType::Autocross,
        ),
    ]
}
