use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Sender},
    },
    thread,
    time::Duration,
};

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use pitwall::{
    EngineConfig, FileBasedTrackStorage, Lap, PitwallError, PollStatus, PositionSource,
    PositionSourceError, RawFix, ReplaySource, SessionController, SessionRecord, TrackDefinition,
    TrackRegistry, TrackStorage, writer,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Time a recorded drive from a JSON lines fix log
    Replay {
        #[arg(short, long)]
        input: PathBuf,

        /// Track id, detected from the first fixes when omitted
        #[arg(short, long)]
        track: Option<String>,

        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Deliver fixes at the pace they were recorded
        #[arg(long, default_value_t = false)]
        realtime: bool,
    },
    /// List the known tracks
    Tracks,
    /// Store a track definition from a JSON file
    Import {
        #[arg(short, long)]
        file: PathBuf,
    },
}

/// Longest uninterrupted sleep while pacing, so Ctrl-C is noticed promptly
const PACING_SLICE: Duration = Duration::from_millis(100);

/// Sleeps between fixes so they arrive with their recorded spacing
struct PacedSource<S> {
    inner: S,
    last_timestamp_ms: Option<i64>,
    stop_requested: Arc<AtomicBool>,
}

impl<S> PacedSource<S> {
    fn new(inner: S, stop_requested: Arc<AtomicBool>) -> Self {
        Self {
            inner,
            last_timestamp_ms: None,
            stop_requested,
        }
    }

    /// Wait out `gap`, giving up as soon as a stop is requested
    fn wait(&self, gap: Duration) {
        let mut remaining = gap;
        while !remaining.is_zero() && !self.stop_requested.load(Ordering::SeqCst) {
            let slice = remaining.min(PACING_SLICE);
            thread::sleep(slice);
            remaining -= slice;
        }
    }
}

impl<S: PositionSource> PositionSource for PacedSource<S> {
    fn start(&mut self) -> Result<(), PositionSourceError> {
        self.inner.start()
    }

    fn next_fix(&mut self) -> Result<Option<RawFix>, PositionSourceError> {
        let fix = self.inner.next_fix()?;
        if let Some(fix) = &fix {
            if let Some(last) = self.last_timestamp_ms {
                let gap = fix.timestamp_ms - last;
                if gap > 0 {
                    self.wait(Duration::from_millis(gap as u64));
                }
            }
            self.last_timestamp_ms = Some(fix.timestamp_ms);
        }
        Ok(fix)
    }

    fn stop(&mut self) {
        self.inner.stop()
    }
}

fn open_storage(config: &EngineConfig) -> Result<FileBasedTrackStorage, PitwallError> {
    match &config.track_storage_path {
        Some(path) => FileBasedTrackStorage::new(path.clone()),
        None => FileBasedTrackStorage::new_default(),
    }
}

fn load_registry(config: &EngineConfig) -> TrackRegistry {
    let mut registry = TrackRegistry::with_builtin_tracks();
    match open_storage(config) {
        Ok(storage) => {
            if let Err(e) = registry.load_from_storage(&storage) {
                warn!("Could not load stored tracks: {}", e);
            }
        }
        Err(e) => warn!("Track storage unavailable: {}", e),
    }
    registry
}

fn format_lap_time(duration_ms: i64) -> String {
    let minutes = duration_ms / 60_000;
    let seconds = (duration_ms % 60_000) / 1_000;
    let millis = duration_ms % 1_000;
    format!("{}:{:02}.{:03}", minutes, seconds, millis)
}

fn print_lap(lap: &Lap) {
    let sectors = lap
        .sector_times
        .iter()
        .map(|s| format_lap_time(s.time_ms))
        .collect::<Vec<_>>()
        .join(" / ");
    println!(
        "Lap {:>3}  {}  {:>6.1} km/h max  {}{}",
        lap.lap_number,
        format_lap_time(lap.duration_ms),
        lap.max_speed_kph(),
        sectors,
        if lap.is_valid { "" } else { "  (invalid)" }
    );
}

fn forward(tx: &Sender<SessionRecord>, record: SessionRecord) {
    if let Err(e) = tx.send(record).map_err(PitwallError::from) {
        error!("{}", e);
    }
}

fn replay(
    input: &Path,
    track: Option<&str>,
    output: Option<PathBuf>,
    realtime: bool,
    stop_requested: Arc<AtomicBool>,
) -> Result<(), PitwallError> {
    let config = EngineConfig::from_local_file().unwrap_or_default();
    let registry = load_registry(&config);
    let source = ReplaySource::from_file(input)?;

    let mut controller = SessionController::new(registry, config);
    if realtime {
        controller.attach_source(Box::new(PacedSource::new(
            source,
            Arc::clone(&stop_requested),
        )))?;
    } else {
        controller.attach_source(Box::new(source))?;
    }

    let _laps = controller.on_lap_complete(print_lap);
    let _tracks = controller.on_track_detected(|track| println!("Track: {}", track.name));

    // Records are written on their own thread so a slow disk never stalls timing
    let mut writer_handle = None;
    let mut record_tx = None;
    if let Some(output_file) = output {
        let (tx, rx) = mpsc::channel::<SessionRecord>();

        let lap_tx = tx.clone();
        controller.on_lap_complete(move |lap| {
            forward(&lap_tx, SessionRecord::LapCompleted(Box::new(lap.clone())))
        });
        let track_tx = tx.clone();
        controller.on_track_detected(move |track| {
            forward(
                &track_tx,
                SessionRecord::TrackDetected {
                    track_id: track.id.clone(),
                    name: track.name.clone(),
                },
            )
        });
        let sector_tx = tx.clone();
        controller.on_sector_complete(move |split| {
            forward(&sector_tx, SessionRecord::SectorCompleted(split.clone()))
        });
        let error_tx = tx.clone();
        controller.on_source_error(move |err| {
            forward(&error_tx, SessionRecord::SourceError(err.clone()))
        });

        writer_handle = Some(thread::spawn(move || {
            writer::write_records(&output_file, rx)
        }));
        record_tx = Some(tx);
    }

    let session_id = controller.start_session(track)?;
    if let Some(tx) = &record_tx {
        forward(
            tx,
            SessionRecord::SessionStarted {
                session_id,
                track_id: track.map(str::to_string),
            },
        );
    }

    while !stop_requested.load(Ordering::SeqCst) {
        match controller.poll() {
            PollStatus::Processed | PollStatus::Ignored => {}
            PollStatus::Halted => {
                // Replayed errors are transient, carry on with the rest of the log
                if let Err(e) = controller.resume() {
                    error!("Could not resume after source error: {}", e);
                    break;
                }
            }
            PollStatus::Exhausted | PollStatus::Idle => break,
        }
    }

    if let Some(session) = controller.stop_session() {
        match &session.best_lap {
            Some(best) => println!(
                "{} laps, best lap {} in {}",
                session.completed_laps.len(),
                best.lap_number,
                format_lap_time(best.duration_ms)
            ),
            None => println!("{} laps, no valid lap", session.completed_laps.len()),
        }
        if let Some(tx) = &record_tx {
            forward(tx, SessionRecord::SessionStopped(Box::new(session)));
        }
    }

    // Hang up every sender so the writer drains and exits
    drop(controller);
    drop(record_tx);
    if let Some(handle) = writer_handle {
        match handle.join() {
            Ok(result) => result?,
            Err(_) => error!("Record writer thread panicked"),
        }
    }
    Ok(())
}

fn tracks() -> Result<(), PitwallError> {
    let config = EngineConfig::from_local_file().unwrap_or_default();
    let registry = load_registry(&config);
    for track in registry.list_all() {
        println!(
            "{:<20} {:<40} {:<10} {} sectors",
            track.id,
            track.name,
            track.track_type.description(),
            track.sector_count()
        );
    }
    Ok(())
}

fn import(file: &Path) -> Result<(), PitwallError> {
    let reader = File::open(file).map_err(|e| PitwallError::FileOperationError {
        operation: "import".to_string(),
        reason: format!("Failed to open {:?}: {}", file, e),
    })?;
    let track: TrackDefinition =
        serde_json::from_reader(reader).map_err(|e| PitwallError::InvalidTrackDefinition {
            reason: e.to_string(),
        })?;

    let config = EngineConfig::from_local_file().unwrap_or_default();
    let mut storage = open_storage(&config)?;
    storage.save_track(&track)?;
    info!("Imported {} into {:?}", track.id, storage.storage_path());
    println!("Imported {} ({})", track.name, track.id);
    Ok(())
}

fn main() {
    #[cfg(debug_assertions)]
    colog::init();

    let cli = Args::parse();

    let stop_requested = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&stop_requested);
    if let Err(e) = ctrlc::set_handler(move || {
        println!("Stopping...");
        handler_flag.store(true, Ordering::SeqCst);
    }) {
        warn!("Could not set Ctrl-C handler: {}", e);
    }

    let result = match &cli.command {
        Commands::Replay {
            input,
            track,
            output,
            realtime,
        } => replay(
            input,
            track.as_deref(),
            output.clone(),
            *realtime,
            stop_requested,
        ),
        Commands::Tracks => tracks(),
        Commands::Import { file } => import(file),
    };

    if let Err(e) = result {
        error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
