// Secure Vision CLI binary

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

use secure_vision::capture::{self, DirectorySource, FrameSource, SyntheticSource};
use secure_vision::config::file::{
    default_config_path, default_face_image_dir, load_or_default, save_config,
};
use secure_vision::constants::DEFAULT_CAPTURE_INTERVAL_MS;
use secure_vision::db::default_db_path;
use secure_vision::face::UnavailableBackend;
use secure_vision::identity::{IdentityMetadata, IdentityStore};
use secure_vision::{
    DetectionConfig, DetectionListener, DetectionResult, RecordTrigger, RecordingListener,
    RecordingState, VisionService,
};

#[derive(Parser)]
#[command(name = "securevision")]
#[command(about = "Secure Vision - motion and face triggered surveillance pipeline", long_about = None)]
#[command(version)]
struct Cli {
    /// Log level (error, warn, info, debug, trace); RUST_LOG wins when set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage registered identities
    Faces {
        /// Identity database (defaults to ~/.securevision/faces.db)
        #[arg(long, global = true)]
        db: Option<PathBuf>,

        #[command(subcommand)]
        action: FacesAction,
    },

    /// Show or create the detection config
    Config {
        /// Config file (defaults to ~/.securevision/config.json)
        #[arg(long, global = true)]
        config: Option<PathBuf>,

        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run the pipeline over a frame source and report what it saw
    Simulate {
        /// Frame source
        #[arg(long, value_enum, default_value = "synthetic")]
        source: SourceKind,
        /// Image directory for --source directory
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Frames to generate for --source synthetic
        #[arg(long, default_value = "300")]
        frames: u64,
        /// Delay between captured frames
        #[arg(long, default_value_t = DEFAULT_CAPTURE_INTERVAL_MS)]
        interval_ms: u64,
        /// Seed for the synthetic scene
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Config file (defaults to ~/.securevision/config.json if present)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Identity database (in-memory when omitted)
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum FacesAction {
    /// List registered identities
    List,
    /// Number of registered identities
    Count,
    /// Register an identity from an embedding file (JSON array of floats)
    Add {
        name: String,
        #[arg(long)]
        embedding: PathBuf,
        #[arg(long)]
        image_path: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Remove an identity by name
    Remove { name: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective config as JSON
    Show,
    /// Write the default config
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceKind {
    Synthetic,
    Directory,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_level.as_str()))
        .format_timestamp_millis()
        .init();

    match cli.command {
        Commands::Faces { db, action } => cmd_faces(db, action),
        Commands::Config { config, action } => cmd_config(config, action),
        Commands::Simulate { source, dir, frames, interval_ms, seed, config, db } => {
            cmd_simulate(source, dir, frames, interval_ms, seed, config, db)
        }
    }
}

fn resolve_db(db: Option<PathBuf>) -> Result<PathBuf> {
    match db {
        Some(p) => Ok(p),
        None => Ok(default_db_path()?),
    }
}

fn resolve_config(config: Option<PathBuf>) -> Result<PathBuf> {
    match config {
        Some(p) => Ok(p),
        None => Ok(default_config_path()?),
    }
}

fn cmd_faces(db: Option<PathBuf>, action: FacesAction) -> Result<()> {
    let db_path = resolve_db(db)?;
    let store = IdentityStore::open(&db_path)?;

    match action {
        FacesAction::List => {
            let records = store.list_records();
            if records.is_empty() {
                println!("No identities registered. Use 'securevision faces add' to register one.");
                return Ok(());
            }

            println!("{:>5}  {:<24}  {:>7}  {:<20}  {}", "ID", "Name", "Matches", "Last seen", "Description");
            println!("{}", "-".repeat(80));
            for r in records {
                let last_seen = r
                    .last_seen
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:>5}  {:<24}  {:>7}  {:<20}  {}",
                    r.id,
                    r.name,
                    r.match_count,
                    last_seen,
                    r.metadata.description.unwrap_or_default()
                );
            }
        }
        FacesAction::Count => {
            println!("{}", store.count());
        }
        FacesAction::Add { name, embedding, image_path, description } => {
            let embedding = read_embedding(&embedding)?;
            let id = store.insert(&name, embedding, IdentityMetadata { image_path, description })?;
            println!("Registered '{}' with id {}", name, id);
        }
        FacesAction::Remove { name } => {
            if store.remove(&name)? {
                println!("Removed '{}'", name);
            } else {
                anyhow::bail!("No identity named '{}'", name);
            }
        }
    }

    Ok(())
}

fn read_embedding(path: &Path) -> Result<Vec<f32>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Cannot read embedding {}: {}", path.display(), e))?;
    let values: Vec<f32> = serde_json::from_str(&text)?;
    Ok(values)
}

fn cmd_config(config: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    let path = resolve_config(config)?;

    match action {
        ConfigAction::Show => {
            let config = load_or_default(&path)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            save_config(&path, &DetectionConfig::default())?;
            println!("Wrote default config to {}", path.display());
        }
    }

    Ok(())
}

/// Logs pipeline output during a simulation run.
struct ConsoleListener;

impl DetectionListener for ConsoleListener {
    fn on_detection_result(&self, result: &DetectionResult) {
        if result.has_motion || !result.faces.is_empty() {
            log::info!(
                "frame {}: motion={} region={:?} faces={} recognized={} ({:.1} ms)",
                result.sequence,
                result.has_motion,
                result.motion_region,
                result.faces.len(),
                result.recognized_count(),
                result.timings.total_ms
            );
        }
    }

    fn on_record_trigger(&self, trigger: &RecordTrigger) {
        log::debug!("trigger {} from {}", trigger.kind.as_str(), trigger.frame.source());
    }

    fn on_subsystem_error(&self, subsystem: &str, message: &str) {
        log::warn!("{} subsystem error: {}", subsystem, message);
    }
}

impl RecordingListener for ConsoleListener {
    fn on_recording_state_changed(&self, from: RecordingState, to: RecordingState) {
        log::info!("recording: {} -> {}", from.as_str(), to.as_str());
    }

    fn on_recording_started(&self, filename: &str, session_id: uuid::Uuid) {
        log::info!("recording started: {} (session {})", filename, session_id);
    }

    fn on_recording_stopped(&self, filename: &str, duration_ms: u64) {
        log::info!("recording stopped: {} after {} ms", filename, duration_ms);
    }
}

fn cmd_simulate(
    source: SourceKind,
    dir: Option<PathBuf>,
    frames: u64,
    interval_ms: u64,
    seed: u64,
    config: Option<PathBuf>,
    db: Option<PathBuf>,
) -> Result<()> {
    let config = match config {
        Some(path) => secure_vision::config::file::load_config(&path)?,
        None => load_or_default(&default_config_path()?)?,
    };

    let identities = match db {
        Some(path) => IdentityStore::open(&path)?,
        None => IdentityStore::in_memory(),
    };

    let frame_source: Box<dyn FrameSource> = match source {
        SourceKind::Synthetic => Box::new(SyntheticSource::new(640, 480, seed).with_limit(frames)),
        SourceKind::Directory => {
            let dir = dir.ok_or_else(|| anyhow::anyhow!("--dir is required for --source directory"))?;
            Box::new(DirectorySource::open(&dir, false)?)
        }
    };

    let service = VisionService::with_face_image_dir(
        config,
        Arc::new(identities),
        &UnavailableBackend,
        Some(default_face_image_dir()?),
    )?;
    let console = Arc::new(ConsoleListener);
    service.add_detection_listener(console.clone());
    service.add_recording_listener(console);
    service.start()?;

    let started = Instant::now();
    let capture = capture::spawn_capture(frame_source, Duration::from_millis(interval_ms), service.scheduler())?;
    let delivered = capture.wait();

    // Let the worker drain what is left
    std::thread::sleep(Duration::from_millis(200));
    service.stop();

    let stats = service.stats();
    println!();
    println!("Simulation complete ({:.1}s):", started.elapsed().as_secs_f64());
    println!("  Frames captured:  {}", delivered);
    println!("  Frames offered:   {}", stats.frames_offered);
    println!("  Skipped:          {}", stats.frames_skipped);
    println!("  Dropped:          {}", stats.frames_dropped);
    println!("  Processed:        {}", stats.frames_processed);
    println!("  With motion:      {}", stats.motion_frames);
    println!("  Face cycles:      {}", stats.face_cycles);
    println!("  Record triggers:  {}", stats.triggers_emitted);
    println!("  Final recording state: {}", service.recording_state().as_str());

    Ok(())
}
