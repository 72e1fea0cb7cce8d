//! speedwatchd - speed estimation daemon
//!
//! This daemon:
//! 1. Builds an immutable configuration snapshot (file + env + validation)
//! 2. Opens the evidence stores (JPEG directory, CSV log, SQLite)
//! 3. Selects and starts the configured camera backend
//! 4. Runs the per-frame tracking pipeline
//! 5. Restarts frame acquisition when the camera becomes unavailable
//! 6. Stops cleanly on Ctrl-C

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use speedwatch::pipeline::NullDisplay;
use speedwatch::{ingest, CaptureError, EvidenceRecorder, SpeedEventPipeline, SpeedwatchConfig};

/// Pause before reconnecting a camera that went away.
const CAMERA_RESTART_DELAY: Duration = Duration::from_secs(4);

#[derive(Parser)]
#[command(name = "speedwatchd", version, about = "Single-lane speed estimation daemon")]
struct Cli {
    /// Configuration file (TOML). Defaults to $SPEEDWATCH_CONFIG, then
    /// ./speedwatch.toml, then built-in defaults.
    #[arg(long, env = "SPEEDWATCH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the tracking loop (the default).
    Run,
    /// Print the annotated default configuration and exit.
    ExportDefaults,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Some(Command::ExportDefaults) => {
            print!("{}", SpeedwatchConfig::default_toml());
            Ok(())
        }
        Some(Command::Run) | None => run(cli.config.as_deref()),
    }
}

fn run(config_path: Option<&std::path::Path>) -> Result<()> {
    let cfg = match config_path {
        Some(path) => SpeedwatchConfig::load_from(Some(path))?,
        None => SpeedwatchConfig::load()?,
    };
    log_startup_summary(&cfg);

    let mut recorder = EvidenceRecorder::new(&cfg).context("open evidence stores")?;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        log::info!("stop requested");
        stop_handler.store(true, Ordering::Relaxed);
    })
    .context("install interrupt handler")?;

    while !stop.load(Ordering::Relaxed) {
        let mut source = ingest::open_source(&cfg.camera)?;
        source.start()?;

        let mut pipeline = SpeedEventPipeline::new(&cfg);
        let outcome = pipeline.run(source.as_mut(), &mut recorder, &mut NullDisplay, &stop);
        source.stop();

        match outcome {
            Ok(()) => break,
            Err(CaptureError::CameraUnavailable { attempts }) => {
                log::warn!(
                    "camera unavailable after {} read attempts; restarting camera, one moment",
                    attempts
                );
                std::thread::sleep(CAMERA_RESTART_DELAY);
            }
            Err(CaptureError::FrameUnavailable) => {
                // The pipeline retries these internally; reaching here
                // means the source is in a bad state, so restart it too.
                log::warn!("frame stream interrupted; restarting camera");
                std::thread::sleep(CAMERA_RESTART_DELAY);
            }
        }
    }

    log::info!("speedwatchd exiting");
    Ok(())
}

fn log_startup_summary(cfg: &SpeedwatchConfig) {
    log::info!(
        "camera: {} {} {}x{} @ {} fps",
        cfg.camera.backend.label(),
        cfg.camera.device,
        cfg.camera.width,
        cfg.camera.height,
        cfg.camera.fps
    );
    log::info!(
        "monitored area: x {}..{} y {}..{} (margin {} px)",
        cfg.motion.x_left,
        cfg.motion.x_right,
        cfg.motion.y_upper,
        cfg.motion.y_lower,
        cfg.margin_px()
    );
    log::info!(
        "trigger: {} steps, displacement band {}..{} px, over {:.1} {}",
        cfg.motion.track_counter,
        cfg.motion.x_diff_min,
        cfg.motion.x_diff_max,
        cfg.motion.max_speed_over,
        cfg.speed_unit()
    );
    log::info!(
        "calibration: cal_obj_px={} cal_obj_mm={:.0} speed_conversion={:.5}",
        cfg.calibration.cal_obj_px,
        cfg.calibration.cal_obj_mm,
        cfg.speed_conversion()
    );
    log::info!(
        "storage: images {} csv={} db={}",
        cfg.image.path.display(),
        cfg.storage.csv_enabled,
        cfg.storage.db_enabled
    );
    if cfg.calibration.calibrate {
        log::warn!("camera is in calibration mode; every completed track is recorded");
        log::warn!(
            "measure the reference object against the hash marks (10 px apart), then set cal_obj_px/cal_obj_mm and turn calibrate off"
        );
    }
}
