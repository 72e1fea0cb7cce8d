//! Session configuration.
//!
//! A `SpeedwatchConfig` is an immutable snapshot built once per session:
//! TOML file (optional, every field has a default), then environment
//! overrides, then validation. Components receive the snapshot by
//! reference; only the session supervisor rebuilds it.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Roi, SpeedUnit};

const DEFAULT_CONFIG_PATH: &str = "speedwatch.toml";

const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_CAMERA_WIDTH: u32 = 320;
const DEFAULT_CAMERA_HEIGHT: u32 = 240;
const DEFAULT_CAMERA_FPS: u32 = 20;

const DEFAULT_X_LEFT: u32 = 25;
const DEFAULT_X_RIGHT: u32 = 295;
const DEFAULT_Y_UPPER: u32 = 75;
const DEFAULT_Y_LOWER: u32 = 185;
const DEFAULT_MIN_AREA: u32 = 100;
const DEFAULT_BLUR_SIZE: u32 = 10;
const DEFAULT_THRESHOLD_SENSITIVITY: u8 = 20;
const DEFAULT_X_DIFF_MIN: u32 = 1;
const DEFAULT_X_DIFF_MAX: u32 = 20;
const DEFAULT_X_BUF_ADJUST: u32 = 10;
const DEFAULT_TRACK_COUNTER: u32 = 5;
const DEFAULT_EVENT_TIMEOUT_SECS: f64 = 0.3;
const DEFAULT_TRACK_TIMEOUT_SECS: f64 = 0.0;
const DEFAULT_MAX_SPEED_OVER: f64 = 0.0;

const DEFAULT_CAL_OBJ_PX: u32 = 90;
const DEFAULT_CAL_OBJ_MM: f64 = 4700.0;

const DEFAULT_IMAGE_PATH: &str = "media/images";
const DEFAULT_IMAGE_PREFIX: &str = "speed-";
const DEFAULT_IMAGE_FONT_SIZE: u32 = 12;
const DEFAULT_IMAGE_BIGGER: f32 = 3.0;
const DEFAULT_SUBDIR_MAX_FILES: u32 = 1000;
const DEFAULT_RECENT_DIR: &str = "media/recent";
const DEFAULT_RECENT_MAX: u32 = 100;

const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_SPACE_FREE_MB: u64 = 500;

/// Conversion from a px/mm calibration pair to km/h per (px/s).
const PX_TO_KPH: f64 = 0.0036;
const KPH_TO_MPH: f64 = 0.621371;

// -------------------- File representation --------------------

#[derive(Debug, Deserialize, Default)]
struct SpeedwatchConfigFile {
    camera: Option<CameraFile>,
    motion: Option<MotionFile>,
    calibration: Option<CalibrationFile>,
    image: Option<ImageFile>,
    storage: Option<StorageFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraFile {
    backend: Option<String>,
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct MotionFile {
    x_left: Option<u32>,
    x_right: Option<u32>,
    y_upper: Option<u32>,
    y_lower: Option<u32>,
    min_area: Option<u32>,
    blur_size: Option<u32>,
    threshold_sensitivity: Option<u8>,
    x_diff_min: Option<u32>,
    x_diff_max: Option<u32>,
    x_buf_adjust: Option<u32>,
    track_counter: Option<u32>,
    event_timeout: Option<f64>,
    track_timeout: Option<f64>,
    max_speed_over: Option<f64>,
    display_fps: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct CalibrationFile {
    calibrate: Option<bool>,
    cal_obj_px: Option<u32>,
    cal_obj_mm: Option<f64>,
    speed_mph: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct ImageFile {
    path: Option<PathBuf>,
    prefix: Option<String>,
    filename_speed: Option<bool>,
    show_motion_area: Option<bool>,
    text_on: Option<bool>,
    text_bottom: Option<bool>,
    font_path: Option<PathBuf>,
    font_size: Option<u32>,
    bigger: Option<f32>,
    max_files: Option<u32>,
    subdir_max_files: Option<u32>,
    subdir_max_hours: Option<u32>,
    recent_dir: Option<PathBuf>,
    recent_max: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageFile {
    data_dir: Option<PathBuf>,
    csv_enabled: Option<bool>,
    db_enabled: Option<bool>,
    space_timer_hrs: Option<u32>,
    space_free_mb: Option<u64>,
}

// -------------------- Resolved settings --------------------

/// Camera backend, selected once at session start. No runtime probing;
/// `stub://` device strings always resolve to the synthetic source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraBackend {
    /// Raspberry Pi camera module via its V4L2 device node.
    Picam,
    /// Generic USB webcam via V4L2.
    Webcam,
}

impl CameraBackend {
    /// Label recorded with each database row.
    pub fn label(&self) -> &'static str {
        match self {
            CameraBackend::Picam => "PiCam",
            CameraBackend::Webcam => "WebCam",
        }
    }
}

#[derive(Clone, Debug)]
pub struct CameraSettings {
    pub backend: CameraBackend,
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

#[derive(Clone, Debug)]
pub struct MotionSettings {
    pub x_left: u32,
    pub x_right: u32,
    pub y_upper: u32,
    pub y_lower: u32,
    pub min_area: u32,
    pub blur_size: u32,
    pub threshold_sensitivity: u8,
    pub x_diff_min: u32,
    pub x_diff_max: u32,
    pub x_buf_adjust: u32,
    pub track_counter: u32,
    pub event_timeout: Duration,
    pub track_timeout: Duration,
    pub max_speed_over: f64,
    pub display_fps: bool,
}

#[derive(Clone, Debug)]
pub struct CalibrationSettings {
    pub calibrate: bool,
    /// Measured pixel length of the reference object.
    pub cal_obj_px: u32,
    /// Real-world length of the reference object, millimetres.
    pub cal_obj_mm: f64,
    pub speed_mph: bool,
}

#[derive(Clone, Debug)]
pub struct ImageSettings {
    pub path: PathBuf,
    pub prefix: String,
    /// Prepend the rounded speed to the image file name.
    pub filename_speed: bool,
    pub show_motion_area: bool,
    pub text_on: bool,
    pub text_bottom: bool,
    /// TTF font for the caption; caption is skipped when unset.
    pub font_path: Option<PathBuf>,
    pub font_size: u32,
    /// Output scale factor, clamped to >= 1.0.
    pub bigger: f32,
    /// Prune oldest prefixed images past this count (0 = off).
    pub max_files: u32,
    /// Rotate into a new dated subdirectory past this count (0 = off).
    pub subdir_max_files: u32,
    /// Rotate into a new dated subdirectory past this age (0 = off).
    pub subdir_max_hours: u32,
    pub recent_dir: PathBuf,
    /// Symlinks kept in the recent folder (0 = off).
    pub recent_max: u32,
}

#[derive(Clone, Debug)]
pub struct StorageSettings {
    pub data_dir: PathBuf,
    pub csv_enabled: bool,
    pub db_enabled: bool,
    /// Hours between free-disk-space checks (0 = off).
    pub space_timer_hrs: u32,
    /// Free-space floor the reclaimer works toward.
    pub space_free_mb: u64,
}

impl StorageSettings {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("speed_cam.db")
    }

    pub fn csv_path(&self) -> PathBuf {
        self.data_dir.join("speed_cam.csv")
    }
}

#[derive(Clone, Debug)]
pub struct SpeedwatchConfig {
    pub camera: CameraSettings,
    pub motion: MotionSettings,
    pub calibration: CalibrationSettings,
    pub image: ImageSettings,
    pub storage: StorageSettings,
}

impl SpeedwatchConfig {
    /// Load from `SPEEDWATCH_CONFIG`, falling back to `speedwatch.toml` in
    /// the working directory, falling back to built-in defaults.
    pub fn load() -> Result<Self> {
        let env_path = std::env::var("SPEEDWATCH_CONFIG").ok().map(PathBuf::from);
        let path = env_path.or_else(|| {
            let default = PathBuf::from(DEFAULT_CONFIG_PATH);
            default.exists().then_some(default)
        });
        Self::load_from(path.as_deref())
    }

    /// Load from an explicit file, or defaults when `None`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => SpeedwatchConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SpeedwatchConfigFile) -> Result<Self> {
        let camera_file = file.camera.unwrap_or_default();
        let backend = match camera_file.backend.as_deref() {
            None | Some("picam") => CameraBackend::Picam,
            Some("webcam") => CameraBackend::Webcam,
            Some(other) => {
                return Err(anyhow!(
                    "unknown camera backend '{}' (expected picam or webcam)",
                    other
                ))
            }
        };
        let camera = CameraSettings {
            backend,
            device: camera_file
                .device
                .unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
            width: camera_file.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: camera_file.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
            fps: camera_file.fps.unwrap_or(DEFAULT_CAMERA_FPS),
        };

        let motion_file = file.motion.unwrap_or_default();
        let motion = MotionSettings {
            x_left: motion_file.x_left.unwrap_or(DEFAULT_X_LEFT),
            x_right: motion_file.x_right.unwrap_or(DEFAULT_X_RIGHT),
            y_upper: motion_file.y_upper.unwrap_or(DEFAULT_Y_UPPER),
            y_lower: motion_file.y_lower.unwrap_or(DEFAULT_Y_LOWER),
            min_area: motion_file.min_area.unwrap_or(DEFAULT_MIN_AREA),
            blur_size: motion_file.blur_size.unwrap_or(DEFAULT_BLUR_SIZE),
            threshold_sensitivity: motion_file
                .threshold_sensitivity
                .unwrap_or(DEFAULT_THRESHOLD_SENSITIVITY),
            x_diff_min: motion_file.x_diff_min.unwrap_or(DEFAULT_X_DIFF_MIN),
            x_diff_max: motion_file.x_diff_max.unwrap_or(DEFAULT_X_DIFF_MAX),
            x_buf_adjust: motion_file.x_buf_adjust.unwrap_or(DEFAULT_X_BUF_ADJUST),
            track_counter: motion_file.track_counter.unwrap_or(DEFAULT_TRACK_COUNTER),
            event_timeout: Duration::from_secs_f64(
                motion_file
                    .event_timeout
                    .unwrap_or(DEFAULT_EVENT_TIMEOUT_SECS),
            ),
            track_timeout: Duration::from_secs_f64(
                motion_file
                    .track_timeout
                    .unwrap_or(DEFAULT_TRACK_TIMEOUT_SECS),
            ),
            max_speed_over: motion_file.max_speed_over.unwrap_or(DEFAULT_MAX_SPEED_OVER),
            display_fps: motion_file.display_fps.unwrap_or(false),
        };

        let calibration_file = file.calibration.unwrap_or_default();
        let calibration = CalibrationSettings {
            calibrate: calibration_file.calibrate.unwrap_or(false),
            cal_obj_px: calibration_file.cal_obj_px.unwrap_or(DEFAULT_CAL_OBJ_PX),
            cal_obj_mm: calibration_file.cal_obj_mm.unwrap_or(DEFAULT_CAL_OBJ_MM),
            speed_mph: calibration_file.speed_mph.unwrap_or(false),
        };

        let image_file = file.image.unwrap_or_default();
        let image = ImageSettings {
            path: image_file
                .path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGE_PATH)),
            prefix: image_file
                .prefix
                .unwrap_or_else(|| DEFAULT_IMAGE_PREFIX.to_string()),
            filename_speed: image_file.filename_speed.unwrap_or(false),
            show_motion_area: image_file.show_motion_area.unwrap_or(true),
            text_on: image_file.text_on.unwrap_or(true),
            text_bottom: image_file.text_bottom.unwrap_or(true),
            font_path: image_file.font_path,
            font_size: image_file.font_size.unwrap_or(DEFAULT_IMAGE_FONT_SIZE),
            bigger: image_file.bigger.unwrap_or(DEFAULT_IMAGE_BIGGER),
            max_files: image_file.max_files.unwrap_or(0),
            subdir_max_files: image_file
                .subdir_max_files
                .unwrap_or(DEFAULT_SUBDIR_MAX_FILES),
            subdir_max_hours: image_file.subdir_max_hours.unwrap_or(0),
            recent_dir: image_file
                .recent_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RECENT_DIR)),
            recent_max: image_file.recent_max.unwrap_or(DEFAULT_RECENT_MAX),
        };

        let storage_file = file.storage.unwrap_or_default();
        let storage = StorageSettings {
            data_dir: storage_file
                .data_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            csv_enabled: storage_file.csv_enabled.unwrap_or(true),
            db_enabled: storage_file.db_enabled.unwrap_or(true),
            space_timer_hrs: storage_file.space_timer_hrs.unwrap_or(0),
            space_free_mb: storage_file.space_free_mb.unwrap_or(DEFAULT_SPACE_FREE_MB),
        };

        Ok(Self {
            camera,
            motion,
            calibration,
            image,
            storage,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(backend) = std::env::var("SPEEDWATCH_CAMERA") {
            match backend.trim() {
                "" => {}
                "picam" => self.camera.backend = CameraBackend::Picam,
                "webcam" => self.camera.backend = CameraBackend::Webcam,
                other => return Err(anyhow!("SPEEDWATCH_CAMERA must be picam or webcam, got '{}'", other)),
            }
        }
        if let Ok(device) = std::env::var("SPEEDWATCH_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(dir) = std::env::var("SPEEDWATCH_DATA_DIR") {
            if !dir.trim().is_empty() {
                self.storage.data_dir = PathBuf::from(dir);
            }
        }
        if let Ok(calibrate) = std::env::var("SPEEDWATCH_CALIBRATE") {
            match calibrate.trim() {
                "" => {}
                "1" | "true" => self.calibration.calibrate = true,
                "0" | "false" => self.calibration.calibrate = false,
                other => {
                    return Err(anyhow!(
                        "SPEEDWATCH_CALIBRATE must be a boolean, got '{}'",
                        other
                    ))
                }
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.motion.x_left >= self.motion.x_right {
            return Err(anyhow!(
                "x_left ({}) must be less than x_right ({})",
                self.motion.x_left,
                self.motion.x_right
            ));
        }
        if self.motion.y_upper >= self.motion.y_lower {
            return Err(anyhow!(
                "y_upper ({}) must be less than y_lower ({})",
                self.motion.y_upper,
                self.motion.y_lower
            ));
        }
        if self.motion.x_right > self.camera.width || self.motion.y_lower > self.camera.height {
            return Err(anyhow!(
                "monitored area {}x{}..{}x{} exceeds the {}x{} camera frame",
                self.motion.x_left,
                self.motion.y_upper,
                self.motion.x_right,
                self.motion.y_lower,
                self.camera.width,
                self.camera.height
            ));
        }
        if self.motion.x_diff_min >= self.motion.x_diff_max {
            return Err(anyhow!(
                "x_diff_min ({}) must be less than x_diff_max ({})",
                self.motion.x_diff_min,
                self.motion.x_diff_max
            ));
        }
        if self.motion.track_counter == 0 {
            return Err(anyhow!("track_counter must be at least 1"));
        }
        if self.motion.blur_size == 0 {
            return Err(anyhow!("blur_size must be at least 1"));
        }
        if self.motion.x_buf_adjust == 0 {
            return Err(anyhow!("x_buf_adjust must be at least 1"));
        }
        if self.calibration.cal_obj_px == 0 {
            return Err(anyhow!("cal_obj_px must be at least 1"));
        }
        if self.calibration.cal_obj_mm <= 0.0 {
            return Err(anyhow!("cal_obj_mm must be greater than zero"));
        }
        if self.camera.fps == 0 {
            return Err(anyhow!("camera fps must be at least 1"));
        }
        // Output scale below 1.0 would shrink evidence images.
        if self.image.bigger < 1.0 {
            self.image.bigger = 1.0;
        }
        Ok(())
    }

    pub fn roi(&self) -> Roi {
        Roi {
            x_left: self.motion.x_left,
            x_right: self.motion.x_right,
            y_upper: self.motion.y_upper,
            y_lower: self.motion.y_lower,
        }
    }

    pub fn margin_px(&self) -> u32 {
        self.roi().margin_px(self.motion.x_buf_adjust)
    }

    pub fn speed_unit(&self) -> SpeedUnit {
        if self.calibration.speed_mph {
            SpeedUnit::Mph
        } else {
            SpeedUnit::Kph
        }
    }

    /// Pixel displacement per second to real-world speed, calibrated from
    /// the reference object's pixel and real lengths.
    pub fn speed_conversion(&self) -> f64 {
        let px_to_kph =
            self.calibration.cal_obj_mm / self.calibration.cal_obj_px as f64 * PX_TO_KPH;
        if self.calibration.speed_mph {
            px_to_kph * KPH_TO_MPH
        } else {
            px_to_kph
        }
    }

    /// Evidence image output dimensions after scaling.
    pub fn image_dimensions(&self) -> (u32, u32) {
        (
            (self.camera.width as f32 * self.image.bigger) as u32,
            (self.camera.height as f32 * self.image.bigger) as u32,
        )
    }

    /// Annotated default configuration, for `speedwatchd export-defaults`.
    pub fn default_toml() -> &'static str {
        DEFAULT_CONFIG_TOML
    }
}

fn read_config_file(path: &Path) -> Result<SpeedwatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

const DEFAULT_CONFIG_TOML: &str = r#"# speedwatch configuration. Every key is optional; the values below are
# the built-in defaults.

[camera]
# picam: Raspberry Pi camera module (V4L2). webcam: generic USB camera.
backend = "picam"
# V4L2 device node. "stub://" prefixes select the synthetic test source.
device = "/dev/video0"
width = 320
height = 240
fps = 20

[motion]
# Monitored area, in frame pixels.
x_left = 25
x_right = 295
y_upper = 75
y_lower = 185
# Smallest changed-pixel area considered a moving object.
min_area = 100
blur_size = 10
threshold_sensitivity = 20
# Valid per-step displacement band, exclusive on both ends.
x_diff_min = 1
x_diff_max = 20
# Margin divisor: a contour must sit (width / x_buf_adjust) px inside
# both ROI edges to count.
x_buf_adjust = 10
# Validated steps required to complete a track.
track_counter = 5
# Seconds without a qualifying region before a track is abandoned.
event_timeout = 0.3
# Pause after a completed track to avoid re-tracking the same object.
track_timeout = 0.0
# Only record tracks averaging above this speed.
max_speed_over = 0.0
display_fps = false

[calibration]
calibrate = false
# Pixel and real-world length of the calibration reference object.
cal_obj_px = 90
cal_obj_mm = 4700.0
speed_mph = false

[image]
path = "media/images"
prefix = "speed-"
filename_speed = false
show_motion_area = true
text_on = true
text_bottom = true
# font_path = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf"
font_size = 12
bigger = 3.0
max_files = 0
subdir_max_files = 1000
subdir_max_hours = 0
recent_dir = "media/recent"
recent_max = 100

[storage]
data_dir = "data"
csv_enabled = true
db_enabled = true
space_timer_hrs = 0
space_free_mb = 500
"#;
