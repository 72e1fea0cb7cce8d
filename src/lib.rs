//! speedwatch - single-lane vehicle speed estimation from a fixed camera.
//!
//! A fixed rectangular region of the camera frame is watched for motion.
//! Successive frames are differenced, the largest moving region inside the
//! monitored area is followed across the frame, and its horizontal pixel
//! displacement over time is converted into a real-world speed using a
//! calibration factor measured from a reference object of known length.
//! When a track completes above the configured speed threshold (or while
//! calibration mode is on), an evidence record is persisted: an annotated
//! JPEG, a CSV row and a SQLite row.
//!
//! # Module Structure
//!
//! - `ingest`: frame sources (V4L2 devices, synthetic test source)
//! - `detect`: frame differencing and motion region selection
//! - `track`: the Idle/Active tracking state machine
//! - `pipeline`: per-frame orchestration and the capture decision
//! - `annotate`: evidence image rendering (ROI outline, caption, hash marks)
//! - `storage`: evidence persistence (JPEG, CSV, SQLite, housekeeping)
//! - `config`: immutable per-session configuration snapshot

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Local};

pub mod annotate;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod storage;
pub mod track;

pub use config::SpeedwatchConfig;
pub use detect::{select_region, MotionDetector, MotionRegion};
pub use error::CaptureError;
pub use frame::Frame;
pub use ingest::{FrameRead, FrameSource};
pub use pipeline::{CaptureSink, DisplaySink, NullDisplay, SpeedEventPipeline};
pub use storage::{EvidenceRecorder, InMemorySpeedLog, SpeedLogStore, SqliteSpeedLog};
pub use track::{MotionTrack, TrackPhase, TrackSummary, TrackUpdate, TrackingParams};

// -------------------- Region of interest --------------------

/// Fixed rectangular sub-area of the frame where motion is monitored.
///
/// Bounds are in full-frame pixel coordinates and validated at config load
/// (`x_left < x_right`, `y_upper < y_lower`). Immutable for a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Roi {
    pub x_left: u32,
    pub x_right: u32,
    pub y_upper: u32,
    pub y_lower: u32,
}

impl Roi {
    pub fn width(&self) -> u32 {
        self.x_right - self.x_left
    }

    pub fn height(&self) -> u32 {
        self.y_lower - self.y_upper
    }

    /// Horizontal buffer a contour must clear on both sides to count as
    /// fully inside the monitored area.
    pub fn margin_px(&self, x_buf_adjust: u32) -> u32 {
        self.width() / x_buf_adjust
    }
}

// -------------------- Travel direction --------------------

/// Direction of travel, derived from the sign of the most recent
/// horizontal displacement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TravelDirection {
    LeftToRight,
    RightToLeft,
}

impl fmt::Display for TravelDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TravelDirection::LeftToRight => write!(f, "L2R"),
            TravelDirection::RightToLeft => write!(f, "R2L"),
        }
    }
}

// -------------------- Speed unit --------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpeedUnit {
    Kph,
    Mph,
}

impl fmt::Display for SpeedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeedUnit::Kph => write!(f, "kph"),
            SpeedUnit::Mph => write!(f, "mph"),
        }
    }
}

// -------------------- Speed event --------------------

/// One completed, reportable track. Immutable; handed to the persistence
/// sink and not retained by the core.
#[derive(Clone, Debug)]
pub struct SpeedEvent {
    /// Wall-clock time the track completed.
    pub logged_at: DateTime<Local>,
    /// Arithmetic mean of the per-step speed samples.
    pub ave_speed: f64,
    pub unit: SpeedUnit,
    pub direction: TravelDirection,
    /// Final bounding box, in ROI-local coordinates.
    pub region: MotionRegion,
    /// Number of motion regions present in the completing frame.
    pub contours: usize,
    /// Destination of the rendered evidence image.
    pub image_path: PathBuf,
}
