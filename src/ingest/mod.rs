//! Frame ingestion sources.
//!
//! This module supplies frames to the processing loop:
//! - Raspberry Pi camera module via V4L2 (feature: ingest-v4l2)
//! - Generic USB webcams via V4L2 (feature: ingest-v4l2)
//! - Synthetic source (`stub://` device strings, always available)
//!
//! Real devices run a producer thread that continuously overwrites a
//! latest-frame slot; `read()` is non-blocking and returns the most
//! recent frame, which may be logically stale. Frames are skipped when
//! the consumer is slower than the capture rate; that is intrinsic to
//! the real-time design, not an error.
//!
//! The backend is selected once at session start from configuration.

mod stream;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use stream::{CameraDevice, VideoStream};
pub use synthetic::SyntheticCamera;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Camera;

use std::sync::Arc;

use anyhow::Result;

use crate::config::CameraSettings;
use crate::frame::Frame;

/// Result of a non-blocking frame read. "No frame yet" is an ordinary
/// value, not an error; the pipeline's bounded retry loop consumes it.
pub enum FrameRead {
    Frame(Arc<Frame>),
    Unavailable,
}

/// Capability interface over a camera session.
///
/// `read` must never block on capture; lifecycle is owned by the session
/// supervisor.
pub trait FrameSource {
    fn start(&mut self) -> Result<()>;
    fn read(&mut self) -> FrameRead;
    fn stop(&mut self);
}

/// Build the configured frame source. `stub://` device strings select
/// the synthetic camera regardless of backend.
pub fn open_source(settings: &CameraSettings) -> Result<Box<dyn FrameSource>> {
    if settings.device.starts_with("stub://") {
        let device = SyntheticCamera::new(settings.clone());
        return Ok(Box::new(VideoStream::new(device)));
    }

    #[cfg(feature = "ingest-v4l2")]
    {
        let device = V4l2Camera::new(settings.clone())?;
        Ok(Box::new(VideoStream::new(device)))
    }
    #[cfg(not(feature = "ingest-v4l2"))]
    {
        anyhow::bail!(
            "camera device {} requires the ingest-v4l2 feature",
            settings.device
        )
    }
}
