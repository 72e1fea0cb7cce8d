use thiserror::Error;

/// Frame acquisition failure taxonomy.
///
/// `FrameUnavailable` is transient and retried locally by the pipeline.
/// `CameraUnavailable` means the retry bound was exhausted; the session
/// supervisor is expected to restart frame acquisition entirely.
///
/// No qualifying region and out-of-range displacements are ordinary
/// per-frame outcomes, not errors, and never surface here.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum CaptureError {
    /// The stream momentarily returned no frame, or an incomplete one
    /// (smaller than the monitored area).
    #[error("frame unavailable from video stream")]
    FrameUnavailable,

    /// Frame reads kept failing past the retry bound; acquisition must
    /// be restarted by the caller.
    #[error("camera unavailable after {attempts} frame read attempts")]
    CameraUnavailable { attempts: u32 },
}
