//! Per-frame orchestration.
//!
//! One `SpeedEventPipeline` owns the tracking state for a camera session
//! and runs the same iteration for every frame: read (with bounded
//! retry) → detect → select → advance the track → persist on a
//! reportable completion. It is the only component that triggers
//! persistence; detection, selection and tracking are pure functions of
//! their inputs.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Local};
use image::{GrayImage, RgbImage};

use crate::annotate::Annotator;
use crate::config::SpeedwatchConfig;
use crate::detect::{select_region, MotionDetector, MotionRegion};
use crate::error::CaptureError;
use crate::frame::Frame;
use crate::ingest::{FrameRead, FrameSource};
use crate::track::{MotionTrack, TrackSummary, TrackUpdate, TrackingParams};
use crate::{Roi, SpeedEvent};

/// Immediate re-reads allowed within one iteration before the camera is
/// declared unavailable.
const MAX_READ_ATTEMPTS: u32 = 10;

/// Frames between processing-rate log lines.
const RATE_LOG_FRAMES: u64 = 1000;

/// Persistence collaborator. Owns evidence naming so directory rotation
/// stays out of the pipeline.
pub trait CaptureSink {
    /// Choose the destination path for the next evidence image.
    fn plan_image_path(&mut self, logged_at: DateTime<Local>, ave_speed: f64) -> PathBuf;

    /// Persist one speed event and its rendered evidence image.
    fn record(&mut self, event: &SpeedEvent, image: &RgbImage) -> Result<()>;
}

/// Optional human-observable output; decoupled from tracking correctness.
pub trait DisplaySink {
    fn show(&mut self, frame: &Frame, roi: &Roi, region: Option<&MotionRegion>) -> Result<()>;
}

/// Display sink that discards everything.
pub struct NullDisplay;

impl DisplaySink for NullDisplay {
    fn show(&mut self, _frame: &Frame, _roi: &Roi, _region: Option<&MotionRegion>) -> Result<()> {
        Ok(())
    }
}

pub struct SpeedEventPipeline<'a> {
    cfg: &'a SpeedwatchConfig,
    roi: Roi,
    margin_px: u32,
    params: TrackingParams,
    detector: MotionDetector,
    annotator: Annotator,
    track: MotionTrack,
    prev_gray: Option<GrayImage>,
    frames_seen: u64,
    rate_window_start: Instant,
}

impl<'a> SpeedEventPipeline<'a> {
    pub fn new(cfg: &'a SpeedwatchConfig) -> Self {
        Self {
            roi: cfg.roi(),
            margin_px: cfg.margin_px(),
            params: TrackingParams::from_config(cfg),
            detector: MotionDetector::new(cfg.motion.blur_size, cfg.motion.threshold_sensitivity),
            annotator: Annotator::new(cfg),
            track: MotionTrack::new(),
            prev_gray: None,
            frames_seen: 0,
            rate_window_start: Instant::now(),
            cfg,
        }
    }

    /// Process frames until the stop flag is raised or the camera becomes
    /// unavailable. `Ok(())` means a clean stop; `CameraUnavailable`
    /// means the caller must restart frame acquisition.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn CaptureSink,
        display: &mut dyn DisplaySink,
        stop: &AtomicBool,
    ) -> Result<(), CaptureError> {
        log::info!("begin motion tracking");
        while !stop.load(Ordering::Relaxed) {
            self.process_frame(source, sink, display)?;
        }
        log::info!("motion tracking stopped");
        Ok(())
    }

    /// One pipeline iteration. Returns the emitted event, if any.
    pub fn process_frame(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn CaptureSink,
        display: &mut dyn DisplaySink,
    ) -> Result<Option<SpeedEvent>, CaptureError> {
        let (frame, cur) = self.read_cropped(source)?;

        // The first frame only primes the differencing baseline.
        let Some(prev) = self.prev_gray.take() else {
            self.prev_gray = Some(cur);
            return Ok(None);
        };
        let regions = self.detector.detect(&prev, &cur);
        self.prev_gray = Some(cur);

        let selected = select_region(
            &regions,
            self.roi.width(),
            self.cfg.motion.min_area,
            self.margin_px,
        );

        let mut emitted = None;
        if let Some(region) = selected {
            let now = Instant::now();
            match self.track.observe(region.x, now, &self.params) {
                TrackUpdate::Started { x } => {
                    log::info!(
                        "new  - 0/{} x={} start new track",
                        self.params.track_counter,
                        x
                    );
                }
                TrackUpdate::Advanced { count, speed } => {
                    log::info!(
                        " add - {}/{} x={} {:.2} {} c={} {}x{}={} sqpx",
                        count,
                        self.params.track_counter,
                        region.x,
                        speed,
                        self.cfg.speed_unit(),
                        regions.len(),
                        region.w,
                        region.h,
                        region.area
                    );
                }
                TrackUpdate::Completed(summary) => {
                    emitted = self.finish_track(&summary, &frame, &region, regions.len(), sink);
                    let pause = self.cfg.motion.track_timeout;
                    if !pause.is_zero() {
                        // Deliberate pause so the same object is not
                        // tracked twice.
                        log::info!(
                            "sleep - {:.2}s to clear track",
                            pause.as_secs_f64()
                        );
                        std::thread::sleep(pause);
                    }
                }
                TrackUpdate::OutOfRangeHigh { kept } => {
                    log::info!(
                        " out - {}/{} x={} moved >= {} px max, {}",
                        self.track.track_count(),
                        self.params.track_counter,
                        region.x,
                        self.params.x_diff_max,
                        if kept { "holding track" } else { "discarding track" }
                    );
                }
                TrackUpdate::OutOfRangeLow { discarded } => {
                    log::info!(
                        " out - {}/{} x={} moved <= {} px min, {}",
                        self.track.track_count(),
                        self.params.track_counter,
                        region.x,
                        self.params.x_diff_min,
                        if discarded { "discarding track" } else { "waiting" }
                    );
                }
            }
        }

        if let Err(e) = display.show(&frame, &self.roi, selected.as_ref()) {
            log::warn!("display sink failed: {}", e);
        }
        self.note_frame();
        Ok(emitted)
    }

    /// Read a frame and crop it to the monitored area, retrying
    /// immediately on transient failures up to the attempt bound.
    fn read_cropped(
        &self,
        source: &mut dyn FrameSource,
    ) -> Result<(Arc<Frame>, GrayImage), CaptureError> {
        for _ in 0..MAX_READ_ATTEMPTS {
            if let FrameRead::Frame(frame) = source.read() {
                match frame.gray_crop(&self.roi) {
                    Ok(gray) => return Ok((frame, gray)),
                    Err(CaptureError::FrameUnavailable) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Err(CaptureError::CameraUnavailable {
            attempts: MAX_READ_ATTEMPTS,
        })
    }

    /// Apply the capture predicate to a completed track and persist the
    /// evidence record when it passes. Persistence failures are logged,
    /// never fatal.
    fn finish_track(
        &mut self,
        summary: &TrackSummary,
        frame: &Frame,
        region: &MotionRegion,
        contours: usize,
        sink: &mut dyn CaptureSink,
    ) -> Option<SpeedEvent> {
        let reportable = summary.ave_speed > self.cfg.motion.max_speed_over
            || self.cfg.calibration.calibrate;
        if !reportable {
            log::info!(
                "end  - skip photo, speed {:.1} {} not over {:.1} ({} px in {:.3}s)",
                summary.ave_speed,
                self.cfg.speed_unit(),
                self.cfg.motion.max_speed_over,
                summary.total_px,
                summary.elapsed.as_secs_f64()
            );
            return None;
        }

        let logged_at = Local::now();
        let image_path = sink.plan_image_path(logged_at, summary.ave_speed);
        let event = SpeedEvent {
            logged_at,
            ave_speed: (summary.ave_speed * 100.0).round() / 100.0,
            unit: self.cfg.speed_unit(),
            direction: summary.direction,
            region: *region,
            contours,
            image_path,
        };
        let rendered = self.annotator.render(
            frame,
            region,
            event.ave_speed,
            event.unit,
            &event.image_path,
        );
        if let Err(e) = sink.record(&event, &rendered) {
            log::error!("failed to persist speed event: {}", e);
        }
        log::info!(
            "end  - ave speed {:.1} {} tracked {} px in {:.3}s {}",
            event.ave_speed,
            event.unit,
            summary.total_px,
            summary.elapsed.as_secs_f64(),
            event.direction
        );
        Some(event)
    }

    fn note_frame(&mut self) {
        if !self.cfg.motion.display_fps {
            return;
        }
        self.frames_seen += 1;
        if self.frames_seen >= RATE_LOG_FRAMES {
            let elapsed = self.rate_window_start.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                log::info!(
                    "{:.2} fps over the last {} frames",
                    self.frames_seen as f64 / elapsed,
                    self.frames_seen
                );
            }
            self.frames_seen = 0;
            self.rate_window_start = Instant::now();
        }
    }
}
