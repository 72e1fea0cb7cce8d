//! End-to-end pipeline runs against scripted frame sequences and real
//! evidence stores in temporary directories.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use speedwatch::ingest::SyntheticCamera;
use speedwatch::pipeline::NullDisplay;
use speedwatch::storage::SqliteSpeedLog;
use speedwatch::{
    CaptureError, EvidenceRecorder, Frame, FrameRead, FrameSource, SpeedEvent,
    SpeedEventPipeline, SpeedLogStore, SpeedwatchConfig, TravelDirection,
};

/// Frame source that replays a fixed frame sequence with no threads.
struct ScriptedSource {
    frames: VecDeque<Arc<Frame>>,
}

impl ScriptedSource {
    fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into_iter().map(Arc::new).collect(),
        }
    }
}

impl FrameSource for ScriptedSource {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn read(&mut self) -> FrameRead {
        match self.frames.pop_front() {
            Some(frame) => FrameRead::Frame(frame),
            None => FrameRead::Unavailable,
        }
    }

    fn stop(&mut self) {}
}

/// Config pointing every store at a temp dir, tracking relaxed enough
/// for the synthetic block to complete within a few frames.
fn test_config(root: &Path) -> SpeedwatchConfig {
    let mut cfg = SpeedwatchConfig::load_from(None).unwrap();
    cfg.camera.device = "stub://test".to_string();
    cfg.motion.min_area = 50;
    cfg.motion.threshold_sensitivity = 25;
    cfg.motion.x_diff_min = 1;
    cfg.motion.x_diff_max = 20;
    cfg.motion.track_counter = 5;
    cfg.motion.event_timeout = std::time::Duration::from_secs(30);
    cfg.image.path = root.join("media/images");
    cfg.image.recent_dir = root.join("media/recent");
    cfg.image.bigger = 1.0;
    cfg.image.text_on = false;
    cfg.storage.data_dir = root.join("data");
    cfg
}

/// The synthetic block, advanced 10 px per frame across the whole frame.
fn moving_block_frames(cfg: &SpeedwatchConfig, count: u64) -> Vec<Frame> {
    let camera = SyntheticCamera::new(cfg.camera.clone()).with_step(10);
    (0..count).map(|i| camera.frame_at(i)).collect()
}

fn drive_until_event(
    pipeline: &mut SpeedEventPipeline<'_>,
    source: &mut ScriptedSource,
    recorder: &mut EvidenceRecorder,
    max_frames: usize,
) -> Result<Option<SpeedEvent>, CaptureError> {
    let mut display = NullDisplay;
    for _ in 0..max_frames {
        if let Some(event) = pipeline.process_frame(source, recorder, &mut display)? {
            return Ok(Some(event));
        }
    }
    Ok(None)
}

#[test]
fn moving_object_produces_a_full_evidence_record() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let mut recorder = EvidenceRecorder::new(&cfg).unwrap();
    let mut source = ScriptedSource::new(moving_block_frames(&cfg, 20));
    let mut pipeline = SpeedEventPipeline::new(&cfg);

    let event = drive_until_event(&mut pipeline, &mut source, &mut recorder, 20)
        .unwrap()
        .expect("moving block should complete a track");

    assert_eq!(event.direction, TravelDirection::LeftToRight);
    assert!(event.ave_speed > 0.0);
    assert!(event.image_path.exists(), "evidence image must be written");

    let csv = std::fs::read_to_string(cfg.storage.csv_path()).unwrap();
    assert_eq!(csv.lines().count(), 1);
    assert!(csv.contains("L2R"));

    let mut db = SqliteSpeedLog::open(&cfg.storage.db_path()).unwrap();
    assert_eq!(db.count().unwrap(), 1);
}

#[test]
fn under_threshold_track_is_skipped_silently() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = test_config(dir.path());
    cfg.motion.max_speed_over = f64::INFINITY;
    let mut recorder = EvidenceRecorder::new(&cfg).unwrap();
    let mut source = ScriptedSource::new(moving_block_frames(&cfg, 20));
    let mut pipeline = SpeedEventPipeline::new(&cfg);

    let event = drive_until_event(&mut pipeline, &mut source, &mut recorder, 20).unwrap();
    assert!(event.is_none());

    let csv = std::fs::read_to_string(cfg.storage.csv_path()).unwrap();
    assert_eq!(csv.lines().count(), 0, "no rows for a skipped track");
}

#[test]
fn calibration_mode_records_regardless_of_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = test_config(dir.path());
    cfg.motion.max_speed_over = f64::INFINITY;
    cfg.calibration.calibrate = true;
    let mut recorder = EvidenceRecorder::new(&cfg).unwrap();
    let mut source = ScriptedSource::new(moving_block_frames(&cfg, 20));
    let mut pipeline = SpeedEventPipeline::new(&cfg);

    let event = drive_until_event(&mut pipeline, &mut source, &mut recorder, 20)
        .unwrap()
        .expect("calibration mode must record every completed track");

    let name = event.image_path.file_name().unwrap().to_string_lossy();
    assert!(name.starts_with("calib-"), "file name was {}", name);
    assert!(event.image_path.exists());
}

#[test]
fn dead_source_propagates_camera_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let mut recorder = EvidenceRecorder::new(&cfg).unwrap();
    let mut source = ScriptedSource::new(Vec::new());
    let mut pipeline = SpeedEventPipeline::new(&cfg);
    let mut display = NullDisplay;

    let err = pipeline
        .process_frame(&mut source, &mut recorder, &mut display)
        .unwrap_err();
    assert_eq!(err, CaptureError::CameraUnavailable { attempts: 10 });
}

#[test]
fn truncated_frames_are_retried_then_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let mut recorder = EvidenceRecorder::new(&cfg).unwrap();
    // Frames smaller than the monitored area: every crop fails.
    let tiny: Vec<Frame> = (0..12)
        .map(|_| Frame::new(vec![0u8; 30 * 20 * 3], 30, 20))
        .collect();
    let mut source = ScriptedSource::new(tiny);
    let mut pipeline = SpeedEventPipeline::new(&cfg);
    let mut display = NullDisplay;

    let err = pipeline
        .process_frame(&mut source, &mut recorder, &mut display)
        .unwrap_err();
    assert!(matches!(err, CaptureError::CameraUnavailable { .. }));
}
