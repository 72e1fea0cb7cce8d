//! Motion tracking state machine.
//!
//! A `MotionTrack` accumulates the horizontal positions of the selected
//! motion region across frames into a track: a run of validated
//! displacement steps, each contributing one speed sample. The machine
//! has two phases, Idle and Active, and cycles for the life of the
//! process; completion, timeout and invalidation all return it to Idle.
//!
//! Legacy behaviors of the tracking algorithm are kept deliberately:
//!
//! - On every non-first observation the reference position moves to the
//!   observed x *before* the displacement is range-checked, so a rejected
//!   reading still shifts the baseline for the next displacement.
//! - A track past half the required step count survives a single
//!   too-large displacement (an object near the far ROI edge can throw
//!   one noisy reading; discarding there causes double-counting).
//! - A track with zero accumulated steps is discarded on any
//!   out-of-range reading.
//!
//! The machine reads no clock of its own; `now` is an explicit argument,
//! which keeps it a pure function of its inputs.

use std::time::{Duration, Instant};

use crate::TravelDirection;

/// Tracking knobs, snapshotted from the session configuration.
#[derive(Clone, Copy, Debug)]
pub struct TrackingParams {
    /// Valid displacement band, exclusive on both ends.
    pub x_diff_min: u32,
    pub x_diff_max: u32,
    /// Validated steps required to complete a track.
    pub track_counter: u32,
    /// Gap without a qualifying region after which a track is abandoned.
    pub event_timeout: Duration,
    /// Pixel-per-second displacement to real-world speed.
    pub speed_conversion: f64,
}

impl TrackingParams {
    pub fn from_config(cfg: &crate::SpeedwatchConfig) -> Self {
        Self {
            x_diff_min: cfg.motion.x_diff_min,
            x_diff_max: cfg.motion.x_diff_max,
            track_counter: cfg.motion.track_counter,
            event_timeout: cfg.motion.event_timeout,
            speed_conversion: cfg.speed_conversion(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackPhase {
    Idle,
    Active,
}

/// Outcome of feeding one selected region into the machine.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TrackUpdate {
    /// First qualifying observation: a new track began at `x`.
    Started { x: u32 },
    /// A validated step was recorded.
    Advanced { count: u32, speed: f64 },
    /// The required step count was reached; the machine is Idle again.
    Completed(TrackSummary),
    /// Displacement at or past the upper bound. `kept` is true when the
    /// track had enough history to survive the rejection.
    OutOfRangeHigh { kept: bool },
    /// Displacement at or below the lower bound (noise). `discarded` is
    /// true when the track had no history worth keeping.
    OutOfRangeLow { discarded: bool },
}

/// Completion payload: everything the pipeline needs for the capture
/// decision and the evidence record.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackSummary {
    pub ave_speed: f64,
    pub samples: u32,
    /// Net pixel distance between track start and completion.
    pub total_px: u32,
    pub elapsed: Duration,
    pub direction: TravelDirection,
}

pub struct MotionTrack {
    phase: TrackPhase,
    start_pos_x: u32,
    end_pos_x: u32,
    prev_end_pos_x: u32,
    track_start: Instant,
    /// Time of the previous validated step; the denominator of the next
    /// step's speed.
    prev_step_at: Instant,
    last_seen: Instant,
    track_count: u32,
    speed_samples: Vec<f64>,
    direction: Option<TravelDirection>,
}

impl MotionTrack {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            phase: TrackPhase::Idle,
            start_pos_x: 0,
            end_pos_x: 0,
            prev_end_pos_x: 0,
            track_start: now,
            prev_step_at: now,
            last_seen: now,
            track_count: 0,
            speed_samples: Vec::new(),
            direction: None,
        }
    }

    pub fn phase(&self) -> TrackPhase {
        self.phase
    }

    pub fn track_count(&self) -> u32 {
        self.track_count
    }

    pub fn has_exceeded_timeout(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }

    /// Arithmetic mean of the recorded speed samples. Only meaningful
    /// after at least one validated step.
    pub fn ave_speed(&self) -> f64 {
        debug_assert!(!self.speed_samples.is_empty());
        self.speed_samples.iter().sum::<f64>() / self.speed_samples.len() as f64
    }

    /// Feed the selected region's x position for the current frame.
    ///
    /// Implements the transition table: timeout restart, first-event
    /// start, validated advance, completion, and the two out-of-range
    /// policies.
    pub fn observe(&mut self, x: u32, now: Instant, params: &TrackingParams) -> TrackUpdate {
        if self.phase == TrackPhase::Active
            && self.has_exceeded_timeout(now, params.event_timeout)
        {
            log::info!(
                "reset - no motion for over {:.2}s, abandoning track",
                params.event_timeout.as_secs_f64()
            );
            self.phase = TrackPhase::Idle;
        }

        if self.phase == TrackPhase::Idle {
            self.begin(x, now);
            return TrackUpdate::Started { x };
        }

        // The baseline moves to the observed position before the range
        // check; a rejected reading still shifts the next displacement.
        self.prev_end_pos_x = self.end_pos_x;
        self.end_pos_x = x;
        let direction = if self.end_pos_x > self.prev_end_pos_x {
            TravelDirection::LeftToRight
        } else {
            TravelDirection::RightToLeft
        };
        self.direction = Some(direction);

        let d = self.end_pos_x.abs_diff(self.prev_end_pos_x);
        if d > params.x_diff_min && d < params.x_diff_max {
            self.track_count += 1;
            let dt = now
                .saturating_duration_since(self.prev_step_at)
                .as_secs_f64()
                .max(f64::EPSILON);
            let speed = d as f64 / dt * params.speed_conversion;
            self.speed_samples.push(speed);
            self.prev_step_at = now;

            if self.track_count >= params.track_counter {
                let summary = TrackSummary {
                    ave_speed: self.ave_speed(),
                    samples: self.track_count,
                    total_px: self.end_pos_x.abs_diff(self.start_pos_x),
                    elapsed: now.saturating_duration_since(self.track_start),
                    direction,
                };
                self.phase = TrackPhase::Idle;
                return TrackUpdate::Completed(summary);
            }

            self.last_seen = now;
            TrackUpdate::Advanced {
                count: self.track_count,
                speed,
            }
        } else if d >= params.x_diff_max {
            // Survive a single overshoot once the track is past half the
            // required steps; otherwise the reading invalidates it.
            let kept = f64::from(self.track_count) > f64::from(params.track_counter) / 2.0;
            if !kept {
                self.phase = TrackPhase::Idle;
            }
            self.last_seen = now;
            TrackUpdate::OutOfRangeHigh { kept }
        } else {
            // Barely moved: noise. A track with no recorded steps is not
            // worth continuing.
            let discarded = self.track_count == 0;
            if discarded {
                self.phase = TrackPhase::Idle;
            }
            self.last_seen = now;
            TrackUpdate::OutOfRangeLow { discarded }
        }
    }

    fn begin(&mut self, x: u32, now: Instant) {
        self.phase = TrackPhase::Active;
        self.start_pos_x = x;
        self.end_pos_x = x;
        self.prev_end_pos_x = x;
        self.track_start = now;
        self.prev_step_at = now;
        self.last_seen = now;
        self.track_count = 0;
        self.speed_samples.clear();
        self.direction = None;
    }
}

impl Default for MotionTrack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> TrackingParams {
        TrackingParams {
            x_diff_min: 1,
            x_diff_max: 20,
            track_counter: 5,
            event_timeout: Duration::from_secs_f64(0.3),
            speed_conversion: 1.0,
        }
    }

    #[test]
    fn last_seen_within_timeout() {
        let mut track = MotionTrack::new();
        let t0 = Instant::now();
        track.observe(100, t0, &params());
        assert!(!track.has_exceeded_timeout(t0 + Duration::from_millis(200), params().event_timeout));
    }

    #[test]
    fn last_seen_exceeds_timeout() {
        let mut track = MotionTrack::new();
        let t0 = Instant::now();
        track.observe(100, t0, &params());
        assert!(track.has_exceeded_timeout(t0 + Duration::from_secs(5), params().event_timeout));
    }

    #[test]
    fn average_speed_is_mean_of_samples() {
        let mut track = MotionTrack::new();
        let p = TrackingParams {
            track_counter: 100,
            event_timeout: Duration::from_secs(100),
            ..params()
        };
        let t0 = Instant::now();
        track.observe(100, t0, &p);
        // Two 10px steps, 1s and 2s apart: samples 10.0 and 5.0.
        track.observe(110, t0 + Duration::from_secs(1), &p);
        track.observe(120, t0 + Duration::from_secs(3), &p);
        assert_eq!(track.track_count(), 2);
        assert!((track.ave_speed() - 7.5).abs() < 1e-9);
    }

    #[test]
    fn displacement_equal_to_bounds_is_out_of_range() {
        let p = params();
        let t0 = Instant::now();

        let mut track = MotionTrack::new();
        track.observe(100, t0, &p);
        let update = track.observe(100 + p.x_diff_max, t0 + Duration::from_millis(100), &p);
        assert!(matches!(update, TrackUpdate::OutOfRangeHigh { .. }));

        let mut track = MotionTrack::new();
        track.observe(100, t0, &p);
        let update = track.observe(100 + p.x_diff_min, t0 + Duration::from_millis(100), &p);
        assert!(matches!(update, TrackUpdate::OutOfRangeLow { .. }));
    }

    #[test]
    fn rejected_reading_still_moves_the_baseline() {
        let p = TrackingParams {
            track_counter: 10,
            ..params()
        };
        let t0 = Instant::now();
        let mut track = MotionTrack::new();
        track.observe(100, t0, &p);
        for (i, x) in [110, 120, 130, 140, 150, 160].iter().enumerate() {
            track.observe(*x, t0 + Duration::from_millis(100 * (i as u64 + 1)), &p);
        }
        assert_eq!(track.track_count(), 6);

        // Overshoot to 200 is rejected but kept (6 > 10/2)...
        let update = track.observe(200, t0 + Duration::from_millis(700), &p);
        assert_eq!(update, TrackUpdate::OutOfRangeHigh { kept: true });

        // ...and the next displacement is measured from 200, not 160.
        let update = track.observe(210, t0 + Duration::from_millis(800), &p);
        assert!(matches!(update, TrackUpdate::Advanced { count: 7, .. }));
    }
}
