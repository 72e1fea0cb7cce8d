//! Tracking state machine scenarios driven with synthetic clocks.

use std::time::{Duration, Instant};

use speedwatch::{
    MotionTrack, TrackPhase, TrackUpdate, TrackingParams, TravelDirection,
};

fn at(base: Instant, secs: f64) -> Instant {
    base + Duration::from_secs_f64(secs)
}

fn params(track_counter: u32) -> TrackingParams {
    TrackingParams {
        x_diff_min: 1,
        x_diff_max: 20,
        track_counter,
        event_timeout: Duration::from_secs_f64(0.3),
        // cal_obj_mm = 10000, cal_obj_px = 90: 10000 / 90 * 0.0036 = 0.4,
        // so a steady 150 px/s reads as 60 kph.
        speed_conversion: 0.4,
    }
}

#[test]
fn steady_object_completes_with_average_speed_sixty() {
    let p = params(5);
    let base = Instant::now();
    let mut track = MotionTrack::new();

    assert_eq!(
        track.observe(100, at(base, 0.0), &p),
        TrackUpdate::Started { x: 100 }
    );

    // 15 px every 0.1 s.
    let mut completed = None;
    for step in 1..=5u32 {
        let update = track.observe(100 + 15 * step, at(base, 0.1 * step as f64), &p);
        match update {
            TrackUpdate::Advanced { count, speed } => {
                assert_eq!(count, step);
                assert!((speed - 60.0).abs() < 1e-6, "step speed = {}", speed);
            }
            TrackUpdate::Completed(summary) => {
                assert_eq!(step, 5);
                completed = Some(summary);
            }
            other => panic!("unexpected update {:?}", other),
        }
    }

    let summary = completed.expect("track should complete on the fifth step");
    assert!((summary.ave_speed - 60.0).abs() < 1e-6);
    assert_eq!(summary.direction, TravelDirection::LeftToRight);
    assert_eq!(summary.samples, 5);
    assert_eq!(summary.total_px, 75);
    assert_eq!(track.phase(), TrackPhase::Idle);
}

#[test]
fn near_complete_track_survives_one_overshoot() {
    let p = params(10);
    let base = Instant::now();
    let mut track = MotionTrack::new();

    track.observe(100, at(base, 0.0), &p);
    for step in 1..=8u32 {
        let update = track.observe(100 + 10 * step, at(base, 0.1 * step as f64), &p);
        assert!(matches!(update, TrackUpdate::Advanced { .. }));
    }
    assert_eq!(track.track_count(), 8);

    // 25 px >= x_diff_max: rejected, but 8 > 10/2 so the track holds.
    let update = track.observe(205, at(base, 0.9), &p);
    assert_eq!(update, TrackUpdate::OutOfRangeHigh { kept: true });
    assert_eq!(track.phase(), TrackPhase::Active);
    assert_eq!(track.track_count(), 8);
}

#[test]
fn fresh_track_is_discarded_on_undershoot() {
    let p = params(5);
    let base = Instant::now();
    let mut track = MotionTrack::new();

    track.observe(100, at(base, 0.0), &p);
    // Sub-minimum movement with zero recorded steps: not worth keeping.
    let update = track.observe(100, at(base, 0.1), &p);
    assert_eq!(update, TrackUpdate::OutOfRangeLow { discarded: true });
    assert_eq!(track.phase(), TrackPhase::Idle);

    // The next qualifying region starts fresh.
    let update = track.observe(140, at(base, 0.2), &p);
    assert_eq!(update, TrackUpdate::Started { x: 140 });
}

#[test]
fn early_overshoot_discards_the_track() {
    let p = params(5);
    let base = Instant::now();
    let mut track = MotionTrack::new();

    track.observe(100, at(base, 0.0), &p);
    track.observe(110, at(base, 0.1), &p);
    assert_eq!(track.track_count(), 1);

    // 1 <= 5/2: no leniency this early.
    let update = track.observe(160, at(base, 0.2), &p);
    assert_eq!(update, TrackUpdate::OutOfRangeHigh { kept: false });
    assert_eq!(track.phase(), TrackPhase::Idle);
}

#[test]
fn stale_track_restarts_instead_of_continuing() {
    let p = params(5);
    let base = Instant::now();
    let mut track = MotionTrack::new();

    track.observe(100, at(base, 0.0), &p);
    track.observe(110, at(base, 0.1), &p);
    track.observe(120, at(base, 0.2), &p);
    assert_eq!(track.track_count(), 2);

    // Five quiet seconds exceed the 0.3 s event timeout: the next
    // qualifying region is a brand-new track.
    let update = track.observe(130, at(base, 5.2), &p);
    assert_eq!(update, TrackUpdate::Started { x: 130 });
    assert_eq!(track.track_count(), 0);
    assert_eq!(track.phase(), TrackPhase::Active);
}

#[test]
fn quiet_frames_do_not_touch_the_track() {
    // "No region" is modeled by simply not observing; the track only
    // times out when a later observation arrives past the timeout.
    let p = params(5);
    let base = Instant::now();
    let mut track = MotionTrack::new();

    track.observe(100, at(base, 0.0), &p);
    track.observe(110, at(base, 0.1), &p);

    // Still within the timeout: the track continues.
    let update = track.observe(120, at(base, 0.35), &p);
    assert!(matches!(update, TrackUpdate::Advanced { count: 2, .. }));
}
