//! A single vehicle call on a minor-street phase runs exactly one service
//! cycle with the configured interval lengths, tick for tick, while every
//! other phase stays at rest.

mod common;

use common::{TICK, default_timing, dual_quad, state_of};
use controller_core::calls::CallSource;
use controller_core::phase::{PhaseId, PhaseState};
use controller_core::runtime::{ControlMode, ControllerRuntime};

#[test]
fn single_call_serves_exact_interval_timeline() {
    let config = dual_quad(ControlMode::Normal, default_timing());
    let mut runtime = ControllerRuntime::new(config).unwrap();

    runtime.place_demand(PhaseId::new(3), false, CallSource::Detector);

    let mut states = Vec::new();
    for _ in 0..200 {
        let output = runtime.tick(None);
        states.push(state_of(&output, 3));

        for other in [1u8, 2, 4, 5, 6, 7, 8] {
            assert_eq!(
                state_of(&output, other),
                PhaseState::Stop,
                "phase {other} left rest"
            );
        }
    }

    // Tick 0 selects; service entry is tick 1.
    assert_eq!(states[0], PhaseState::Stop);

    // 12.5 s of green (125 ticks), no extension without detections.
    for (tick, state) in states.iter().enumerate().take(126).skip(1) {
        assert_eq!(*state, PhaseState::Go, "tick {tick}");
    }
    // 4.0 s of yellow.
    for (tick, state) in states.iter().enumerate().take(166).skip(126) {
        assert_eq!(*state, PhaseState::Caution, "tick {tick}");
    }
    // 1.0 s of red clearance.
    for (tick, state) in states.iter().enumerate().take(176).skip(166) {
        assert_eq!(*state, PhaseState::Rclr, "tick {tick}");
    }
    // Back at rest with the call consumed; no re-service follows.
    for (tick, state) in states.iter().enumerate().skip(176) {
        assert_eq!(*state, PhaseState::Stop, "tick {tick}");
    }

    assert!(!runtime.faulted());
}

#[test]
fn clearance_duration_meets_caution_plus_rclr() {
    let timing = default_timing();
    let config = dual_quad(ControlMode::Normal, timing);
    let mut runtime = ControllerRuntime::new(config).unwrap();
    runtime.place_demand(PhaseId::new(3), false, CallSource::Detector);

    let mut clearance_ticks = 0u32;
    let mut saw_go = false;
    for _ in 0..400 {
        let output = runtime.tick(None);
        match state_of(&output, 3) {
            PhaseState::Go | PhaseState::Extend => saw_go = true,
            PhaseState::Caution | PhaseState::Rclr if saw_go => clearance_ticks += 1,
            PhaseState::Stop if saw_go => break,
            _ => {}
        }
    }

    let floor = ((timing.caution + timing.rclr) / TICK) as u32;
    assert!(saw_go);
    assert!(clearance_ticks >= floor);
}
