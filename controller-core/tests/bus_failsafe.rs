//! Transport fail-safe: three straight outbound failures land the
//! intersection in flash with the fault flag raised; five straight
//! successes clear the fault and re-enter service through CET.

mod common;

use common::{default_timing, dual_quad};
use controller_core::runtime::{ControlMode, ControllerRuntime};
use controller_core::telemetry::StateFlags;

#[test]
fn three_failures_force_flash_five_successes_recover() {
    let config = dual_quad(ControlMode::Normal, default_timing());
    let mut runtime = ControllerRuntime::new(config).unwrap();
    runtime.tick(None);

    runtime.bus_feedback(false);
    runtime.bus_feedback(false);
    assert_eq!(runtime.mode(), ControlMode::Normal);

    runtime.bus_feedback(false);
    assert_eq!(runtime.mode(), ControlMode::LsFlash);
    let output = runtime.tick(None);
    assert!(output.snapshot.state_flags.contains(StateFlags::BUS_FAULT));
    // Fail-safe keeps the intersection illuminated: flash, not dark.
    assert!(output.frame.switches.iter().any(|s| s.a || s.b));
    assert!(output.frame.switches.iter().all(|s| !s.c));

    for _ in 0..4 {
        runtime.bus_feedback(true);
        assert_eq!(runtime.mode(), ControlMode::LsFlash);
    }
    runtime.bus_feedback(true);
    assert_eq!(runtime.mode(), ControlMode::Cet);
    let output = runtime.tick(None);
    assert!(!output.snapshot.state_flags.contains(StateFlags::BUS_FAULT));
}

#[test]
fn interrupted_failure_streak_keeps_service() {
    let config = dual_quad(ControlMode::Normal, default_timing());
    let mut runtime = ControllerRuntime::new(config).unwrap();

    runtime.bus_feedback(false);
    runtime.bus_feedback(false);
    runtime.bus_feedback(true);
    runtime.bus_feedback(false);
    runtime.bus_feedback(false);
    assert_eq!(runtime.mode(), ControlMode::Normal);
}
