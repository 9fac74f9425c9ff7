//! Idle policy: with no outside demand and `idling.phases = [2, 6]`, the
//! controller dwells on the configured movements, re-serving them forever
//! without ever crossing the barrier or touching another phase.

mod common;

use common::{default_timing, dual_quad, state_of};
use controller_core::phase::{PhaseId, PhaseState};
use controller_core::runtime::{ControlMode, ControllerRuntime};
use heapless::Vec;

#[test]
fn idle_recalls_dwell_on_configured_phases() {
    let mut config = dual_quad(ControlMode::Normal, default_timing());
    let mut idle: Vec<PhaseId, 16> = Vec::new();
    idle.push(PhaseId::new(2)).unwrap();
    idle.push(PhaseId::new(6)).unwrap();
    config.idle_phases = idle;

    let mut runtime = ControllerRuntime::new(config).unwrap();

    let mut services_2 = 0u32;
    let mut services_6 = 0u32;
    let mut was_green_2 = false;
    let mut was_green_6 = false;

    for tick in 0..6_000u32 {
        let output = runtime.tick(None);

        let green_2 = state_of(&output, 2) == PhaseState::Go;
        let green_6 = state_of(&output, 6) == PhaseState::Go;
        if green_2 && !was_green_2 {
            services_2 += 1;
        }
        if green_6 && !was_green_6 {
            services_6 += 1;
        }
        was_green_2 = green_2;
        was_green_6 = green_6;

        for other in [1u8, 3, 4, 5, 7, 8] {
            assert_eq!(
                state_of(&output, other),
                PhaseState::Stop,
                "phase {other} served while idling at tick {tick}"
            );
        }
    }

    // 6000 ticks comfortably cover several 18.5 s service cycles.
    assert!(services_2 >= 2, "phase 2 served {services_2} times");
    assert!(services_6 >= 2, "phase 6 served {services_6} times");

    assert_eq!(runtime.scheduler().crossings(), 0);
    assert_eq!(runtime.scheduler().active_barrier(), Some(1));
    assert!(!runtime.faulted());
}
