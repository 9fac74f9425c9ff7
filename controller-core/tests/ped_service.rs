//! Pedestrian service through the full runtime: WALK, then the pulsing
//! flashing-dont-walk clearance, then the vehicle green tail.

mod common;

use common::{default_timing, dual_quad, state_of};
use controller_core::calls::CallSource;
use controller_core::phase::{PhaseId, PhaseState};
use controller_core::runtime::{ControlMode, ControllerRuntime};

#[test]
fn ped_call_walks_clears_then_goes() {
    let config = dual_quad(ControlMode::Normal, default_timing());
    let mut runtime = ControllerRuntime::new(config).unwrap();

    // Phase 2 carries ped switch 9 (frame slot 8 in switch-id order).
    runtime.place_demand(PhaseId::new(2), true, CallSource::RecallLatched);

    let mut walk_ticks = 0u32;
    let mut pclr_ticks = 0u32;
    let mut go_after_clearance = false;
    let mut pclr_pulse_highs = 0u32;
    let mut pclr_pulse_lows = 0u32;

    for _ in 0..400u32 {
        let output = runtime.tick(None);
        let ped_head = output.frame.switches[8];
        match state_of(&output, 2) {
            PhaseState::Walk => {
                walk_ticks += 1;
                assert!(ped_head.c, "walk lamp off during WALK");
                // The vehicle head already shows green under the walk.
                assert!(output.frame.switches[1].c);
            }
            PhaseState::Pclr => {
                pclr_ticks += 1;
                assert!(!ped_head.c);
                if ped_head.b {
                    pclr_pulse_highs += 1;
                } else {
                    pclr_pulse_lows += 1;
                }
            }
            PhaseState::Go if pclr_ticks > 0 => {
                go_after_clearance = true;
                assert!(ped_head.a, "dont-walk off after clearance");
                break;
            }
            _ => {}
        }
    }

    // 7.0 s walk, 5.0 s ped clearance at the fixture timing.
    assert_eq!(walk_ticks, 70);
    assert_eq!(pclr_ticks, 50);
    assert!(go_after_clearance, "green tail never followed clearance");
    // The clearance indication pulsed rather than burning steady.
    assert!(pclr_pulse_highs >= 20 && pclr_pulse_lows >= 20);

    let phase2 = runtime
        .phases()
        .iter()
        .find(|p| p.id() == PhaseId::new(2))
        .unwrap();
    assert_eq!(phase2.stats().ped_service, 1);
    assert_eq!(phase2.stats().vehicle_service, 1);
}
