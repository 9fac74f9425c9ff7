//! Control entrance transition: the controller boots into flash for
//! `cet-delay` seconds, then transfers into NORMAL and starts serving the
//! startup recalls.

mod common;

use common::{default_timing, dual_quad};
use controller_core::phase::PhaseState;
use controller_core::runtime::{ControlMode, ControllerRuntime};
use controller_core::telemetry::StateFlags;

#[test]
fn cet_flashes_then_enters_normal_service() {
    let mut config = dual_quad(ControlMode::Cet, default_timing());
    config.cet_delay = 4.0;
    config.recall_all = true;
    let mut runtime = ControllerRuntime::new(config).unwrap();

    // 4.0 s of entrance flash: every vehicle head pulses its flash colour,
    // phase machines stay at rest.
    for tick in 0..40u32 {
        assert_eq!(runtime.mode(), ControlMode::Cet, "tick {tick}");
        let output = runtime.tick(None);

        for (index, switch) in output.frame.switches.iter().enumerate().take(8) {
            let phase = &output.snapshot.phases[index];
            assert_eq!(phase.state, PhaseState::Stop);
            // Exactly one of red/yellow may be lit, tracking the flasher.
            assert!(!switch.c, "green during CET at tick {tick}");
            assert!(!(switch.a && switch.b));
        }
        assert!(output.frame.transfer);
    }

    assert_eq!(runtime.mode(), ControlMode::Normal);

    // The recall-all placed at NORMAL entry begins serving.
    let mut reached_green = false;
    for _ in 0..100u32 {
        let output = runtime.tick(None);
        assert!(output.snapshot.state_flags.contains(StateFlags::ACTUATED));
        if output
            .snapshot
            .phases
            .iter()
            .any(|p| p.state == PhaseState::Go)
        {
            reached_green = true;
            break;
        }
    }
    assert!(reached_green, "no phase served after CET");
    assert!(!runtime.faulted());
}

#[test]
fn cet_flash_alternates_with_the_flasher() {
    let config = dual_quad(ControlMode::Cet, default_timing());
    let mut runtime = ControllerRuntime::new(config).unwrap();

    let mut highs = 0u32;
    let mut lows = 0u32;
    for _ in 0..20u32 {
        let output = runtime.tick(None);
        // Phase 2 flashes red: output a carries the square wave.
        if output.frame.switches[1].a {
            highs += 1;
        } else {
            lows += 1;
        }
    }
    assert_eq!(highs, 10);
    assert_eq!(lows, 10);
}
