//! Shared fixture: the canonical dual-quad intersection used by the
//! scenario tests, phases 1-8 across two rings and two barriers with
//! pedestrian heads on the through movements.
#![allow(dead_code)]

use controller_core::calls::CallWeights;
use controller_core::phase::{FlashMode, PhaseId, PhaseState, PhaseTiming};
use controller_core::runtime::{ControlMode, ControllerConfig, PhaseConfig, TickOutput};
use heapless::Vec;

pub const TICK: f32 = 0.1;

/// Default timing mirrored from the reference configuration: 12.5 s green,
/// 4.0 s yellow, 1.0 s red clearance.
pub fn default_timing() -> PhaseTiming {
    PhaseTiming {
        min_stop: 0.0,
        rclr: 1.0,
        caution: 4.0,
        extend: 2.5,
        go: 12.5,
        pclr: 5.0,
        walk: 7.0,
        max_go: 30.0,
    }
}

/// Eight phases: ring 1 is 1-4, ring 2 is 5-8; barrier 1 holds {1, 2, 5, 6},
/// barrier 2 holds {3, 4, 7, 8}. Through phases (2, 4, 6, 8) carry
/// pedestrian heads on switches 9-12.
pub fn dual_quad(init_mode: ControlMode, timing: PhaseTiming) -> ControllerConfig {
    let mut phases = Vec::new();
    for id in 1..=8u8 {
        let ped_switch = match id {
            2 => Some(9),
            4 => Some(10),
            6 => Some(11),
            8 => Some(12),
            _ => None,
        };
        phases
            .push(PhaseConfig {
                id,
                flash_mode: if id % 2 == 0 {
                    FlashMode::Red
                } else {
                    FlashMode::Yellow
                },
                timing,
                vehicle_switch: id,
                ped_switch,
            })
            .unwrap();
    }

    let ids: std::vec::Vec<PhaseId> = (1..=8).map(PhaseId::new).collect();
    let mut rings = Vec::new();
    rings.push(Vec::from_slice(&ids[0..4]).unwrap()).unwrap();
    rings.push(Vec::from_slice(&ids[4..8]).unwrap()).unwrap();
    let mut barriers = Vec::new();
    barriers
        .push(Vec::from_slice(&[ids[0], ids[1], ids[4], ids[5]]).unwrap())
        .unwrap();
    barriers
        .push(Vec::from_slice(&[ids[2], ids[3], ids[6], ids[7]]).unwrap())
        .unwrap();

    ControllerConfig {
        tick_size: TICK,
        init_mode,
        recall_all: false,
        cet_delay: 4.0,
        idle_phases: Vec::new(),
        phases,
        rings,
        barriers,
        inputs: Vec::new(),
        random: None,
        weights: CallWeights::default(),
    }
}

/// State of a phase as reported by a tick's snapshot.
pub fn state_of(output: &TickOutput, id: u8) -> PhaseState {
    output
        .snapshot
        .phases
        .iter()
        .find(|p| p.id == id)
        .map(|p| p.state)
        .expect("phase missing from snapshot")
}
