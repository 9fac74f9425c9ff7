//! Controller status records published to remote observers.
//!
//! One [`ControllerSnapshot`] is produced per tick. The daemon serializes and
//! length-prefixes snapshots onto the monitoring socket; the core only builds
//! the records. Field names and numeric encodings track the monitoring
//! protocol, so wire values come from the `to_raw` encoders rather than enum
//! ordinals.

use heapless::Vec;

use crate::display::SwitchOutput;
use crate::phase::PhaseState;
use crate::rings::PhaseStatus;
use crate::runtime::ControlMode;
use crate::{MAX_LOAD_SWITCHES, MAX_PHASES};

/// Controller condition bits mirrored into every snapshot.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct StateFlags(u16);

impl StateFlags {
    pub const TRANSFERRED: u16 = 0x0001;
    pub const IDLE: u16 = 0x0002;
    pub const ACTUATED: u16 = 0x0004;
    pub const SATURATED: u16 = 0x0008;
    pub const TIME_FREEZE: u16 = 0x0010;
    pub const BUS_FAULT: u16 = 0x0020;
    pub const TECH_FLASH: u16 = 0x0040;
    pub const DARK_INPUT: u16 = 0x0080;

    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Raw bit register.
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, mask: u16) -> bool {
        self.0 & mask == mask
    }

    pub fn set(&mut self, mask: u16, on: bool) {
        if on {
            self.0 |= mask;
        } else {
            self.0 &= !mask;
        }
    }
}

/// Per-phase status record.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PhaseSnapshot {
    pub id: u8,
    pub status: PhaseStatus,
    pub ped_service: bool,
    pub state: PhaseState,
    /// Target of the running interval, seconds.
    pub time_upper: f32,
    /// Remaining time of the running interval, seconds.
    pub time_lower: f32,
    pub detections: u32,
    pub vehicle_calls: u32,
    pub ped_calls: u32,
}

/// Point-in-time controller status, one per tick.
#[derive(Clone, Debug, PartialEq)]
pub struct ControllerSnapshot {
    pub mode: ControlMode,
    pub state_flags: StateFlags,
    /// Timing-plan identifier; constant zero until plan scheduling exists.
    pub plan_id: u8,
    /// Smoothed open-call count.
    pub avg_demand: f32,
    /// Highest open-call count observed.
    pub peek_demand: f32,
    /// Seconds since the controller process started.
    pub runtime: u32,
    /// Seconds spent transferred onto the intersection.
    pub control_time: u32,
    pub transfer_count: u32,
    pub phases: Vec<PhaseSnapshot, MAX_PHASES>,
    pub switches: Vec<SwitchOutput, MAX_LOAD_SWITCHES>,
}

/// Non-blocking contract to the telemetry publisher.
///
/// Publishers drop snapshots while no subscriber is attached; losing status
/// frames must never stall the tick loop.
pub trait TelemetrySink {
    type Error;

    fn publish(&mut self, snapshot: &ControllerSnapshot) -> Result<(), Self::Error>;
}
