//! Load-switch projection.
//!
//! Maps phase interval states onto the three field outputs of each load
//! switch. Vehicle switches drive `(red, yellow, green)`; pedestrian switches
//! drive `(dont-walk, flashing-dont-walk, walk)`. Flash and dark overrides
//! replace the projection wholesale.

use core::fmt;

use crate::phase::{FlashMode, PhaseState};

/// External identifier of a load switch.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct LoadSwitchId(u8);

impl LoadSwitchId {
    #[must_use]
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

impl fmt::Display for LoadSwitchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LS{:02}", self.0)
    }
}

/// The three outputs of one load switch.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SwitchOutput {
    pub a: bool,
    pub b: bool,
    pub c: bool,
}

impl SwitchOutput {
    #[must_use]
    pub const fn new(a: bool, b: bool, c: bool) -> Self {
        Self { a, b, c }
    }

    /// All outputs de-energized.
    pub const DARK: SwitchOutput = SwitchOutput::new(false, false, false);
}

impl fmt::Display for SwitchOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bit = |on: bool| if on { '1' } else { '0' };
        write!(f, "{}{}{}", bit(self.a), bit(self.b), bit(self.c))
    }
}

/// Role of a load switch within its phase.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SwitchRole {
    Vehicle,
    Pedestrian,
}

/// How the controller currently wants field displays driven.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProjectionMode {
    /// All outputs dark.
    Dark,
    /// Flash override per the phase's configured flash mode.
    Flash,
    /// Follow the phase interval state.
    Normal,
}

/// Projects one switch's outputs for the current tick.
///
/// `flasher` is the 1 Hz reference level used for every pulsed indication.
#[must_use]
pub fn project(
    role: SwitchRole,
    state: PhaseState,
    flash_mode: FlashMode,
    mode: ProjectionMode,
    flasher: bool,
) -> SwitchOutput {
    match mode {
        ProjectionMode::Dark => SwitchOutput::DARK,
        ProjectionMode::Flash => match role {
            SwitchRole::Vehicle => match flash_mode {
                FlashMode::Red => SwitchOutput::new(flasher, false, false),
                FlashMode::Yellow => SwitchOutput::new(false, flasher, false),
            },
            SwitchRole::Pedestrian => SwitchOutput::new(true, false, false),
        },
        ProjectionMode::Normal => match role {
            SwitchRole::Vehicle => vehicle_projection(state, flasher),
            SwitchRole::Pedestrian => ped_projection(state, flasher),
        },
    }
}

fn vehicle_projection(state: PhaseState, flasher: bool) -> SwitchOutput {
    match state {
        PhaseState::Stop | PhaseState::MinStop | PhaseState::Rclr => {
            SwitchOutput::new(true, false, false)
        }
        PhaseState::Caution => SwitchOutput::new(false, true, false),
        // The vehicle head stays green while the companion ped signal walks
        // and clears.
        PhaseState::Go | PhaseState::Extend | PhaseState::Pclr | PhaseState::Walk => {
            SwitchOutput::new(false, false, true)
        }
        PhaseState::Fya => SwitchOutput::new(false, flasher, false),
    }
}

fn ped_projection(state: PhaseState, flasher: bool) -> SwitchOutput {
    match state {
        PhaseState::Stop
        | PhaseState::MinStop
        | PhaseState::Rclr
        | PhaseState::Caution
        | PhaseState::Go
        | PhaseState::Extend
        | PhaseState::Fya => SwitchOutput::new(true, false, false),
        PhaseState::Pclr => SwitchOutput::new(false, flasher, false),
        PhaseState::Walk => SwitchOutput::new(false, false, true),
    }
}
