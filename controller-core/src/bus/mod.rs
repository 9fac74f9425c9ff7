//! Logical field bus contracts.
//!
//! The core exchanges *logical* frames with the transceiver driver: one
//! outbound frame per tick carrying every load-switch triple, one inbound
//! frame per poll carrying the discrete input bitmap. Framing, HDLC and the
//! serial link are the driver's concern and live outside this crate; the
//! [`BusDriver`] trait is the seam. Transport health feeds the fail-safe
//! hysteresis here so a dying link always lands the intersection in flash.

use heapless::Vec;

use crate::display::SwitchOutput;
use crate::phase::PhaseId;
use crate::timing::Ticks;
use crate::{MAX_LOAD_SWITCHES, MAX_PHASES};

/// Outbound logical frame: load-switch outputs in switch-id order plus the
/// flash transfer relay state.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputFrame {
    pub transfer: bool,
    pub switches: Vec<SwitchOutput, MAX_LOAD_SWITCHES>,
}

impl OutputFrame {
    /// A frame with every output de-energized.
    #[must_use]
    pub fn dark(switch_count: usize) -> Self {
        let mut switches = Vec::new();
        for _ in 0..switch_count.min(MAX_LOAD_SWITCHES) {
            // Capacity is bounded above.
            let _ = switches.push(SwitchOutput::DARK);
        }
        Self {
            transfer: false,
            switches,
        }
    }
}

/// Inbound logical frame: one bit per input slot, slot 1 in bit 0.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct InputFrame {
    bits: u32,
}

impl InputFrame {
    #[must_use]
    pub const fn new() -> Self {
        Self { bits: 0 }
    }

    /// Level of an input slot (1-based).
    #[must_use]
    pub const fn is_set(&self, slot: u8) -> bool {
        slot >= 1 && slot <= 32 && (self.bits >> (slot - 1)) & 1 == 1
    }

    /// Asserts an input slot (1-based). Out-of-range slots are ignored.
    pub fn set(&mut self, slot: u8, level: bool) {
        if slot == 0 || slot > 32 {
            return;
        }
        let mask = 1u32 << (slot - 1);
        if level {
            self.bits |= mask;
        } else {
            self.bits &= !mask;
        }
    }

    /// Raw bitmap.
    #[must_use]
    pub const fn bits(&self) -> u32 {
        self.bits
    }
}

/// Effect a configured input has on the controller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InputAction {
    Ignore,
    Recall,
    Preemption,
    TimeFreeze,
    TechFlash,
    CallInhibit,
    ExtendInhibit,
    PedClearInhibit,
    Dark,
    RandomRecallInhibit,
}

/// Re-placement behaviour of a recall input.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RecallType {
    /// Re-places a call every tick the input is asserted.
    Maintain,
    /// Places one call per rising edge; the latch clears on service.
    Latch,
}

/// One configured discrete input.
#[derive(Clone, Debug)]
pub struct InputConfig {
    /// Bus slot, 1-based.
    pub slot: u8,
    pub action: InputAction,
    pub recall_type: Option<RecallType>,
    /// Seconds the input must stay asserted before it takes effect.
    pub recall_delay: f32,
    pub ped_service: bool,
    pub targets: Vec<PhaseId, MAX_PHASES>,
}

/// Debounced level and one-shot trigger derived from an input this tick.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct InputSignal {
    /// The input is effectively asserted (delay satisfied).
    pub active: bool,
    /// The input became effectively asserted this tick.
    pub fired: bool,
}

/// Per-input runtime state: qualification delay and edge memory.
#[derive(Clone, Debug)]
pub struct InputChannel {
    config: InputConfig,
    delay: Ticks,
    high_run: u32,
    was_active: bool,
}

impl InputChannel {
    #[must_use]
    pub fn new(config: InputConfig, tick_size: f32) -> Self {
        let delay = Ticks::from_seconds(config.recall_delay, tick_size);
        Self {
            config,
            delay,
            high_run: 0,
            was_active: false,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &InputConfig {
        &self.config
    }

    /// Samples the raw level for this tick.
    pub fn sample(&mut self, level: bool) -> InputSignal {
        if level {
            self.high_run = self.high_run.saturating_add(1);
        } else {
            self.high_run = 0;
        }

        let threshold = self.delay.as_u32().max(1);
        let active = level && self.high_run >= threshold;
        let fired = active && !self.was_active;
        self.was_active = active;

        InputSignal { active, fired }
    }
}

/// Non-blocking contract to the field bus driver.
///
/// Implementations may run the link on their own thread; the tick loop only
/// ever exchanges complete logical frames through this trait.
pub trait BusDriver {
    type Error;

    /// Fetches the latest input frame, if one arrived since the last poll.
    fn poll_inputs(&mut self) -> Result<Option<InputFrame>, Self::Error>;

    /// Hands one output frame to the link.
    fn send_outputs(&mut self, frame: &OutputFrame) -> Result<(), Self::Error>;
}

/// Outcome of folding one transport result into the health tracker.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BusCondition {
    Nominal,
    /// The consecutive-failure threshold was just crossed.
    Failed,
    /// The consecutive-success threshold was just crossed after a failure.
    Recovered,
}

/// Consecutive failure threshold that trips the fail-safe.
pub const BUS_FAIL_THRESHOLD: u8 = 3;
/// Consecutive success threshold that clears it.
pub const BUS_RECOVER_THRESHOLD: u8 = 5;

/// Failure/success hysteresis for the bus link.
#[derive(Copy, Clone, Debug, Default)]
pub struct BusHealth {
    failures: u8,
    successes: u8,
    faulted: bool,
}

impl BusHealth {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            failures: 0,
            successes: 0,
            faulted: false,
        }
    }

    /// `true` while the link is considered down.
    #[must_use]
    pub const fn faulted(&self) -> bool {
        self.faulted
    }

    /// Folds one frame result into the tracker.
    pub fn record(&mut self, ok: bool) -> BusCondition {
        if ok {
            self.failures = 0;
            if self.faulted {
                self.successes = self.successes.saturating_add(1);
                if self.successes >= BUS_RECOVER_THRESHOLD {
                    self.faulted = false;
                    self.successes = 0;
                    return BusCondition::Recovered;
                }
            }
            BusCondition::Nominal
        } else {
            self.successes = 0;
            self.failures = self.failures.saturating_add(1);
            if !self.faulted && self.failures >= BUS_FAIL_THRESHOLD {
                self.faulted = true;
                return BusCondition::Failed;
            }
            BusCondition::Nominal
        }
    }
}
