//! Per-phase interval state machine.
//!
//! A phase owns one vehicle signal head and optionally one pedestrian head,
//! and walks the interval sequence `STOP → (WALK → PCLR) → GO → (EXTEND) →
//! CAUTION → RCLR → STOP` under the timers configured for it. The ring-barrier
//! scheduler decides *when* a phase may leave `STOP`; everything after the
//! grant is local to the phase.
//!
//! The state discriminants are wire values shared with remote observers and
//! carry deliberate numeric gaps so intermediate states can be added without
//! renumbering the protocol.

use core::fmt;

use crate::display::LoadSwitchId;
use crate::timing::{IntervalTimer, ServiceTimer, Ticks};

/// External identifier of a phase, `1..=16`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhaseId(u8);

impl PhaseId {
    /// Creates a phase id from its configured number.
    #[must_use]
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    /// Returns the configured number.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PH{:02}", self.0)
    }
}

/// Indication a vehicle head presents while the intersection flashes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FlashMode {
    Red,
    Yellow,
}

impl FlashMode {
    /// Encodes the mode into its wire discriminant.
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            FlashMode::Red => 1,
            FlashMode::Yellow => 2,
        }
    }
}

/// Interval state of a phase.
///
/// Ordering follows the wire values; later states are "more serving" than
/// earlier ones, which the scheduler uses for tie-breaking.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum PhaseState {
    Stop,
    MinStop,
    Rclr,
    Caution,
    Extend,
    Go,
    Pclr,
    Walk,
    Fya,
}

impl PhaseState {
    /// Encodes the state into its wire discriminant.
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            PhaseState::Stop => 0,
            PhaseState::MinStop => 2,
            PhaseState::Rclr => 4,
            PhaseState::Caution => 6,
            PhaseState::Extend => 8,
            PhaseState::Go => 10,
            PhaseState::Pclr => 12,
            PhaseState::Walk => 14,
            PhaseState::Fya => 16,
        }
    }

    /// Decodes a wire discriminant, if it names a known state.
    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(PhaseState::Stop),
            2 => Some(PhaseState::MinStop),
            4 => Some(PhaseState::Rclr),
            6 => Some(PhaseState::Caution),
            8 => Some(PhaseState::Extend),
            10 => Some(PhaseState::Go),
            12 => Some(PhaseState::Pclr),
            14 => Some(PhaseState::Walk),
            16 => Some(PhaseState::Fya),
            _ => None,
        }
    }

    /// Vehicle-green service states.
    #[must_use]
    pub const fn is_vehicle_green(self) -> bool {
        matches!(self, PhaseState::Go | PhaseState::Extend)
    }

    /// Clearance states between service and rest.
    #[must_use]
    pub const fn is_clearance(self) -> bool {
        matches!(
            self,
            PhaseState::Caution | PhaseState::Rclr | PhaseState::Pclr
        )
    }

    /// Pedestrian-serving states.
    #[must_use]
    pub const fn is_ped_serving(self) -> bool {
        matches!(self, PhaseState::Walk | PhaseState::Pclr)
    }

    /// States that count as stopped for conflict and barrier purposes.
    #[must_use]
    pub const fn at_rest(self) -> bool {
        matches!(self, PhaseState::Stop | PhaseState::MinStop)
    }

    /// States during which a cross-ring partner may join service.
    #[must_use]
    pub const fn accepts_partner(self) -> bool {
        matches!(
            self,
            PhaseState::Walk | PhaseState::Pclr | PhaseState::Go | PhaseState::Extend
        )
    }
}

/// Configured interval durations for one phase, in seconds.
///
/// Values come from the controller-wide `default-timing` table with per-phase
/// overrides already applied. `min_stop` defaults to zero (no post-clearance
/// lockout).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PhaseTiming {
    pub min_stop: f32,
    pub rclr: f32,
    pub caution: f32,
    pub extend: f32,
    pub go: f32,
    pub pclr: f32,
    pub walk: f32,
    pub max_go: f32,
}

impl PhaseTiming {
    /// Converts the table to whole ticks at the given clock period.
    #[must_use]
    pub fn to_ticks(&self, tick_size: f32) -> IntervalTable {
        IntervalTable {
            min_stop: Ticks::from_seconds(self.min_stop, tick_size),
            rclr: Ticks::from_seconds(self.rclr, tick_size),
            caution: Ticks::from_seconds(self.caution, tick_size),
            extend: Ticks::from_seconds(self.extend, tick_size),
            go: Ticks::from_seconds(self.go, tick_size),
            pclr: Ticks::from_seconds(self.pclr, tick_size),
            walk: Ticks::from_seconds(self.walk, tick_size),
            max_go: Ticks::from_seconds(self.max_go, tick_size),
        }
    }
}

/// [`PhaseTiming`] quantized to control clock ticks.
#[derive(Copy, Clone, Debug, Default)]
pub struct IntervalTable {
    pub min_stop: Ticks,
    pub rclr: Ticks,
    pub caution: Ticks,
    pub extend: Ticks,
    pub go: Ticks,
    pub pclr: Ticks,
    pub walk: Ticks,
    pub max_go: Ticks,
}

impl IntervalTable {
    fn for_state(&self, state: PhaseState) -> Ticks {
        match state {
            PhaseState::Stop | PhaseState::Fya => Ticks::ZERO,
            PhaseState::MinStop => self.min_stop,
            PhaseState::Rclr => self.rclr,
            PhaseState::Caution => self.caution,
            PhaseState::Extend => self.extend,
            PhaseState::Go => self.go,
            PhaseState::Pclr => self.pclr,
            PhaseState::Walk => self.walk,
        }
    }
}

/// Service counters exposed through telemetry.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PhaseStats {
    /// Detector assertions observed while the phase was green.
    pub detections: u32,
    /// Vehicle service grants.
    pub vehicle_service: u32,
    /// Pedestrian service grants.
    pub ped_service: u32,
}

/// One observed state change, reported back to the runtime.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Transition {
    pub from: PhaseState,
    pub to: PhaseState,
    /// `Some(ped_service)` when the transition completed a service cycle,
    /// i.e. the phase returned to rest out of red clearance.
    pub completed_service: Option<bool>,
}

/// Error returned when a grant targets a phase that cannot take it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NotReady {
    pub id: PhaseId,
    pub state: PhaseState,
}

impl fmt::Display for NotReady {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} not servable in {:?}", self.id, self.state)
    }
}

/// A single signal phase and its interval state machine.
#[derive(Clone, Debug)]
pub struct Phase {
    id: PhaseId,
    flash_mode: FlashMode,
    vehicle_switch: LoadSwitchId,
    ped_switch: Option<LoadSwitchId>,
    timing: PhaseTiming,
    intervals: IntervalTable,
    state: PhaseState,
    interval: IntervalTimer,
    service: ServiceTimer,
    ped_service: bool,
    extension_armed: bool,
    extend_inhibit: bool,
    ped_clear_inhibit: bool,
    yield_requested: bool,
    stats: PhaseStats,
}

impl Phase {
    /// Builds a phase at rest from its configuration.
    #[must_use]
    pub fn new(
        id: PhaseId,
        flash_mode: FlashMode,
        timing: PhaseTiming,
        tick_size: f32,
        vehicle_switch: LoadSwitchId,
        ped_switch: Option<LoadSwitchId>,
    ) -> Self {
        let intervals = timing.to_ticks(tick_size);
        Self {
            id,
            flash_mode,
            vehicle_switch,
            ped_switch,
            timing,
            intervals,
            state: PhaseState::Stop,
            interval: IntervalTimer::new(),
            service: ServiceTimer::new(intervals.max_go),
            ped_service: false,
            extension_armed: false,
            extend_inhibit: false,
            ped_clear_inhibit: false,
            yield_requested: false,
            stats: PhaseStats::default(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> PhaseId {
        self.id
    }

    #[must_use]
    pub const fn flash_mode(&self) -> FlashMode {
        self.flash_mode
    }

    #[must_use]
    pub const fn vehicle_switch(&self) -> LoadSwitchId {
        self.vehicle_switch
    }

    #[must_use]
    pub const fn ped_switch(&self) -> Option<LoadSwitchId> {
        self.ped_switch
    }

    #[must_use]
    pub const fn state(&self) -> PhaseState {
        self.state
    }

    #[must_use]
    pub const fn stats(&self) -> PhaseStats {
        self.stats
    }

    /// A phase is pedestrian-capable iff a pedestrian load switch is set.
    #[must_use]
    pub const fn ped_capable(&self) -> bool {
        self.ped_switch.is_some()
    }

    /// Servable right now: at `STOP` with no lockout pending.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.state == PhaseState::Stop
    }

    /// Stopped for conflict and barrier purposes.
    #[must_use]
    pub fn at_rest(&self) -> bool {
        self.state.at_rest()
    }

    /// Pedestrian service flag of the current cycle.
    #[must_use]
    pub const fn ped_service(&self) -> bool {
        self.ped_service
    }

    /// Target of the running interval, in seconds.
    #[must_use]
    pub fn time_upper(&self, tick_size: f32) -> f32 {
        self.interval.target().as_seconds(tick_size)
    }

    /// Remaining time of the running interval, in seconds.
    #[must_use]
    pub fn time_lower(&self, tick_size: f32) -> f32 {
        self.interval.remaining().as_seconds(tick_size)
    }

    /// Enables or disables vehicle extension for this phase.
    pub fn set_extend_inhibit(&mut self, inhibit: bool) {
        self.extend_inhibit = inhibit;
    }

    /// Enables or disables the pedestrian clearance interval.
    pub fn set_ped_clear_inhibit(&mut self, inhibit: bool) {
        self.ped_clear_inhibit = inhibit;
    }

    /// Asks the phase to head for `STOP` at the next opportunity without
    /// skipping clearance. Used by the control exit transition.
    pub fn request_yield(&mut self) {
        self.yield_requested = true;
    }

    /// Grants service. Degrades a pedestrian request to vehicle-only service
    /// when the phase has no pedestrian head or no walk time.
    pub fn activate(&mut self, ped_service: bool) -> Result<Transition, NotReady> {
        if !self.ready() {
            return Err(NotReady {
                id: self.id,
                state: self.state,
            });
        }

        let ped = ped_service && self.ped_capable() && !self.intervals.walk.is_zero();
        self.ped_service = ped;
        self.yield_requested = false;
        self.stats.vehicle_service += 1;
        if ped {
            self.stats.ped_service += 1;
            Ok(self.change_to(PhaseState::Walk))
        } else {
            Ok(self.change_to(PhaseState::Go))
        }
    }

    /// Advances the machine by one tick.
    ///
    /// `detection` is true when a detector assertion for this phase was
    /// observed this tick; while green it arms or reloads the extension
    /// instead of producing a call.
    pub fn advance(&mut self, detection: bool) -> Option<Transition> {
        if self.state == PhaseState::Stop {
            return None;
        }

        if detection && self.state.is_vehicle_green() {
            self.stats.detections += 1;
            self.extension_armed = true;
            if self.state == PhaseState::Extend {
                self.interval.load(self.intervals.extend);
            }
        }

        if self.state.is_vehicle_green() {
            self.service.advance();
            if self.service.maxed() {
                return Some(self.change_to(PhaseState::Caution));
            }
        }

        if self.interval.advance() {
            let next = self.next_state();
            return Some(self.change_to(next));
        }

        None
    }

    fn next_state(&self) -> PhaseState {
        match self.state {
            PhaseState::Stop => PhaseState::Stop,
            PhaseState::MinStop => PhaseState::Stop,
            PhaseState::Rclr => {
                if self.intervals.min_stop.is_zero() {
                    PhaseState::Stop
                } else {
                    PhaseState::MinStop
                }
            }
            PhaseState::Caution => PhaseState::Rclr,
            // Gap-out: the extension window closed without a fresh assertion.
            PhaseState::Extend => PhaseState::Caution,
            PhaseState::Go => {
                let extendable = !self.intervals.extend.is_zero()
                    && self.extension_armed
                    && !self.extend_inhibit
                    && !self.yield_requested;
                if extendable {
                    PhaseState::Extend
                } else {
                    PhaseState::Caution
                }
            }
            PhaseState::Pclr => {
                if self.yield_requested {
                    PhaseState::Caution
                } else {
                    PhaseState::Go
                }
            }
            PhaseState::Walk => {
                if self.ped_clear_inhibit {
                    PhaseState::Go
                } else {
                    PhaseState::Pclr
                }
            }
            PhaseState::Fya => PhaseState::Caution,
        }
    }

    fn change_to(&mut self, next: PhaseState) -> Transition {
        let from = self.state;
        let completed_service =
            (from == PhaseState::Rclr && next.at_rest()).then_some(self.ped_service);

        self.state = next;
        self.interval.load(self.intervals.for_state(next));

        if next == PhaseState::Go {
            self.service.restart();
        }
        if next.at_rest() && completed_service.is_some() {
            self.ped_service = false;
            self.extension_armed = false;
            self.yield_requested = false;
        }

        Transition {
            from,
            to: next,
            completed_service,
        }
    }
}
