//! Controller runtime: mode machine, input application and the tick loop.
//!
//! [`ControllerRuntime`] is the sole mutator of controller state. Each call
//! to [`ControllerRuntime::tick`] ingests the latest input frame, applies
//! configured input actions, ages the call queue, runs the ring-barrier
//! scheduler, advances every phase machine, projects the load switches and
//! returns the outbound bus frame plus a telemetry snapshot. The daemon owns
//! pacing and I/O; nothing here blocks, sleeps or reads a clock.

use core::fmt;

use heapless::Vec;

use crate::bus::{
    BusCondition, BusHealth, InputAction, InputChannel, InputConfig, InputFrame, OutputFrame,
    RecallType,
};
use crate::calls::{CallQueue, CallSource, CallWeights, RandomActuation, RandomConfig};
use crate::display::{self, LoadSwitchId, ProjectionMode, SwitchRole};
use crate::phase::{FlashMode, Phase, PhaseId, PhaseTiming};
use crate::rings::{Barrier, Ring, RingBarrierScheduler};
use crate::telemetry::{ControllerSnapshot, PhaseSnapshot, StateFlags};
use crate::timing::{Flasher, IntervalTimer, Ticks};
use crate::{MAX_INPUTS, MAX_LOAD_SWITCHES, MAX_PHASES};

/// Process-wide operating mode.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ControlMode {
    Off,
    /// Control entrance transition: flash for `cet-delay`, then serve.
    Cet,
    /// Control exit transition: clear all phases, then flash.
    Cxt,
    LsFlash,
    Normal,
}

impl ControlMode {
    /// Encodes the mode into its wire discriminant.
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            ControlMode::Off => 10,
            ControlMode::Cet => 20,
            ControlMode::Normal => 30,
            ControlMode::Cxt => 40,
            ControlMode::LsFlash => 50,
        }
    }

    /// Decodes a wire discriminant.
    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            10 => Some(ControlMode::Off),
            20 => Some(ControlMode::Cet),
            30 => Some(ControlMode::Normal),
            40 => Some(ControlMode::Cxt),
            50 => Some(ControlMode::LsFlash),
            _ => None,
        }
    }
}

/// One phase entry of the validated controller configuration.
#[derive(Clone, Debug)]
pub struct PhaseConfig {
    pub id: u8,
    pub flash_mode: FlashMode,
    pub timing: PhaseTiming,
    pub vehicle_switch: u8,
    pub ped_switch: Option<u8>,
}

/// Validated controller configuration in core form.
///
/// The daemon deserializes the version-4 document and hands this struct
/// over; [`ControllerConfig::validate`] re-checks the cross-cutting rules so
/// hand-built test configs go through the same gate.
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub tick_size: f32,
    pub init_mode: ControlMode,
    pub recall_all: bool,
    pub cet_delay: f32,
    pub idle_phases: Vec<PhaseId, MAX_PHASES>,
    pub phases: Vec<PhaseConfig, MAX_PHASES>,
    pub rings: Vec<Vec<PhaseId, 8>, 2>,
    pub barriers: Vec<Vec<PhaseId, 8>, 2>,
    pub inputs: Vec<InputConfig, MAX_INPUTS>,
    pub random: Option<RandomConfig>,
    pub weights: CallWeights,
}

/// Reasons a configuration is rejected before the loop starts.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    BadTickSize,
    NoPhases,
    PhaseIdOutOfRange { id: u8 },
    DuplicatePhaseId { id: u8 },
    LoadSwitchCollision { switch: u8 },
    LoadSwitchOutOfRange { switch: u8 },
    RingCount,
    BarrierCount,
    PartitionMismatch { id: u8 },
    UnevenRings,
    GoExceedsMaxGo { id: u8 },
    DuplicateInputSlot { slot: u8 },
    InputSlotOutOfRange { slot: u8 },
    UnknownInputTarget { slot: u8, id: u8 },
    RecallWithoutTargets { slot: u8 },
    UnknownIdlePhase { id: u8 },
    BadRandomRange,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::BadTickSize => f.write_str("tick size must be positive"),
            ConfigError::NoPhases => f.write_str("at least two phases are required"),
            ConfigError::PhaseIdOutOfRange { id } => {
                write!(f, "phase id {id} outside 1..=16")
            }
            ConfigError::DuplicatePhaseId { id } => write!(f, "phase id {id} redefined"),
            ConfigError::LoadSwitchCollision { switch } => {
                write!(f, "load switch {switch} assigned twice")
            }
            ConfigError::LoadSwitchOutOfRange { switch } => {
                write!(f, "load switch {switch} outside 1..=32")
            }
            ConfigError::RingCount => f.write_str("exactly two rings are required"),
            ConfigError::BarrierCount => f.write_str("exactly two barriers are required"),
            ConfigError::PartitionMismatch { id } => {
                write!(
                    f,
                    "phase {id} must appear exactly once in the rings and once in the barriers"
                )
            }
            ConfigError::UnevenRings => f.write_str("rings must hold the same number of phases"),
            ConfigError::GoExceedsMaxGo { id } => {
                write!(f, "phase {id} go time exceeds max-go")
            }
            ConfigError::DuplicateInputSlot { slot } => write!(f, "input slot {slot} redefined"),
            ConfigError::InputSlotOutOfRange { slot } => {
                write!(f, "input slot {slot} outside 1..=32")
            }
            ConfigError::UnknownInputTarget { slot, id } => {
                write!(f, "input slot {slot} targets unknown phase {id}")
            }
            ConfigError::RecallWithoutTargets { slot } => {
                write!(f, "recall input slot {slot} has no targets")
            }
            ConfigError::UnknownIdlePhase { id } => {
                write!(f, "idling references unknown phase {id}")
            }
            ConfigError::BadRandomRange => {
                f.write_str("random-actuation minimum must be below maximum")
            }
        }
    }
}

impl ControllerConfig {
    /// Cross-checks the configuration invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_size <= 0.0 {
            return Err(ConfigError::BadTickSize);
        }
        if self.phases.len() < 2 {
            return Err(ConfigError::NoPhases);
        }

        let mut switches_seen: Vec<u8, MAX_LOAD_SWITCHES> = Vec::new();
        for (index, phase) in self.phases.iter().enumerate() {
            if phase.id < 1 || phase.id as usize > MAX_PHASES {
                return Err(ConfigError::PhaseIdOutOfRange { id: phase.id });
            }
            if self.phases[..index].iter().any(|p| p.id == phase.id) {
                return Err(ConfigError::DuplicatePhaseId { id: phase.id });
            }
            let mut claim = |switch: u8| {
                if switch < 1 || switch as usize > MAX_LOAD_SWITCHES {
                    return Err(ConfigError::LoadSwitchOutOfRange { switch });
                }
                if switches_seen.contains(&switch) {
                    return Err(ConfigError::LoadSwitchCollision { switch });
                }
                let _ = switches_seen.push(switch);
                Ok(())
            };
            claim(phase.vehicle_switch)?;
            if let Some(ped) = phase.ped_switch {
                claim(ped)?;
            }
            if phase.timing.max_go > 0.0 && phase.timing.go > phase.timing.max_go {
                return Err(ConfigError::GoExceedsMaxGo { id: phase.id });
            }
        }

        if self.rings.len() != 2 {
            return Err(ConfigError::RingCount);
        }
        if self.barriers.len() != 2 {
            return Err(ConfigError::BarrierCount);
        }
        if self.rings[0].len() != self.rings[1].len() {
            return Err(ConfigError::UnevenRings);
        }
        for phase in self.phases.iter() {
            let id = PhaseId::new(phase.id);
            let in_rings: usize = self
                .rings
                .iter()
                .map(|ring| ring.iter().filter(|p| **p == id).count())
                .sum();
            let in_barriers: usize = self
                .barriers
                .iter()
                .map(|barrier| barrier.iter().filter(|p| **p == id).count())
                .sum();
            if in_rings != 1 || in_barriers != 1 {
                return Err(ConfigError::PartitionMismatch { id: phase.id });
            }
        }
        let ring_members: usize = self.rings.iter().map(|r| r.len()).sum();
        let barrier_members: usize = self.barriers.iter().map(|b| b.len()).sum();
        if ring_members != self.phases.len() || barrier_members != self.phases.len() {
            // A ring or barrier names a phase that does not exist.
            let ghost = self
                .rings
                .iter()
                .chain(self.barriers.iter())
                .flat_map(|group| group.iter())
                .find(|id| !self.phases.iter().any(|p| p.id == id.as_u8()));
            return Err(ConfigError::PartitionMismatch {
                id: ghost.map_or(0, |id| id.as_u8()),
            });
        }

        for (index, input) in self.inputs.iter().enumerate() {
            if input.slot < 1 || input.slot as usize > MAX_INPUTS {
                return Err(ConfigError::InputSlotOutOfRange { slot: input.slot });
            }
            if self.inputs[..index].iter().any(|i| i.slot == input.slot) {
                return Err(ConfigError::DuplicateInputSlot { slot: input.slot });
            }
            for target in input.targets.iter() {
                if !self.phases.iter().any(|p| p.id == target.as_u8()) {
                    return Err(ConfigError::UnknownInputTarget {
                        slot: input.slot,
                        id: target.as_u8(),
                    });
                }
            }
            if input.action == InputAction::Recall && input.targets.is_empty() {
                return Err(ConfigError::RecallWithoutTargets { slot: input.slot });
            }
        }

        for idle in self.idle_phases.iter() {
            if !self.phases.iter().any(|p| p.id == idle.as_u8()) {
                return Err(ConfigError::UnknownIdlePhase { id: idle.as_u8() });
            }
        }

        if let Some(random) = &self.random {
            if random.min >= random.max {
                return Err(ConfigError::BadRandomRange);
            }
        }

        Ok(())
    }
}

/// Where one frame slot gets its projection from.
#[derive(Copy, Clone, Debug)]
struct SwitchBinding {
    id: LoadSwitchId,
    role: SwitchRole,
    phase_index: usize,
}

/// Result of one tick: the outbound bus frame and the telemetry snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct TickOutput {
    pub frame: OutputFrame,
    pub snapshot: ControllerSnapshot,
}

/// The phase controller proper.
pub struct ControllerRuntime {
    tick_size: f32,
    ticks_per_second: u32,
    mode: ControlMode,
    cet_delay: Ticks,
    cet_timer: IntervalTimer,
    recall_all_pending: bool,

    phases: Vec<Phase, MAX_PHASES>,
    scheduler: RingBarrierScheduler,
    calls: CallQueue,
    inputs: Vec<InputChannel, MAX_INPUTS>,
    idle_phases: Vec<PhaseId, MAX_PHASES>,
    random: Option<RandomActuation>,
    random_pool: Vec<PhaseId, MAX_PHASES>,
    bindings: Vec<SwitchBinding, MAX_LOAD_SWITCHES>,

    flasher: Flasher,
    last_frame: InputFrame,
    pending_detections: [bool; MAX_PHASES],
    call_inhibit: [bool; MAX_PHASES],
    time_freeze: bool,
    tech_flash: bool,
    dark_input: bool,
    random_inhibit: bool,

    bus_health: BusHealth,
    fault: bool,

    tick_count: u64,
    runtime_secs: u32,
    control_secs: u32,
    transfer: bool,
    transfer_count: u32,
    avg_demand: f32,
    peek_demand: f32,
}

impl ControllerRuntime {
    /// Builds a runtime from a validated configuration.
    pub fn new(config: ControllerConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let tick_size = config.tick_size;
        let mut phases: Vec<Phase, MAX_PHASES> = Vec::new();
        let mut random_pool: Vec<PhaseId, MAX_PHASES> = Vec::new();
        for entry in config.phases.iter() {
            let id = PhaseId::new(entry.id);
            // Capacities were validated above.
            let _ = phases.push(Phase::new(
                id,
                entry.flash_mode,
                entry.timing,
                tick_size,
                LoadSwitchId::new(entry.vehicle_switch),
                entry.ped_switch.map(LoadSwitchId::new),
            ));
            let _ = random_pool.push(id);
        }

        let mut bindings: Vec<SwitchBinding, MAX_LOAD_SWITCHES> = Vec::new();
        for (phase_index, phase) in phases.iter().enumerate() {
            let _ = bindings.push(SwitchBinding {
                id: phase.vehicle_switch(),
                role: SwitchRole::Vehicle,
                phase_index,
            });
            if let Some(ped) = phase.ped_switch() {
                let _ = bindings.push(SwitchBinding {
                    id: ped,
                    role: SwitchRole::Pedestrian,
                    phase_index,
                });
            }
        }
        bindings.sort_unstable_by_key(|binding| binding.id.as_u8());

        let mut rings: Vec<Ring, 2> = Vec::new();
        for (index, members) in config.rings.iter().enumerate() {
            let _ = rings.push(Ring::new(index as u8 + 1, members));
        }
        let mut barriers: Vec<Barrier, 2> = Vec::new();
        for (index, members) in config.barriers.iter().enumerate() {
            let _ = barriers.push(Barrier::new(index as u8 + 1, members));
        }

        let mut inputs: Vec<InputChannel, MAX_INPUTS> = Vec::new();
        for input in config.inputs.iter() {
            let _ = inputs.push(InputChannel::new(input.clone(), tick_size));
        }

        let cet_delay = Ticks::from_seconds(config.cet_delay, tick_size);
        let mut runtime = Self {
            tick_size,
            ticks_per_second: (1.0 / tick_size + 0.5) as u32,
            mode: ControlMode::Off,
            cet_delay,
            cet_timer: IntervalTimer::new(),
            recall_all_pending: config.recall_all,
            phases,
            scheduler: RingBarrierScheduler::new(rings, barriers),
            calls: CallQueue::new(config.weights, tick_size),
            inputs,
            idle_phases: config.idle_phases,
            random: config.random.map(|r| RandomActuation::new(r, tick_size)),
            random_pool,
            bindings,
            flasher: Flasher::standard(tick_size),
            last_frame: InputFrame::new(),
            pending_detections: [false; MAX_PHASES],
            call_inhibit: [false; MAX_PHASES],
            time_freeze: false,
            tech_flash: false,
            dark_input: false,
            random_inhibit: false,
            bus_health: BusHealth::new(),
            fault: false,
            tick_count: 0,
            runtime_secs: 0,
            control_secs: 0,
            transfer: false,
            transfer_count: 0,
            avg_demand: 0.0,
            peek_demand: 0.0,
        };
        runtime.enter_mode(config.init_mode);
        Ok(runtime)
    }

    #[must_use]
    pub const fn mode(&self) -> ControlMode {
        self.mode
    }

    #[must_use]
    pub const fn tick_size(&self) -> f32 {
        self.tick_size
    }

    #[must_use]
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    #[must_use]
    pub const fn scheduler(&self) -> &RingBarrierScheduler {
        &self.scheduler
    }

    /// Latched scheduler-invariant fault; the controller stays in flash.
    #[must_use]
    pub const fn faulted(&self) -> bool {
        self.fault
    }

    /// External mode request, e.g. from the monitoring channel or the
    /// shutdown path.
    pub fn request_mode(&mut self, mode: ControlMode) {
        if self.fault && mode != ControlMode::Off {
            return;
        }
        self.enter_mode(mode);
    }

    /// Places demand for a phase, routing green-phase detector assertions
    /// into the extension machinery instead of the queue.
    pub fn place_demand(&mut self, target: PhaseId, ped_service: bool, source: CallSource) {
        let Some(index) = self.index_of(target) else {
            return;
        };
        if self.call_inhibit[index] {
            return;
        }
        if !ped_service && self.phases[index].state().is_vehicle_green() {
            self.pending_detections[index] = true;
            return;
        }
        self.calls.place(target, ped_service, source, 1.0);
    }

    /// Folds one bus transport result into the fail-safe hysteresis.
    pub fn bus_feedback(&mut self, ok: bool) {
        match self.bus_health.record(ok) {
            BusCondition::Failed => {
                self.enter_mode(ControlMode::LsFlash);
            }
            BusCondition::Recovered => {
                if self.mode == ControlMode::LsFlash && !self.fault {
                    self.enter_mode(ControlMode::Cet);
                }
            }
            BusCondition::Nominal => {}
        }
    }

    /// Advances the controller by one tick.
    pub fn tick(&mut self, inputs: Option<&InputFrame>) -> TickOutput {
        self.tick_count += 1;
        if self.ticks_per_second > 0 && self.tick_count % u64::from(self.ticks_per_second) == 0 {
            self.runtime_secs += 1;
            if self.transfer {
                self.control_secs += 1;
            }
        }

        self.apply_inputs(inputs);
        self.step_mode_machine();

        if self.mode == ControlMode::Normal && !self.time_freeze {
            self.run_random_actuation();
            self.run_idle_recalls();
        }

        if !self.time_freeze {
            self.calls.age_tick();
        }

        let mut entered: [bool; MAX_PHASES] = [false; MAX_PHASES];
        if self.mode == ControlMode::Normal && !self.time_freeze && !self.fault {
            let grants = self.scheduler.plan(&self.phases, &self.calls);
            for grant in grants {
                let Some(index) = self.index_of(grant.target) else {
                    continue;
                };
                match self.phases[index].activate(grant.ped_service) {
                    Ok(_) => entered[index] = true,
                    // A grant for an unservable phase is a scheduler bug.
                    Err(_) => self.fail_safe(),
                }
            }
        }

        if matches!(self.mode, ControlMode::Normal | ControlMode::Cxt) && !self.time_freeze {
            for index in 0..self.phases.len() {
                if entered[index] {
                    continue;
                }
                let detection = self.pending_detections[index];
                if let Some(transition) = self.phases[index].advance(detection) {
                    if let Some(ped_served) = transition.completed_service {
                        let id = self.phases[index].id();
                        self.calls.mark_served(id, false);
                        if ped_served {
                            self.calls.mark_served(id, true);
                        }
                    }
                }
            }
        }
        self.pending_detections = [false; MAX_PHASES];

        if self.scheduler.check_invariants(&self.phases).is_err() {
            self.fail_safe();
        }

        if self.mode == ControlMode::Cxt && self.phases.iter().all(Phase::at_rest) {
            self.enter_mode(ControlMode::LsFlash);
        }

        self.flasher.advance();
        self.update_demand_stats();

        let frame = self.project_outputs();
        let snapshot = self.build_snapshot(&frame);
        TickOutput { frame, snapshot }
    }

    fn apply_inputs(&mut self, inputs: Option<&InputFrame>) {
        if let Some(frame) = inputs {
            self.last_frame = *frame;
        }

        let mut time_freeze = false;
        let mut tech_flash = false;
        let mut dark = false;
        let mut random_inhibit = false;
        let mut call_inhibit = [false; MAX_PHASES];
        let mut extend_inhibit = [false; MAX_PHASES];
        let mut ped_clear_inhibit = [false; MAX_PHASES];
        let mut recalls: Vec<(PhaseId, bool, CallSource), MAX_INPUTS> = Vec::new();

        for channel_index in 0..self.inputs.len() {
            let level = self.last_frame.is_set(self.inputs[channel_index].config().slot);
            let signal = self.inputs[channel_index].sample(level);
            let config = self.inputs[channel_index].config();

            match config.action {
                InputAction::Ignore => {}
                InputAction::Recall => {
                    let (active, source) = match config.recall_type.unwrap_or(RecallType::Maintain)
                    {
                        RecallType::Maintain => (signal.active, CallSource::RecallMaintained),
                        RecallType::Latch => (signal.fired, CallSource::RecallLatched),
                    };
                    if active {
                        for target in config.targets.iter() {
                            let _ = recalls.push((*target, config.ped_service, source));
                        }
                    }
                }
                // Preemption service is future work; the input is accepted
                // but never acted on.
                InputAction::Preemption => {}
                InputAction::TimeFreeze => time_freeze |= signal.active,
                InputAction::TechFlash => tech_flash |= signal.active,
                InputAction::Dark => dark |= signal.active,
                InputAction::RandomRecallInhibit => random_inhibit |= signal.active,
                InputAction::CallInhibit
                | InputAction::ExtendInhibit
                | InputAction::PedClearInhibit => {
                    for target in config.targets.iter() {
                        let Some(index) =
                            self.phases.iter().position(|p| p.id() == *target)
                        else {
                            continue;
                        };
                        match config.action {
                            InputAction::CallInhibit => call_inhibit[index] |= signal.active,
                            InputAction::ExtendInhibit => extend_inhibit[index] |= signal.active,
                            InputAction::PedClearInhibit => {
                                ped_clear_inhibit[index] |= signal.active;
                            }
                            _ => {}
                        }
                    }
                }
            }
        }

        self.time_freeze = time_freeze;
        self.tech_flash = tech_flash;
        self.dark_input = dark;
        self.random_inhibit = random_inhibit;
        self.call_inhibit = call_inhibit;
        for index in 0..self.phases.len() {
            self.phases[index].set_extend_inhibit(extend_inhibit[index]);
            self.phases[index].set_ped_clear_inhibit(ped_clear_inhibit[index]);
        }

        for (target, ped_service, source) in recalls {
            self.place_demand(target, ped_service, source);
        }
    }

    fn step_mode_machine(&mut self) {
        if self.mode == ControlMode::Cet && !self.time_freeze && self.cet_timer.advance() {
            self.enter_mode(ControlMode::Normal);
        }
    }

    fn run_random_actuation(&mut self) {
        let inhibited = self.random_inhibit;
        let Some(random) = self.random.as_mut() else {
            return;
        };
        if let Some(target) = random.poll(&self.random_pool, inhibited) {
            self.place_demand(target, false, CallSource::Random);
        }
    }

    fn run_idle_recalls(&mut self) {
        if self.idle_phases.is_empty() || !self.calls.is_idle() {
            return;
        }
        let idle: Vec<PhaseId, MAX_PHASES> = self.idle_phases.clone();
        for target in idle {
            self.place_demand(target, false, CallSource::System);
        }
    }

    fn enter_mode(&mut self, mode: ControlMode) {
        match mode {
            ControlMode::Cet => {
                self.cet_timer.load(self.cet_delay);
            }
            ControlMode::Cxt => {
                for phase in self.phases.iter_mut() {
                    phase.request_yield();
                }
            }
            ControlMode::Normal => {
                if self.recall_all_pending {
                    self.recall_all_pending = false;
                    for index in 0..self.phases.len() {
                        let id = self.phases[index].id();
                        self.calls.place(id, false, CallSource::System, 1.0);
                    }
                }
            }
            ControlMode::Off | ControlMode::LsFlash => {}
        }

        self.mode = mode;
        self.set_transfer(mode != ControlMode::Off);
    }

    fn fail_safe(&mut self) {
        self.fault = true;
        self.mode = ControlMode::LsFlash;
    }

    fn set_transfer(&mut self, transfer: bool) {
        if transfer && !self.transfer {
            self.transfer_count += 1;
        }
        self.transfer = transfer;
    }

    fn index_of(&self, id: PhaseId) -> Option<usize> {
        self.phases.iter().position(|phase| phase.id() == id)
    }

    fn projection_mode(&self) -> ProjectionMode {
        if self.mode == ControlMode::Off || self.dark_input {
            ProjectionMode::Dark
        } else if self.fault
            || self.tech_flash
            || matches!(self.mode, ControlMode::LsFlash | ControlMode::Cet)
        {
            ProjectionMode::Flash
        } else {
            ProjectionMode::Normal
        }
    }

    fn project_outputs(&self) -> OutputFrame {
        let mode = self.projection_mode();
        let mut frame = OutputFrame::dark(0);
        frame.transfer = self.transfer;
        for binding in self.bindings.iter() {
            let phase = &self.phases[binding.phase_index];
            let output = display::project(
                binding.role,
                phase.state(),
                phase.flash_mode(),
                mode,
                self.flasher.bit(),
            );
            let _ = frame.switches.push(output);
        }
        frame
    }

    fn update_demand_stats(&mut self) {
        let demand = self.calls.demand() as f32;
        self.avg_demand = self.avg_demand * 0.99 + demand * 0.01;
        if demand > self.peek_demand {
            self.peek_demand = demand;
        }
    }

    fn idle(&self) -> bool {
        self.mode == ControlMode::Normal
            && self.calls.is_idle()
            && self.phases.iter().all(Phase::at_rest)
    }

    fn build_snapshot(&self, frame: &OutputFrame) -> ControllerSnapshot {
        let mut flags = StateFlags::new();
        flags.set(StateFlags::TRANSFERRED, self.transfer);
        flags.set(StateFlags::IDLE, self.idle());
        flags.set(StateFlags::ACTUATED, !self.calls.is_idle());
        flags.set(StateFlags::SATURATED, self.calls.saturated());
        flags.set(StateFlags::TIME_FREEZE, self.time_freeze);
        flags.set(StateFlags::BUS_FAULT, self.bus_health.faulted());
        flags.set(StateFlags::TECH_FLASH, self.tech_flash);
        flags.set(StateFlags::DARK_INPUT, self.dark_input);

        let mut phases: Vec<PhaseSnapshot, MAX_PHASES> = Vec::new();
        for phase in self.phases.iter() {
            let stats = phase.stats();
            let _ = phases.push(PhaseSnapshot {
                id: phase.id().as_u8(),
                status: self.scheduler.status(phase.id()),
                ped_service: phase.ped_service(),
                state: phase.state(),
                time_upper: phase.time_upper(self.tick_size),
                time_lower: phase.time_lower(self.tick_size),
                detections: stats.detections,
                vehicle_calls: stats.vehicle_service,
                ped_calls: stats.ped_service,
            });
        }

        ControllerSnapshot {
            mode: self.mode,
            state_flags: flags,
            plan_id: 0,
            avg_demand: self.avg_demand,
            peek_demand: self.peek_demand,
            runtime: self.runtime_secs,
            control_time: self.control_secs,
            transfer_count: self.transfer_count,
            phases,
            switches: frame.switches.clone(),
        }
    }
}
