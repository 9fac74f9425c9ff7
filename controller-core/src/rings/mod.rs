//! Ring-and-barrier concurrency control.
//!
//! Two rings rotate independently through their phases; two barriers group
//! the phases that may run concurrently, one from each ring. The scheduler
//! decides which phase each ring serves next, enforcing in order: the barrier
//! lock, per-ring exclusion, cross-ring conflict, priority selection, the
//! idle recall policy (driven by the runtime) and atomic barrier crossings.
//!
//! A selection is published as `NEXT` on the tick it is made and enters
//! service on the following tick, so an input edge observed at tick T yields
//! a green no earlier than T+1. The scheduler owns every `PhaseStatus`.

use heapless::Vec;

use crate::MAX_PHASES;
use crate::calls::CallQueue;
use crate::phase::{Phase, PhaseId};

/// Phases per ring in the canonical dual-quad layout.
pub const RING_CAPACITY: usize = 8;

/// Scheduler-assigned display status of a phase.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum PhaseStatus {
    #[default]
    Inactive,
    Next,
    Leader,
    Secondary,
}

impl PhaseStatus {
    /// Encodes the status into its wire discriminant.
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            PhaseStatus::Inactive => 0,
            PhaseStatus::Next => 1,
            PhaseStatus::Leader => 2,
            PhaseStatus::Secondary => 3,
        }
    }
}

/// An ordered rotation of phases; at most one may serve at a time.
#[derive(Clone, Debug)]
pub struct Ring {
    id: u8,
    phases: Vec<PhaseId, RING_CAPACITY>,
    last_served: Option<usize>,
}

impl Ring {
    #[must_use]
    pub fn new(id: u8, phases: &[PhaseId]) -> Self {
        Self {
            id,
            phases: Vec::from_slice(phases).unwrap_or_default(),
            last_served: None,
        }
    }

    #[must_use]
    pub const fn id(&self) -> u8 {
        self.id
    }

    #[must_use]
    pub fn phases(&self) -> &[PhaseId] {
        &self.phases
    }

    #[must_use]
    pub fn contains(&self, phase: PhaseId) -> bool {
        self.phases.contains(&phase)
    }

    /// Cyclic distance from the slot after the last served phase; the phase
    /// that follows the last served id wins forward-order ties.
    fn forward_distance(&self, phase: PhaseId) -> usize {
        let len = self.phases.len();
        let position = match self.phases.iter().position(|p| *p == phase) {
            Some(position) => position,
            None => return usize::MAX,
        };
        let origin = match self.last_served {
            Some(last) => (last + 1) % len,
            None => 0,
        };
        (position + len - origin) % len
    }
}

/// An unordered group of phases allowed to run concurrently across rings.
#[derive(Clone, Debug)]
pub struct Barrier {
    id: u8,
    phases: Vec<PhaseId, RING_CAPACITY>,
}

impl Barrier {
    #[must_use]
    pub fn new(id: u8, phases: &[PhaseId]) -> Self {
        Self {
            id,
            phases: Vec::from_slice(phases).unwrap_or_default(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> u8 {
        self.id
    }

    #[must_use]
    pub fn phases(&self) -> &[PhaseId] {
        &self.phases
    }

    #[must_use]
    pub fn contains(&self, phase: PhaseId) -> bool {
        self.phases.contains(&phase)
    }
}

/// Service entry emitted by the scheduler for the runtime to apply.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Grant {
    pub target: PhaseId,
    pub ped_service: bool,
}

/// A broken scheduling invariant; always a bug, never recoverable in place.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InvariantViolation {
    /// More than one phase outside rest in a single ring.
    RingExclusion { ring: u8 },
    /// Active phases spanning more than one barrier.
    BarrierSplit,
}

/// Concurrency scheduler across two rings and two barriers.
#[derive(Clone, Debug)]
pub struct RingBarrierScheduler {
    rings: Vec<Ring, 2>,
    barriers: Vec<Barrier, 2>,
    active_barrier: Option<usize>,
    pending: [Option<Grant>; 2],
    statuses: [PhaseStatus; MAX_PHASES],
    crossings: u32,
}

impl RingBarrierScheduler {
    #[must_use]
    pub fn new(rings: Vec<Ring, 2>, barriers: Vec<Barrier, 2>) -> Self {
        Self {
            rings,
            barriers,
            active_barrier: None,
            pending: [None, None],
            statuses: [PhaseStatus::Inactive; MAX_PHASES],
            crossings: 0,
        }
    }

    /// Display status of a phase.
    #[must_use]
    pub fn status(&self, phase: PhaseId) -> PhaseStatus {
        (phase.as_u8() as usize)
            .checked_sub(1)
            .and_then(|index| self.statuses.get(index))
            .copied()
            .unwrap_or_default()
    }

    /// Id of the barrier currently locked for service, if any.
    #[must_use]
    pub fn active_barrier(&self) -> Option<u8> {
        self.active_barrier.map(|index| self.barriers[index].id())
    }

    /// Number of barrier crossings since start.
    #[must_use]
    pub const fn crossings(&self) -> u32 {
        self.crossings
    }

    /// `true` when the phase belongs to the active barrier; no phase
    /// qualifies for the ranking bonus before a barrier is locked.
    #[must_use]
    pub fn in_active_barrier(&self, phase: PhaseId) -> bool {
        match self.active_barrier {
            Some(index) => self.barriers[index].contains(phase),
            None => false,
        }
    }

    /// The ring a phase belongs to.
    #[must_use]
    pub fn ring_of(&self, phase: PhaseId) -> Option<&Ring> {
        self.rings.iter().find(|ring| ring.contains(phase))
    }

    /// The barrier a phase belongs to.
    #[must_use]
    pub fn barrier_of(&self, phase: PhaseId) -> Option<&Barrier> {
        self.barriers.iter().find(|barrier| barrier.contains(phase))
    }

    /// One scheduling pass. Emits the grants the runtime must apply this
    /// tick and refreshes every phase status.
    pub fn plan(&mut self, phases: &[Phase], queue: &CallQueue) -> Vec<Grant, 2> {
        self.refresh_active_barrier(phases);
        self.clear_rest_statuses(phases);

        let mut grants: Vec<Grant, 2> = Vec::new();

        // Stage one: selections published last tick enter service now,
        // re-validated against the world as it is this tick.
        for ring_index in 0..self.rings.len() {
            let Some(grant) = self.pending[ring_index].take() else {
                continue;
            };
            if self.startable(phases, ring_index, grant.target, &grants) {
                self.enter_service(phases, ring_index, grant, &mut grants);
            }
        }

        self.maybe_cross_barrier(phases, queue, &grants);

        // Stage two: pick each ring's next phase. A busy or blocked ring
        // still publishes its selection as NEXT; only an idle ring with a
        // startable selection arms an entry for the coming tick.
        for ring_index in 0..self.rings.len() {
            if self.pending[ring_index].is_some() {
                continue;
            }
            if let Some(grant) = self.select(phases, ring_index, queue, &grants) {
                self.set_status(grant.target, PhaseStatus::Next);
                if self.startable(phases, ring_index, grant.target, &grants) {
                    self.pending[ring_index] = Some(grant);
                }
            }
        }

        grants
    }

    /// Checks the standing concurrency invariants against live phase state.
    pub fn check_invariants(&self, phases: &[Phase]) -> Result<(), InvariantViolation> {
        for ring in self.rings.iter() {
            let serving = phases
                .iter()
                .filter(|p| ring.contains(p.id()) && !p.at_rest())
                .count();
            if serving > 1 {
                return Err(InvariantViolation::RingExclusion { ring: ring.id() });
            }
        }

        let mut active_barrier: Option<u8> = None;
        for phase in phases.iter().filter(|p| !p.at_rest()) {
            let barrier = self.barrier_of(phase.id()).map(Barrier::id);
            match (active_barrier, barrier) {
                (None, Some(id)) => active_barrier = Some(id),
                (Some(held), Some(id)) if held != id => {
                    return Err(InvariantViolation::BarrierSplit);
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn refresh_active_barrier(&mut self, phases: &[Phase]) {
        for phase in phases.iter().filter(|p| !p.at_rest()) {
            if let Some(index) = self
                .barriers
                .iter()
                .position(|barrier| barrier.contains(phase.id()))
            {
                self.active_barrier = Some(index);
                return;
            }
        }
        // All at rest: the barrier stays locked until a crossing flips it.
    }

    fn clear_rest_statuses(&mut self, phases: &[Phase]) {
        for phase in phases {
            let pending = self
                .pending
                .iter()
                .flatten()
                .any(|grant| grant.target == phase.id());
            if phase.at_rest() && !pending {
                self.set_status(phase.id(), PhaseStatus::Inactive);
            }
        }
    }

    fn set_status(&mut self, phase: PhaseId, status: PhaseStatus) {
        let Some(index) = (phase.as_u8() as usize).checked_sub(1) else {
            return;
        };
        if let Some(slot) = self.statuses.get_mut(index) {
            *slot = status;
        }
    }

    fn ring_serving(&self, phases: &[Phase], ring_index: usize, grants: &[Grant]) -> bool {
        let ring = &self.rings[ring_index];
        phases
            .iter()
            .any(|p| ring.contains(p.id()) && !p.at_rest())
            || grants.iter().any(|grant| ring.contains(grant.target))
    }

    /// May `target` leave `STOP` right now?
    fn startable(
        &self,
        phases: &[Phase],
        ring_index: usize,
        target: PhaseId,
        grants: &[Grant],
    ) -> bool {
        let Some(phase) = find_phase(phases, target) else {
            return false;
        };
        if !phase.ready() {
            return false;
        }

        // Barrier lock.
        if let Some(active) = self.active_barrier {
            if !self.barriers[active].contains(target) {
                return false;
            }
        }

        // Per-ring exclusion, including grants already emitted this tick.
        if self.ring_serving(phases, ring_index, grants) {
            return false;
        }

        // Conflict: the other ring may hold only a same-barrier phase that
        // still accepts a partner (serving, not clearing).
        let barrier = self.barrier_of(target);
        for other in phases.iter().filter(|p| !p.at_rest()) {
            if self.rings[ring_index].contains(other.id()) {
                return false;
            }
            let same_barrier = barrier.is_some_and(|b| b.contains(other.id()));
            if !same_barrier || !other.state().accepts_partner() {
                return false;
            }
        }

        true
    }

    fn enter_service(
        &mut self,
        phases: &[Phase],
        ring_index: usize,
        grant: Grant,
        grants: &mut Vec<Grant, 2>,
    ) {
        let concurrent = phases.iter().any(|p| !p.at_rest()) || !grants.is_empty();
        let status = if concurrent {
            PhaseStatus::Secondary
        } else {
            PhaseStatus::Leader
        };
        self.set_status(grant.target, status);

        let ring = &mut self.rings[ring_index];
        ring.last_served = ring.phases.iter().position(|p| *p == grant.target);

        if self.active_barrier.is_none() {
            self.active_barrier = self
                .barriers
                .iter()
                .position(|barrier| barrier.contains(grant.target));
        }

        // Capacity is one grant per ring.
        let _ = grants.push(grant);
    }

    /// Highest-priority servable phase of a ring; ties go to ring-forward
    /// order, then the smaller id.
    fn select(
        &self,
        phases: &[Phase],
        ring_index: usize,
        queue: &CallQueue,
        grants: &[Grant],
    ) -> Option<Grant> {
        let ring = &self.rings[ring_index];
        let ranked = queue.ranked(|id| self.in_active_barrier(id));

        let mut best: Option<(f32, usize, u8)> = None;
        for call in ranked.iter().filter(|c| ring.contains(c.target)) {
            if grants.iter().any(|grant| grant.target == call.target) {
                continue;
            }
            let Some(phase) = find_phase(phases, call.target) else {
                continue;
            };
            if !phase.ready() {
                continue;
            }

            let priority = queue.priority(call, self.in_active_barrier(call.target));
            let distance = ring.forward_distance(call.target);
            let key = (priority, distance, call.target.as_u8());
            let better = match best {
                None => true,
                Some((bp, bd, bi)) => {
                    priority > bp
                        || (priority == bp && distance < bd)
                        || (priority == bp && distance == bd && call.target.as_u8() < bi)
                }
            };
            if better {
                best = Some(key);
            }
        }

        best.map(|(_, _, id)| {
            let target = PhaseId::new(id);
            Grant {
                target,
                ped_service: queue.has_ped_demand_for(target),
            }
        })
    }

    fn maybe_cross_barrier(&mut self, phases: &[Phase], queue: &CallQueue, grants: &[Grant]) {
        if !grants.is_empty() || self.pending.iter().any(Option::is_some) {
            return;
        }
        if phases.iter().any(|p| !p.at_rest()) {
            return;
        }

        let Some(active) = self.active_barrier else {
            // Seed the first barrier from the strongest call.
            let ranked = queue.ranked(|_| false);
            if let Some(call) = ranked.first() {
                self.active_barrier = self
                    .barriers
                    .iter()
                    .position(|barrier| barrier.contains(call.target));
            }
            return;
        };

        let demand_here = self.barriers[active]
            .phases()
            .iter()
            .any(|p| queue.has_demand_for(*p));
        if demand_here {
            return;
        }

        let other = (active + 1) % self.barriers.len();
        let demand_there = self.barriers[other]
            .phases()
            .iter()
            .any(|p| queue.has_demand_for(*p));
        if demand_there {
            self.active_barrier = Some(other);
            self.crossings += 1;
        }
    }
}

fn find_phase<'a>(phases: &'a [Phase], id: PhaseId) -> Option<&'a Phase> {
    phases.iter().find(|phase| phase.id() == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::{CallSource, CallWeights};
    use crate::display::LoadSwitchId;
    use crate::phase::{FlashMode, PhaseTiming};

    const TICK: f32 = 0.1;

    fn timing() -> PhaseTiming {
        PhaseTiming {
            min_stop: 0.0,
            rclr: 1.0,
            caution: 4.0,
            extend: 0.0,
            go: 5.0,
            pclr: 3.0,
            walk: 7.0,
            max_go: 30.0,
        }
    }

    fn dual_quad() -> (std::vec::Vec<Phase>, RingBarrierScheduler) {
        let phases: std::vec::Vec<Phase> = (1..=8)
            .map(|id| {
                Phase::new(
                    PhaseId::new(id),
                    FlashMode::Red,
                    timing(),
                    TICK,
                    LoadSwitchId::new(id),
                    None,
                )
            })
            .collect();

        let ids: std::vec::Vec<PhaseId> = (1..=8).map(PhaseId::new).collect();
        let mut rings = Vec::new();
        rings.push(Ring::new(1, &ids[0..4])).unwrap();
        rings.push(Ring::new(2, &ids[4..8])).unwrap();
        let mut barriers = Vec::new();
        barriers
            .push(Barrier::new(1, &[ids[0], ids[1], ids[4], ids[5]]))
            .unwrap();
        barriers
            .push(Barrier::new(2, &[ids[2], ids[3], ids[6], ids[7]]))
            .unwrap();

        (phases, RingBarrierScheduler::new(rings, barriers))
    }

    fn queue() -> CallQueue {
        CallQueue::new(CallWeights::default(), TICK)
    }

    fn ph(id: u8) -> PhaseId {
        PhaseId::new(id)
    }

    #[test]
    fn selection_marks_next_then_grants() {
        let (phases, mut scheduler) = dual_quad();
        let mut queue = queue();
        queue.place(ph(3), false, CallSource::Detector, 1.0);

        let grants = scheduler.plan(&phases, &queue);
        assert!(grants.is_empty());
        assert_eq!(scheduler.status(ph(3)), PhaseStatus::Next);

        let grants = scheduler.plan(&phases, &queue);
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].target, ph(3));
        assert_eq!(scheduler.status(ph(3)), PhaseStatus::Leader);
        assert_eq!(scheduler.active_barrier(), Some(2));
    }

    #[test]
    fn same_ring_phase_waits_for_exclusion() {
        let (mut phases, mut scheduler) = dual_quad();
        let mut queue = queue();
        queue.place(ph(2), false, CallSource::Detector, 1.0);
        queue.place(ph(4), false, CallSource::Detector, 1.0);

        scheduler.plan(&phases, &queue);
        let grants = scheduler.plan(&phases, &queue);
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].target, ph(2));
        phases[1].activate(false).unwrap();

        let grants = scheduler.plan(&phases, &queue);
        assert!(grants.is_empty());
        assert_eq!(scheduler.status(ph(4)), PhaseStatus::Next);
    }

    #[test]
    fn same_barrier_partner_joins_as_secondary() {
        let (mut phases, mut scheduler) = dual_quad();
        let mut queue = queue();
        queue.place(ph(2), false, CallSource::Detector, 1.0);

        scheduler.plan(&phases, &queue);
        let grants = scheduler.plan(&phases, &queue);
        assert_eq!(grants[0].target, ph(2));
        phases[1].activate(false).unwrap();

        queue.place(ph(6), false, CallSource::Detector, 1.0);
        scheduler.plan(&phases, &queue);
        let grants = scheduler.plan(&phases, &queue);
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].target, ph(6));
        assert_eq!(scheduler.status(ph(6)), PhaseStatus::Secondary);
        assert_eq!(scheduler.status(ph(2)), PhaseStatus::Leader);
    }

    #[test]
    fn barrier_crossing_waits_for_rest_and_demand() {
        let (mut phases, mut scheduler) = dual_quad();
        let mut queue = queue();
        queue.place(ph(2), false, CallSource::Detector, 1.0);
        queue.place(ph(3), false, CallSource::Detector, 1.0);

        scheduler.plan(&phases, &queue);
        scheduler.plan(&phases, &queue);
        phases[1].activate(false).unwrap();
        assert_eq!(scheduler.active_barrier(), Some(1));

        // While phase 2 serves, no crossing happens.
        scheduler.plan(&phases, &queue);
        assert_eq!(scheduler.active_barrier(), Some(1));
        assert_eq!(scheduler.crossings(), 0);

        // Drive phase 2 to rest and drop its call.
        queue.mark_served(ph(2), false);
        queue.age_tick();
        while !phases[1].at_rest() {
            phases[1].advance(false);
        }

        scheduler.plan(&phases, &queue);
        assert_eq!(scheduler.active_barrier(), Some(2));
        assert_eq!(scheduler.crossings(), 1);

        let grants = scheduler.plan(&phases, &queue);
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].target, ph(3));
    }

    #[test]
    fn ring_forward_order_breaks_priority_ties() {
        let (mut phases, mut scheduler) = dual_quad();
        let mut queue = queue();

        // Serve phase 1 once so the ring pointer sits past it.
        queue.place(ph(1), false, CallSource::Detector, 1.0);
        scheduler.plan(&phases, &queue);
        scheduler.plan(&phases, &queue);
        phases[0].activate(false).unwrap();
        queue.mark_served(ph(1), false);
        queue.age_tick();
        while !phases[0].at_rest() {
            phases[0].advance(false);
        }

        // Equal-priority calls on 1 and 2: ring-forward order from the slot
        // after 1 picks 2 even though 1 has the smaller id.
        queue.place(ph(1), false, CallSource::Detector, 1.0);
        queue.place(ph(2), false, CallSource::Detector, 1.0);
        scheduler.plan(&phases, &queue);
        assert_eq!(scheduler.status(ph(2)), PhaseStatus::Next);
    }

    #[test]
    fn invariants_catch_ring_exclusion_breach() {
        let (mut phases, scheduler) = dual_quad();
        phases[0].activate(false).unwrap();
        phases[1].activate(false).unwrap();
        assert_eq!(
            scheduler.check_invariants(&phases),
            Err(InvariantViolation::RingExclusion { ring: 1 })
        );
    }

    #[test]
    fn invariants_catch_barrier_split() {
        let (mut phases, scheduler) = dual_quad();
        phases[1].activate(false).unwrap();
        phases[6].activate(false).unwrap();
        assert_eq!(
            scheduler.check_invariants(&phases),
            Err(InvariantViolation::BarrierSplit)
        );
    }
}
