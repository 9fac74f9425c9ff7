//! Service demand bookkeeping.
//!
//! Calls are deduplicated per `(phase, pedestrian)` pair, aged every tick,
//! and ranked by a weighted priority the scheduler consumes. The synthetic
//! random-actuation source used for demos and soak testing also lives here;
//! it is seeded from configuration so identical runs stay identical.

use heapless::Vec;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::MAX_CALLS;
use crate::phase::PhaseId;
use crate::timing::{IntervalTimer, Ticks};

/// Origin of a call.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CallSource {
    Detector,
    RecallMaintained,
    RecallLatched,
    Random,
    System,
}

/// One pending request for service.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Call {
    pub target: PhaseId,
    pub ped_service: bool,
    pub source: CallSource,
    pub weight: f32,
    pub age: Ticks,
    pub served: bool,
}

/// Priority weights for call ranking.
///
/// These are the v3-schema `calls.weights` knobs retained as constants; the
/// v4 document has no `calls` section.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CallWeights {
    /// Weight bump multiplier applied when a duplicate request lands on an
    /// existing call.
    pub duplicate_factor: f32,
    /// Priority gained per second of age.
    pub system: f32,
    /// Flat bonus for targets inside the active barrier.
    pub active_barrier: f32,
    /// Calls older than this many seconds are discarded.
    pub max_age: f32,
}

impl Default for CallWeights {
    fn default() -> Self {
        Self {
            duplicate_factor: 0.5,
            system: 1.0,
            active_barrier: 10.0,
            max_age: 120.0,
        }
    }
}

/// Deduplicated, aged, weighted set of pending calls.
#[derive(Clone, Debug)]
pub struct CallQueue {
    calls: Vec<Call, MAX_CALLS>,
    weights: CallWeights,
    tick_size: f32,
    max_age: Ticks,
}

impl CallQueue {
    #[must_use]
    pub fn new(weights: CallWeights, tick_size: f32) -> Self {
        let max_age = Ticks::from_seconds(weights.max_age, tick_size);
        Self {
            calls: Vec::new(),
            weights,
            tick_size,
            max_age,
        }
    }

    /// Inserts a call, or reinforces the matching unserved call: the weight
    /// grows by `weight * duplicate_factor` and the age resets.
    ///
    /// Returns `true` when a new row was created. A full queue drops the
    /// request (the saturation flag surfaces in telemetry).
    pub fn place(
        &mut self,
        target: PhaseId,
        ped_service: bool,
        source: CallSource,
        weight: f32,
    ) -> bool {
        if let Some(existing) = self
            .calls
            .iter_mut()
            .find(|c| !c.served && c.target == target && c.ped_service == ped_service)
        {
            existing.weight += weight * self.weights.duplicate_factor;
            existing.age = Ticks::ZERO;
            return false;
        }

        self.calls
            .push(Call {
                target,
                ped_service,
                source,
                weight,
                age: Ticks::ZERO,
                served: false,
            })
            .is_ok()
    }

    /// Ages every call by one tick; drops served calls and calls past the
    /// age ceiling.
    pub fn age_tick(&mut self) {
        let max_age = self.max_age;
        for call in self.calls.iter_mut() {
            call.age += Ticks::new(1);
        }
        self.calls
            .retain(|c| !c.served && (max_age.is_zero() || c.age < max_age));
    }

    /// Marks the matching unserved call as served; it is removed on the next
    /// aging pass.
    pub fn mark_served(&mut self, target: PhaseId, ped_service: bool) {
        if let Some(call) = self
            .calls
            .iter_mut()
            .find(|c| !c.served && c.target == target && c.ped_service == ped_service)
        {
            call.served = true;
        }
    }

    /// Number of unserved calls.
    #[must_use]
    pub fn demand(&self) -> usize {
        self.calls.iter().filter(|c| !c.served).count()
    }

    /// `true` when no unserved call is pending.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.demand() == 0
    }

    /// `true` while the queue is at capacity.
    #[must_use]
    pub fn saturated(&self) -> bool {
        self.calls.is_full()
    }

    /// `true` when an unserved call exists for the phase (any service kind).
    #[must_use]
    pub fn has_demand_for(&self, target: PhaseId) -> bool {
        self.calls
            .iter()
            .any(|c| !c.served && c.target == target)
    }

    /// `true` when an unserved pedestrian call exists for the phase.
    #[must_use]
    pub fn has_ped_demand_for(&self, target: PhaseId) -> bool {
        self.calls
            .iter()
            .any(|c| !c.served && c.ped_service && c.target == target)
    }

    /// Priority of a call under the ranking formula.
    #[must_use]
    pub fn priority(&self, call: &Call, in_active_barrier: bool) -> f32 {
        let mut priority =
            call.weight + call.age.as_seconds(self.tick_size) * self.weights.system;
        if in_active_barrier {
            priority += self.weights.active_barrier;
        }
        priority
    }

    /// Unserved calls in decreasing priority order; ties break toward the
    /// smaller phase id.
    #[must_use]
    pub fn ranked<F>(&self, in_active_barrier: F) -> Vec<Call, MAX_CALLS>
    where
        F: Fn(PhaseId) -> bool,
    {
        let mut ranked: Vec<Call, MAX_CALLS> = Vec::new();
        for call in self.calls.iter().filter(|c| !c.served) {
            // Capacity matches the source vec, so this cannot fail.
            let _ = ranked.push(*call);
        }
        ranked.sort_unstable_by(|left, right| {
            let lp = self.priority(left, in_active_barrier(left.target));
            let rp = self.priority(right, in_active_barrier(right.target));
            rp.total_cmp(&lp)
                .then_with(|| left.target.as_u8().cmp(&right.target.as_u8()))
        });
        ranked
    }

    /// Iterates all open rows, served included.
    pub fn iter(&self) -> impl Iterator<Item = &Call> {
        self.calls.iter()
    }
}

/// Configuration for the synthetic detector source.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RandomConfig {
    /// Inclusive lower bound of the inter-call delay, seconds.
    pub min: u32,
    /// Exclusive upper bound of the inter-call delay, seconds.
    pub max: u32,
    /// Delay before the first synthetic call, seconds.
    pub delay: u32,
    /// RNG seed; the same seed reproduces the same call sequence.
    pub seed: u64,
}

/// Schedules synthetic detector calls on uniformly random phases.
#[derive(Clone, Debug)]
pub struct RandomActuation {
    timer: IntervalTimer,
    min: u32,
    max: u32,
    tick_size: f32,
    rng: SmallRng,
}

impl RandomActuation {
    #[must_use]
    pub fn new(config: RandomConfig, tick_size: f32) -> Self {
        let mut timer = IntervalTimer::new();
        timer.load(Ticks::from_seconds(config.delay as f32, tick_size));
        Self {
            timer,
            min: config.min,
            max: config.max.max(config.min + 1),
            tick_size,
            rng: SmallRng::seed_from_u64(config.seed),
        }
    }

    /// Advances one tick; returns a target phase when a synthetic call is
    /// due. `inhibited` holds the countdown without draining entropy.
    pub fn poll(&mut self, pool: &[PhaseId], inhibited: bool) -> Option<PhaseId> {
        if inhibited || pool.is_empty() {
            return None;
        }
        if !self.timer.advance() {
            return None;
        }

        let choice = pool[self.rng.gen_range(0..pool.len())];
        let delay = self.rng.gen_range(self.min..self.max);
        self.timer
            .load(Ticks::from_seconds(delay as f32, self.tick_size));
        Some(choice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: f32 = 0.1;

    fn queue() -> CallQueue {
        CallQueue::new(CallWeights::default(), TICK)
    }

    fn ph(id: u8) -> PhaseId {
        PhaseId::new(id)
    }

    #[test]
    fn duplicate_reinforces_instead_of_inserting() {
        let mut queue = queue();
        assert!(queue.place(ph(2), false, CallSource::Detector, 1.0));
        for _ in 0..30 {
            queue.age_tick();
        }
        assert!(!queue.place(ph(2), false, CallSource::Detector, 1.0));

        assert_eq!(queue.demand(), 1);
        let call = queue.iter().next().expect("call missing");
        assert_eq!(call.weight, 1.5);
        assert_eq!(call.age, Ticks::ZERO);
    }

    #[test]
    fn ped_and_vehicle_rows_are_distinct() {
        let mut queue = queue();
        assert!(queue.place(ph(2), false, CallSource::Detector, 1.0));
        assert!(queue.place(ph(2), true, CallSource::RecallLatched, 1.0));
        assert_eq!(queue.demand(), 2);
    }

    #[test]
    fn served_calls_leave_on_next_aging_pass() {
        let mut queue = queue();
        queue.place(ph(4), false, CallSource::Detector, 1.0);
        queue.mark_served(ph(4), false);
        assert_eq!(queue.demand(), 0);
        assert_eq!(queue.iter().count(), 1);
        queue.age_tick();
        assert_eq!(queue.iter().count(), 0);
    }

    #[test]
    fn stale_calls_age_out() {
        let weights = CallWeights {
            max_age: 1.0,
            ..CallWeights::default()
        };
        let mut queue = CallQueue::new(weights, TICK);
        queue.place(ph(1), false, CallSource::Detector, 1.0);
        for _ in 0..9 {
            queue.age_tick();
        }
        assert_eq!(queue.demand(), 1);
        queue.age_tick();
        assert_eq!(queue.demand(), 0);
    }

    #[test]
    fn ranking_prefers_age_then_smaller_id() {
        let mut queue = queue();
        queue.place(ph(6), false, CallSource::Detector, 1.0);
        for _ in 0..20 {
            queue.age_tick();
        }
        queue.place(ph(2), false, CallSource::Detector, 1.0);
        queue.place(ph(8), false, CallSource::Detector, 1.0);

        let ranked = queue.ranked(|_| false);
        assert_eq!(ranked[0].target, ph(6));
        assert_eq!(ranked[1].target, ph(2));
        assert_eq!(ranked[2].target, ph(8));
    }

    #[test]
    fn active_barrier_bonus_outranks_small_age_gap() {
        let mut queue = queue();
        queue.place(ph(3), false, CallSource::Detector, 1.0);
        for _ in 0..20 {
            queue.age_tick();
        }
        queue.place(ph(2), false, CallSource::Detector, 1.0);

        let ranked = queue.ranked(|target| target == ph(2));
        assert_eq!(ranked[0].target, ph(2));
    }

    #[test]
    fn random_actuation_is_reproducible() {
        let config = RandomConfig {
            min: 1,
            max: 8,
            delay: 1,
            seed: 99,
        };
        let pool = [ph(1), ph(2), ph(3), ph(4)];

        let run = |mut actuation: RandomActuation| {
            let mut picks = std::vec::Vec::new();
            for tick in 0..2_000u32 {
                if let Some(target) = actuation.poll(&pool, false) {
                    picks.push((tick, target));
                }
            }
            picks
        };

        let first = run(RandomActuation::new(config, TICK));
        let second = run(RandomActuation::new(config, TICK));
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn inhibited_actuation_stays_quiet() {
        let config = RandomConfig {
            min: 1,
            max: 2,
            delay: 0,
            seed: 7,
        };
        let mut actuation = RandomActuation::new(config, TICK);
        let pool = [ph(1)];
        for _ in 0..100 {
            assert_eq!(actuation.poll(&pool, true), None);
        }
    }
}
