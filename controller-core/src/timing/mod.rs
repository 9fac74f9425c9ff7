//! Timing primitives shared by the phase machines and the controller runtime.
//!
//! All controller timing is expressed in whole ticks of the fixed control
//! clock. Durations cross the configuration boundary as seconds and are
//! converted once with [`Ticks::from_seconds`], so repeated float arithmetic
//! can never shift an expiry by a tick between runs. No wall-clock time is
//! consulted anywhere in this crate; the daemon paces the loop.

use core::fmt;
use core::ops::{Add, AddAssign, Sub};

/// Default control clock period in seconds.
pub const DEFAULT_TICK_SIZE: f32 = 0.1;

/// Whole number of control clock ticks.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Ticks(u32);

impl Ticks {
    pub const ZERO: Ticks = Ticks(0);

    /// Creates a tick count from a raw value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Converts a duration in seconds to ticks, rounding to the nearest
    /// whole tick.
    #[must_use]
    pub fn from_seconds(seconds: f32, tick_size: f32) -> Self {
        if seconds <= 0.0 {
            return Ticks::ZERO;
        }
        Self((seconds / tick_size + 0.5) as u32)
    }

    /// Returns the raw tick count.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Converts back to seconds at the given clock period.
    #[must_use]
    pub fn as_seconds(self, tick_size: f32) -> f32 {
        self.0 as f32 * tick_size
    }

    /// Returns `true` when no ticks remain.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Saturating subtraction.
    #[must_use]
    pub const fn saturating_sub(self, rhs: Ticks) -> Ticks {
        Ticks(self.0.saturating_sub(rhs.0))
    }
}

impl Add for Ticks {
    type Output = Ticks;

    fn add(self, rhs: Ticks) -> Ticks {
        Ticks(self.0 + rhs.0)
    }
}

impl AddAssign for Ticks {
    fn add_assign(&mut self, rhs: Ticks) {
        self.0 += rhs.0;
    }
}

impl Sub for Ticks {
    type Output = Ticks;

    fn sub(self, rhs: Ticks) -> Ticks {
        Ticks(self.0 - rhs.0)
    }
}

impl fmt::Display for Ticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}t", self.0)
    }
}

/// Counts down one sub-interval of a phase.
///
/// The timer is loaded with a target on state entry and advanced once per
/// tick thereafter; it expires on the tick the elapsed count reaches the
/// target. A zero target expires on the first advance.
#[derive(Copy, Clone, Debug, Default)]
pub struct IntervalTimer {
    target: Ticks,
    elapsed: Ticks,
}

impl IntervalTimer {
    /// Creates an expired timer with a zero target.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            target: Ticks::ZERO,
            elapsed: Ticks::ZERO,
        }
    }

    /// Loads a new target and clears the elapsed count.
    pub fn load(&mut self, target: Ticks) {
        self.target = target;
        self.elapsed = Ticks::ZERO;
    }

    /// Advances the timer by one tick, returning `true` when the target has
    /// been reached.
    pub fn advance(&mut self) -> bool {
        if self.elapsed < self.target {
            self.elapsed += Ticks::new(1);
        }
        self.expired()
    }

    /// Returns `true` once the elapsed count has reached the target.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.elapsed >= self.target
    }

    /// Ticks remaining before expiry.
    #[must_use]
    pub fn remaining(&self) -> Ticks {
        self.target.saturating_sub(self.elapsed)
    }

    /// Ticks consumed so far.
    #[must_use]
    pub const fn elapsed(&self) -> Ticks {
        self.elapsed
    }

    /// The loaded target.
    #[must_use]
    pub const fn target(&self) -> Ticks {
        self.target
    }
}

/// Counts time spent in vehicle-green service, saturating at the `max_go`
/// ceiling.
#[derive(Copy, Clone, Debug, Default)]
pub struct ServiceTimer {
    elapsed: Ticks,
    ceiling: Ticks,
}

impl ServiceTimer {
    /// Creates a stopped timer with the provided ceiling.
    #[must_use]
    pub const fn new(ceiling: Ticks) -> Self {
        Self {
            elapsed: Ticks::ZERO,
            ceiling,
        }
    }

    /// Restarts the timer from zero.
    pub fn restart(&mut self) {
        self.elapsed = Ticks::ZERO;
    }

    /// Advances by one tick, saturating at the ceiling.
    pub fn advance(&mut self) {
        if self.elapsed < self.ceiling {
            self.elapsed += Ticks::new(1);
        }
    }

    /// Returns `true` once the ceiling has been reached.
    #[must_use]
    pub fn maxed(&self) -> bool {
        !self.ceiling.is_zero() && self.elapsed >= self.ceiling
    }

    /// Ticks of service consumed so far.
    #[must_use]
    pub const fn elapsed(&self) -> Ticks {
        self.elapsed
    }
}

/// Square-wave reference for flashing indications.
///
/// At the default tick size the half period of five ticks yields the 1 Hz,
/// 50% duty wave field displays expect.
#[derive(Copy, Clone, Debug)]
pub struct Flasher {
    half_period: Ticks,
    counter: Ticks,
    bit: bool,
}

impl Flasher {
    /// Creates a flasher with the given half period, starting high.
    #[must_use]
    pub const fn new(half_period: Ticks) -> Self {
        Self {
            half_period,
            counter: Ticks::ZERO,
            bit: true,
        }
    }

    /// Creates the standard 1 Hz flasher for a clock period.
    #[must_use]
    pub fn standard(tick_size: f32) -> Self {
        Self::new(Ticks::from_seconds(0.5, tick_size))
    }

    /// Advances one tick, toggling at each half period boundary.
    pub fn advance(&mut self) -> bool {
        self.counter += Ticks::new(1);
        if self.counter >= self.half_period {
            self.counter = Ticks::ZERO;
            self.bit = !self.bit;
        }
        self.bit
    }

    /// Current level of the wave.
    #[must_use]
    pub const fn bit(&self) -> bool {
        self.bit
    }
}

/// Direction of a logic-level change.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Edge {
    Rising,
    Falling,
}

/// Detects level changes on a sampled logic signal.
#[derive(Copy, Clone, Debug)]
pub struct EdgeTrigger {
    previous: bool,
}

impl EdgeTrigger {
    /// Creates a trigger primed with an initial level.
    #[must_use]
    pub const fn new(initial: bool) -> Self {
        Self { previous: initial }
    }

    /// Samples the signal, reporting an edge when the level changed since the
    /// previous sample.
    pub fn poll(&mut self, signal: bool) -> Option<Edge> {
        let edge = match (self.previous, signal) {
            (false, true) => Some(Edge::Rising),
            (true, false) => Some(Edge::Falling),
            _ => None,
        };
        self.previous = signal;
        edge
    }

    /// The level seen on the last poll.
    #[must_use]
    pub const fn level(&self) -> bool {
        self.previous
    }
}
