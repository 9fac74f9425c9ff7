//! Loopback bus jig.
//!
//! Stands in for the serial transceiver when the hardware link is absent:
//! every output frame is acknowledged and the input bitmap comes from an
//! optional tick-indexed script. Demo runs and soak tests drive the
//! controller through this jig exactly as the real driver would.

use std::collections::VecDeque;
use std::convert::Infallible;

use controller_core::bus::{BusDriver, InputFrame, OutputFrame};

/// One scripted input transition.
#[derive(Copy, Clone, Debug)]
pub struct ScriptedEdge {
    /// Tick at which the level applies.
    pub tick: u64,
    /// Input slot, 1-based.
    pub slot: u8,
    pub level: bool,
}

/// In-process bus driver with scripted inputs and unconditional delivery.
#[derive(Debug, Default)]
pub struct LoopbackBus {
    frame: InputFrame,
    script: VecDeque<ScriptedEdge>,
    tick: u64,
    frames_sent: u64,
}

impl LoopbackBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a level change; edges must be pushed in tick order.
    pub fn script(&mut self, tick: u64, slot: u8, level: bool) {
        self.script.push_back(ScriptedEdge { tick, slot, level });
    }

    /// Output frames delivered so far.
    #[must_use]
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }
}

impl BusDriver for LoopbackBus {
    type Error = Infallible;

    fn poll_inputs(&mut self) -> Result<Option<InputFrame>, Self::Error> {
        while let Some(edge) = self.script.front() {
            if edge.tick > self.tick {
                break;
            }
            self.frame.set(edge.slot, edge.level);
            self.script.pop_front();
        }
        self.tick += 1;
        Ok(Some(self.frame))
    }

    fn send_outputs(&mut self, _frame: &OutputFrame) -> Result<(), Self::Error> {
        self.frames_sent += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_edges_apply_at_their_tick() {
        let mut bus = LoopbackBus::new();
        bus.script(2, 1, true);
        bus.script(4, 1, false);

        let frame = bus.poll_inputs().unwrap().unwrap();
        assert!(!frame.is_set(1));
        let frame = bus.poll_inputs().unwrap().unwrap();
        assert!(!frame.is_set(1));
        let frame = bus.poll_inputs().unwrap().unwrap();
        assert!(frame.is_set(1));
        let frame = bus.poll_inputs().unwrap().unwrap();
        assert!(frame.is_set(1));
        let frame = bus.poll_inputs().unwrap().unwrap();
        assert!(!frame.is_set(1));
    }
}
