//! TCP telemetry publisher.
//!
//! Snapshots flow through a bounded channel onto a fan-out thread that owns
//! the listening socket. Each frame is serialized as JSON and sent with a
//! 4-byte big-endian length prefix. A slow or dead subscriber is dropped;
//! with no subscriber attached frames are simply discarded. Nothing on this
//! path can stall the tick loop.

use std::io::{self, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError, sync_channel};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use controller_core::telemetry::{ControllerSnapshot, TelemetrySink};

/// Snapshots queued toward the fan-out thread before we start dropping.
const CHANNEL_DEPTH: usize = 64;
/// How long the fan-out thread waits for a snapshot between housekeeping
/// passes.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(100);

/// Wire form of one status frame.
///
/// Kept apart from the core types so the monitoring protocol can evolve
/// without touching controller state.
#[derive(Serialize)]
struct StatusFrame {
    mode: u8,
    state_flags: u16,
    plan_id: u8,
    avg_demand: f32,
    peek_demand: f32,
    runtime: u32,
    control_time: u32,
    transfer_count: u32,
    phases: Vec<PhaseFrame>,
    load_switches: Vec<SwitchFrame>,
}

#[derive(Serialize)]
struct PhaseFrame {
    id: u8,
    status: u8,
    ped_service: bool,
    state: u8,
    time_upper: f32,
    time_lower: f32,
    detections: u32,
    vehicle_calls: u32,
    ped_calls: u32,
}

#[derive(Serialize)]
struct SwitchFrame {
    a: bool,
    b: bool,
    c: bool,
}

impl From<&ControllerSnapshot> for StatusFrame {
    fn from(snapshot: &ControllerSnapshot) -> Self {
        Self {
            mode: snapshot.mode.to_raw(),
            state_flags: snapshot.state_flags.bits(),
            plan_id: snapshot.plan_id,
            avg_demand: snapshot.avg_demand,
            peek_demand: snapshot.peek_demand,
            runtime: snapshot.runtime,
            control_time: snapshot.control_time,
            transfer_count: snapshot.transfer_count,
            phases: snapshot
                .phases
                .iter()
                .map(|phase| PhaseFrame {
                    id: phase.id,
                    status: phase.status.to_raw(),
                    ped_service: phase.ped_service,
                    state: phase.state.to_raw(),
                    time_upper: phase.time_upper,
                    time_lower: phase.time_lower,
                    detections: phase.detections,
                    vehicle_calls: phase.vehicle_calls,
                    ped_calls: phase.ped_calls,
                })
                .collect(),
            load_switches: snapshot
                .switches
                .iter()
                .map(|switch| SwitchFrame {
                    a: switch.a,
                    b: switch.b,
                    c: switch.c,
                })
                .collect(),
        }
    }
}

/// Handle the tick loop publishes into.
pub struct TelemetryPublisher {
    sender: Option<SyncSender<ControllerSnapshot>>,
    handle: Option<JoinHandle<()>>,
    dropped: u64,
}

impl TelemetryPublisher {
    /// Binds the monitoring socket and spawns the fan-out thread.
    pub fn spawn(host: &str, port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind((host, port))?;
        listener.set_nonblocking(true)?;
        info!(
            address = %format!("{host}:{port}"),
            "telemetry publisher listening"
        );

        let (sender, receiver) = sync_channel(CHANNEL_DEPTH);
        let handle = thread::Builder::new()
            .name("telemetry".to_string())
            .spawn(move || fan_out(listener, receiver))?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            dropped: 0,
        })
    }

    /// Snapshots discarded because the channel was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl TelemetrySink for TelemetryPublisher {
    type Error = io::Error;

    fn publish(&mut self, snapshot: &ControllerSnapshot) -> Result<(), Self::Error> {
        let Some(sender) = &self.sender else {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "telemetry publisher closed",
            ));
        };
        match sender.try_send(snapshot.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "telemetry thread gone",
            )),
        }
    }
}

impl Drop for TelemetryPublisher {
    fn drop(&mut self) {
        // Closing the channel ends the fan-out loop.
        drop(self.sender.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct Subscriber {
    stream: TcpStream,
    peer: String,
}

fn fan_out(listener: TcpListener, receiver: Receiver<ControllerSnapshot>) {
    let mut subscribers: Vec<Subscriber> = Vec::new();

    loop {
        accept_new(&listener, &mut subscribers);

        match receiver.recv_timeout(DRAIN_TIMEOUT) {
            Ok(snapshot) => {
                if subscribers.is_empty() {
                    continue;
                }
                let frame = StatusFrame::from(&snapshot);
                let payload = match serde_json::to_vec(&frame) {
                    Ok(payload) => payload,
                    Err(error) => {
                        warn!(%error, "telemetry frame serialization failed");
                        continue;
                    }
                };
                broadcast(&mut subscribers, &payload);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!("telemetry publisher stopped");
}

fn accept_new(listener: &TcpListener, subscribers: &mut Vec<Subscriber>) {
    loop {
        match listener.accept() {
            Ok((stream, address)) => {
                if stream.set_nodelay(true).is_err() {
                    continue;
                }
                let peer = address.to_string();
                info!(%peer, "telemetry subscriber attached");
                subscribers.push(Subscriber { stream, peer });
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => return,
            Err(error) => {
                warn!(%error, "telemetry accept failed");
                return;
            }
        }
    }
}

fn broadcast(subscribers: &mut Vec<Subscriber>, payload: &[u8]) {
    let length = (payload.len() as u32).to_be_bytes();
    subscribers.retain_mut(|subscriber| {
        let result = subscriber
            .stream
            .write_all(&length)
            .and_then(|()| subscriber.stream.write_all(payload));
        match result {
            Ok(()) => true,
            Err(error) => {
                info!(peer = %subscriber.peer, %error, "telemetry subscriber dropped");
                false
            }
        }
    });
}
