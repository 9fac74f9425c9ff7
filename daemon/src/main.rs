//! Actuated traffic signal controller daemon.
//!
//! Loads the version-4 configuration, builds the phase controller runtime,
//! and paces its tick loop against the wall clock: when the host falls
//! behind, ticks run back-to-back until control time catches up, and the
//! loop never runs ahead. SIGINT/SIGTERM drain through the control exit
//! transition (CXT → LS_FLASH → OFF); a second signal forces flash
//! immediately.

mod config;
mod jig;
mod publisher;

use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use controller_core::bus::BusDriver;
use controller_core::runtime::{ControlMode, ControllerRuntime, TickOutput};
use controller_core::telemetry::{StateFlags, TelemetrySink};

use crate::jig::LoopbackBus;
use crate::publisher::TelemetryPublisher;

static SHUTDOWN_REQUESTS: AtomicU32 = AtomicU32::new(0);

extern "C" fn handle_signal(_signal: libc::c_int) {
    SHUTDOWN_REQUESTS.fetch_add(1, Ordering::SeqCst);
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, handle_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_signal as libc::sighandler_t);
    }
}

#[derive(Parser)]
#[command(
    name = "controller-daemon",
    about = "Actuated traffic signal controller",
    version
)]
struct Cli {
    /// Configuration document(s); a root node may appear in only one file.
    #[arg(required = true)]
    config: Vec<PathBuf>,

    /// Initiate the control exit transition after this many seconds.
    #[arg(long)]
    duration: Option<f64>,

    /// Disable the telemetry publisher regardless of configuration.
    #[arg(long)]
    no_telemetry: bool,
}

#[derive(Debug, Error)]
enum DaemonError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error("telemetry bind failed: {0}")]
    Telemetry(std::io::Error),
}

impl DaemonError {
    fn exit_code(&self) -> ExitCode {
        match self {
            DaemonError::Config(_) => ExitCode::from(2),
            DaemonError::Telemetry(_) => ExitCode::from(3),
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq)]
enum Drain {
    Running,
    Graceful,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("{error}");
            error.exit_code()
        }
    }
}

fn run(cli: Cli) -> Result<(), DaemonError> {
    install_signal_handlers();

    let document = config::load(&cli.config)?;
    let controller_config = document.to_controller_config()?;
    let tick_size = f64::from(controller_config.tick_size);
    info!(
        device = %document.device.name,
        tick_size,
        "configuration loaded"
    );

    let mut runtime =
        ControllerRuntime::new(controller_config).map_err(config::ConfigError::Semantic)?;

    let mut publisher = if document.network.enabled && !cli.no_telemetry {
        Some(
            TelemetryPublisher::spawn(&document.network.host, document.network.port)
                .map_err(DaemonError::Telemetry)?,
        )
    } else {
        info!("telemetry publisher disabled");
        None
    };

    let mut bus = if document.bus.enabled {
        // The serial HDLC transceiver driver is not linked into this build;
        // the loopback jig satisfies the same contract.
        info!(
            port = document.bus.port.as_deref().unwrap_or("none"),
            baud = document.bus.baud.unwrap_or(0),
            response_attempts = document.bus.response_attempts,
            "field bus loopback jig active"
        );
        Some(LoopbackBus::new())
    } else {
        info!("field bus disabled");
        None
    };

    info!(mode = ?runtime.mode(), cet_delay = document.init.cet_delay, "control started");

    let epoch = Instant::now();
    let mut executed: u64 = 0;
    let mut previous: Option<TickOutput> = None;
    let mut drain = Drain::Running;
    let mut signals_handled = 0u32;

    loop {
        // Catch up to wall time, never run ahead of it.
        let due = (epoch.elapsed().as_secs_f64() / tick_size) as u64;
        while executed < due {
            let inputs = match bus.as_mut() {
                Some(bus) => match bus.poll_inputs() {
                    Ok(frame) => frame,
                    Err(never) => match never {},
                },
                None => None,
            };

            let output = runtime.tick(inputs.as_ref());

            if let Some(bus) = bus.as_mut() {
                let delivered = bus.send_outputs(&output.frame).is_ok();
                runtime.bus_feedback(delivered);
            }
            let publish_failed = match publisher.as_mut() {
                Some(sink) => sink.publish(&output.snapshot).is_err(),
                None => false,
            };
            if publish_failed {
                warn!("telemetry publisher lost; disabling");
                publisher = None;
            }

            log_changes(previous.as_ref(), &output);
            previous = Some(output);
            executed += 1;
        }

        let signals = SHUTDOWN_REQUESTS.load(Ordering::SeqCst);
        if signals > signals_handled {
            signals_handled = signals;
            match drain {
                Drain::Running => {
                    info!("shutdown requested; entering control exit transition");
                    runtime.request_mode(ControlMode::Cxt);
                    drain = Drain::Graceful;
                }
                Drain::Graceful => {
                    warn!("second shutdown request; forcing flash");
                    runtime.request_mode(ControlMode::LsFlash);
                }
            }
        }
        if drain == Drain::Running
            && let Some(limit) = cli.duration
            && epoch.elapsed().as_secs_f64() >= limit
        {
            info!(limit, "duration reached; entering control exit transition");
            runtime.request_mode(ControlMode::Cxt);
            drain = Drain::Graceful;
        }

        if drain == Drain::Graceful
            && matches!(runtime.mode(), ControlMode::LsFlash | ControlMode::Off)
        {
            break;
        }

        let next_tick_at = (executed + 1) as f64 * tick_size;
        let ahead = next_tick_at - epoch.elapsed().as_secs_f64();
        if ahead > 0.0 {
            thread::sleep(Duration::from_secs_f64(ahead));
        }
    }

    // Final telemetry frame and a dark output frame, then exit.
    runtime.request_mode(ControlMode::Off);
    let output = runtime.tick(None);
    if let Some(bus) = bus.as_mut() {
        let _ = bus.send_outputs(&output.frame);
    }
    if let Some(sink) = publisher.as_mut() {
        let _ = sink.publish(&output.snapshot);
    }
    info!(
        runtime_secs = output.snapshot.runtime,
        control_secs = output.snapshot.control_time,
        transfers = output.snapshot.transfer_count,
        "shutdown complete"
    );
    Ok(())
}

/// Logs state deltas between consecutive ticks and a once-per-second field
/// line.
fn log_changes(previous: Option<&TickOutput>, current: &TickOutput) {
    let Some(previous) = previous else {
        info!(mode = ?current.snapshot.mode, "first tick");
        return;
    };

    if previous.snapshot.mode != current.snapshot.mode {
        info!(
            from = ?previous.snapshot.mode,
            to = ?current.snapshot.mode,
            "mode changed"
        );
    }

    let before = previous.snapshot.state_flags;
    let after = current.snapshot.state_flags;
    for (mask, label) in [
        (StateFlags::TRANSFERRED, "transferred"),
        (StateFlags::IDLE, "idle"),
        (StateFlags::TIME_FREEZE, "time freeze"),
        (StateFlags::BUS_FAULT, "bus fault"),
        (StateFlags::TECH_FLASH, "tech flash"),
        (StateFlags::DARK_INPUT, "dark input"),
    ] {
        if before.contains(mask) != after.contains(mask) {
            info!(active = after.contains(mask), "{label}");
        }
    }

    for (prev_phase, phase) in previous
        .snapshot
        .phases
        .iter()
        .zip(current.snapshot.phases.iter())
    {
        if prev_phase.state != phase.state {
            debug!(
                phase = phase.id,
                from = ?prev_phase.state,
                to = ?phase.state,
                "interval change"
            );
        }
    }

    if previous.snapshot.runtime != current.snapshot.runtime {
        let mut line = String::new();
        for (index, switch) in current.snapshot.switches.iter().enumerate() {
            let _ = write!(
                line,
                "{:02}:{}{}{} ",
                index + 1,
                u8::from(switch.a),
                u8::from(switch.b),
                u8::from(switch.c)
            );
        }
        debug!(field = %line.trim_end(), "field states");
    }
}
