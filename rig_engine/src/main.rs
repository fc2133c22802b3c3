//! # Rig Engine Binary
//!
//! Device registry and control-loop engine for a networked sensor/actuator
//! rig.
//!
//! # Usage
//!
//! ```bash
//! # Run against absent hardware (every required device becomes a dummy)
//! rig_engine --config config/points.toml --simulate
//!
//! # Faster loop, verbose logging
//! rig_engine --config config/points.toml -s --period-ms 50 -v
//!
//! # Legacy JSON configuration
//! rig_engine --config json_files/mfc_settings.json -s
//! ```

#![deny(warnings)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use clap::Parser;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use rig_common::config;
use rig_engine::engine::Engine;
use rig_engine::registry::{DeviceRegistry, OperatingMode};
use rig_engine::sim::SimBus;

/// Rig Engine - device registry and fixed-cadence control loop
#[derive(Parser, Debug)]
#[command(name = "rig_engine")]
#[command(version)]
#[command(about = "Device registry and control-loop engine for a lab rig")]
#[command(long_about = None)]
struct Args {
    /// Path to the control-point configuration (.toml or .json)
    #[arg(short, long, default_value = "/etc/rig/points.toml")]
    config: PathBuf,

    /// Tolerate absent hardware by substituting zero-valued dummy devices
    #[arg(short = 's', long)]
    simulate: bool,

    /// Tick period of the control loop in milliseconds
    #[arg(long, default_value_t = 100)]
    period_ms: u64,

    /// Settle window after bus enumeration in milliseconds
    #[arg(long, default_value_t = 200)]
    settle_ms: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("startup failed: {e}");
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    setup_tracing(&args);

    info!("rig engine v{} starting...", env!("CARGO_PKG_VERSION"));

    let mode = if args.simulate {
        info!("simulation mode enabled");
        OperatingMode::Simulation
    } else {
        OperatingMode::Normal
    };

    let raw = config::load(&args.config)?;
    let validated = config::validate(&raw)?;
    info!(
        points = validated.points.len(),
        inputs = validated.required_inputs.len(),
        outputs = validated.required_outputs.len(),
        "configuration valid"
    );

    // Hardware transports implement the `Bus` trait; the in-tree transport
    // has no modules behind it.
    let bus = Arc::new(SimBus::new());
    let registry = DeviceRegistry::new(bus, mode, &validated);
    registry.install_listener();
    registry.startup(Duration::from_millis(args.settle_ms))?;

    let states = validated.runtime_states();
    let engine = Engine::start(
        Arc::clone(&registry),
        validated.points,
        states,
        Duration::from_millis(args.period_ms),
    )?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;
    info!("running; ctrl-c to stop");
    let _ = rx.recv();

    info!("shutdown signal received");
    engine.stop();
    info!("rig engine shutdown complete");
    Ok(())
}

/// Setup tracing subscriber based on CLI arguments.
fn setup_tracing(args: &Args) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
