//! Process entry point: loads configuration, wires the bus, starts the
//! configured motor backend, and runs the teleop shaping pipeline.
//!
//! The HTTP/WebSocket surface that accepts operator input and streams
//! telemetry back out is an external collaborator (see module docs on
//! [`bus`]) — it is expected to run alongside this binary and share its
//! [`Bus`] instance, publishing onto `teleop_input` and subscribing to
//! `telemetry`. This binary owns the part in scope here: the pipeline from
//! `teleop_input` through to hardware, and back out as `telemetry`.

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use rover_types::TeleopInput;
use tracing::{error, info};

use rover_core::bus::Bus;
use rover_core::config::{self, Config};
use rover_core::error::DispatchError;
use rover_core::motor::pwm::PwmBackend;
use rover_core::motor::uart::UartBackend;
use rover_core::motor::MotorController;
use rover_core::shaper::Shaper;

#[derive(Parser, Debug)]
#[command(name = "rover-core", about = "Teleoperated rover control plane")]
struct Args {
    /// Path to the TOML configuration file. Missing file falls back to
    /// built-in defaults (see config::Config::load).
    #[arg(short, long, default_value = "rover.toml")]
    config: String,
}

fn build_backend(bus: Arc<Bus>, cfg: &Config) -> Result<Box<dyn MotorController>, DispatchError> {
    match cfg.control.backend.as_str() {
        "uart" => Ok(Box::new(UartBackend::new(
            bus,
            cfg.uart.port.clone(),
            cfg.uart.baudrate,
            cfg.hardware_gateway.command_rate_hz,
            cfg.hardware_gateway.max_command_age_ms,
        ))),
        "pi_pwm" => Ok(Box::new(PwmBackend::new(bus, cfg.control.pi_pwm.clone()))),
        other => Err(DispatchError::Config(format!(
            "unrecognized control.backend {other:?} (expected \"uart\" or \"pi_pwm\")"
        ))),
    }
}

/// Single consumer of `teleop_input`, single publisher of `drive_command`,
/// running for the lifetime of the process.
async fn shaper_task(bus: Arc<Bus>, cfg: config::TeleopConfig) {
    let mut shaper = Shaper::new(&cfg);
    let mut sub = bus.subscribe::<TeleopInput>("teleop_input").await;
    while let Some(input) = sub.recv().await {
        let cmd = shaper.shape(input, Instant::now());
        bus.publish("drive_command", cmd).await;
    }
    info!("teleop_input publisher side closed; shaper task exiting");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rover_core=info".into()),
        )
        .init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;
    info!(backend = %cfg.control.backend, config = %args.config, "rover-core starting");

    let bus = Bus::new();

    let mut backend = build_backend(bus.clone(), &cfg)?;
    backend.start().await?;
    info!("motor backend started, motors at rest");

    let shaper_handle = tokio::spawn(shaper_task(bus.clone(), cfg.teleop.clone()));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install ctrl-c handler, running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");

    shaper_handle.abort();
    backend.stop().await;
    info!("motor backend stopped, motors at rest");

    Ok(())
}
