use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::*;

use vega_rust::{
    configuration::{self, SharedRuntimeState},
    imu::{Bno055, FakeImu, ImuDriver, ImuReader},
    logging,
    pose_controller::PoseController,
    scheduler::Scheduler,
    servo_bus::SerialServoBus,
};

/// Vega quadruped motion controller
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Sets path to the config file (.yaml)
    /// If unset uses the default config directory.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides the servo serial port from the config
    #[arg(long)]
    serial_port: Option<String>,
    /// Runs the posture demo sequence after startup
    #[arg(long)]
    demo: bool,
    /// Sets the level of verbosity
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::setup_tracing(args.verbose);
    info!("Started main controller");

    let mut config = configuration::get_configuration(&args.config)?;
    if let Some(serial_port) = args.serial_port {
        config.base.serial_port = serial_port;
    }
    let config = Arc::new(config);

    let runtime = SharedRuntimeState::new(&config);
    let bus = SerialServoBus::open(&config.base.serial_port);
    let pose_controller =
        PoseController::new(Arc::clone(&config), runtime.clone(), Box::new(bus))?;

    let imu_driver: Box<dyn ImuDriver> = match &config.imu.device {
        Some(device) => Box::new(Bno055::open(device, &config.imu)?),
        None => {
            warn!("No IMU device configured, using a level stand-in");
            Box::new(FakeImu::level())
        }
    };
    let imu_reader = ImuReader::start(imu_driver, config.base.imu_rate_hz);

    let scheduler = Scheduler::start(
        Arc::clone(&config),
        runtime,
        pose_controller,
        imu_reader.subscribe(),
    );

    if args.demo {
        scheduler.demo().await?;
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    scheduler.shutdown().await;
    Ok(())
}
