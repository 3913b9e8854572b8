//! Device simulator entry point.

use clap::Parser;
use device_simulator::logging::init_default_logging;
use device_simulator::transport::MqttTransport;
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

/// Azure IoT Hub device simulator
#[derive(Parser)]
#[command(name = "device-simulator")]
#[command(about = "Simulates one Azure IoT device: DPS provisioning, twin sync and update workflows")]
#[command(version)]
struct Cli {
    /// Path to the JSON identity/credential file
    identity: PathBuf,

    /// Simulated radio-cell identifier
    #[arg(long, env = "CELL_ID")]
    cell_id: Option<u32>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!(
        "Starting device simulator v{}",
        env!("CARGO_PKG_VERSION")
    );

    let transport = MqttTransport::new();
    if let Err(e) = device_simulator::simulator::run(&transport, &cli.identity, cli.cell_id).await {
        error!("Simulator failed: {e}");
        process::exit(1);
    }
}
