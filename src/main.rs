use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::{signal, time::sleep};
use tracing::{error, info, warn};

use rust_tindeq::mock::{MockCentral, MockPeripheral};
use rust_tindeq::transport::Central;
use rust_tindeq::{logging, Capability, ClientConfig, ProgressorClient, ProgressorScanner};

/// Connect to a Tindeq Progressor, tare it and stream weight readings.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Use a simulated device instead of Bluetooth.
    #[arg(short, long)]
    simulate: bool,
    /// How long to stream, in seconds.
    #[arg(short, long, default_value_t = 8)]
    duration: u64,
    /// Scan timeout in seconds.
    #[arg(long, default_value_t = 30)]
    scan_timeout: u64,
    /// Debug logging (RUST_LOG overrides).
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    tokio::select! {
        res = run(cli) => {
            if let Err(e) = res {
                error!("Application failed: {e}");
                std::process::exit(1);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Ctrl+C received, shutting down.");
        }
    }
}

async fn run(cli: Cli) -> rust_tindeq::Result<()> {
    let (central, capability): (Arc<dyn Central>, Capability) = if cli.simulate {
        let device = Arc::new(MockPeripheral::progressor());
        // Detached; ends with the runtime.
        let _ = device.simulate_hang(Duration::from_millis(100));
        let central: Arc<dyn Central> = Arc::new(MockCentral::new(device));
        (central, Capability::Available)
    } else {
        let capability = ProgressorScanner::probe().await;
        if !capability.is_available() {
            warn!("No Bluetooth adapter found");
        }
        let central: Arc<dyn Central> = Arc::new(ProgressorScanner::new().await?);
        (central, capability)
    };

    let config = ClientConfig::default().scan_timeout(Duration::from_secs(cli.scan_timeout));
    let client = ProgressorClient::with_config(central, capability, config);

    client.on_connection_state_change(|state| info!("Connection: {state:?}"));
    client.on_weight(|m| println!("{:>8} ms  {:>7.2} kg", m.timestamp, m.weight));
    client.on_battery(|b| info!("Battery: {} mV ({}%)", b.voltage, b.percentage));
    client.on_error(|e| warn!("Progressor: {e}"));

    client.connect().await?;

    match client.get_firmware_version().await {
        Ok(firmware) => info!("Firmware {}", firmware.version),
        Err(e) => warn!("Could not read firmware version: {e}"),
    }
    if let Err(e) = client.get_battery_voltage().await {
        warn!("Could not read battery: {e}");
    }

    client.tare().await?;
    client.start_streaming().await?;

    let half = Duration::from_secs(cli.duration) / 2;
    sleep(half).await;
    client.pause_streaming()?;
    info!("Paused for 1s");
    sleep(Duration::from_secs(1)).await;
    client.resume_streaming()?;
    sleep(half).await;

    client.stop_streaming().await?;
    client.disconnect().await?;
    Ok(())
}
