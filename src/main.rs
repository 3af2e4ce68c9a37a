//! CLI entry point for the phidget bridge.
//!
//! Provides a command-line interface for:
//! - Scanning the (mock) bus for attached devices
//! - Running a short demo of the attachment lifecycle against mock hardware
//!
//! Both commands run against the in-memory mock driver, so they work without
//! physical Phidgets or the vendor SDK. The real driver slots in behind the
//! same `PhidgetDriver` trait.
//!
//! # Usage
//!
//! Scan for devices:
//! ```bash
//! phidget-bridge scan --window-secs 3
//! ```
//!
//! Run the lifecycle demo:
//! ```bash
//! phidget-bridge demo
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use phidget_bridge::discovery::DiscoveryScanner;
use phidget_bridge::driver::mock::MockDriver;
use phidget_bridge::driver::{ChannelValue, DeviceFamily};
use phidget_bridge::events::OutboundEvent;
use phidget_bridge::handler::{ChannelCommand, ChannelDefinition, DeviceHandler};
use phidget_bridge::options::{ChannelOptions, OPT_SENSITIVITY};
use phidget_bridge::registry::ChannelRegistry;
use phidget_bridge::resolver::DeclaredChannelType;
use phidget_bridge::settings::Settings;

#[derive(Parser)]
#[command(name = "phidget-bridge")]
#[command(about = "Phidget channel bridge for home automation", long_about = None)]
struct Cli {
    /// Optional settings file (TOML)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the bus for attached devices
    Scan {
        /// Scan window in seconds (overrides settings)
        #[arg(long)]
        window_secs: Option<u64>,
    },

    /// Demonstrate the attachment lifecycle against mock hardware
    Demo,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let settings = match &cli.settings {
        Some(path) => Settings::from_file(path.to_string_lossy().as_ref())?,
        None => Settings::default(),
    };
    if let Some(log_file) = &settings.log_file {
        info!(log_file = %log_file, "driver log file configured");
    }

    match cli.command {
        Commands::Scan { window_secs } => {
            let window = window_secs.unwrap_or(settings.discovery_window_secs);
            scan(Duration::from_secs(window)).await
        }
        Commands::Demo => demo().await,
    }
}

async fn scan(window: Duration) -> Result<()> {
    let driver = Arc::new(MockDriver::new());
    // Devices a real bus might answer with.
    driver.announce_device(123456, DeviceFamily::InterfaceKit1010101310181019, "Phidget InterfaceKit 8/8/8");
    driver.announce_device(234567, DeviceFamily::Hub0000, "6-Port USB VINT Hub Phidget");
    driver.announce_device(345678, DeviceFamily::Bridge1046, "PhidgetBridge 4-Input");

    let (outbound, _outbound_rx) = mpsc::unbounded_channel();
    let scanner = DiscoveryScanner::new(driver, outbound);

    println!("🔍 Scanning for {}s...", window.as_secs());
    let devices = scanner.scan(window).await?;
    for device in &devices {
        println!("   {:?}  {}", device.device_type, device.label);
    }
    println!("✅ Found {} device(s)", devices.len());
    Ok(())
}

async fn demo() -> Result<()> {
    let driver = Arc::new(MockDriver::new());
    let registry = Arc::new(ChannelRegistry::new(driver.clone()));
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel();

    let definitions = vec![
        ChannelDefinition {
            id: "voltage0".into(),
            declared_type: DeclaredChannelType::VoltageInput,
            channel: Some(0),
            port: None,
            options: ChannelOptions::new().with_number(OPT_SENSITIVITY, 0.05),
        },
        ChannelDefinition {
            id: "relay0".into(),
            declared_type: DeclaredChannelType::RelayOutput,
            channel: Some(0),
            port: None,
            options: ChannelOptions::new(),
        },
    ];

    println!("🔧 Initializing handler for mock device 123456...");
    let handler = DeviceHandler::new(123456, definitions, driver.clone(), registry, outbound);
    handler.initialize().await;

    // A command before attach is deferred and replayed on attach.
    handler.handle_command("relay0", ChannelCommand::On).await;

    let voltage = driver
        .channel_for(123456, phidget_bridge::driver::ChannelKind::VoltageInput, Some(0))
        .ok_or_else(|| anyhow::anyhow!("voltage channel was not constructed"))?;
    let relay = driver
        .channel_for(123456, phidget_bridge::driver::ChannelKind::DigitalOutput, Some(0))
        .ok_or_else(|| anyhow::anyhow!("relay channel was not constructed"))?;

    println!("🔌 Attaching mock hardware...");
    voltage.fire_attach();
    relay.fire_attach();
    voltage.fire_value(ChannelValue::Decimal(3.7));

    // Let the event loops and the deferred replay settle, then drain.
    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Ok(event) = outbound_rx.try_recv() {
        match event {
            OutboundEvent::StateUpdate { channel_id, value, timestamp } => {
                println!("   [{timestamp}] {channel_id} -> {value:?}");
            }
            OutboundEvent::StatusUpdate { serial_number, status, detail } => {
                println!("   device {serial_number}: {status:?} ({detail:?})");
            }
            OutboundEvent::DeviceDiscovered(device) => {
                println!("   discovered {}", device.label);
            }
        }
    }

    handler.dispose().await;
    println!("👋 Demo finished");
    Ok(())
}
