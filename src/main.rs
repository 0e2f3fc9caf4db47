//! DAMIOT edge device - main entry point

use damiot_edge::config::DeviceConfig;
use damiot_edge::device::DeviceRuntime;
use damiot_edge::hardware;
use damiot_edge::liveness::LivenessPolicy;
use damiot_edge::observability::init_cli_logging;
use damiot_edge::transport::MqttTransport;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;
use tokio::signal;
use tracing::{error, info, warn};

/// Edge device connectivity runtime
#[derive(Parser)]
#[command(name = "damiot-edge")]
#[command(about = "DAMIOT edge device: telemetry, commands and liveness over MQTT")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "DAMIOT_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and run until interrupted
    Run,
    /// Validate configuration
    Config {
        /// Print the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_cli_logging(cli.verbose);

    info!("Starting DAMIOT edge device v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_device(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(
    config_path: Option<&Path>,
) -> Result<DeviceConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(DeviceConfig::load_from_file(path)?);
    }

    for candidate in ["device.toml", "config/device.toml"] {
        let path = PathBuf::from(candidate);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(DeviceConfig::load_from_file(&path)?);
        }
    }

    Err("no configuration file found; pass -c/--config or create device.toml".into())
}

async fn run_device(config: DeviceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let booted = Instant::now();
    let identity = config.resolve_identity()?;
    info!(
        client_id = %identity.client_id(),
        mac = %identity.mac(),
        broker = %config.mqtt.broker_url,
        "Device identity resolved"
    );

    let transport = MqttTransport::new(&config)?;
    let (sensors, actuators) = hardware::from_config(&config);
    let mut runtime = DeviceRuntime::new(&config, identity, transport, sensors, actuators, booted)?;

    runtime.run(shutdown_signal()).await;
    info!("Application shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, listening for SIGINT only");
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for SIGINT");
            }
            return;
        }
    };

    tokio::select! {
        _ = signal::ctrl_c() => info!("Received SIGINT, shutting down gracefully..."),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
    }
}

fn handle_config_command(
    config: &DeviceConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let identity = config.resolve_identity()?;
    let contract = config.keep_alive();
    let policy = LivenessPolicy::for_config(config);

    if show {
        println!("{}", config.to_toml_string()?);
    }
    println!("client_id:            {}", identity.client_id());
    println!("mac_address:          {}", identity.mac());
    println!(
        "keep_alive:           {}s (heartbeat {}ms, must stay below {}ms)",
        contract.keep_alive.as_secs(),
        config.timing.heartbeat_interval_ms,
        contract.keep_alive.as_millis()
    );
    println!(
        "last will:            published by the broker after {}ms of silence",
        contract.will_delay().as_millis()
    );
    println!(
        "backend tolerance:    check every {}ms, offline after {}ms",
        policy.check_interval.as_millis(),
        policy.offline_after.as_millis()
    );

    info!("Configuration validation complete");
    Ok(())
}
