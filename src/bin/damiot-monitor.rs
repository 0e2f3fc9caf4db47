//! DAMIOT liveness monitor
//!
//! Backend-side observer for the liveness contract. Subscribes to every
//! device status topic under a base, and prints a line whenever a device
//! comes online or goes offline (announced, last will, or silence).

use clap::Parser;
use damiot_edge::liveness::{LivenessMonitor, LivenessPolicy, LivenessTransition, OfflineReason};
use damiot_edge::liveness_span;
use damiot_edge::observability::init_cli_logging;
use damiot_edge::transport::mqtt::{EventRoute, MessageHandler};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, EventLoop, MqttOptions};
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::signal;
use tracing::{debug, error, info, warn};

/// Device liveness monitor
#[derive(Parser)]
#[command(name = "damiot-monitor")]
#[command(about = "Track device liveness from status heartbeats and last wills")]
#[command(version)]
struct Args {
    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    broker_host: String,

    /// MQTT broker port
    #[arg(long, default_value_t = 1883)]
    broker_port: u16,

    /// MQTT username (optional)
    #[arg(long, env = "DAMIOT_MQTT_USERNAME")]
    username: Option<String>,

    /// MQTT password (optional)
    #[arg(long, env = "DAMIOT_MQTT_PASSWORD")]
    password: Option<String>,

    /// Topic base shared with the devices
    #[arg(long, default_value = "damiot")]
    base: String,

    /// Heartbeat interval configured on the devices
    #[arg(long, default_value_t = 5000)]
    heartbeat_interval_ms: u64,

    /// Output format
    #[arg(short, long, default_value = "pretty")]
    format: OutputFormat,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Debug, clap::ValueEnum)]
enum OutputFormat {
    /// Human-readable with timestamps
    Pretty,
    /// One JSON object per line
    Json,
}

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

fn setup_mqtt_client(args: &Args) -> (AsyncClient, EventLoop) {
    let client_id = format!("damiot-monitor-{}", std::process::id());
    let mut mqtt_options = MqttOptions::new(client_id, &args.broker_host, args.broker_port);

    if let (Some(username), Some(password)) = (&args.username, &args.password) {
        mqtt_options.set_credentials(username, password);
    }
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_start(true);

    AsyncClient::new(mqtt_options, 100)
}

fn print_transition(transition: &LivenessTransition, format: &OutputFormat) {
    let now = chrono::Utc::now();
    let (mac, status, reason) = match transition {
        LivenessTransition::CameOnline(mac) => (mac, "online", None),
        LivenessTransition::WentOffline(mac, reason) => (mac, "offline", Some(reason)),
    };

    match format {
        OutputFormat::Pretty => match reason {
            None => println!("[{}] {mac} ONLINE", now.format("%H:%M:%S%.3f")),
            Some(reason) => println!("[{}] {mac} OFFLINE ({reason})", now.format("%H:%M:%S%.3f")),
        },
        OutputFormat::Json => {
            let silence_ms = match reason {
                Some(OfflineReason::Silent(silence)) => Some(silence.as_millis() as u64),
                _ => None,
            };
            let line = json!({
                "timestamp": now.to_rfc3339(),
                "mac": mac.to_string(),
                "status": status,
                "reason": reason.map(|r| r.to_string()),
                "silence_ms": silence_ms,
            });
            println!("{line}");
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    init_cli_logging(args.verbose);

    let policy = LivenessPolicy::for_heartbeat(Duration::from_millis(args.heartbeat_interval_ms));
    let mut monitor = LivenessMonitor::new(policy, args.base.clone());
    let filter = monitor.subscription();

    info!(
        broker = %format!("{}:{}", args.broker_host, args.broker_port),
        %filter,
        check_interval_ms = policy.check_interval.as_millis() as u64,
        offline_after_ms = policy.offline_after.as_millis() as u64,
        "Starting liveness monitor"
    );

    let (client, mut eventloop) = setup_mqtt_client(&args);
    let mut sweep = tokio::time::interval(policy.check_interval);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut connected = false;

    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                info!("Shutdown signal received...");
                break;
            }
            _ = sweep.tick() => {
                // Silence while the monitor itself is cut off says nothing about the devices
                if !connected {
                    continue;
                }
                let span = liveness_span!(devices = monitor.devices().count());
                let _guard = span.enter();
                for transition in monitor.sweep(Instant::now()) {
                    print_transition(&transition, &args.format);
                }
            }
            polled = eventloop.poll() => match polled {
                Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                    EventRoute::ConnectionAcknowledged { accepted: true, .. } => {
                        info!("Connected to MQTT broker");
                        connected = true;
                        if let Err(e) = client.subscribe(filter.clone(), QoS::AtLeastOnce).await {
                            error!("Failed to subscribe to {}: {}", filter, e);
                        }
                    }
                    EventRoute::ConnectionAcknowledged {
                        accepted: false,
                        code,
                        ..
                    } => {
                        warn!(%code, "Broker refused connection");
                    }
                    EventRoute::MessageReceived { topic, payload, retain } => {
                        debug!(%topic, retain, "Status message");
                        if let Some(transition) = monitor.observe(&topic, &payload, Instant::now()) {
                            print_transition(&transition, &args.format);
                        }
                    }
                    EventRoute::SubscriptionConfirmed { rejected, .. } if !rejected.is_empty() => {
                        error!(?rejected, "Status subscription rejected");
                    }
                    _ => {}
                },
                Err(e) => {
                    if connected {
                        warn!("MQTT connection lost: {}", e);
                    } else {
                        error!("MQTT connection error: {}", e);
                    }
                    connected = false;
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }

    if connected {
        if let Err(e) = tokio::time::timeout(Duration::from_millis(500), client.disconnect()).await {
            warn!("Disconnect timed out: {}", e);
        }
    }
    info!("Monitor stopped");
}
