//! DAMIOT edge device
//!
//! Connectivity and liveness runtime for an IoT edge device that talks to a
//! backend over MQTT.
//!
//! # Overview
//!
//! The crate provides:
//! - Topic resolution from the device hardware address
//! - A link/session state machine with unlimited fixed-interval retries
//! - A retained status heartbeat and last will on a per-device status topic
//! - Periodic sensor telemetry and actuator commands with acknowledgements
//! - The backend half of the liveness contract ([`liveness`])
//!
//! # Quick Start
//!
//! ```rust
//! use damiot_edge::protocol::{DeviceIdentity, MacAddress, TopicResolver};
//!
//! let mac: MacAddress = "7C:9E:BD:F1:DA:E4".parse().unwrap();
//! let identity = DeviceIdentity::new(mac, "ESP32Client-7C9EBD").unwrap();
//! let topics = TopicResolver::resolve("damiot", &identity).unwrap();
//!
//! assert_eq!(topics.status(), "damiot/dispositivo/7C:9E:BD:F1:DA:E4/estado");
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod hardware;
pub mod liveness;
pub mod observability;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, DeviceConfig};
pub use device::{DeviceRuntime, SessionState};
pub use error::{EdgeError, EdgeResult};
pub use liveness::{LivenessMonitor, LivenessPolicy};
pub use protocol::*;
pub use transport::{MqttTransport, Transport, TransportEvent};
