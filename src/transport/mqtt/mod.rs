//! MQTT transport built on rumqttc (MQTT v5)
//!
//! The module separates pure functions from I/O:
//!
//! - [`connection`] - broker options, last will and the link probe
//! - [`message_handler`] - routing of rumqttc events into transport events
//! - [`client`] - the spawned event loop and the [`Transport`](crate::transport::Transport) impl
//!
//! # Usage
//!
//! ```rust,no_run
//! use damiot_edge::config::DeviceConfig;
//! use damiot_edge::transport::mqtt::MqttTransport;
//! use std::path::Path;
//!
//! let config = DeviceConfig::load_from_file(Path::new("device.toml"))?;
//! let transport = MqttTransport::new(&config)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttTransport;
pub use connection::{configure_mqtt_options, BrokerEndpoint, LinkProbe};
pub use message_handler::{EventRoute, MessageHandler};
