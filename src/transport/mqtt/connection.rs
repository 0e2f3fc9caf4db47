//! Pure connection configuration for the MQTT transport
//!
//! Broker options are derived from the session request and the `[mqtt]`
//! section; the link probe reads interface state from sysfs.

use crate::config::{MqttSection, KEEP_ALIVE_SECS_RANGE};
use crate::transport::mqtt::message_handler::MessageHandler;
use crate::transport::{SessionRequest, TransportError};
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::MqttOptions;
use std::net::{IpAddr, UdpSocket};
use std::path::PathBuf;
use url::Url;

/// Broker endpoint parsed from the configured URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
}

impl BrokerEndpoint {
    pub fn parse(broker_url: &str) -> Result<Self, TransportError> {
        let invalid = || TransportError::SessionSetup(format!("invalid broker URL: {broker_url}"));

        let url = Url::parse(broker_url).map_err(|_| invalid())?;
        let host = url.host_str().filter(|h| !h.is_empty()).ok_or_else(invalid)?;
        let port = url.port().unwrap_or(1883);

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl BrokerEndpoint {
    /// Source address the routing table picks for this endpoint. Connecting a
    /// UDP socket sends nothing.
    pub fn local_ip(&self) -> Option<IpAddr> {
        let unspecified = if self.host.contains(':') { "[::]:0" } else { "0.0.0.0:0" };
        let socket = UdpSocket::bind(unspecified).ok()?;
        socket.connect((self.host.as_str(), self.port)).ok()?;
        let ip = socket.local_addr().ok()?.ip();
        (!ip.is_unspecified()).then_some(ip)
    }
}

/// Pure function to configure MQTT options for one session attempt
pub fn configure_mqtt_options(
    request: &SessionRequest,
    config: &MqttSection,
    credentials: Option<(String, String)>,
) -> Result<MqttOptions, TransportError> {
    let endpoint = BrokerEndpoint::parse(&config.broker_url)?;
    let mut mqtt_options = MqttOptions::new(&request.client_id, endpoint.host, endpoint.port);

    if let Some((username, password)) = credentials {
        mqtt_options.set_credentials(username, password);
    }

    let keep_alive_secs = request.keep_alive.as_secs();
    if !KEEP_ALIVE_SECS_RANGE.contains(&keep_alive_secs) {
        return Err(TransportError::SessionSetup(format!(
            "keep-alive {keep_alive_secs}s outside {}..={}s",
            KEEP_ALIVE_SECS_RANGE.start(),
            KEEP_ALIVE_SECS_RANGE.end()
        )));
    }
    mqtt_options.set_keep_alive(request.keep_alive);
    mqtt_options.set_connection_timeout(request.connect_timeout.as_secs().max(1));
    // Each session starts clean; subscriptions are re-issued on every connect
    mqtt_options.set_clean_start(true);

    let will = &request.last_will;
    let lwt = LastWill::new(
        will.topic.clone(),
        will.payload.clone(),
        MessageHandler::qos_for(will.tier),
        will.retain,
        None,
    );
    mqtt_options.set_last_will(lwt);

    Ok(mqtt_options)
}

/// Reads interface operstate to decide whether the link is usable.
/// Without an interface the link is treated as always up.
#[derive(Debug, Clone, Default)]
pub struct LinkProbe {
    interface: Option<String>,
    sysfs_root: Option<PathBuf>,
}

impl LinkProbe {
    pub fn new(interface: Option<String>) -> Self {
        Self {
            interface,
            sysfs_root: None,
        }
    }

    /// Probe against an alternate `/sys/class/net` directory
    pub fn with_sysfs_root(interface: Option<String>, root: PathBuf) -> Self {
        Self {
            interface,
            sysfs_root: Some(root),
        }
    }

    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    pub fn check(&self) -> Result<(), TransportError> {
        let Some(interface) = &self.interface else {
            return Ok(());
        };

        let root = self
            .sysfs_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("/sys/class/net"));
        let path = root.join(interface).join("operstate");
        let state = std::fs::read_to_string(&path)
            .map_err(|e| TransportError::LinkDown(format!("{interface}: {e}")))?;

        match state.trim() {
            "up" | "unknown" => Ok(()),
            other => Err(TransportError::LinkDown(format!(
                "{interface} operstate is {other}"
            ))),
        }
    }

    pub fn is_up(&self) -> bool {
        self.check().is_ok()
    }
}
