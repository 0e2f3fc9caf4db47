//! Message types exchanged with the backend
//!
//! Payloads default to the plain-text encoding the backend already parses
//! (`"25.50"`, `"ON"`, `"ONLINE"`). The JSON encoding carries the same
//! information plus device-side timing for consumers that want it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Sensor kinds this device samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Temperature,
    Humidity,
}

impl SensorKind {
    pub const ALL: [SensorKind; 2] = [SensorKind::Temperature, SensorKind::Humidity];

    /// Topic leaf used by the backend namespace
    pub fn leaf(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperatura",
            SensorKind::Humidity => "humedad",
        }
    }

    /// Logical channel name (`telemetry.<name>`)
    pub fn name(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Humidity => "humidity",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "°C",
            SensorKind::Humidity => "%",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Actuator kinds this device drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorKind {
    BlueLed,
}

impl ActuatorKind {
    pub const ALL: [ActuatorKind; 1] = [ActuatorKind::BlueLed];

    pub fn leaf(&self) -> &'static str {
        match self {
            ActuatorKind::BlueLed => "led_azul",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ActuatorKind::BlueLed => "blue_led",
        }
    }

    /// Resolve from either the logical name or the topic leaf
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == name || kind.leaf() == name)
    }
}

impl fmt::Display for ActuatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Binary actuator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorState {
    On,
    Off,
}

impl ActuatorState {
    pub fn as_plain(&self) -> &'static str {
        match self {
            ActuatorState::On => "ON",
            ActuatorState::Off => "OFF",
        }
    }

    pub fn is_on(&self) -> bool {
        matches!(self, ActuatorState::On)
    }
}

impl FromStr for ActuatorState {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" | "1" | "true" => Ok(ActuatorState::On),
            "off" | "0" | "false" => Ok(ActuatorState::Off),
            other => Err(PayloadError::UnknownState(other.to_string())),
        }
    }
}

impl fmt::Display for ActuatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_plain())
    }
}

/// Payload encoding for outbound messages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// Bare values, compatible with the existing backend
    #[default]
    Plain,
    /// JSON documents with device timing
    Json,
}

/// One sensor sample. `uptime` is the device-local monotonic tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryReading {
    pub kind: SensorKind,
    pub value: f64,
    pub uptime: Duration,
}

#[derive(Serialize)]
struct TelemetryDocument<'a> {
    sensor: SensorKind,
    value: f64,
    unit: &'a str,
    uptime_ms: u64,
}

impl TelemetryReading {
    pub fn encode(&self, format: PayloadFormat) -> Result<Vec<u8>, PayloadError> {
        match format {
            PayloadFormat::Plain => Ok(format!("{:.2}", self.value).into_bytes()),
            PayloadFormat::Json => Ok(serde_json::to_vec(&TelemetryDocument {
                sensor: self.kind,
                value: self.value,
                unit: self.kind.unit(),
                uptime_ms: duration_millis(self.uptime),
            })?),
        }
    }
}

/// Requested actuator state, parsed from a command topic payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandMessage {
    pub actuator: ActuatorKind,
    pub state: ActuatorState,
}

#[derive(Deserialize)]
struct CommandDocument {
    actuator: Option<String>,
    state: String,
}

impl CommandMessage {
    /// Parse a payload received on `actuator`'s command topic.
    ///
    /// Accepts plain `ON`/`OFF` (also `1`/`0`, `true`/`false`) or a JSON object
    /// `{"actuator": "blue_led", "state": "on"}`. A JSON actuator naming a
    /// different actuator than the topic is rejected.
    pub fn parse(actuator: ActuatorKind, payload: &[u8]) -> Result<Self, PayloadError> {
        let text = std::str::from_utf8(payload).map_err(|_| PayloadError::NotUtf8)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(PayloadError::Empty);
        }

        if text.starts_with('{') {
            let doc: CommandDocument = serde_json::from_str(text)?;
            if let Some(named) = doc.actuator.as_deref() {
                match ActuatorKind::from_name(named) {
                    Some(kind) if kind == actuator => {}
                    _ => {
                        return Err(PayloadError::ActuatorMismatch {
                            topic: actuator,
                            payload: named.to_string(),
                        })
                    }
                }
            }
            return Ok(Self {
                actuator,
                state: doc.state.parse()?,
            });
        }

        Ok(Self {
            actuator,
            state: text.parse()?,
        })
    }
}

/// State echo published after a command is applied, or on the status cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckMessage {
    pub actuator: ActuatorKind,
    pub state: ActuatorState,
}

#[derive(Serialize)]
struct AckDocument {
    actuator: ActuatorKind,
    state: ActuatorState,
}

impl AckMessage {
    pub fn encode(&self, format: PayloadFormat) -> Result<Vec<u8>, PayloadError> {
        match format {
            PayloadFormat::Plain => Ok(self.state.as_plain().as_bytes().to_vec()),
            PayloadFormat::Json => Ok(serde_json::to_vec(&AckDocument {
                actuator: self.actuator,
                state: self.state,
            })?),
        }
    }
}

/// Device liveness as seen on the status topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
}

impl DeviceStatus {
    pub fn as_plain(&self) -> &'static str {
        match self {
            DeviceStatus::Online => "ONLINE",
            DeviceStatus::Offline => "OFFLINE",
        }
    }

    /// Decode a status payload in either encoding
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        let text = std::str::from_utf8(payload).map_err(|_| PayloadError::NotUtf8)?;
        let text = text.trim();
        if text.starts_with('{') {
            let doc: StatusDocumentOwned = serde_json::from_str(text)?;
            return Ok(doc.status);
        }
        match text.to_ascii_uppercase().as_str() {
            "ONLINE" => Ok(DeviceStatus::Online),
            "OFFLINE" => Ok(DeviceStatus::Offline),
            "" => Err(PayloadError::Empty),
            _ => Err(PayloadError::UnknownState(text.to_string())),
        }
    }
}

/// Status/heartbeat message published on the status topic
#[derive(Debug, Clone, PartialEq)]
pub struct StatusMessage {
    pub status: DeviceStatus,
    pub client_id: String,
    /// Heartbeat sequence number; 0 for connect/last-will messages
    pub sequence: u64,
    pub uptime: Duration,
    pub timestamp: DateTime<Utc>,
    /// Address the device reaches the broker from, when known
    pub ip: Option<IpAddr>,
}

#[derive(Serialize)]
struct StatusDocument<'a> {
    status: DeviceStatus,
    client_id: &'a str,
    sequence: u64,
    uptime_ms: u64,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ip: Option<IpAddr>,
}

#[derive(Deserialize)]
struct StatusDocumentOwned {
    status: DeviceStatus,
}

impl StatusMessage {
    pub fn encode(&self, format: PayloadFormat) -> Result<Vec<u8>, PayloadError> {
        match format {
            PayloadFormat::Plain => Ok(self.status.as_plain().as_bytes().to_vec()),
            PayloadFormat::Json => Ok(serde_json::to_vec(&StatusDocument {
                status: self.status,
                client_id: &self.client_id,
                sequence: self.sequence,
                uptime_ms: duration_millis(self.uptime),
                timestamp: self.timestamp,
                ip: self.ip,
            })?),
        }
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Payload encode/decode failures
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Payload is empty")]
    Empty,
    #[error("Payload is not valid UTF-8")]
    NotUtf8,
    #[error("Unknown state value: '{0}'")]
    UnknownState(String),
    #[error("Command for {payload} received on {topic} topic")]
    ActuatorMismatch {
        topic: ActuatorKind,
        payload: String,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
