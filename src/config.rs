//! Device configuration
//!
//! Loaded once at startup from TOML, validated, then passed by reference to
//! every component. Nothing here is mutated after `load_from_file` returns.

use crate::protocol::{
    validate_client_id, validate_topic_base, DeviceIdentity, IdentityError, MacAddress,
    PayloadFormat,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use url::Url;

/// Top-level device configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    pub device: DeviceSection,
    pub mqtt: MqttSection,
    #[serde(default)]
    pub timing: TimingSection,
    #[serde(default)]
    pub topics: TopicsSection,
    #[serde(default)]
    pub link: LinkSection,
    #[serde(default)]
    pub sensors: SensorsSection,
    #[serde(default)]
    pub actuators: ActuatorsSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Client identifier presented to the broker (must match [a-zA-Z0-9._-]+)
    pub client_id: String,
    /// Hardware address, e.g. `7C:9E:BD:F1:DA:E4`
    pub mac_address: Option<String>,
    /// Network interface to read the hardware address from when `mac_address` is unset
    pub interface: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker URL, `mqtt://host:port` or `tcp://host:port`
    pub broker_url: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// Keep-alive declared to the broker
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

fn default_keep_alive_secs() -> u64 {
    10
}

/// Keep-alive the MQTT client accepts; the CONNECT field is 16 bits and the
/// client refuses anything under five seconds
pub const KEEP_ALIVE_SECS_RANGE: std::ops::RangeInclusive<u64> = 5..=65535;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingSection {
    #[serde(default = "default_read_interval_ms")]
    pub read_interval_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Periodic actuator state echo; 0 disables it
    #[serde(default)]
    pub actuator_status_interval_ms: u64,
}

fn default_read_interval_ms() -> u64 {
    5000
}

fn default_heartbeat_interval_ms() -> u64 {
    5000
}

fn default_reconnect_interval_ms() -> u64 {
    5000
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

fn default_poll_interval_ms() -> u64 {
    100
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            read_interval_ms: default_read_interval_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            actuator_status_interval_ms: 0,
        }
    }
}

impl TimingSection {
    pub fn read_interval(&self) -> Duration {
        Duration::from_millis(self.read_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn actuator_status_interval(&self) -> Option<Duration> {
        (self.actuator_status_interval_ms > 0)
            .then(|| Duration::from_millis(self.actuator_status_interval_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicsSection {
    #[serde(default = "default_topic_base")]
    pub base: String,
    #[serde(default)]
    pub payload_format: PayloadFormat,
}

fn default_topic_base() -> String {
    "damiot".to_string()
}

impl Default for TopicsSection {
    fn default() -> Self {
        Self {
            base: default_topic_base(),
            payload_format: PayloadFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LinkSection {
    /// Interface whose operstate gates the link; unset means always up
    pub interface: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SensorsSection {
    pub temperature: Option<FileSensorConfig>,
    pub humidity: Option<FileSensorConfig>,
}

/// Sensor backed by a sysfs-style file holding one number
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileSensorConfig {
    pub path: PathBuf,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
}

fn default_scale() -> f64 {
    1.0
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActuatorsSection {
    pub blue_led: Option<FileActuatorConfig>,
}

/// Actuator backed by a sysfs-style file written with `1`/`0`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileActuatorConfig {
    pub path: PathBuf,
}

/// Relationship between broker keep-alive and heartbeat cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveContract {
    pub keep_alive: Duration,
}

impl KeepAliveContract {
    pub fn new(keep_alive: Duration) -> Self {
        Self { keep_alive }
    }

    /// Largest heartbeat period that leaves a full period of slack
    pub fn recommended_max_heartbeat(&self) -> Duration {
        self.keep_alive / 2
    }

    /// Heartbeat period must be strictly below keep-alive
    pub fn check_heartbeat(&self, heartbeat: Duration) -> Result<(), ConfigError> {
        if heartbeat >= self.keep_alive {
            return Err(ConfigError::HeartbeatNotBelowKeepAlive {
                heartbeat_ms: u64::try_from(heartbeat.as_millis()).unwrap_or(u64::MAX),
                keep_alive_secs: self.keep_alive.as_secs(),
            });
        }
        if heartbeat > self.recommended_max_heartbeat() {
            warn!(
                heartbeat_ms = heartbeat.as_millis() as u64,
                keep_alive_secs = self.keep_alive.as_secs(),
                "Heartbeat interval exceeds half the keep-alive; one lost heartbeat may trip the backend"
            );
        }
        Ok(())
    }

    /// Silence after which the broker publishes the last will
    pub fn will_delay(&self) -> Duration {
        self.keep_alive.mul_f64(1.5)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to render TOML: {0}")]
    TomlRender(#[from] toml::ser::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid MAC address: {0}")]
    InvalidMacAddress(String),
    #[error("Invalid client ID: {0}")]
    InvalidClientId(String),
    #[error(
        "Heartbeat interval {heartbeat_ms}ms must be strictly less than keep-alive {keep_alive_secs}s"
    )]
    HeartbeatNotBelowKeepAlive {
        heartbeat_ms: u64,
        keep_alive_secs: u64,
    },
    #[error("keep_alive_secs {0} out of range (5..=65535)")]
    KeepAliveOutOfRange(u64),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DeviceConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: DeviceConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_client_id(&self.device.client_id)
            .map_err(|e| ConfigError::InvalidClientId(format!("'{}': {e}", self.device.client_id)))?;

        match (&self.device.mac_address, &self.device.interface) {
            (Some(mac), _) => {
                mac.parse::<MacAddress>()
                    .map_err(|_| ConfigError::InvalidMacAddress(mac.clone()))?;
            }
            (None, Some(_)) => {}
            (None, None) => {
                return Err(ConfigError::InvalidConfig(
                    "[device] requires mac_address or interface".to_string(),
                ))
            }
        }

        validate_broker_url(&self.mqtt.broker_url)?;

        if !KEEP_ALIVE_SECS_RANGE.contains(&self.mqtt.keep_alive_secs) {
            return Err(ConfigError::KeepAliveOutOfRange(self.mqtt.keep_alive_secs));
        }

        let timing = &self.timing;
        for (name, value) in [
            ("read_interval_ms", timing.read_interval_ms),
            ("heartbeat_interval_ms", timing.heartbeat_interval_ms),
            ("reconnect_interval_ms", timing.reconnect_interval_ms),
            ("connect_timeout_ms", timing.connect_timeout_ms),
            ("poll_interval_ms", timing.poll_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidConfig(format!(
                    "{name} must be greater than zero"
                )));
            }
        }

        self.keep_alive()
            .check_heartbeat(timing.heartbeat_interval())?;

        validate_topic_base(&self.topics.base)
            .map_err(|e| ConfigError::InvalidConfig(format!("[topics] base: {e}")))?;

        Ok(())
    }

    pub fn keep_alive(&self) -> KeepAliveContract {
        KeepAliveContract::new(Duration::from_secs(self.mqtt.keep_alive_secs))
    }

    /// Resolve the device identity, reading the hardware address from sysfs
    /// when only an interface is configured
    pub fn resolve_identity(&self) -> Result<DeviceIdentity, IdentityError> {
        let mac = match (&self.device.mac_address, &self.device.interface) {
            (Some(mac), _) => mac.parse()?,
            (None, Some(interface)) => MacAddress::from_interface(interface)?,
            (None, None) => return Err(IdentityError::InvalidMacAddress(String::new())),
        };
        DeviceIdentity::new(mac, self.device.client_id.clone())
    }

    /// Get MQTT username from environment variable
    pub fn get_mqtt_username(&self) -> Option<String> {
        get_env_var_optional(self.mqtt.username_env.as_deref())
    }

    /// Get MQTT password from environment variable
    pub fn get_mqtt_password(&self) -> Option<String> {
        get_env_var_optional(self.mqtt.password_env.as_deref())
    }

    /// Credentials for the broker; a configured username variable must be set
    pub fn mqtt_credentials(&self) -> Result<Option<(String, String)>, ConfigError> {
        let Some(username_env) = self.mqtt.username_env.as_deref() else {
            return Ok(None);
        };
        let username = std::env::var(username_env)
            .map_err(|_| ConfigError::EnvVarNotFound(username_env.to_string()))?;
        Ok(Some((username, self.get_mqtt_password().unwrap_or_default())))
    }

    /// Render the resolved configuration, defaults included
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn get_env_var_optional(env_var_name: Option<&str>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}

fn validate_broker_url(broker_url: &str) -> Result<(), ConfigError> {
    let url = Url::parse(broker_url)
        .map_err(|e| ConfigError::InvalidConfig(format!("broker_url '{broker_url}': {e}")))?;
    if !matches!(url.scheme(), "mqtt" | "tcp") {
        return Err(ConfigError::InvalidConfig(format!(
            "broker_url scheme '{}' not supported (use mqtt:// or tcp://)",
            url.scheme()
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConfigError::InvalidConfig(format!(
            "broker_url '{broker_url}' has no host"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[device]
client_id = "ESP32-Salon"
mac_address = "7C:9E:BD:F1:DA:E4"

[mqtt]
broker_url = "mqtt://192.168.8.136:1883"
"#;

    fn with_timing(keep_alive_secs: u64, heartbeat_ms: u64) -> String {
        format!(
            r#"
[device]
client_id = "ESP32-Salon"
mac_address = "7C:9E:BD:F1:DA:E4"

[mqtt]
broker_url = "mqtt://localhost:1883"
keep_alive_secs = {keep_alive_secs}

[timing]
heartbeat_interval_ms = {heartbeat_ms}
"#
        )
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = DeviceConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.mqtt.keep_alive_secs, 10);
        assert_eq!(config.timing.read_interval_ms, 5000);
        assert_eq!(config.timing.heartbeat_interval_ms, 5000);
        assert_eq!(config.timing.reconnect_interval_ms, 5000);
        assert_eq!(config.timing.connect_timeout_ms, 3000);
        assert_eq!(config.timing.poll_interval_ms, 100);
        assert_eq!(config.timing.actuator_status_interval(), None);
        assert_eq!(config.topics.base, "damiot");
        assert_eq!(config.topics.payload_format, PayloadFormat::Plain);
        assert!(config.sensors.temperature.is_none());
        assert!(config.link.interface.is_none());
    }

    #[test]
    fn test_heartbeat_equal_to_keep_alive_rejected() {
        let result = DeviceConfig::from_toml_str(&with_timing(10, 10_000));
        assert!(matches!(
            result,
            Err(ConfigError::HeartbeatNotBelowKeepAlive {
                heartbeat_ms: 10_000,
                keep_alive_secs: 10
            })
        ));
    }

    #[test]
    fn test_keep_alive_bounds() {
        let cases = [
            (0, 1_000, false),
            (4, 2_000, false),
            (5, 2_000, true),
            (65_535, 5_000, true),
            (65_536, 5_000, false),
        ];
        for (keep_alive_secs, heartbeat_ms, accepted) in cases {
            let result = DeviceConfig::from_toml_str(&with_timing(keep_alive_secs, heartbeat_ms));
            assert_eq!(result.is_ok(), accepted, "keep_alive_secs = {keep_alive_secs}");
            if !accepted {
                assert!(matches!(
                    result,
                    Err(ConfigError::KeepAliveOutOfRange(secs)) if secs == keep_alive_secs
                ));
            }
        }
    }

    #[test]
    fn test_heartbeat_half_keep_alive_accepted() {
        assert!(DeviceConfig::from_toml_str(&with_timing(10, 5_000)).is_ok());
    }

    #[test]
    fn test_heartbeat_above_half_is_accepted_with_warning() {
        assert!(DeviceConfig::from_toml_str(&with_timing(10, 8_000)).is_ok());
    }

    #[test]
    fn test_invalid_client_id_rejected() {
        let content = MINIMAL.replace("ESP32-Salon", "ESP32 Salon");
        assert!(matches!(
            DeviceConfig::from_toml_str(&content),
            Err(ConfigError::InvalidClientId(_))
        ));
    }

    #[test]
    fn test_invalid_mac_rejected() {
        let content = MINIMAL.replace("7C:9E:BD:F1:DA:E4", "7C:9E:BD");
        assert!(matches!(
            DeviceConfig::from_toml_str(&content),
            Err(ConfigError::InvalidMacAddress(_))
        ));
    }

    #[test]
    fn test_missing_address_source_rejected() {
        let content = MINIMAL.replace("mac_address = \"7C:9E:BD:F1:DA:E4\"", "");
        assert!(matches!(
            DeviceConfig::from_toml_str(&content),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_broker_url_validation() {
        assert!(validate_broker_url("mqtt://localhost:1883").is_ok());
        assert!(validate_broker_url("tcp://10.0.0.1").is_ok());
        assert!(validate_broker_url("mqtts://localhost:8883").is_err());
        assert!(validate_broker_url("localhost:1883").is_err());
        assert!(validate_broker_url("not a url").is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let content = format!("{MINIMAL}\n[timing]\nread_interval_ms = 0\n");
        let err = DeviceConfig::from_toml_str(&content).unwrap_err();
        assert!(err.to_string().contains("read_interval_ms"));
    }

    #[test]
    fn test_wildcard_topic_base_rejected() {
        let content = format!("{MINIMAL}\n[topics]\nbase = \"damiot/#\"\n");
        assert!(matches!(
            DeviceConfig::from_toml_str(&content),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_keep_alive_contract_bounds() {
        let contract = KeepAliveContract::new(Duration::from_secs(10));
        assert_eq!(contract.recommended_max_heartbeat(), Duration::from_secs(5));
        assert_eq!(contract.will_delay(), Duration::from_secs(15));
        assert!(contract.check_heartbeat(Duration::from_millis(9_999)).is_ok());
        assert!(contract.check_heartbeat(Duration::from_secs(11)).is_err());
    }

    #[test]
    fn test_resolve_identity_from_mac() {
        let config = DeviceConfig::from_toml_str(MINIMAL).unwrap();
        let identity = config.resolve_identity().unwrap();
        assert_eq!(identity.client_id(), "ESP32-Salon");
        assert_eq!(identity.mac().to_string(), "7C:9E:BD:F1:DA:E4");
    }

    #[test]
    fn test_show_renders_defaults() {
        let config = DeviceConfig::from_toml_str(MINIMAL).unwrap();
        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("heartbeat_interval_ms = 5000"));
        let reparsed = DeviceConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn test_credentials_absent_without_env_names() {
        let config = DeviceConfig::from_toml_str(MINIMAL).unwrap();
        assert!(config.mqtt_credentials().unwrap().is_none());
    }

    #[test]
    fn test_missing_username_env_var_reported() {
        let content = MINIMAL.replace(
            "[mqtt]\n",
            "[mqtt]\nusername_env = \"DAMIOT_TEST_UNSET_USERNAME_VAR\"\n",
        );
        let config = DeviceConfig::from_toml_str(&content).unwrap();
        assert!(matches!(
            config.mqtt_credentials(),
            Err(ConfigError::EnvVarNotFound(name)) if name == "DAMIOT_TEST_UNSET_USERNAME_VAR"
        ));
    }
}
