//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading, validation, and error handling.

use damiot_edge::config::{ConfigError, DeviceConfig};
use damiot_edge::hardware::{self, ActuatorSink, SensorSource};
use damiot_edge::protocol::{ActuatorKind, ActuatorState, PayloadFormat, SensorKind};
use damiot_edge::transport::mqtt::configure_mqtt_options;
use damiot_edge::transport::{DeliveryTier, SessionRequest, WillMessage};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[device]
client_id = "ESP32-Salon"
mac_address = "7c:9e:bd:f1:da:e4"

[mqtt]
broker_url = "mqtt://192.168.8.136:1883"
username_env = "DAMIOT_TEST_USER"
password_env = "DAMIOT_TEST_PASS"
keep_alive_secs = 20

[timing]
read_interval_ms = 2000
heartbeat_interval_ms = 8000
reconnect_interval_ms = 1000
connect_timeout_ms = 500
poll_interval_ms = 50
actuator_status_interval_ms = 30000

[topics]
base = "plant/floor1"
payload_format = "json"

[link]
interface = "wlan0"
"#,
    );

    let config = DeviceConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.device.client_id, "ESP32-Salon");
    assert_eq!(config.mqtt.keep_alive_secs, 20);
    assert_eq!(config.timing.heartbeat_interval(), Duration::from_secs(8));
    assert_eq!(config.timing.reconnect_interval(), Duration::from_secs(1));
    assert_eq!(
        config.timing.actuator_status_interval(),
        Some(Duration::from_secs(30))
    );
    assert_eq!(config.topics.base, "plant/floor1");
    assert_eq!(config.topics.payload_format, PayloadFormat::Json);
    assert_eq!(config.link.interface.as_deref(), Some("wlan0"));

    let identity = config.resolve_identity().unwrap();
    assert_eq!(identity.mac().to_string(), "7C:9E:BD:F1:DA:E4");
}

#[test]
fn test_config_applies_defaults_for_optional_sections() {
    let temp_file = write_config(
        r#"
[device]
client_id = "ESP32-Salon"
mac_address = "7C:9E:BD:F1:DA:E4"

[mqtt]
broker_url = "tcp://broker.local"
"#,
    );

    let config = DeviceConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.mqtt.keep_alive_secs, 10);
    assert_eq!(config.timing.read_interval(), Duration::from_secs(5));
    assert_eq!(config.timing.heartbeat_interval(), Duration::from_secs(5));
    assert_eq!(config.timing.reconnect_interval(), Duration::from_secs(5));
    assert_eq!(config.timing.connect_timeout(), Duration::from_secs(3));
    assert_eq!(config.timing.actuator_status_interval(), None);
    assert_eq!(config.topics.base, "damiot");
    assert_eq!(config.topics.payload_format, PayloadFormat::Plain);
    assert!(config.sensors.temperature.is_none());
    assert!(config.actuators.blue_led.is_none());
}

#[test]
fn test_heartbeat_not_below_keep_alive_fails_validation() {
    let temp_file = write_config(
        r#"
[device]
client_id = "ESP32-Salon"
mac_address = "7C:9E:BD:F1:DA:E4"

[mqtt]
broker_url = "mqtt://localhost:1883"
keep_alive_secs = 10

[timing]
heartbeat_interval_ms = 10000
"#,
    );

    let result = DeviceConfig::load_from_file(temp_file.path());
    assert!(matches!(
        result,
        Err(ConfigError::HeartbeatNotBelowKeepAlive {
            heartbeat_ms: 10000,
            keep_alive_secs: 10
        })
    ));
}

fn keep_alive_config(keep_alive_secs: u64, heartbeat_ms: u64) -> String {
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
fn test_keep_alive_range_enforced_at_load() {
    let cases = [
        (0, 1_000, false),
        (4, 2_000, false),
        (5, 2_000, true),
        (65_535, 5_000, true),
        (65_536, 5_000, false),
    ];

    for (keep_alive_secs, heartbeat_ms, accepted) in cases {
        let temp_file = write_config(&keep_alive_config(keep_alive_secs, heartbeat_ms));
        let result = DeviceConfig::load_from_file(temp_file.path());

        if !accepted {
            assert!(
                matches!(result, Err(ConfigError::KeepAliveOutOfRange(secs)) if secs == keep_alive_secs),
                "keep_alive_secs = {keep_alive_secs} should be rejected"
            );
            continue;
        }

        // anything that validates must also build broker options
        let config = result.unwrap();
        let request = SessionRequest {
            client_id: config.device.client_id.clone(),
            keep_alive: config.keep_alive().keep_alive,
            connect_timeout: config.timing.connect_timeout(),
            last_will: WillMessage {
                topic: "damiot/dispositivo/7C:9E:BD:F1:DA:E4/estado".to_string(),
                payload: b"OFFLINE".to_vec(),
                tier: DeliveryTier::AtLeastOnce,
                retain: true,
            },
        };
        let options = configure_mqtt_options(&request, &config.mqtt, None).unwrap();
        assert_eq!(options.keep_alive().as_secs(), keep_alive_secs);
    }
}

#[test]
fn test_missing_file_reports_read_error() {
    let result = DeviceConfig::load_from_file(Path::new("/nonexistent/damiot/device.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_reports_parse_error() {
    let temp_file = write_config("[device\nclient_id = ");
    let result = DeviceConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_missing_required_section_reports_parse_error() {
    let temp_file = write_config(
        r#"
[device]
client_id = "ESP32-Salon"
mac_address = "7C:9E:BD:F1:DA:E4"
"#,
    );
    let result = DeviceConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_tls_broker_scheme_rejected() {
    let temp_file = write_config(
        r#"
[device]
client_id = "ESP32-Salon"
mac_address = "7C:9E:BD:F1:DA:E4"

[mqtt]
broker_url = "mqtts://broker.local:8883"
"#,
    );
    let result = DeviceConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_rendered_config_loads_back_unchanged() {
    let temp_file = write_config(
        r#"
[device]
client_id = "ESP32-Salon"
mac_address = "7C:9E:BD:F1:DA:E4"

[mqtt]
broker_url = "mqtt://localhost:1883"

[sensors.temperature]
path = "/sys/bus/iio/devices/iio:device0/in_temp_input"
scale = 0.001
"#,
    );
    let config = DeviceConfig::load_from_file(temp_file.path()).unwrap();

    let rendered = config.to_toml_string().unwrap();
    let reloaded = DeviceConfig::from_toml_str(&rendered).unwrap();
    assert_eq!(config, reloaded);
}

#[test]
fn test_file_backed_hardware_from_config() {
    let dir = TempDir::new().unwrap();
    let temperature = dir.path().join("in_temp_input");
    let led = dir.path().join("brightness");
    std::fs::write(&temperature, "23450\n").unwrap();
    std::fs::write(&led, "0\n").unwrap();

    let content = format!(
        r#"
[device]
client_id = "ESP32-Salon"
mac_address = "7C:9E:BD:F1:DA:E4"

[mqtt]
broker_url = "mqtt://localhost:1883"

[sensors.temperature]
path = "{}"
scale = 0.001

[actuators.blue_led]
path = "{}"
"#,
        temperature.display(),
        led.display()
    );
    let config = DeviceConfig::from_toml_str(&content).unwrap();
    let (mut sensors, mut actuators) = hardware::from_config(&config);

    let value = sensors.read(SensorKind::Temperature).unwrap();
    assert!((value - 23.45).abs() < 1e-9);
    // unconfigured humidity falls back to simulation
    assert!(sensors.read(SensorKind::Humidity).unwrap().is_finite());

    actuators
        .set_state(ActuatorKind::BlueLed, ActuatorState::On)
        .unwrap();
    assert_eq!(std::fs::read_to_string(&led).unwrap().trim(), "1");
    assert_eq!(actuators.state(ActuatorKind::BlueLed), Some(ActuatorState::On));
}
