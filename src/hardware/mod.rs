//! Sensor and actuator collaborators
//!
//! The runtime only sees the [`SensorSource`] and [`ActuatorSink`] capability
//! traits. Host implementations read sysfs-style files; simulated ones stand in
//! when nothing is configured.

use crate::config::DeviceConfig;
use crate::protocol::{ActuatorKind, ActuatorState, SensorKind};
use std::path::PathBuf;
use thiserror::Error;

pub mod simulated;
pub mod sysfs;

pub use simulated::{InMemoryActuators, SimulatedSensors};
pub use sysfs::{FileActuators, FileSensors};

/// Source of sensor samples
pub trait SensorSource: Send {
    /// Sample one sensor. Values must be finite; callers reject anything else.
    fn read(&mut self, kind: SensorKind) -> Result<f64, SensorError>;
}

/// Sink for actuator commands
pub trait ActuatorSink: Send {
    /// Drive an actuator to `state`, returning the state actually applied.
    /// Applying the current state again must be harmless.
    fn set_state(
        &mut self,
        kind: ActuatorKind,
        state: ActuatorState,
    ) -> Result<ActuatorState, ActuatorError>;

    /// Last applied state, if known
    fn state(&self, kind: ActuatorKind) -> Option<ActuatorState>;
}

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("Sensor {0} is not available")]
    Unavailable(SensorKind),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unparseable reading '{raw}' from {path}")]
    Parse { path: PathBuf, raw: String },
    #[error("Reading is not a finite number: {0}")]
    NotFinite(f64),
}

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("Actuator {0} is not available")]
    Unavailable(ActuatorKind),
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Build collaborators from `[sensors]` and `[actuators]`. Sensors without a
/// configured file fall back to simulated values; actuators without one are
/// kept in memory.
pub fn from_config(config: &DeviceConfig) -> (Box<dyn SensorSource>, Box<dyn ActuatorSink>) {
    let sensors = &config.sensors;
    let sensor_source: Box<dyn SensorSource> =
        if sensors.temperature.is_none() && sensors.humidity.is_none() {
            Box::new(SimulatedSensors::new())
        } else {
            Box::new(
                FileSensors::new()
                    .with_sensor(SensorKind::Temperature, sensors.temperature.clone())
                    .with_sensor(SensorKind::Humidity, sensors.humidity.clone())
                    .with_fallback(SimulatedSensors::new()),
            )
        };

    let actuator_sink: Box<dyn ActuatorSink> = match &config.actuators.blue_led {
        Some(led) => Box::new(FileActuators::new().with_actuator(ActuatorKind::BlueLed, led.path.clone())),
        None => Box::new(InMemoryActuators::new()),
    };

    (sensor_source, actuator_sink)
}

impl<T: SensorSource + ?Sized> SensorSource for Box<T> {
    fn read(&mut self, kind: SensorKind) -> Result<f64, SensorError> {
        (**self).read(kind)
    }
}

impl<T: ActuatorSink + ?Sized> ActuatorSink for Box<T> {
    fn set_state(
        &mut self,
        kind: ActuatorKind,
        state: ActuatorState,
    ) -> Result<ActuatorState, ActuatorError> {
        (**self).set_state(kind, state)
    }

    fn state(&self, kind: ActuatorKind) -> Option<ActuatorState> {
        (**self).state(kind)
    }
}
