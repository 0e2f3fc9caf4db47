//! File-backed collaborators (sysfs, IIO, LED class devices)

use super::{ActuatorError, ActuatorSink, SensorError, SensorSource};
use crate::config::FileSensorConfig;
use crate::protocol::{ActuatorKind, ActuatorState, SensorKind};
use std::collections::HashMap;
use std::path::PathBuf;

/// Sensors read from files holding one number; value = raw × scale + offset
#[derive(Default)]
pub struct FileSensors {
    sensors: HashMap<SensorKind, FileSensorConfig>,
    fallback: Option<Box<dyn SensorSource>>,
}

impl FileSensors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sensor(mut self, kind: SensorKind, config: Option<FileSensorConfig>) -> Self {
        if let Some(config) = config {
            self.sensors.insert(kind, config);
        }
        self
    }

    /// Source for kinds without a configured file
    pub fn with_fallback(mut self, fallback: impl SensorSource + 'static) -> Self {
        self.fallback = Some(Box::new(fallback));
        self
    }
}

impl SensorSource for FileSensors {
    fn read(&mut self, kind: SensorKind) -> Result<f64, SensorError> {
        let Some(config) = self.sensors.get(&kind) else {
            return match self.fallback.as_mut() {
                Some(fallback) => fallback.read(kind),
                None => Err(SensorError::Unavailable(kind)),
            };
        };

        let raw = std::fs::read_to_string(&config.path).map_err(|e| SensorError::Io {
            path: config.path.clone(),
            source: e,
        })?;
        let value: f64 = raw.trim().parse().map_err(|_| SensorError::Parse {
            path: config.path.clone(),
            raw: raw.trim().to_string(),
        })?;

        Ok(value * config.scale + config.offset)
    }
}

/// Actuators driven by writing `1`/`0` to a file
#[derive(Debug, Default)]
pub struct FileActuators {
    paths: HashMap<ActuatorKind, PathBuf>,
    states: HashMap<ActuatorKind, ActuatorState>,
}

impl FileActuators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_actuator(mut self, kind: ActuatorKind, path: PathBuf) -> Self {
        self.paths.insert(kind, path);
        self
    }
}

impl ActuatorSink for FileActuators {
    fn set_state(
        &mut self,
        kind: ActuatorKind,
        state: ActuatorState,
    ) -> Result<ActuatorState, ActuatorError> {
        let path = self.paths.get(&kind).ok_or(ActuatorError::Unavailable(kind))?;
        let value = if state.is_on() { "1" } else { "0" };
        std::fs::write(path, value).map_err(|e| ActuatorError::Io {
            path: path.clone(),
            source: e,
        })?;
        self.states.insert(kind, state);
        Ok(state)
    }

    fn state(&self, kind: ActuatorKind) -> Option<ActuatorState> {
        self.states.get(&kind).copied()
    }
}
