//! Stand-in collaborators for hosts without real hardware

use super::{ActuatorError, ActuatorSink, SensorError, SensorSource};
use crate::protocol::{ActuatorKind, ActuatorState, SensorKind};
use std::collections::HashMap;
use std::time::Instant;

/// Produces slowly drifting, plausible readings
pub struct SimulatedSensors {
    started: Instant,
}

impl SimulatedSensors {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// Value for a sensor `elapsed_secs` after start
    pub fn value_at(kind: SensorKind, elapsed_secs: f64) -> f64 {
        match kind {
            SensorKind::Temperature => 22.0 + 3.0 * (elapsed_secs / 300.0).sin(),
            SensorKind::Humidity => 55.0 + 10.0 * (elapsed_secs / 420.0).cos(),
        }
    }
}

impl Default for SimulatedSensors {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorSource for SimulatedSensors {
    fn read(&mut self, kind: SensorKind) -> Result<f64, SensorError> {
        Ok(Self::value_at(kind, self.started.elapsed().as_secs_f64()))
    }
}

/// Actuators that only remember their state
#[derive(Debug, Default)]
pub struct InMemoryActuators {
    states: HashMap<ActuatorKind, ActuatorState>,
}

impl InMemoryActuators {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ActuatorSink for InMemoryActuators {
    fn set_state(
        &mut self,
        kind: ActuatorKind,
        state: ActuatorState,
    ) -> Result<ActuatorState, ActuatorError> {
        self.states.insert(kind, state);
        Ok(state)
    }

    fn state(&self, kind: ActuatorKind) -> Option<ActuatorState> {
        self.states.get(&kind).copied()
    }
}
