//! Error taxonomy for the edge runtime
//!
//! Link and session failures are absorbed by the connection retry machine,
//! sensor failures by the telemetry publisher and malformed commands by the
//! command subscriber. Only `Config` and `Io` can stop the process, and only
//! at startup.

use crate::hardware::SensorError;
use crate::protocol::{ActuatorKind, IdentityError, PayloadError, SensorKind, TopicError};
use crate::transport::TransportError;
use thiserror::Error;

/// Main error type for edge device operations
#[derive(Debug, Error)]
pub enum EdgeError {
    #[error("Link failure: {message}")]
    LinkFailure { message: String },

    #[error("Session failure: {message}")]
    SessionFailure { message: String },

    #[error("Sensor read failure ({sensor}): {source}")]
    SensorReadFailure {
        sensor: SensorKind,
        #[source]
        source: SensorError,
    },

    #[error("Malformed command for {actuator}: {source}")]
    MalformedCommand {
        actuator: ActuatorKind,
        #[source]
        source: PayloadError,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Topic error: {0}")]
    Topic(#[from] TopicError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EdgeError {
    pub fn link_failure<S: Into<String>>(message: S) -> Self {
        Self::LinkFailure {
            message: message.into(),
        }
    }

    pub fn session_failure<S: Into<String>>(message: S) -> Self {
        Self::SessionFailure {
            message: message.into(),
        }
    }

    pub fn sensor_read_failure(sensor: SensorKind, source: SensorError) -> Self {
        Self::SensorReadFailure { sensor, source }
    }

    pub fn malformed_command(actuator: ActuatorKind, source: PayloadError) -> Self {
        Self::MalformedCommand { actuator, source }
    }

    /// Whether the runtime recovers from this error on its own
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EdgeError::LinkFailure { .. }
                | EdgeError::SessionFailure { .. }
                | EdgeError::SensorReadFailure { .. }
                | EdgeError::MalformedCommand { .. }
        )
    }
}

impl From<TransportError> for EdgeError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::LinkDown(message) => EdgeError::LinkFailure { message },
            other => EdgeError::SessionFailure {
                message: other.to_string(),
            },
        }
    }
}

/// Result type for edge device operations
pub type EdgeResult<T> = Result<T, EdgeError>;
