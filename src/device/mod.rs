//! Device-side connectivity and liveness
//!
//! - [`connection`] - the link/session state machine, sole owner of session state
//! - [`heartbeat`] - periodic status heartbeat gated on readiness
//! - [`telemetry`] - periodic sensor sampling, published at-most-once
//! - [`commands`] - actuator commands in, acknowledgements out
//! - [`runtime`] - the single cooperative loop tying them together
//! - [`schedule`] - due-time bookkeeping shared by the periodic components

pub mod commands;
pub mod connection;
pub mod heartbeat;
pub mod runtime;
pub mod schedule;
pub mod telemetry;

pub use commands::{CommandOutcome, CommandSubscriber};
pub use connection::{ConnectionManager, ConnectionSettings, ConnectionStats, SessionState};
pub use heartbeat::HeartbeatScheduler;
pub use runtime::{DeviceRuntime, TickReport, SHUTDOWN_GRACE};
pub use schedule::IntervalTimer;
pub use telemetry::TelemetryPublisher;
