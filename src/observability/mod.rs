//! Observability: structured logging and span helpers

pub mod logging;

pub use logging::{init_cli_logging, init_default_logging, init_logging, parse_level, LogFormat};

// Span macros for structured logging
pub use logging::{device_span, liveness_span, mqtt_span};
