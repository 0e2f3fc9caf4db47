//! Wire-level vocabulary shared by the device and the backend
//!
//! Device identity, the topic namespace derived from it, and the payload
//! encodings for telemetry, commands, acknowledgements and status.

pub mod identity;
pub mod messages;
pub mod topics;

pub use identity::*;
pub use messages::*;
pub use topics::*;
