//! Testing utilities and mock implementations
//!
//! Lets the device runtime be exercised without a broker or real hardware.

pub mod mocks;

pub use mocks::*;
