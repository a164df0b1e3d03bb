//! BLE communication module.
//!
//! Identifier normalization, the platform abstraction, and the connection
//! manager that drives a UART peripheral through it.

pub mod btleplug_platform;
pub mod connection;
pub mod platform;
pub mod uuids;

#[cfg(test)]
pub(crate) mod fake;

pub use btleplug_platform::BtleplugPlatform;
pub use connection::{ConnectionManager, ConnectionState};
pub use platform::BlePlatform;
pub use uuids::*;
