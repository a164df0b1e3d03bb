// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # ble-uart-remote
//!
//! Control a Bluetooth Low Energy UART bridge (HC-08, HM-10 and friends)
//! that switches something on or off when it receives a command on its
//! writable characteristic.
//!
//! ## Features
//!
//! - **Identifier normalization**: type `FFE0`, `0xffe1` or a full 128-bit
//!   UUID with or without hyphens
//! - **Connection lifecycle**: connect, disconnect, and a periodic check that
//!   catches disconnects the platform never reported
//! - **Two command modes**: single characters (`a`/`b`) or words
//!   (`LIGAR`/`DESLIGAR`)
//! - **Acknowledgements**: notification text such as `ACK:ON` is turned into
//!   a status line, with configurable prefixes
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ble_uart_remote::{BtleplugPlatform, Command, Controller, RemoteConfig, Result};
//! use ble_uart_remote::feedback::Silent;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = RemoteConfig::default();
//!     let platform = Arc::new(BtleplugPlatform::new(config.scan_timeout()).await?);
//!     let remote = Controller::spawn(platform, config, Box::new(Silent))?;
//!
//!     remote.connect().await?;
//!     remote.send(Command::On).await?;
//!
//!     remote.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.

// Public modules
pub mod ble;
pub mod config;
pub mod controller;
pub mod error;
pub mod feedback;
pub mod protocol;

// Re-exports for convenience
pub use ble::btleplug_platform::BtleplugPlatform;
pub use ble::connection::{ConnectTarget, ConnectionManager, ConnectionState, StatusUpdate};
pub use ble::platform::BlePlatform;
pub use ble::uuids::{hex_or_default, normalize, CanonicalIdentifier};
pub use config::RemoteConfig;
pub use controller::{Controller, ControllerHandle};
pub use error::{Error, Result};
pub use protocol::{Command, CommandMode};
