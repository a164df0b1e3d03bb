//! Error types for the ble-uart-remote crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The identifier text was empty after cleaning, or could not be turned
    /// into a UUID.
    #[error("Invalid identifier: {input:?}")]
    InvalidIdentifier {
        /// The text the user supplied.
        input: String,
    },

    /// No device was selected (scan found nothing, or the platform refused).
    #[error("Device selection failed: {reason}")]
    DeviceSelectionFailed {
        /// Description of why selection failed.
        reason: String,
    },

    /// Connecting to the GATT server of the selected device failed.
    #[error("GATT connect failed: {reason}")]
    GattConnectFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// The primary service could not be resolved.
    #[error("Service not found: {uuid}")]
    ServiceDiscoveryFailed {
        /// The UUID of the service that was not found.
        uuid: String,
    },

    /// The target characteristic could not be resolved within the service.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicDiscoveryFailed {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// Notifications could not be enabled. Never aborts a connect.
    #[error("Notifications unavailable: {reason}")]
    NotificationUnavailable {
        /// Description of why notifications are unavailable.
        reason: String,
    },

    /// Writing a payload to the characteristic failed.
    #[error("Write failed: {reason}")]
    WriteFailed {
        /// Description of why the write failed.
        reason: String,
    },

    /// Operation requires a connection but no device is connected.
    #[error("Not connected")]
    NotConnected,

    /// A connect sequence is already running.
    #[error("Connection already in progress")]
    ConnectInProgress,

    /// The configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The controller task is no longer running.
    #[error("Controller stopped")]
    ControllerStopped,

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short reason text without the variant prefix, used for status lines.
    pub fn reason(&self) -> String {
        match self {
            Self::DeviceSelectionFailed { reason }
            | Self::GattConnectFailed { reason }
            | Self::NotificationUnavailable { reason }
            | Self::WriteFailed { reason } => reason.clone(),
            other => other.to_string(),
        }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
