//! Platform Bluetooth API abstraction.
//!
//! The connection manager only talks to the Bluetooth stack through
//! [`BlePlatform`]. The real implementation lives in
//! [`crate::ble::btleplug_platform`]; tests drive the manager with fakes.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use uuid::Uuid;

use crate::error::Result;

/// A device returned by the device picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Platform identifier of the peripheral.
    pub id: String,
    /// Advertised local name, if any.
    pub name: Option<String>,
}

impl Device {
    /// Name if advertised, identifier otherwise.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// A connected GATT server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattServer {
    /// Identifier of the device the server belongs to.
    pub device_id: String,
}

/// A resolved primary service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    /// Identifier of the device the service belongs to.
    pub device_id: String,
    /// Service UUID.
    pub uuid: Uuid,
}

/// A resolved characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    /// Identifier of the device the characteristic belongs to.
    pub device_id: String,
    /// UUID of the owning service.
    pub service_uuid: Uuid,
    /// Characteristic UUID.
    pub uuid: Uuid,
}

/// Parameters for the device picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRequest {
    /// Accept devices whose local name starts with any of these.
    pub name_prefixes: Vec<String>,
    /// Services the caller wants to access after connecting.
    pub optional_services: Vec<Uuid>,
}

impl DeviceRequest {
    /// Check whether an advertised name passes the prefix filter.
    ///
    /// An empty prefix list accepts every name.
    pub fn matches_name(&self, name: Option<&str>) -> bool {
        if self.name_prefixes.is_empty() {
            return true;
        }
        match name {
            Some(name) => self
                .name_prefixes
                .iter()
                .any(|prefix| name.starts_with(prefix.as_str())),
            None => false,
        }
    }
}

/// Asynchronous events the platform reports for a connected device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    /// The GATT server disconnected.
    Disconnected,
    /// A characteristic value notification.
    Notification {
        /// UUID of the characteristic that changed.
        characteristic_uuid: Uuid,
        /// The new value.
        value: Bytes,
    },
}

/// Stream of [`PlatformEvent`]s for one device.
pub type PlatformEventStream = Pin<Box<dyn Stream<Item = PlatformEvent> + Send>>;

/// Operations the connection manager needs from a Bluetooth stack.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlePlatform: Send + Sync {
    /// Let the user (or a scan policy) pick a device.
    async fn request_device(&self, request: &DeviceRequest) -> Result<Device>;

    /// Connect the device's GATT server.
    async fn connect_gatt(&self, device: &Device) -> Result<GattServer>;

    /// Look up a primary service on a connected server.
    async fn primary_service(&self, server: &GattServer, uuid: Uuid) -> Result<Service>;

    /// Look up a characteristic within a service.
    async fn characteristic(&self, service: &Service, uuid: Uuid) -> Result<Characteristic>;

    /// Enable value notifications on a characteristic.
    async fn start_notifications(&self, characteristic: &Characteristic) -> Result<()>;

    /// Write raw bytes to a characteristic.
    async fn write_value(&self, characteristic: &Characteristic, value: &[u8]) -> Result<()>;

    /// Live connected flag of the device's GATT server.
    async fn is_connected(&self, device: &Device) -> Result<bool>;

    /// Disconnect the device's GATT server.
    async fn disconnect(&self, device: &Device) -> Result<()>;

    /// Subscribe to disconnect and notification events for a device.
    async fn events(&self, device: &Device) -> Result<PlatformEventStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prefixes: &[&str]) -> DeviceRequest {
        DeviceRequest {
            name_prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
            optional_services: Vec::new(),
        }
    }

    #[test]
    fn test_name_prefix_filter() {
        let req = request(&["HC", "BT", "BLE"]);
        assert!(req.matches_name(Some("HC-08")));
        assert!(req.matches_name(Some("BLE-UART")));
        assert!(!req.matches_name(Some("hc-08")));
        assert!(!req.matches_name(Some("Thermometer")));
        assert!(!req.matches_name(None));
    }

    #[test]
    fn test_empty_prefixes_accept_everything() {
        let req = request(&[]);
        assert!(req.matches_name(Some("anything")));
        assert!(req.matches_name(None));
    }

    #[test]
    fn test_display_name() {
        let named = Device {
            id: "AA:BB".to_string(),
            name: Some("HC-08".to_string()),
        };
        let anonymous = Device {
            id: "AA:BB".to_string(),
            name: None,
        };
        assert_eq!(named.display_name(), "HC-08");
        assert_eq!(anonymous.display_name(), "AA:BB");
    }
}
