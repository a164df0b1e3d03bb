//! [`BlePlatform`] on top of btleplug.
//!
//! The device picker is a scan: it polls discovered peripherals until one
//! passes the name filter or the scan timeout runs out, then picks the
//! strongest signal among the matches.

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic as GattCharacteristic, Manager as _,
    Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::ble::platform::{
    BlePlatform, Characteristic, Device, DeviceRequest, GattServer, PlatformEvent,
    PlatformEventStream, Service,
};
use crate::error::{Error, Result};

/// How often discovered peripherals are checked during a scan.
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Bluetooth stack access through btleplug.
pub struct BtleplugPlatform {
    /// The BLE adapter to use.
    adapter: Adapter,
    /// How long the device picker scans.
    scan_timeout: Duration,
    /// Peripherals handed out by the picker, by identifier.
    peripherals: RwLock<HashMap<String, Peripheral>>,
}

impl BtleplugPlatform {
    /// Use the first Bluetooth adapter of the system.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new(scan_timeout: Duration) -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter, scan_timeout))
    }

    /// Use a specific adapter.
    pub fn with_adapter(adapter: Adapter, scan_timeout: Duration) -> Self {
        Self {
            adapter,
            scan_timeout,
            peripherals: RwLock::new(HashMap::new()),
        }
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    fn peripheral(&self, device_id: &str) -> Result<Peripheral> {
        self.peripherals
            .read()
            .get(device_id)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("Unknown device {}", device_id)))
    }

    /// Best matching peripheral currently known to the adapter.
    async fn find_match(&self, request: &DeviceRequest) -> Result<Option<(Peripheral, Device)>> {
        let mut best: Option<(Peripheral, Device, i16)> = None;

        for peripheral in self.adapter.peripherals().await? {
            let properties = match peripheral.properties().await {
                Ok(Some(properties)) => properties,
                Ok(None) => continue,
                Err(e) => {
                    trace!("Failed to read properties: {}", e);
                    continue;
                }
            };

            if !request.matches_name(properties.local_name.as_deref()) {
                continue;
            }

            let rssi = properties.rssi.unwrap_or(i16::MIN);
            trace!(
                "Candidate {:?} ({}), RSSI {}",
                properties.local_name,
                peripheral.id(),
                rssi
            );

            if best.as_ref().map_or(true, |(_, _, best_rssi)| rssi > *best_rssi) {
                let device = Device {
                    id: peripheral.id().to_string(),
                    name: properties.local_name.clone(),
                };
                best = Some((peripheral, device, rssi));
            }
        }

        Ok(best.map(|(peripheral, device, _)| (peripheral, device)))
    }

    /// Look up the btleplug characteristic behind one of our handles.
    fn gatt_characteristic(
        &self,
        characteristic: &Characteristic,
    ) -> Result<(Peripheral, GattCharacteristic)> {
        let peripheral = self.peripheral(&characteristic.device_id)?;
        let found = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic.uuid && c.service_uuid == characteristic.service_uuid)
            .ok_or_else(|| Error::CharacteristicDiscoveryFailed {
                uuid: characteristic.uuid.to_string(),
            })?;
        Ok((peripheral, found))
    }
}

#[async_trait]
impl BlePlatform for BtleplugPlatform {
    async fn request_device(&self, request: &DeviceRequest) -> Result<Device> {
        info!(
            "Scanning for devices with name prefixes {:?} ({:?})",
            request.name_prefixes, self.scan_timeout
        );

        self.adapter.start_scan(ScanFilter::default()).await?;

        let deadline = Instant::now() + self.scan_timeout;
        let found = loop {
            match self.find_match(request).await {
                Ok(Some(found)) => break Ok(Some(found)),
                Ok(None) if Instant::now() >= deadline => break Ok(None),
                Ok(None) => tokio::time::sleep(SCAN_POLL_INTERVAL).await,
                Err(e) => break Err(e),
            }
        };

        if let Err(e) = self.adapter.stop_scan().await {
            debug!("Failed to stop scan: {}", e);
        }

        let (peripheral, device) = found?.ok_or_else(|| Error::DeviceSelectionFailed {
            reason: format!(
                "no device matching {:?} found within {:?}",
                request.name_prefixes, self.scan_timeout
            ),
        })?;

        self.peripherals
            .write()
            .insert(device.id.clone(), peripheral);

        Ok(device)
    }

    async fn connect_gatt(&self, device: &Device) -> Result<GattServer> {
        let peripheral = self.peripheral(&device.id)?;

        if !peripheral.is_connected().await.unwrap_or(false) {
            peripheral.connect().await?;
        } else {
            debug!("Peripheral already connected at BLE level");
        }

        peripheral.discover_services().await?;
        debug!("Discovered {} services", peripheral.services().len());

        Ok(GattServer {
            device_id: device.id.clone(),
        })
    }

    async fn primary_service(&self, server: &GattServer, uuid: Uuid) -> Result<Service> {
        let peripheral = self.peripheral(&server.device_id)?;

        let services = peripheral.services();
        for service in &services {
            trace!("Available service: {} (primary: {})", service.uuid, service.primary);
        }

        services
            .iter()
            .find(|s| s.uuid == uuid && s.primary)
            .map(|s| Service {
                device_id: server.device_id.clone(),
                uuid: s.uuid,
            })
            .ok_or_else(|| Error::ServiceDiscoveryFailed {
                uuid: uuid.to_string(),
            })
    }

    async fn characteristic(&self, service: &Service, uuid: Uuid) -> Result<Characteristic> {
        let peripheral = self.peripheral(&service.device_id)?;

        let found = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid && c.service_uuid == service.uuid)
            .ok_or_else(|| Error::CharacteristicDiscoveryFailed {
                uuid: uuid.to_string(),
            })?;

        debug!(
            "Found characteristic {}, properties: {:?}",
            found.uuid, found.properties
        );

        Ok(Characteristic {
            device_id: service.device_id.clone(),
            service_uuid: service.uuid,
            uuid: found.uuid,
        })
    }

    async fn start_notifications(&self, characteristic: &Characteristic) -> Result<()> {
        let (peripheral, gatt) = self.gatt_characteristic(characteristic)?;

        if !gatt
            .properties
            .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
        {
            return Err(Error::NotificationUnavailable {
                reason: format!("{} does not notify", gatt.uuid),
            });
        }

        peripheral.subscribe(&gatt).await?;
        debug!("Subscribed to notifications from {}", gatt.uuid);
        Ok(())
    }

    async fn write_value(&self, characteristic: &Characteristic, value: &[u8]) -> Result<()> {
        let (peripheral, gatt) = self.gatt_characteristic(characteristic)?;

        let write_type = if gatt.properties.contains(CharPropFlags::WRITE) {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        peripheral
            .write(&gatt, value, write_type)
            .await
            .map_err(|e| Error::WriteFailed {
                reason: e.to_string(),
            })?;

        trace!("Wrote {} bytes to characteristic {}", value.len(), gatt.uuid);

        Ok(())
    }

    async fn is_connected(&self, device: &Device) -> Result<bool> {
        let peripheral = self.peripheral(&device.id)?;
        Ok(peripheral.is_connected().await?)
    }

    async fn disconnect(&self, device: &Device) -> Result<()> {
        let peripheral = self.peripheral(&device.id)?;
        peripheral.disconnect().await?;
        info!("Disconnected from {}", device.display_name());
        Ok(())
    }

    async fn events(&self, device: &Device) -> Result<PlatformEventStream> {
        let peripheral = self.peripheral(&device.id)?;
        let target = peripheral.id();

        let notifications = peripheral.notifications().await?.map(|notification| {
            PlatformEvent::Notification {
                characteristic_uuid: notification.uuid,
                value: Bytes::from(notification.value),
            }
        });

        let disconnects = self.adapter.events().await?.filter_map(move |event| {
            let is_target = matches!(&event, CentralEvent::DeviceDisconnected(id) if *id == target);
            async move { is_target.then_some(PlatformEvent::Disconnected) }
        });

        Ok(Box::pin(stream::select(notifications, disconnects)))
    }
}
