//! Scripted in-memory platform for tests.

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

use crate::ble::platform::{
    BlePlatform, Characteristic, Device, DeviceRequest, GattServer, PlatformEvent,
    PlatformEventStream, Service,
};
use crate::error::{Error, Result};

/// Platform call that should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailStep {
    RequestDevice,
    ConnectGatt,
    PrimaryService,
    Characteristic,
    StartNotifications,
    Write,
    IsConnected,
}

pub struct FakePlatform {
    device: Device,
    fail_at: Option<FailStep>,
    scan_delay: Duration,
    link_up: AtomicBool,
    requests: Mutex<Vec<DeviceRequest>>,
    writes: Mutex<Vec<Vec<u8>>>,
    listeners: Mutex<Vec<mpsc::UnboundedSender<PlatformEvent>>>,
    disconnect_calls: AtomicUsize,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            device: Device {
                id: "00:11:22:33:44:55".to_string(),
                name: Some("HC-08".to_string()),
            },
            fail_at: None,
            scan_delay: Duration::ZERO,
            link_up: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            disconnect_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_at(mut self, step: FailStep) -> Self {
        self.fail_at = Some(step);
        self
    }

    /// Make `request_device` take this long, like a real scan.
    pub fn with_scan_delay(mut self, delay: Duration) -> Self {
        self.scan_delay = delay;
        self
    }

    fn check(&self, step: FailStep) -> Result<()> {
        if self.fail_at == Some(step) {
            return Err(Error::Internal(format!("scripted failure at {:?}", step)));
        }
        Ok(())
    }

    pub fn last_request(&self) -> Option<DeviceRequest> {
        self.requests.lock().last().cloned()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn link_up(&self) -> bool {
        self.link_up.load(Ordering::SeqCst)
    }

    /// Drop the link and report it to listeners.
    pub fn drop_link(&self) {
        self.link_up.store(false, Ordering::SeqCst);
        self.emit(PlatformEvent::Disconnected);
    }

    /// Drop the link without any event, as when the platform misses it.
    pub fn drop_link_silently(&self) {
        self.link_up.store(false, Ordering::SeqCst);
    }

    /// Deliver a value notification to listeners.
    pub fn notify(&self, value: &'static [u8]) {
        self.emit(PlatformEvent::Notification {
            characteristic_uuid: Uuid::nil(),
            value: Bytes::from_static(value),
        });
    }

    fn emit(&self, event: PlatformEvent) {
        self.listeners
            .lock()
            .retain(|tx| tx.unbounded_send(event.clone()).is_ok());
    }
}

#[async_trait]
impl BlePlatform for FakePlatform {
    async fn request_device(&self, request: &DeviceRequest) -> Result<Device> {
        self.requests.lock().push(request.clone());
        if !self.scan_delay.is_zero() {
            tokio::time::sleep(self.scan_delay).await;
        }
        self.check(FailStep::RequestDevice)?;
        Ok(self.device.clone())
    }

    async fn connect_gatt(&self, device: &Device) -> Result<GattServer> {
        self.check(FailStep::ConnectGatt)?;
        self.link_up.store(true, Ordering::SeqCst);
        Ok(GattServer {
            device_id: device.id.clone(),
        })
    }

    async fn primary_service(&self, server: &GattServer, uuid: Uuid) -> Result<Service> {
        self.check(FailStep::PrimaryService)?;
        Ok(Service {
            device_id: server.device_id.clone(),
            uuid,
        })
    }

    async fn characteristic(&self, service: &Service, uuid: Uuid) -> Result<Characteristic> {
        self.check(FailStep::Characteristic)?;
        Ok(Characteristic {
            device_id: service.device_id.clone(),
            service_uuid: service.uuid,
            uuid,
        })
    }

    async fn start_notifications(&self, _characteristic: &Characteristic) -> Result<()> {
        self.check(FailStep::StartNotifications)
    }

    async fn write_value(&self, _characteristic: &Characteristic, value: &[u8]) -> Result<()> {
        self.check(FailStep::Write)?;
        self.writes.lock().push(value.to_vec());
        Ok(())
    }

    async fn is_connected(&self, _device: &Device) -> Result<bool> {
        self.check(FailStep::IsConnected)?;
        Ok(self.link_up())
    }

    async fn disconnect(&self, _device: &Device) -> Result<()> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.link_up.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn events(&self, _device: &Device) -> Result<PlatformEventStream> {
        let (tx, rx) = mpsc::unbounded();
        self.listeners.lock().push(tx);
        Ok(Box::pin(rx))
    }
}
