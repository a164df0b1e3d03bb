//! BLE connection management.
//!
//! Owns the active session with the peripheral, runs the connect sequence,
//! and keeps the recorded connection state honest against the platform.

use chrono::{DateTime, Local};
use futures::StreamExt;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::platform::{
    BlePlatform, Characteristic, Device, DeviceRequest, GattServer, PlatformEvent,
};
use crate::ble::uuids::{self, DEFAULT_CHARACTERISTIC, DEFAULT_SERVICE};
use crate::error::{Error, Result};
use crate::protocol::status::{decode_text, StatusRules};

/// Connection state of the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not connected.
    #[default]
    Disconnected,
    /// Connect sequence in progress.
    Connecting,
    /// Connected, session held.
    Connected,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// Event for connection state changes.
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    /// Identifier of the device involved, if known.
    pub identifier: Option<String>,
    /// The new connection state.
    pub state: ConnectionState,
}

/// A status line for the user.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    /// Status text.
    pub text: String,
    /// When the status was set.
    pub at: DateTime<Local>,
}

/// Handles held while connected. Acquired and released together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    /// The selected device.
    pub device: Device,
    /// Its connected GATT server.
    pub server: GattServer,
    /// The writable characteristic.
    pub characteristic: Characteristic,
}

/// What to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    /// Service identifier as typed by the user.
    pub service: String,
    /// Characteristic identifier as typed by the user.
    pub characteristic: String,
    /// Device picker name prefixes.
    pub name_prefixes: Vec<String>,
}

impl Default for ConnectTarget {
    fn default() -> Self {
        Self {
            service: DEFAULT_SERVICE.to_string(),
            characteristic: DEFAULT_CHARACTERISTIC.to_string(),
            name_prefixes: uuids::DEFAULT_NAME_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl ConnectTarget {
    /// Resolve the service and characteristic UUIDs, falling back to the
    /// UART defaults for empty input.
    pub fn resolve(&self) -> Result<(Uuid, Uuid)> {
        let service = uuids::resolve_uuid(&self.service, DEFAULT_SERVICE)?;
        let characteristic = uuids::resolve_uuid(&self.characteristic, DEFAULT_CHARACTERISTIC)?;
        Ok((service, characteristic))
    }
}

/// A platform event tagged with the session it belongs to.
///
/// Events from a session that has since ended are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    /// Session counter at the time the listener was registered.
    pub session_id: u64,
    /// The platform event.
    pub event: PlatformEvent,
}

/// Manages the connection to a single UART peripheral.
pub struct ConnectionManager<P: BlePlatform + ?Sized> {
    /// The Bluetooth stack.
    platform: Arc<P>,
    /// Current connection state.
    state: Arc<RwLock<ConnectionState>>,
    /// Handles held while connected.
    session: Option<ActiveSession>,
    /// Counter identifying the current session's listener.
    session_id: u64,
    /// Forwards platform events of the current session.
    listener: Option<JoinHandle<()>>,
    /// Sink for forwarded platform events.
    session_tx: mpsc::UnboundedSender<SessionEvent>,
    /// Last status text.
    status: String,
    /// Notification prefix rules.
    status_rules: StatusRules,
    /// Channel for connection events.
    event_tx: broadcast::Sender<ConnectionEvent>,
    /// Channel for status updates.
    status_tx: broadcast::Sender<StatusUpdate>,
}

impl<P: BlePlatform + ?Sized> ConnectionManager<P> {
    /// Create a new connection manager.
    ///
    /// Returns the receiving end of the session event channel; the owner must
    /// feed what arrives there back into [`Self::handle_session_event`].
    pub fn new(
        platform: Arc<P>,
        status_rules: StatusRules,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (event_tx, _) = broadcast::channel(16);
        let (status_tx, _) = broadcast::channel(64);
        let (session_tx, session_rx) = mpsc::unbounded_channel();

        let manager = Self {
            platform,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            session: None,
            session_id: 0,
            listener: None,
            session_tx,
            status: ConnectionState::Disconnected.to_string(),
            status_rules,
            event_tx,
            status_tx,
        };

        (manager, session_rx)
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Shared view of the connection state, readable from other tasks.
    pub fn state_handle(&self) -> Arc<RwLock<ConnectionState>> {
        self.state.clone()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Get the active session, if connected.
    pub fn session(&self) -> Option<&ActiveSession> {
        self.session.as_ref()
    }

    /// Get the last status text.
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Replace the notification prefix rules.
    pub fn set_status_rules(&mut self, rules: StatusRules) {
        self.status_rules = rules;
    }

    /// Subscribe to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_tx.subscribe()
    }

    /// Subscribe to status updates.
    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusUpdate> {
        self.status_tx.subscribe()
    }

    /// Run the connect sequence.
    ///
    /// Connecting while already connected is a no-op. Connecting while a
    /// connect is running is rejected. On any failure the state returns to
    /// [`ConnectionState::Disconnected`] and no handles are kept.
    pub async fn connect(&mut self, target: &ConnectTarget) -> Result<()> {
        let current_state = self.state();

        if current_state.is_connected() {
            debug!("Already connected");
            return Ok(());
        }

        if current_state.is_transitioning() {
            return Err(Error::ConnectInProgress);
        }

        self.set_state(ConnectionState::Connecting);
        self.set_status("Searching for device...");
        info!("Requesting BLE device");

        match self.establish(target).await {
            Ok(session) => {
                let name = session.device.display_name().to_string();
                self.session = Some(session);
                self.set_status(format!("Connected: {}", name));
                self.set_state(ConnectionState::Connected);
                info!("Connection state: connected");
                Ok(())
            }
            Err(e) => {
                error!("Connect failed: {}", e);
                self.stop_listener();
                self.set_status(format!("Error: {}", e.reason()));
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Steps of the connect sequence. Nothing is stored on `self` except the
    /// event listener, which the caller stops on failure.
    async fn establish(&mut self, target: &ConnectTarget) -> Result<ActiveSession> {
        let (service_uuid, characteristic_uuid) = target.resolve()?;

        let request = DeviceRequest {
            name_prefixes: target.name_prefixes.clone(),
            optional_services: vec![service_uuid],
        };

        let device = self
            .platform
            .request_device(&request)
            .await
            .map_err(|e| Error::DeviceSelectionFailed { reason: e.reason() })?;
        info!("Device selected: {}", device.display_name());
        self.set_status(format!("Connecting to {}", device.display_name()));

        debug!("Connecting to GATT server");
        let server = self
            .platform
            .connect_gatt(&device)
            .await
            .map_err(|e| Error::GattConnectFailed { reason: e.reason() })?;
        info!("Connected to GATT server");
        self.set_status("Connected; discovering service...");

        match self
            .discover(&device, &server, service_uuid, characteristic_uuid)
            .await
        {
            Ok(characteristic) => Ok(ActiveSession {
                device,
                server,
                characteristic,
            }),
            Err(e) => {
                // Don't leave the link up behind a failed connect
                if let Err(disconnect_err) = self.platform.disconnect(&device).await {
                    debug!("Cleanup disconnect failed: {}", disconnect_err);
                }
                Err(e)
            }
        }
    }

    /// Resolve the characteristic, enable notifications, register the listener.
    async fn discover(
        &mut self,
        device: &Device,
        server: &GattServer,
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
    ) -> Result<Characteristic> {
        let service = self
            .platform
            .primary_service(server, service_uuid)
            .await
            .map_err(|e| {
                debug!("Service lookup failed: {}", e);
                Error::ServiceDiscoveryFailed {
                    uuid: service_uuid.to_string(),
                }
            })?;

        let characteristic = self
            .platform
            .characteristic(&service, characteristic_uuid)
            .await
            .map_err(|e| {
                debug!("Characteristic lookup failed: {}", e);
                Error::CharacteristicDiscoveryFailed {
                    uuid: characteristic_uuid.to_string(),
                }
            })?;

        match self.platform.start_notifications(&characteristic).await {
            Ok(()) => info!("Notifications enabled"),
            Err(e) => {
                let err = Error::NotificationUnavailable { reason: e.reason() };
                warn!("{}", err);
            }
        }

        self.start_listener(device).await;

        info!(
            "Ready to send commands. svc={} char={}",
            service_uuid, characteristic_uuid
        );

        Ok(characteristic)
    }

    /// Subscribe to the device's platform events and forward them, tagged
    /// with a fresh session id.
    async fn start_listener(&mut self, device: &Device) {
        self.stop_listener();
        self.session_id += 1;

        let mut events = match self.platform.events(device).await {
            Ok(events) => events,
            Err(e) => {
                warn!(
                    "Could not register disconnect listener ({}); relying on reconciliation",
                    e
                );
                return;
            }
        };

        let session_id = self.session_id;
        let session_tx = self.session_tx.clone();

        let handle = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if session_tx.send(SessionEvent { session_id, event }).is_err() {
                    break;
                }
            }
            debug!("Session {} event listener ended", session_id);
        });

        self.listener = Some(handle);
    }

    fn stop_listener(&mut self) {
        if let Some(handle) = self.listener.take() {
            handle.abort();
        }
    }

    /// Disconnect at the user's request.
    ///
    /// Without a connection this only reports that nothing is connected.
    pub async fn disconnect(&mut self) -> Result<()> {
        let session = match self.session.take() {
            Some(session) => session,
            None => {
                info!("No device connected");
                self.set_status("No device connected");
                return Ok(());
            }
        };

        self.stop_listener();
        let result = self.platform.disconnect(&session.device).await;

        self.set_status("Disconnected (requested)");
        self.set_state(ConnectionState::Disconnected);

        match result {
            Ok(()) => {
                info!("Disconnect requested from {}", session.device.display_name());
                Ok(())
            }
            Err(e) => {
                error!("Failed to disconnect: {}", e);
                Err(e)
            }
        }
    }

    /// Write a payload to the characteristic.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] without a session (the platform is not
    /// touched), [`Error::WriteFailed`] if the write fails. A failed write
    /// leaves the session in place.
    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        let characteristic = match &self.session {
            Some(session) => session.characteristic.clone(),
            None => {
                info!("Send cancelled: not connected");
                return Err(Error::NotConnected);
            }
        };

        trace!("Writing {} bytes: {:02X?}", payload.len(), payload);

        match self.platform.write_value(&characteristic, payload).await {
            Ok(()) => {
                info!("Sent to device: {}", String::from_utf8_lossy(payload));
                Ok(())
            }
            Err(e) => {
                let err = Error::WriteFailed { reason: e.reason() };
                warn!("{}", err);
                Err(err)
            }
        }
    }

    /// Apply an event forwarded from the session listener.
    pub fn handle_session_event(&mut self, event: SessionEvent) {
        if self.session.is_none() || event.session_id != self.session_id {
            debug!(
                "Ignoring event from stale session {}: {:?}",
                event.session_id, event.event
            );
            return;
        }

        match event.event {
            PlatformEvent::Disconnected => self.handle_disconnected(),
            PlatformEvent::Notification {
                characteristic_uuid,
                value,
            } => {
                trace!("Notification from {}", characteristic_uuid);
                self.handle_notification(&value);
            }
        }
    }

    /// React to the platform reporting the link as gone.
    ///
    /// Idempotent: does nothing when already disconnected.
    pub fn handle_disconnected(&mut self) {
        if self.session.is_none() && !self.state().is_connected() {
            debug!("Disconnect event while already disconnected");
            return;
        }

        info!("BLE disconnected (event)");
        self.clear_session();
        self.set_status("Disconnected");
        self.set_state(ConnectionState::Disconnected);
    }

    /// Interpret notification text. Returns the new status if a rule matched.
    pub fn handle_notification(&mut self, value: &[u8]) -> Option<String> {
        let text = decode_text(value);
        info!("Received from device: {}", text);

        let status = self.status_rules.status_for(&text)?.to_string();
        self.set_status(status.clone());
        Some(status)
    }

    /// Compare the platform's live connected flag with the recorded state.
    ///
    /// Returns the new state if they disagreed. Catches disconnects whose
    /// event never arrived.
    pub async fn reconcile(&mut self) -> Option<ConnectionState> {
        let recorded = self.state();
        if recorded.is_transitioning() {
            return None;
        }

        let live = match &self.session {
            Some(session) => match self.platform.is_connected(&session.device).await {
                Ok(connected) => connected,
                Err(e) => {
                    warn!("Connection monitor error: {}", e);
                    return None;
                }
            },
            None => false,
        };

        if live == recorded.is_connected() {
            return None;
        }

        let new_state = if live {
            ConnectionState::Connected
        } else {
            self.clear_session();
            ConnectionState::Disconnected
        };

        info!("Connection change detected: {}", new_state);
        self.set_status(new_state.to_string());
        self.set_state(new_state);
        Some(new_state)
    }

    fn clear_session(&mut self) {
        self.stop_listener();
        self.session = None;
    }

    /// Update the status text and emit an update.
    fn set_status(&mut self, text: impl Into<String>) {
        self.status = text.into();
        debug!("Status: {}", self.status);

        let _ = self.status_tx.send(StatusUpdate {
            text: self.status.clone(),
            at: Local::now(),
        });
    }

    /// Update the connection state and emit an event.
    fn set_state(&self, new_state: ConnectionState) {
        let old_state = {
            let mut state = self.state.write();
            let old = *state;
            *state = new_state;
            old
        };

        if old_state != new_state {
            debug!("Connection state changed: {} -> {}", old_state, new_state);

            let _ = self.event_tx.send(ConnectionEvent {
                identifier: self.session.as_ref().map(|s| s.device.id.clone()),
                state: new_state,
            });
        }
    }
}

impl<P: BlePlatform + ?Sized> Drop for ConnectionManager<P> {
    fn drop(&mut self) {
        self.stop_listener();
    }
}
