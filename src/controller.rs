//! Controller task.
//!
//! A single task owns the [`ConnectionManager`] and processes one
//! [`ControllerEvent`] at a time: user actions arrive through a
//! [`ControllerHandle`], platform events through the session listener, and a
//! fixed-interval tick drives reconciliation. Nothing else touches the
//! session, so a disconnect event and a reconciliation tick landing together
//! are applied one after the other and the second is a no-op.

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ble::connection::{
    ConnectTarget, ConnectionEvent, ConnectionManager, ConnectionState, SessionEvent,
    StatusUpdate,
};
use crate::ble::platform::{BlePlatform, PlatformEvent};
use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::feedback::Feedback;
use crate::protocol::command::Command;

/// Inbox capacity of the controller task.
const INBOX_CAPACITY: usize = 32;

/// Everything the controller reacts to.
#[derive(Debug)]
pub enum ControllerEvent {
    /// The user asked to connect.
    ConnectRequested {
        /// Receives the connect result.
        reply: oneshot::Sender<Result<()>>,
    },
    /// The user asked to disconnect.
    DisconnectRequested {
        /// Receives the disconnect result.
        reply: oneshot::Sender<Result<()>>,
    },
    /// The user pressed On or Off.
    SendRequested {
        /// The command to send.
        command: Command,
        /// Receives the send result.
        reply: oneshot::Sender<Result<()>>,
    },
    /// The platform reported the link as gone.
    PlatformDisconnected {
        /// Session the event belongs to.
        session_id: u64,
    },
    /// The characteristic sent a value notification.
    NotificationReceived {
        /// Session the event belongs to.
        session_id: u64,
        /// Characteristic that notified.
        characteristic_uuid: Uuid,
        /// Raw notification value.
        value: Bytes,
    },
    /// Time to compare recorded and live connection state.
    ReconciliationTick,
    /// The user flipped the text-mode toggle.
    SetTextMode {
        /// Whether text mode is on.
        enabled: bool,
    },
    /// The user edited the identifier fields.
    SetIdentifiers {
        /// Service identifier text.
        service: String,
        /// Characteristic identifier text.
        characteristic: String,
        /// Receives the cleaned values.
        reply: oneshot::Sender<(String, String)>,
    },
    /// Stop the task, disconnecting first.
    Shutdown {
        /// Signalled once the task is done.
        reply: oneshot::Sender<()>,
    },
}

impl From<SessionEvent> for ControllerEvent {
    fn from(event: SessionEvent) -> Self {
        let session_id = event.session_id;
        match event.event {
            PlatformEvent::Disconnected => Self::PlatformDisconnected { session_id },
            PlatformEvent::Notification {
                characteristic_uuid,
                value,
            } => Self::NotificationReceived {
                session_id,
                characteristic_uuid,
                value,
            },
        }
    }
}

/// The controller task state.
pub struct Controller<P: BlePlatform + ?Sized> {
    manager: ConnectionManager<P>,
    session_rx: mpsc::UnboundedReceiver<SessionEvent>,
    inbox: mpsc::Receiver<ControllerEvent>,
    /// Requests that arrived while a connect was running.
    deferred: VecDeque<ControllerEvent>,
    config: RemoteConfig,
    feedback: Box<dyn Feedback>,
}

impl<P: BlePlatform + ?Sized + 'static> Controller<P> {
    /// Start the controller task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn spawn(
        platform: Arc<P>,
        config: RemoteConfig,
        feedback: Box<dyn Feedback>,
    ) -> Result<ControllerHandle> {
        config.validate()?;

        let (manager, session_rx) =
            ConnectionManager::new(platform, config.status_rules.clone());
        let (tx, inbox) = mpsc::channel(INBOX_CAPACITY);

        let handle = ControllerHandle {
            tx,
            state: manager.state_handle(),
            status_rx: manager.subscribe_status(),
            connection_rx: manager.subscribe(),
        };

        let controller = Self {
            manager,
            session_rx,
            inbox,
            deferred: VecDeque::new(),
            config,
            feedback,
        };

        tokio::spawn(controller.run());

        Ok(handle)
    }

    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.reconcile_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        info!(
            "Controller started (reconcile every {:?})",
            self.config.reconcile_interval()
        );

        loop {
            let event = match self.deferred.pop_front() {
                Some(event) => Some(event),
                None => tokio::select! {
                    event = self.inbox.recv() => event,
                    Some(event) = self.session_rx.recv() => Some(ControllerEvent::from(event)),
                    _ = ticker.tick() => Some(ControllerEvent::ReconciliationTick),
                },
            };

            let Some(event) = event else {
                debug!("All controller handles dropped");
                if self.manager.is_connected() {
                    if let Err(e) = self.manager.disconnect().await {
                        warn!("Error disconnecting after handles dropped: {}", e);
                    }
                }
                break;
            };

            if !self.process(event).await {
                break;
            }
        }

        debug!("Controller task ended");
    }

    /// Apply one event. Returns `false` when the task should stop.
    async fn process(&mut self, event: ControllerEvent) -> bool {
        match event {
            ControllerEvent::ConnectRequested { reply } => {
                self.feedback.cue();
                info!("Action: Connect pressed");
                let target = self.config.target();
                let _ = reply.send(self.connect_exclusive(&target).await);
            }
            ControllerEvent::DisconnectRequested { reply } => {
                self.feedback.cue();
                info!("Action: Disconnect pressed");
                let _ = reply.send(self.manager.disconnect().await);
            }
            ControllerEvent::SendRequested { command, reply } => {
                self.feedback.cue();
                info!("Action: {} pressed", command);
                let payload = self
                    .config
                    .commands
                    .encode(command, self.config.command_mode());
                let _ = reply.send(self.manager.send(&payload).await);
            }
            ControllerEvent::PlatformDisconnected { session_id } => {
                self.manager.handle_session_event(SessionEvent {
                    session_id,
                    event: PlatformEvent::Disconnected,
                });
            }
            ControllerEvent::NotificationReceived {
                session_id,
                characteristic_uuid,
                value,
            } => {
                self.manager.handle_session_event(SessionEvent {
                    session_id,
                    event: PlatformEvent::Notification {
                        characteristic_uuid,
                        value,
                    },
                });
            }
            ControllerEvent::ReconciliationTick => {
                self.manager.reconcile().await;
            }
            ControllerEvent::SetTextMode { enabled } => {
                info!("Text mode {}", if enabled { "on" } else { "off" });
                self.config.text_mode = enabled;
            }
            ControllerEvent::SetIdentifiers {
                service,
                characteristic,
                reply,
            } => {
                self.config.set_identifiers(&service, &characteristic);
                debug!(
                    "Identifiers set: svc={} char={}",
                    self.config.service, self.config.characteristic
                );
                let _ = reply.send((
                    self.config.service.clone(),
                    self.config.characteristic.clone(),
                ));
            }
            ControllerEvent::Shutdown { reply } => {
                info!("Shutting down controller");
                if self.manager.is_connected() {
                    if let Err(e) = self.manager.disconnect().await {
                        warn!("Error disconnecting on shutdown: {}", e);
                    }
                }
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    /// Run the connect sequence while still reading the inbox.
    ///
    /// Connect requests arriving meanwhile get [`Error::ConnectInProgress`],
    /// sends get [`Error::NotConnected`], everything else waits in
    /// `deferred` until the sequence is over.
    async fn connect_exclusive(&mut self, target: &ConnectTarget) -> Result<()> {
        let Self {
            manager,
            inbox,
            deferred,
            feedback,
            ..
        } = self;

        let connect = manager.connect(target);
        tokio::pin!(connect);
        let mut inbox_open = true;

        loop {
            tokio::select! {
                result = &mut connect => return result,
                event = inbox.recv(), if inbox_open => match event {
                    Some(ControllerEvent::ConnectRequested { reply }) => {
                        feedback.cue();
                        warn!("Connect pressed while connecting");
                        let _ = reply.send(Err(Error::ConnectInProgress));
                    }
                    Some(ControllerEvent::SendRequested { command, reply }) => {
                        feedback.cue();
                        warn!("{} pressed while connecting", command);
                        let _ = reply.send(Err(Error::NotConnected));
                    }
                    Some(event) => deferred.push_back(event),
                    None => inbox_open = false,
                },
            }
        }
    }
}

/// Handle for talking to a running controller.
pub struct ControllerHandle {
    tx: mpsc::Sender<ControllerEvent>,
    state: Arc<RwLock<ConnectionState>>,
    status_rx: broadcast::Receiver<StatusUpdate>,
    connection_rx: broadcast::Receiver<ConnectionEvent>,
}

impl ControllerHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> ControllerEvent,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| Error::ControllerStopped)?;
        rx.await.map_err(|_| Error::ControllerStopped)
    }

    /// Run the connect sequence.
    pub async fn connect(&self) -> Result<()> {
        self.request(|reply| ControllerEvent::ConnectRequested { reply })
            .await?
    }

    /// Disconnect, if connected.
    pub async fn disconnect(&self) -> Result<()> {
        self.request(|reply| ControllerEvent::DisconnectRequested { reply })
            .await?
    }

    /// Send On or Off in the current mode.
    pub async fn send(&self, command: Command) -> Result<()> {
        self.request(|reply| ControllerEvent::SendRequested { command, reply })
            .await?
    }

    /// Switch between text and single-byte commands.
    pub async fn set_text_mode(&self, enabled: bool) -> Result<()> {
        self.tx
            .send(ControllerEvent::SetTextMode { enabled })
            .await
            .map_err(|_| Error::ControllerStopped)
    }

    /// Set the identifier text used by the next connect. Returns the cleaned
    /// values.
    pub async fn set_identifiers(
        &self,
        service: &str,
        characteristic: &str,
    ) -> Result<(String, String)> {
        let service = service.to_string();
        let characteristic = characteristic.to_string();
        self.request(|reply| ControllerEvent::SetIdentifiers {
            service,
            characteristic,
            reply,
        })
        .await
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Subscribe to status updates.
    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusUpdate> {
        self.status_rx.resubscribe()
    }

    /// Subscribe to connection state changes.
    pub fn subscribe_connection(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connection_rx.resubscribe()
    }

    /// Disconnect and stop the controller task.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| ControllerEvent::Shutdown { reply })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::fake::{FailStep, FakePlatform};
    use crate::feedback::Silent;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn spawn(platform: &Arc<FakePlatform>, reconcile_ms: u64) -> ControllerHandle {
        let config = RemoteConfig {
            reconcile_interval_ms: reconcile_ms,
            ..RemoteConfig::default()
        };
        Controller::spawn(platform.clone(), config, Box::new(Silent)).unwrap()
    }

    async fn wait_for_state(handle: &ControllerHandle, state: ConnectionState) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while handle.state() != state {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("state change");
    }

    #[tokio::test]
    async fn test_on_off_payloads() {
        let platform = Arc::new(FakePlatform::new());
        let handle = spawn(&platform, 2_000);

        assert_ok!(handle.connect().await);
        assert_eq!(handle.state(), ConnectionState::Connected);

        assert_ok!(handle.send(Command::On).await);
        assert_ok!(handle.send(Command::Off).await);
        assert_ok!(handle.set_text_mode(true).await);
        assert_ok!(handle.send(Command::On).await);
        assert_ok!(handle.send(Command::Off).await);

        assert_eq!(
            platform.writes(),
            vec![
                b"a".to_vec(),
                b"b".to_vec(),
                b"LIGAR".to_vec(),
                b"DESLIGAR".to_vec()
            ]
        );

        handle.shutdown().await.unwrap();
        assert_eq!(platform.disconnect_calls(), 1);
    }

    #[tokio::test]
    async fn test_second_connect_while_connecting_is_rejected() {
        let platform = Arc::new(
            FakePlatform::new()
                .with_scan_delay(Duration::from_millis(100))
                .failing_at(FailStep::RequestDevice),
        );
        let handle = spawn(&platform, 2_000);

        let (first, second) = tokio::join!(handle.connect(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.connect().await
        });

        assert!(matches!(first, Err(Error::DeviceSelectionFailed { .. })));
        assert!(matches!(second, Err(Error::ConnectInProgress)));
        assert_eq!(platform.request_count(), 1);
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_requests_during_connect() {
        let platform =
            Arc::new(FakePlatform::new().with_scan_delay(Duration::from_millis(100)));
        let handle = spawn(&platform, 2_000);

        let (connected, sent, text_mode) = tokio::join!(
            handle.connect(),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                handle.send(Command::On).await
            },
            async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                handle.set_text_mode(true).await
            }
        );

        assert_ok!(connected);
        assert!(matches!(sent, Err(Error::NotConnected)));
        assert_ok!(text_mode);
        assert!(platform.writes().is_empty());

        // The text-mode toggle was applied once the connect finished
        assert_ok!(handle.send(Command::On).await);
        assert_eq!(platform.writes(), vec![b"LIGAR".to_vec()]);
    }

    #[tokio::test]
    async fn test_send_before_connect() {
        let platform = Arc::new(FakePlatform::new());
        let handle = spawn(&platform, 2_000);

        let err = assert_err!(handle.send(Command::On).await);
        assert!(matches!(err, Error::NotConnected));
        assert!(platform.writes().is_empty());
    }

    #[tokio::test]
    async fn test_connect_failure_reported() {
        let platform = Arc::new(FakePlatform::new().failing_at(FailStep::PrimaryService));
        let handle = spawn(&platform, 2_000);
        let mut status = handle.subscribe_status();

        let err = handle.connect().await.unwrap_err();
        assert!(matches!(err, Error::ServiceDiscoveryFailed { .. }));
        assert_eq!(handle.state(), ConnectionState::Disconnected);

        let mut last = None;
        while let Ok(update) = status.try_recv() {
            last = Some(update.text);
        }
        assert!(last.unwrap().starts_with("Error: "));
    }

    #[tokio::test]
    async fn test_disconnect_event_and_tick_transition_once() {
        let platform = Arc::new(FakePlatform::new());
        let handle = spawn(&platform, 10);
        let mut connection = handle.subscribe_connection();

        handle.connect().await.unwrap();
        platform.drop_link();
        wait_for_state(&handle, ConnectionState::Disconnected).await;

        // Give several reconciliation ticks a chance to run
        tokio::time::sleep(Duration::from_millis(60)).await;

        let mut disconnects = 0;
        while let Ok(event) = connection.try_recv() {
            if event.state == ConnectionState::Disconnected {
                disconnects += 1;
            }
        }
        assert_eq!(disconnects, 1);
    }

    #[tokio::test]
    async fn test_reconciliation_catches_silent_drop() {
        let platform = Arc::new(FakePlatform::new());
        let handle = spawn(&platform, 10);

        handle.connect().await.unwrap();
        platform.drop_link_silently();
        wait_for_state(&handle, ConnectionState::Disconnected).await;

        let err = handle.send(Command::On).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn test_notification_status() {
        let platform = Arc::new(FakePlatform::new());
        let handle = spawn(&platform, 2_000);
        let mut status = handle.subscribe_status();

        handle.connect().await.unwrap();
        platform.notify(b"STATUS:ON");

        let update = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let update = status.recv().await.expect("status");
                if update.text.starts_with("System") {
                    return update;
                }
            }
        })
        .await
        .expect("status update");
        assert_eq!(update.text, "System: On");
    }

    #[test]
    fn test_session_event_keeps_characteristic() {
        let event = ControllerEvent::from(SessionEvent {
            session_id: 7,
            event: PlatformEvent::Notification {
                characteristic_uuid: crate::ble::uuids::DEFAULT_CHARACTERISTIC_UUID,
                value: Bytes::from_static(b"ACK:ON"),
            },
        });
        match event {
            ControllerEvent::NotificationReceived {
                session_id,
                characteristic_uuid,
                value,
            } => {
                assert_eq!(session_id, 7);
                assert_eq!(
                    characteristic_uuid,
                    crate::ble::uuids::DEFAULT_CHARACTERISTIC_UUID
                );
                assert_eq!(value, Bytes::from_static(b"ACK:ON"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_set_identifiers_cleans_input() {
        let platform = Arc::new(FakePlatform::new());
        let handle = spawn(&platform, 2_000);

        let (service, characteristic) = handle.set_identifiers("0xFFE0", "").await.unwrap();
        assert_eq!(service, "ffe0");
        assert_eq!(characteristic, "ffe1");
    }

    #[tokio::test]
    async fn test_dropping_handles_disconnects() {
        let platform = Arc::new(FakePlatform::new());
        let handle = spawn(&platform, 2_000);

        handle.connect().await.unwrap();
        drop(handle);

        tokio::time::timeout(Duration::from_secs(2), async {
            while platform.disconnect_calls() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("disconnect after handles dropped");
        assert!(!platform.link_up());
    }

    #[tokio::test]
    async fn test_stopped_controller() {
        let platform = Arc::new(FakePlatform::new());
        let handle = spawn(&platform, 2_000);

        handle.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(matches!(
            handle.connect().await,
            Err(Error::ControllerStopped)
        ));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let platform = Arc::new(FakePlatform::new());
        let config = RemoteConfig {
            reconcile_interval_ms: 0,
            ..RemoteConfig::default()
        };
        assert!(matches!(
            Controller::spawn(platform, config, Box::new(Silent)),
            Err(Error::Config(_))
        ));
    }
}
