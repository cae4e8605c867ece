// ── Bridge session ──
//
// Full lifecycle of one bridge connection: connect, handshake, the
// receive/command pump, reconnection and teardown. The task driving
// `run()` owns the transport and session keys and is the only writer
// to the device registry.

mod handle;
mod room;
mod router;

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use strum::Display;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use xcomfort_api::{
    Connector, Envelope, OutboundCommand, SecureConnection, Telegram, TransportError, WsConnector,
    codec,
};

use crate::command::{CommandEnvelope, CommandFuture, InFlight};
use crate::config::SessionConfig;
use crate::error::{BridgeError, CommandError};
use crate::model::{BridgeInfo, Component, DeviceId, DeviceValue, Room, RoomId};
use crate::store::{Collection, ComponentSnapshot, DeviceRegistry, RoomSnapshot};
use crate::stream::{DeviceStream, StateHub, SubscriptionHandle};

pub use handle::DeviceHandle;
pub use room::RoomHandle;

use self::router::Router;

type CommandRx = mpsc::UnboundedReceiver<CommandEnvelope>;
type Secure<C> = SecureConnection<<C as Connector>::Connection>;

// ── SessionState ─────────────────────────────────────────────────────

/// Lifecycle state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    /// Created, `run()` not called yet.
    Idle,
    Connecting,
    Handshaking,
    Running,
    /// Connection lost; reconnecting.
    Disconnected,
    Closing,
    Closed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

/// Create a session for the bridge at `address`. No I/O happens until
/// [`BridgeSession::run`] is called.
pub fn open_session(address: impl Into<String>, auth_key: impl Into<String>) -> BridgeSession {
    BridgeSession::with_config(SessionConfig::new(address, auth_key))
}

// ── BridgeSession ────────────────────────────────────────────────────

/// Handle to one bridge session.
///
/// Cheaply cloneable. One clone drives [`run`](Self::run); any other may
/// read devices, send commands or [`close`](Self::close) the session.
pub struct BridgeSession<C: Connector = WsConnector> {
    inner: Arc<SessionInner<C>>,
}

impl<C: Connector> Clone for BridgeSession<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct SessionInner<C: Connector> {
    config: SessionConfig,
    connector: C,
    registry: DeviceRegistry,
    rooms: Collection<RoomId, Room>,
    components: Collection<u32, Component>,
    hub: StateHub,
    state: watch::Sender<SessionState>,
    bridge_info: watch::Sender<Option<BridgeInfo>>,
    command_tx: mpsc::UnboundedSender<CommandEnvelope>,
    command_rx: Mutex<Option<CommandRx>>,
    cancel: CancellationToken,
}

impl BridgeSession {
    /// Session over a real WebSocket connection.
    pub fn with_config(config: SessionConfig) -> Self {
        Self::with_connector(config, WsConnector)
    }
}

impl<C: Connector> BridgeSession<C> {
    pub fn with_connector(config: SessionConfig, connector: C) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (bridge_info, _) = watch::channel(None);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let hub = StateHub::new(config.dispatch_capacity);

        Self {
            inner: Arc::new(SessionInner {
                config,
                connector,
                registry: DeviceRegistry::new(),
                rooms: Collection::new(),
                components: Collection::new(),
                hub,
                state,
                bridge_info,
                command_tx,
                command_rx: Mutex::new(Some(command_rx)),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Home data the bridge announced, once received.
    pub fn bridge_info(&self) -> Option<BridgeInfo> {
        self.inner.bridge_info.borrow().clone()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Connect, authenticate and process telegrams until the session is
    /// closed.
    ///
    /// Resolves with `Ok(())` after [`close`](Self::close), or with the
    /// error that ended the session. A session runs at most once.
    pub async fn run(&self) -> Result<(), BridgeError> {
        let mut refusal = None;
        self.inner.state.send_if_modified(|state| match *state {
            SessionState::Idle => {
                *state = SessionState::Connecting;
                true
            }
            SessionState::Closing | SessionState::Closed => {
                refusal = Some(BridgeError::Closed);
                false
            }
            _ => {
                refusal = Some(BridgeError::AlreadyRunning);
                false
            }
        });
        if let Some(err) = refusal {
            return Err(err);
        }
        let Some(commands) = self.inner.command_rx.lock().take() else {
            return Err(BridgeError::AlreadyRunning);
        };

        info!(address = %self.inner.config.address, "starting bridge session");
        let dispatcher = tokio::spawn(self.inner.hub.clone().dispatch());

        let mut release = Release {
            inner: &self.inner,
            commands,
        };
        let result = self.inner.drive(&mut release.commands).await;
        if let Err(ref e) = result {
            error!(error = %e, "bridge session failed");
        }

        self.inner.shut_down(&mut release.commands);
        let _ = dispatcher.await;
        debug!(
            dropped_updates = self.inner.hub.dropped_updates(),
            "state dispatch drained"
        );
        drop(release);
        result
    }

    /// Stop the session and release its connection.
    ///
    /// Resolves once the session is `Closed`. Safe to call from any task,
    /// any number of times.
    pub async fn close(&self) {
        self.inner.cancel.cancel();

        let was_idle = self.inner.state.send_if_modified(|state| {
            if *state == SessionState::Idle {
                *state = SessionState::Closing;
                true
            } else {
                false
            }
        });
        if was_idle {
            if let Some(commands) = self.inner.command_rx.lock().take() {
                drop(Release {
                    inner: &self.inner,
                    commands,
                });
            }
            return;
        }

        let mut state = self.inner.state.subscribe();
        let _ = state.wait_for(|s| *s == SessionState::Closed).await;
    }

    // ── Devices ──────────────────────────────────────────────────────

    /// Every known device.
    ///
    /// Waits until the bridge has delivered its complete device list,
    /// unless the session is closing or closed, in which case the
    /// current (possibly empty) inventory is returned.
    pub async fn get_devices(&self) -> BTreeMap<DeviceId, DeviceHandle<C>> {
        self.wait_loaded().await;
        self.inner
            .registry
            .snapshot()
            .values()
            .map(|device| (device.id, DeviceHandle::new(Arc::clone(device), self.clone())))
            .collect()
    }

    /// The device with `id`, if currently known. Does not wait.
    pub fn device(&self, id: DeviceId) -> Option<DeviceHandle<C>> {
        self.inner
            .registry
            .get(id)
            .map(|device| DeviceHandle::new(device, self.clone()))
    }

    /// Inventory snapshots, updated on every registry change.
    pub fn devices(&self) -> DeviceStream {
        DeviceStream::new(self.inner.registry.subscribe())
    }

    // ── Rooms and components ─────────────────────────────────────────

    /// Every known room. Waits like [`get_devices`](Self::get_devices).
    pub async fn get_rooms(&self) -> BTreeMap<RoomId, RoomHandle<C>> {
        self.wait_loaded().await;
        self.inner
            .rooms
            .snapshot()
            .values()
            .map(|room| (room.id, RoomHandle::new(Arc::clone(room), self.clone())))
            .collect()
    }

    /// The room with `id`, if currently known. Does not wait.
    pub fn room(&self, id: RoomId) -> Option<RoomHandle<C>> {
        self.inner
            .rooms
            .get(id)
            .map(|room| RoomHandle::new(room, self.clone()))
    }

    /// Room snapshots, updated on every room change.
    pub fn room_changes(&self) -> watch::Receiver<RoomSnapshot> {
        self.inner.rooms.subscribe()
    }

    /// Every known component. Waits like [`get_devices`](Self::get_devices).
    pub async fn get_components(&self) -> ComponentSnapshot {
        self.wait_loaded().await;
        self.inner.components.snapshot()
    }

    pub fn component(&self, id: u32) -> Option<Arc<Component>> {
        self.inner.components.get(id)
    }

    /// Until the bridge has delivered its complete inventory or the
    /// session is closing.
    async fn wait_loaded(&self) {
        let mut loaded = self.inner.registry.loaded();
        let mut state = self.inner.state.subscribe();
        loop {
            if *loaded.borrow_and_update() || state.borrow_and_update().is_terminal() {
                return;
            }
            tokio::select! {
                changed = loaded.changed() => if changed.is_err() { return },
                changed = state.changed() => if changed.is_err() { return },
            }
        }
    }

    /// Register `observer` for state changes of `device_id`.
    pub fn subscribe<F>(&self, device_id: DeviceId, observer: F) -> SubscriptionHandle
    where
        F: Fn(&DeviceValue) + Send + Sync + 'static,
    {
        self.inner.hub.subscribe(device_id, Arc::new(observer))
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Queue `command` for the bridge.
    ///
    /// Commands are written in call order. Commands queued before the
    /// session is running are sent once it is. The returned future
    /// resolves when the bridge acknowledges the command.
    pub fn send_command(&self, command: OutboundCommand) -> CommandFuture {
        if self.state().is_terminal() {
            return CommandFuture::ready(Err(CommandError::ConnectionLost));
        }
        let (response_tx, rx) = tokio::sync::oneshot::channel();
        let envelope = CommandEnvelope {
            command,
            response_tx,
        };
        if let Err(mpsc::error::SendError(envelope)) = self.inner.command_tx.send(envelope) {
            let _ = envelope.response_tx.send(Err(CommandError::ConnectionLost));
        }
        CommandFuture::new(rx)
    }

    pub(crate) fn registry(&self) -> &DeviceRegistry {
        &self.inner.registry
    }

    pub(crate) fn rooms(&self) -> &Collection<RoomId, Room> {
        &self.inner.rooms
    }
}

// ── Run loop ─────────────────────────────────────────────────────────

enum PumpExit {
    Cancelled,
    Lost(xcomfort_api::Error),
}

impl<C: Connector> SessionInner<C> {
    fn set_state(&self, next: SessionState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                debug!(from = %state, to = %next, "session state");
                *state = next;
                true
            }
        });
    }

    async fn drive(&self, commands: &mut CommandRx) -> Result<(), BridgeError> {
        let Some(mut secure) = self.establish().await? else {
            return Ok(());
        };
        loop {
            let mut in_flight = InFlight::default();
            let exit = self.pump(&mut secure, commands, &mut in_flight).await;
            debug!(unacknowledged = in_flight.len(), "pump stopped");
            in_flight.fail_all();
            secure.close().await;

            match exit {
                PumpExit::Cancelled => return Ok(()),
                PumpExit::Lost(e) => {
                    warn!(error = %e, "bridge connection lost");
                    self.set_state(SessionState::Disconnected);
                    match self.reconnect(&e).await? {
                        Some(fresh) => secure = fresh,
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    /// Connect and authenticate. `None` if cancelled along the way.
    async fn establish(&self) -> Result<Option<Secure<C>>, BridgeError> {
        let config = &self.config;
        self.set_state(SessionState::Connecting);

        let conn = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Ok(None),
            conn = self.connector.connect(&config.address) => {
                conn.map_err(xcomfort_api::Error::from)?
            }
        };

        self.set_state(SessionState::Handshaking);
        let mut secure = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Ok(None),
            secure = xcomfort_api::handshake(
                conn,
                &config.auth_key,
                &config.client,
                config.handshake_timeout,
            ) => secure?,
        };

        for request in [
            OutboundCommand::RequestDevices,
            OutboundCommand::RequestRooms,
            OutboundCommand::Heartbeat,
        ] {
            let mc = secure.next_mc();
            secure.send_envelope(&request.to_envelope(mc)).await?;
        }

        info!(device_id = %secure.bridge().device_id, "connected to bridge");
        self.set_state(SessionState::Running);
        Ok(Some(secure))
    }

    async fn reconnect(
        &self,
        cause: &xcomfort_api::Error,
    ) -> Result<Option<Secure<C>>, BridgeError> {
        let policy = &self.config.reconnect;
        let mut last_error = cause.to_string();

        for attempt in 0..policy.max_attempts {
            let delay = policy.backoff(attempt);
            info!(
                attempt = attempt + 1,
                max_attempts = policy.max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "reconnecting to bridge"
            );
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(None),
                () = tokio::time::sleep(delay) => {}
            }

            match self.establish().await {
                Ok(secure) => return Ok(secure),
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "reconnect attempt failed");
                    last_error = e.to_string();
                }
            }
        }

        Err(BridgeError::Connection { reason: last_error })
    }

    async fn pump(
        &self,
        secure: &mut Secure<C>,
        commands: &mut CommandRx,
        in_flight: &mut InFlight,
    ) -> PumpExit {
        let bridge_device_id = secure.bridge().device_id.clone();

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return PumpExit::Cancelled,
                frame = secure.recv_text() => {
                    let text = match frame {
                        Some(Ok(text)) => text,
                        Some(Err(e)) => return PumpExit::Lost(e),
                        None => return PumpExit::Lost(TransportError::Closed.into()),
                    };
                    let mut router = Router {
                        registry: &self.registry,
                        rooms: &self.rooms,
                        components: &self.components,
                        hub: &self.hub,
                        bridge_info: &self.bridge_info,
                        in_flight,
                        bridge_device_id: &bridge_device_id,
                    };
                    if let Err(e) = handle_frame(secure, &text, &mut router).await {
                        return PumpExit::Lost(e);
                    }
                }
                Some(envelope) = commands.recv() => {
                    if let Err(e) = write_command(secure, in_flight, envelope).await {
                        return PumpExit::Lost(e);
                    }
                }
            }
        }
    }

    /// Close everything down. Idempotent.
    fn shut_down(&self, commands: &mut CommandRx) {
        self.state.send_if_modified(|state| {
            if *state == SessionState::Closed || *state == SessionState::Closing {
                false
            } else {
                *state = SessionState::Closing;
                true
            }
        });

        commands.close();
        let mut dropped = 0_usize;
        while let Ok(envelope) = commands.try_recv() {
            let _ = envelope.response_tx.send(Err(CommandError::ConnectionLost));
            dropped += 1;
        }
        if dropped > 0 {
            warn!(count = dropped, "failing unsent commands");
        }

        self.registry.clear();
        self.rooms.clear();
        self.components.clear();
        self.hub.close();
    }
}

/// Decode one inbound frame, acknowledge it and route it. Only a failed
/// acknowledgement write is fatal.
async fn handle_frame<K: xcomfort_api::Connection>(
    secure: &mut SecureConnection<K>,
    text: &str,
    router: &mut Router<'_>,
) -> Result<(), xcomfort_api::Error> {
    let envelope = match codec::decode(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "discarding malformed frame");
            return Ok(());
        }
    };

    if let Some(mc) = envelope.mc {
        secure.send_envelope(&Envelope::ack(mc)).await?;
    }

    match Telegram::from_envelope(&envelope) {
        Ok(telegram) => router.route(telegram),
        Err(e) => warn!(type_int = envelope.type_int, error = %e, "discarding telegram"),
    }
    Ok(())
}

async fn write_command<K: xcomfort_api::Connection>(
    secure: &mut SecureConnection<K>,
    in_flight: &mut InFlight,
    envelope: CommandEnvelope,
) -> Result<(), xcomfort_api::Error> {
    let CommandEnvelope {
        command,
        response_tx,
    } = envelope;
    let mc = secure.next_mc();

    match secure.send_envelope(&command.to_envelope(mc)).await {
        Ok(()) => {
            debug!(
                mc,
                kind = %command.message_type(),
                device_id = ?command.device_id(),
                "command sent"
            );
            in_flight.track(mc, &command, response_tx);
            Ok(())
        }
        Err(e) => {
            let _ = response_tx.send(Err(CommandError::ConnectionLost));
            Err(e)
        }
    }
}

/// Finishes teardown when dropped, including when the future driving
/// `run()` is dropped before completing.
struct Release<'a, C: Connector> {
    inner: &'a SessionInner<C>,
    commands: CommandRx,
}

impl<C: Connector> Drop for Release<'_, C> {
    fn drop(&mut self) {
        self.inner.shut_down(&mut self.commands);
        if self.inner.state.send_replace(SessionState::Closed) != SessionState::Closed {
            info!("bridge session closed");
        }
    }
}
