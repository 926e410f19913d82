//! Collaboration session: connection lifecycle, reconnect and dispatch.
//!
//! ## Architecture
//!
//! ```text
//!  host ──Command──────▶ ┌────────────┐ ──spawn───────▶ ┌───────────────┐
//!                        │   Driver   │                 │  socket task  │ ◀──▶ server
//!  host ◀──SessionEvent─ │ (one task) │ ◀──SocketEvent─ │ (per attempt) │
//!                        └─────┬──────┘                 └───────────────┘
//!                              │ writes
//!                              ▼
//!                           Shared  ◀── host reads status and roster, sends frames
//! ```
//!
//! The driver task owns the only socket handle, the reconnect deadline and
//! the heartbeat interval. Every socket attempt carries a generation number;
//! events from a socket the driver has already let go of are ignored, which
//! is what keeps a close arriving after `disconnect()` from scheduling a
//! reconnect.
//!
//! Dropping a [`CollaborationSession`] stops the driver, which closes the
//! socket with a normal-closure code and cancels any pending reconnect.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::backoff::Backoff;
use crate::config::SessionConfig;
use crate::error::CollabError;
use crate::protocol::{
    CollaborationMessage, CursorPosition, EditType, Payload, PresenceAction, TemplateEdit,
    UserPresence,
};
use crate::roster::{Collaborator, Roster};
use crate::token::TokenStore;

/// Close code for an intentional, do-not-retry shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);
/// Reported when the peer closes without a status code.
const NO_STATUS: u16 = 1005;

// ───────────────────────────────────────────────────────────────────
// Public types
// ───────────────────────────────────────────────────────────────────

/// Connection state as seen by the host UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    /// Closed, either on purpose or while waiting for a scheduled retry.
    Disconnected,
    /// Retry budget exhausted; only an explicit `connect()` tries again.
    Failed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Host page visibility, used to revive a socket that died while hidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Template-level change requested by a remote collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateInstruction {
    Add {
        element_id: Option<String>,
        changes: Value,
    },
    Delete {
        element_id: String,
    },
    Update {
        changes: Value,
    },
}

/// Events delivered to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StatusChanged(ConnectionStatus),
    /// Socket opened; the joined presence frame has been sent.
    Connected,
    /// Socket closed. `None` means the transport dropped without a close frame.
    Disconnected { code: Option<u16> },
    ReconnectScheduled {
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
    },
    /// Retry budget exhausted; status is now [`ConnectionStatus::Failed`].
    ReconnectExhausted { attempts: u32 },
    TransportError(String),
    /// A remote `element_update`.
    ElementUpdated {
        sender_id: String,
        element_id: String,
        changes: Value,
    },
    /// A remote `element_add`, `element_delete` or `template_update`.
    TemplateChanged {
        sender_id: String,
        instruction: TemplateInstruction,
    },
    /// Active collaborators after a presence change.
    CollaboratorsChanged(Vec<Collaborator>),
    CursorMoved {
        sender_id: String,
        position: CursorPosition,
    },
}

// ───────────────────────────────────────────────────────────────────
// Internal messages
// ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    Visibility(Visibility),
    Shutdown,
}

#[derive(Debug)]
enum SocketEvent {
    Opened { generation: u64 },
    Frame { generation: u64, text: String },
    Error { generation: u64, message: String },
    Closed { generation: u64, code: Option<u16> },
}

impl SocketEvent {
    fn generation(&self) -> u64 {
        match self {
            SocketEvent::Opened { generation }
            | SocketEvent::Frame { generation, .. }
            | SocketEvent::Error { generation, .. }
            | SocketEvent::Closed { generation, .. } => *generation,
        }
    }
}

/// State readable from the host side.
struct Shared {
    status: RwLock<ConnectionStatus>,
    roster: RwLock<Roster>,
    last_error: RwLock<Option<String>>,
    /// Writer of the open socket. `None` unless the socket is open.
    outgoing: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    /// Set once the host has taken the event receiver.
    events_claimed: AtomicBool,
    /// Overflow of an unclaimed channel has already been logged.
    unclaimed_overflow_logged: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        Self {
            status: RwLock::new(ConnectionStatus::Disconnected),
            roster: RwLock::new(Roster::new()),
            last_error: RwLock::new(None),
            outgoing: Mutex::new(None),
            events_claimed: AtomicBool::new(false),
            unclaimed_overflow_logged: AtomicBool::new(false),
        }
    }

    /// Whether a full event channel deserves a warning. Nobody is reading
    /// an unclaimed channel, so that case is reported once.
    fn warn_on_overflow(&self) -> bool {
        self.events_claimed.load(Ordering::Acquire)
            || !self.unclaimed_overflow_logged.swap(true, Ordering::AcqRel)
    }

    /// Stamp and write one frame. `false` if the socket is not open.
    async fn send(&self, sender_id: &str, payload: Payload) -> bool {
        let outgoing = self.outgoing.lock().await;
        let Some(writer) = outgoing.as_ref() else {
            log::debug!("Socket not open, dropping {} frame", payload.kind());
            return false;
        };

        let kind = payload.kind();
        match CollaborationMessage::new(payload, sender_id).encode() {
            Ok(text) => writer.send(Message::text(text)).is_ok(),
            Err(e) => {
                log::warn!("Failed to encode {kind} frame: {e}");
                false
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Session handle
// ───────────────────────────────────────────────────────────────────

/// One collaborative editing session on a template.
///
/// Must be created inside a tokio runtime; the constructor spawns the
/// driver task. `connect()`, `disconnect()` and `set_visibility()` return
/// immediately and take effect on the driver.
pub struct CollaborationSession {
    config: Arc<SessionConfig>,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    event_rx: Option<mpsc::Receiver<SessionEvent>>,
    driver: Option<JoinHandle<()>>,
}

impl CollaborationSession {
    /// Validate `config` and start the (idle) driver. Nothing connects
    /// until [`connect`](Self::connect) is called.
    pub fn new(
        config: SessionConfig,
        tokens: impl TokenStore + 'static,
    ) -> Result<Self, CollabError> {
        config.validate()?;
        install_crypto_provider();

        let config = Arc::new(config);
        let shared = Arc::new(Shared::new());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity);
        let (socket_tx, socket_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            backoff: Backoff::new(config.reconnect_policy()),
            config: config.clone(),
            tokens: Arc::new(tokens),
            shared: shared.clone(),
            events: event_tx,
            socket_tx,
            generation: 0,
            socket: None,
            reconnect_at: None,
            visibility: Visibility::Visible,
        };
        let handle = tokio::spawn(driver.run(command_rx, socket_rx));

        Ok(Self {
            config,
            shared,
            commands: command_tx,
            event_rx: Some(event_rx),
            driver: Some(handle),
        })
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        let rx = self.event_rx.take();
        if rx.is_some() {
            self.shared.events_claimed.store(true, Ordering::Release);
        }
        rx
    }

    /// Open the socket. No-op while a socket is open or connecting.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Close with a normal-closure code and cancel any pending reconnect.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Report a host visibility change. Going from hidden to visible while
    /// the socket is not open triggers a `connect()`.
    pub fn set_visibility(&self, visibility: Visibility) {
        self.command(Command::Visibility(visibility));
    }

    /// Stamp `payload` with the local user id and the current time and
    /// write it. Returns `false` without queueing if the socket is not open.
    pub async fn send_message(&self, payload: Payload) -> bool {
        self.shared.send(&self.config.user_id, payload).await
    }

    pub async fn send_edit(&self, edit: TemplateEdit) -> bool {
        self.send_message(Payload::TemplateEdit(edit)).await
    }

    pub async fn send_cursor_move(&self, position: CursorPosition) -> bool {
        self.send_message(Payload::CursorMove(position)).await
    }

    /// Active collaborators, in join order.
    pub async fn collaborators(&self) -> Vec<Collaborator> {
        self.shared.roster.read().await.active()
    }

    /// Full roster snapshot including collaborators who left.
    pub async fn roster(&self) -> Roster {
        self.shared.roster.read().await.clone()
    }

    pub async fn connection_status(&self) -> ConnectionStatus {
        *self.shared.status.read().await
    }

    pub async fn is_connected(&self) -> bool {
        self.connection_status().await == ConnectionStatus::Connected
    }

    /// Human-readable banner text for the current failure, if any.
    pub async fn last_error(&self) -> Option<String> {
        self.shared.last_error.read().await.clone()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Disconnect and wait for the driver task to finish.
    pub async fn shutdown(mut self) -> Result<(), CollabError> {
        self.command(Command::Shutdown);
        if let Some(handle) = self.driver.take() {
            handle.await?;
        }
        Ok(())
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            log::warn!("Session driver for template {} has stopped", self.config.template_id);
        }
    }
}

impl Drop for CollaborationSession {
    fn drop(&mut self) {
        // Driver closes the socket and exits; ignore if it already has.
        let _ = self.commands.send(Command::Shutdown);
    }
}

// ───────────────────────────────────────────────────────────────────
// Driver
// ───────────────────────────────────────────────────────────────────

/// Socket attempt currently owned by the driver.
struct SocketHandle {
    generation: u64,
    writer: mpsc::UnboundedSender<Message>,
    open: bool,
}

struct Driver {
    config: Arc<SessionConfig>,
    tokens: Arc<dyn TokenStore>,
    shared: Arc<Shared>,
    events: mpsc::Sender<SessionEvent>,
    socket_tx: mpsc::UnboundedSender<SocketEvent>,
    backoff: Backoff,
    generation: u64,
    socket: Option<SocketHandle>,
    reconnect_at: Option<Instant>,
    visibility: Visibility,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut socket_rx: mpsc::UnboundedReceiver<SocketEvent>,
    ) {
        let mut heartbeat: Option<Interval> = None;

        loop {
            let reconnect_at = self.reconnect_at;

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => {
                        self.disconnect().await;
                        break;
                    }
                    Some(Command::Connect) => self.connect().await,
                    Some(Command::Disconnect) => self.disconnect().await,
                    Some(Command::Visibility(visibility)) => self.set_visibility(visibility).await,
                },

                Some(event) = socket_rx.recv() => self.handle_socket_event(event).await,

                () = sleep_until(reconnect_at) => {
                    self.reconnect_at = None;
                    log::info!("Reconnecting to template {}", self.config.template_id);
                    self.connect().await;
                }

                () = tick(&mut heartbeat) => self.announce(PresenceAction::Active).await,
            }

            match (self.is_open(), heartbeat.is_some()) {
                (true, false) => {
                    let period = self.config.heartbeat_interval();
                    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    heartbeat = Some(interval);
                }
                (false, true) => heartbeat = None,
                _ => {}
            }
        }

        log::debug!("Session driver for template {} stopped", self.config.template_id);
    }

    fn is_open(&self) -> bool {
        self.socket.as_ref().is_some_and(|s| s.open)
    }

    async fn connect(&mut self) {
        if self.socket.is_some() {
            log::debug!("Connect ignored: socket already open or connecting");
            return;
        }
        self.reconnect_at = None;
        if *self.shared.status.read().await == ConnectionStatus::Failed {
            self.backoff.reset();
        }

        let token = self.tokens.load().unwrap_or_else(|e| {
            log::warn!("Failed to read auth token: {e}");
            None
        });
        let url = self.config.session_url(token.as_deref());

        self.generation += 1;
        let generation = self.generation;
        let (writer, outgoing) = mpsc::unbounded_channel();
        tokio::spawn(run_socket(url, generation, outgoing, self.socket_tx.clone()));
        self.socket = Some(SocketHandle {
            generation,
            writer,
            open: false,
        });

        log::info!(
            "Connecting to template {} (attempt {})",
            self.config.template_id,
            generation
        );
        self.set_status(ConnectionStatus::Connecting).await;
    }

    async fn disconnect(&mut self) {
        self.reconnect_at = None;
        self.backoff.reset();

        if let Some(socket) = self.socket.take() {
            if socket.open {
                self.announce(PresenceAction::Left).await;
                *self.shared.outgoing.lock().await = None;
            }
            // A socket still connecting abandons the handshake on this, or
            // closes with 1000 if the handshake already finished.
            let _ = socket.writer.send(normal_close("client disconnect"));
            log::info!("Disconnected from template {}", self.config.template_id);
        }

        *self.shared.last_error.write().await = None;
        self.set_status(ConnectionStatus::Disconnected).await;
    }

    async fn set_visibility(&mut self, visibility: Visibility) {
        let previous = std::mem::replace(&mut self.visibility, visibility);
        if previous == Visibility::Hidden && visibility == Visibility::Visible && !self.is_open() {
            log::info!("Host visible again with no open socket, reconnecting");
            self.connect().await;
        }
    }

    async fn handle_socket_event(&mut self, event: SocketEvent) {
        let current = self.socket.as_ref().map(|s| s.generation);
        if current != Some(event.generation()) {
            log::debug!("Ignoring event from stale socket: {event:?}");
            return;
        }

        match event {
            SocketEvent::Opened { .. } => self.on_open().await,
            SocketEvent::Frame { text, .. } => self.dispatch(&text).await,
            SocketEvent::Error { message, .. } => {
                log::warn!("Transport error on template {}: {message}", self.config.template_id);
                self.emit(SessionEvent::TransportError(message));
            }
            SocketEvent::Closed { code, .. } => self.on_close(code).await,
        }
    }

    async fn on_open(&mut self) {
        let Some(socket) = self.socket.as_mut() else {
            return;
        };
        socket.open = true;
        *self.shared.outgoing.lock().await = Some(socket.writer.clone());

        self.backoff.reset();
        *self.shared.last_error.write().await = None;
        self.set_status(ConnectionStatus::Connected).await;
        self.emit(SessionEvent::Connected);
        log::info!("Connected to template {}", self.config.template_id);

        self.announce(PresenceAction::Joined).await;
    }

    async fn on_close(&mut self, code: Option<u16>) {
        self.socket = None;
        *self.shared.outgoing.lock().await = None;
        self.emit(SessionEvent::Disconnected { code });

        if code == Some(NORMAL_CLOSURE) {
            log::info!("Template {} closed normally", self.config.template_id);
            self.set_status(ConnectionStatus::Disconnected).await;
            return;
        }

        let max_attempts = self.backoff.max_attempts();
        match self.backoff.next_delay() {
            Some(delay) => {
                let attempt = self.backoff.attempts();
                self.reconnect_at = Some(Instant::now() + delay);
                log::warn!(
                    "Connection to template {} lost (code {code:?}), retry {attempt}/{max_attempts} in {delay:?}",
                    self.config.template_id
                );
                *self.shared.last_error.write().await =
                    Some(format!("Connection lost. Reconnecting... ({attempt}/{max_attempts})"));
                self.set_status(ConnectionStatus::Disconnected).await;
                self.emit(SessionEvent::ReconnectScheduled {
                    attempt,
                    max_attempts,
                    delay,
                });
            }
            None => {
                log::error!(
                    "Giving up on template {} after {max_attempts} reconnect attempts",
                    self.config.template_id
                );
                *self.shared.last_error.write().await =
                    Some("Connection lost. Please reload to rejoin the session.".to_string());
                self.set_status(ConnectionStatus::Failed).await;
                self.emit(SessionEvent::ReconnectExhausted {
                    attempts: max_attempts,
                });
            }
        }
    }

    /// Route one incoming text frame.
    async fn dispatch(&mut self, text: &str) {
        let message = match CollaborationMessage::decode(text) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("Dropping frame on template {}: {e}", self.config.template_id);
                return;
            }
        };
        let kind = message.payload.kind();
        log::debug!("Received {kind} from {}", message.sender_id);

        let local = message.is_from(&self.config.user_id);
        match message.payload {
            Payload::TemplateEdit(_) | Payload::CursorMove(_) if local => {
                log::debug!("Suppressing echo of own {kind} frame");
            }
            Payload::TemplateEdit(edit) => self.apply_edit(message.sender_id, edit),
            Payload::UserPresence(presence) => self.apply_presence(&presence).await,
            Payload::CursorMove(position) => self.emit(SessionEvent::CursorMoved {
                sender_id: message.sender_id,
                position,
            }),
        }
    }

    fn apply_edit(&self, sender_id: String, edit: TemplateEdit) {
        let event = match (edit.edit_type, edit.element_id) {
            (EditType::ElementUpdate, Some(element_id)) => SessionEvent::ElementUpdated {
                sender_id,
                element_id,
                changes: edit.changes,
            },
            (EditType::ElementAdd, element_id) => SessionEvent::TemplateChanged {
                sender_id,
                instruction: TemplateInstruction::Add {
                    element_id,
                    changes: edit.changes,
                },
            },
            (EditType::ElementDelete, Some(element_id)) => SessionEvent::TemplateChanged {
                sender_id,
                instruction: TemplateInstruction::Delete { element_id },
            },
            (EditType::TemplateUpdate, _) => SessionEvent::TemplateChanged {
                sender_id,
                instruction: TemplateInstruction::Update {
                    changes: edit.changes,
                },
            },
            (edit_type @ (EditType::ElementUpdate | EditType::ElementDelete), None) => {
                log::warn!("Dropping {edit_type:?} from {sender_id} without element_id");
                return;
            }
        };
        self.emit(event);
    }

    async fn apply_presence(&self, presence: &UserPresence) {
        if presence.user_id == self.config.user_id {
            return;
        }

        let active = {
            let mut roster = self.shared.roster.write().await;
            let next = roster.apply(presence);
            let before = roster.active();
            *roster = next;
            let after = roster.active();
            (before != after).then_some(after)
        };

        if let Some(collaborators) = active {
            log::debug!("{} active collaborators", collaborators.len());
            self.emit(SessionEvent::CollaboratorsChanged(collaborators));
        }
    }

    /// Send a presence frame for the local user.
    async fn announce(&self, action: PresenceAction) {
        let mut presence = UserPresence::new(action, self.config.user_id.clone());
        presence.name = self.config.user_name.clone();
        self.shared
            .send(&self.config.user_id, Payload::UserPresence(presence))
            .await;
    }

    async fn set_status(&self, status: ConnectionStatus) {
        let changed = {
            let mut current = self.shared.status.write().await;
            std::mem::replace(&mut *current, status) != status
        };
        if changed {
            self.emit(SessionEvent::StatusChanged(status));
        }
    }

    fn emit(&self, event: SessionEvent) {
        match self.events.try_send(event) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(event)) => {
                if self.shared.warn_on_overflow() {
                    log::warn!("Event channel full, dropping {event:?}");
                } else {
                    log::debug!("Event channel unclaimed and full, dropping {event:?}");
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// `wss://` needs a process-wide rustls provider. Installing fails
/// harmlessly when the host already picked one.
fn install_crypto_provider() {
    if rustls::crypto::CryptoProvider::get_default().is_none() {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }
}

fn normal_close(reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: reason.into(),
    }))
}

// ───────────────────────────────────────────────────────────────────
// Socket task
// ───────────────────────────────────────────────────────────────────

type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Sends `Closed` when the socket task ends, including by panic or abort,
/// so the driver never waits on a dead attempt.
struct CloseReport {
    generation: u64,
    events: mpsc::UnboundedSender<SocketEvent>,
    code: Option<u16>,
}

impl Drop for CloseReport {
    fn drop(&mut self) {
        let _ = self.events.send(SocketEvent::Closed {
            generation: self.generation,
            code: self.code,
        });
    }
}

/// Own one socket attempt from connect to close, reporting to the driver.
async fn run_socket(
    url: String,
    generation: u64,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
    events: mpsc::UnboundedSender<SocketEvent>,
) {
    let mut report = CloseReport {
        generation,
        events: events.clone(),
        code: None,
    };
    let report_error = |message: String| {
        let _ = events.send(SocketEvent::Error { generation, message });
    };

    let connect = tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(url.as_str()));
    // Nothing but a close is written before `Opened`, so any message here
    // means the driver gave up on this attempt.
    let ws = tokio::select! {
        biased;
        result = connect => match result {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => return report_error(e.to_string()),
            Err(_) => return report_error(format!("connect timed out after {CONNECT_TIMEOUT:?}")),
        },
        _ = outgoing.recv() => {
            log::debug!("Connect abandoned before the handshake finished");
            return;
        }
    };
    let _ = events.send(SocketEvent::Opened { generation });

    let (mut writer, mut reader) = ws.split();

    report.code = loop {
        tokio::select! {
            outbound = outgoing.recv() => {
                // Driver dropped the writer: treat like an explicit disconnect.
                let message = outbound.unwrap_or_else(|| normal_close("session dropped"));
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = writer.send(message).await {
                    report_error(e.to_string());
                    break None;
                }
                if closing {
                    drain_until_closed(&mut reader).await;
                    break Some(NORMAL_CLOSURE);
                }
            }

            inbound = reader.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(SocketEvent::Frame { generation, text: text.as_str().to_owned() });
                }
                Some(Ok(Message::Close(frame))) => {
                    drain_until_closed(&mut reader).await;
                    break Some(frame.map_or(NO_STATUS, |f| u16::from(f.code)));
                }
                Some(Ok(Message::Binary(_))) => log::debug!("Ignoring binary frame"),
                Some(Ok(_)) => {} // ping/pong answered by tungstenite
                Some(Err(e)) => {
                    report_error(e.to_string());
                    break None;
                }
                None => break None,
            }
        }
    };
}

/// Keep reading so tungstenite completes the close handshake.
async fn drain_until_closed(reader: &mut WsReader) {
    let drained = tokio::time::timeout(CLOSE_TIMEOUT, async {
        while let Some(Ok(_)) = reader.next().await {}
    })
    .await;
    if drained.is_err() {
        log::debug!("Close handshake did not finish within {CLOSE_TIMEOUT:?}");
    }
}
