//! Session connection manager.
//!
//! [`ConnectionManager`] is a cheap, cloneable handle to an actor task that
//! owns everything about the live connection: the current socket, the
//! lifecycle state, the reconnect counter, the outbound queue and all
//! timers. Handles talk to the actor over a channel, so no state is shared
//! and every socket has exactly one writer.
//!
//! ```text
//!            connect_to_session
//!   Idle ─────────────────────────► Connecting ──opened──► Connected
//!    ▲                                  │   ▲                 │  │
//!    │ close 1000 / disconnect          │   │ registry ok     │  │ close != 1000
//!    └──────────────────────────────────┼───┼─────────────────┘  │
//!                                       ▼   │                    ▼
//!                    timeout/close ──► Reconnecting ◄────────────┘
//!                                       │
//!                  budget spent / gone  ▼
//!                                     Failed
//! ```
//!
//! A retry only happens after the backoff delay *and* after the registry
//! confirms the session still exists. `disconnect()` and switching sessions
//! drop every pending deadline and any in-flight registry check, so a stale
//! retry can never revive a connection.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::protocol::{OutboundMessage, Session, CLOSE_ABNORMAL, CLOSE_NORMAL};
use crate::queue::OutboundQueue;
use crate::registry::{RegistryError, SessionRegistry};
use crate::router::{FrameHandler, InboundRouter};
use crate::transport::{Connector, SocketEvent, SocketHandle};

/// Default handshake deadline for a new socket.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle of the managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Closing,
    Reconnecting,
    /// Retries exhausted or the session is gone. Left only by an explicit
    /// `connect_to_session` or `disconnect`.
    Failed,
}

/// Notifications for the caller. The manager never renders anything itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected {
        session_id: String,
    },
    /// Emitted when an open connection ends, for whatever reason.
    Disconnected {
        code: u16,
        reason: String,
    },
    Reconnecting {
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
    },
    ReconnectionFailed {
        attempts: u32,
    },
    SessionExpired {
        session_id: String,
    },
}

/// Snapshot of the actor's state, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub session_id: Option<String>,
    pub reconnect_attempts: u32,
    pub queued: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection manager has shut down")]
    Shutdown,
}

/// Tunables for a [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Sessions live at `<ws_base>/<session id>`.
    pub ws_base: String,
    pub connect_timeout: Duration,
    pub backoff: Backoff,
}

impl ConnectionOptions {
    pub fn new(ws_base: impl Into<String>) -> Self {
        Self {
            ws_base: ws_base.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            backoff: Backoff::default(),
        }
    }

    pub fn session_url(&self, session_id: &str) -> String {
        format!("{}/{}", self.ws_base.trim_end_matches('/'), session_id)
    }
}

enum Command {
    Connect(String, oneshot::Sender<()>),
    Disconnect(oneshot::Sender<()>),
    Send(OutboundMessage),
    Status(oneshot::Sender<ConnectionStatus>),
}

/// Handle to a running connection actor.
///
/// The actor stops, closing its socket with code 1000, once every handle
/// has been dropped.
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionManager {
    /// Start the actor. Returns the handle and the receiver for lifecycle events.
    pub fn spawn(
        registry: Arc<dyn SessionRegistry>,
        connector: Arc<dyn Connector>,
        handler: Arc<dyn FrameHandler>,
        options: ConnectionOptions,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let actor = Actor {
            registry,
            connector,
            router: InboundRouter::new(handler),
            options,
            commands: cmd_rx,
            events: event_tx,
            state_tx,
            state: ConnectionState::Idle,
            session_id: None,
            socket: None,
            reconnect_attempts: 0,
            queue: OutboundQueue::new(),
            connect_deadline: None,
            retry_at: None,
            validation: None,
        };
        tokio::spawn(actor.run());

        (
            Self {
                commands: cmd_tx,
                state: state_rx,
            },
            event_rx,
        )
    }

    /// Drop any current connection (close code 1000) and connect to `session_id`.
    pub async fn connect_to_session(&self, session_id: &str) -> Result<(), ConnectionError> {
        let (tx, rx) = oneshot::channel();
        self.post(Command::Connect(session_id.to_string(), tx))?;
        rx.await.map_err(|_| ConnectionError::Shutdown)
    }

    /// Close the connection and cancel every pending timer. Idempotent.
    pub async fn disconnect(&self) -> Result<(), ConnectionError> {
        let (tx, rx) = oneshot::channel();
        self.post(Command::Disconnect(tx))?;
        rx.await.map_err(|_| ConnectionError::Shutdown)
    }

    /// Send `message` now if connected, otherwise queue it for the next open.
    pub fn send(&self, message: OutboundMessage) -> Result<(), ConnectionError> {
        self.post(Command::Send(message))
    }

    pub async fn status(&self) -> Result<ConnectionStatus, ConnectionError> {
        let (tx, rx) = oneshot::channel();
        self.post(Command::Status(tx))?;
        rx.await.map_err(|_| ConnectionError::Shutdown)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// A receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    fn post(&self, command: Command) -> Result<(), ConnectionError> {
        self.commands
            .send(command)
            .map_err(|_| ConnectionError::Shutdown)
    }
}

type Validation = BoxFuture<'static, Result<Vec<Session>, RegistryError>>;

struct Actor {
    registry: Arc<dyn SessionRegistry>,
    connector: Arc<dyn Connector>,
    router: InboundRouter,
    options: ConnectionOptions,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    state_tx: watch::Sender<ConnectionState>,
    state: ConnectionState,
    session_id: Option<String>,
    socket: Option<SocketHandle>,
    reconnect_attempts: u32,
    queue: OutboundQueue,
    connect_deadline: Option<Instant>,
    retry_at: Option<Instant>,
    /// In-flight "does the session still exist" check before a retry.
    validation: Option<Validation>,
}

impl Actor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                event = next_socket_event(&mut self.socket) => self.handle_socket_event(event),
                () = sleep_until(self.connect_deadline) => self.on_connect_timeout(),
                () = sleep_until(self.retry_at) => self.on_retry_due(),
                result = next_validation(&mut self.validation) => self.on_validation(result),
            }
        }

        debug!("all connection handles dropped, shutting down");
        if let Some(socket) = self.socket.take() {
            socket.close(CLOSE_NORMAL, "client shutdown");
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect(session_id, ack) => {
                self.connect(session_id);
                let _ = ack.send(());
            }
            Command::Disconnect(ack) => {
                self.disconnect();
                let _ = ack.send(());
            }
            Command::Send(message) => {
                let socket = match self.state {
                    ConnectionState::Connected => self.socket.as_ref(),
                    _ => None,
                };
                self.queue.enqueue(message, socket);
            }
            Command::Status(reply) => {
                let _ = reply.send(ConnectionStatus {
                    state: self.state,
                    session_id: self.session_id.clone(),
                    reconnect_attempts: self.reconnect_attempts,
                    queued: self.queue.len(),
                });
            }
        }
    }

    fn connect(&mut self, session_id: String) {
        self.cancel_pending();
        if let Some(socket) = self.socket.take() {
            socket.close(CLOSE_NORMAL, "switching session");
            if self.state == ConnectionState::Connected {
                self.emit(ConnectionEvent::Disconnected {
                    code: CLOSE_NORMAL,
                    reason: "switching session".to_string(),
                });
            }
        }
        // Input queued for another shell must not leak into this one.
        if self
            .session_id
            .as_deref()
            .is_some_and(|previous| previous != session_id)
        {
            self.queue.clear();
        }
        self.session_id = Some(session_id);
        self.reconnect_attempts = 0;
        self.open_socket();
    }

    fn disconnect(&mut self) {
        self.cancel_pending();
        if let Some(socket) = self.socket.take() {
            let was_connected = self.state == ConnectionState::Connected;
            self.set_state(ConnectionState::Closing);
            socket.close(CLOSE_NORMAL, "client disconnect");
            if was_connected {
                self.emit(ConnectionEvent::Disconnected {
                    code: CLOSE_NORMAL,
                    reason: "client disconnect".to_string(),
                });
            }
        }
        self.reconnect_attempts = 0;
        self.set_state(ConnectionState::Idle);
    }

    fn open_socket(&mut self) {
        let Some(session_id) = self.session_id.as_deref() else {
            return;
        };
        let url = self.options.session_url(session_id);
        info!("connecting to session {session_id} at {url}");
        self.socket = Some(self.connector.open(&url));
        self.connect_deadline = Some(Instant::now() + self.options.connect_timeout);
        self.set_state(ConnectionState::Connecting);
    }

    fn handle_socket_event(&mut self, event: Option<SocketEvent>) {
        match event {
            Some(SocketEvent::Opened) => self.on_opened(),
            Some(SocketEvent::Message(raw)) => {
                self.router.route(&raw);
            }
            Some(SocketEvent::Closed { code, reason }) => self.on_closed(code, reason),
            Some(SocketEvent::Errored(message)) => {
                warn!("socket error: {message}");
                self.on_lost(CLOSE_ABNORMAL, message);
            }
            None => self.on_lost(CLOSE_ABNORMAL, "socket task ended".to_string()),
        }
    }

    fn on_opened(&mut self) {
        if self.state != ConnectionState::Connecting {
            return;
        }
        self.connect_deadline = None;
        self.reconnect_attempts = 0;
        self.set_state(ConnectionState::Connected);
        if let Some(session_id) = self.session_id.clone() {
            info!("connected to session {session_id}");
            self.emit(ConnectionEvent::Connected { session_id });
        }
        if let Some(socket) = self.socket.as_ref() {
            self.queue.flush(socket);
        }
    }

    fn on_closed(&mut self, code: u16, reason: String) {
        if self.state == ConnectionState::Connected && code == CLOSE_NORMAL {
            self.socket = None;
            info!("session closed normally");
            self.reconnect_attempts = 0;
            self.set_state(ConnectionState::Idle);
            self.emit(ConnectionEvent::Disconnected { code, reason });
            return;
        }
        warn!("socket closed with code {code} {reason:?}");
        self.on_lost(code, reason);
    }

    /// Abnormal end of the current socket, before or after it opened.
    fn on_lost(&mut self, code: u16, reason: String) {
        // Clear before arming the retry so nothing from the old socket is seen again.
        self.socket = None;
        if self.state == ConnectionState::Connected {
            self.emit(ConnectionEvent::Disconnected { code, reason });
        }
        self.schedule_retry();
    }

    fn on_connect_timeout(&mut self) {
        self.connect_deadline = None;
        warn!(
            "no handshake within {}ms, abandoning socket",
            self.options.connect_timeout.as_millis()
        );
        if let Some(socket) = self.socket.take() {
            socket.close(CLOSE_NORMAL, "connect timeout");
        }
        self.schedule_retry();
    }

    fn schedule_retry(&mut self) {
        self.connect_deadline = None;
        self.reconnect_attempts += 1;
        let max_attempts = self.options.backoff.max_attempts();

        match self.options.backoff.next_delay(self.reconnect_attempts) {
            Some(delay) => {
                info!(
                    "reconnecting in {}ms (attempt {}/{max_attempts})",
                    delay.as_millis(),
                    self.reconnect_attempts
                );
                self.set_state(ConnectionState::Reconnecting);
                self.retry_at = Some(Instant::now() + delay);
                self.emit(ConnectionEvent::Reconnecting {
                    attempt: self.reconnect_attempts,
                    max_attempts,
                    delay,
                });
            }
            None => {
                let attempts = self.reconnect_attempts - 1;
                warn!("giving up after {attempts} reconnect attempt(s)");
                self.retry_at = None;
                self.set_state(ConnectionState::Failed);
                self.emit(ConnectionEvent::ReconnectionFailed { attempts });
            }
        }
    }

    fn on_retry_due(&mut self) {
        self.retry_at = None;
        let registry = Arc::clone(&self.registry);
        debug!("checking session is still registered before retrying");
        let check: Validation = Box::pin(async move { registry.list_sessions().await });
        self.validation = Some(check);
    }

    fn on_validation(&mut self, result: Result<Vec<Session>, RegistryError>) {
        self.validation = None;
        let Some(session_id) = self.session_id.clone() else {
            return;
        };
        match result {
            Ok(sessions) if sessions.iter().any(|s| s.id == session_id) => self.open_socket(),
            Ok(_) => {
                warn!("session {session_id} is no longer registered");
                self.set_state(ConnectionState::Failed);
                self.emit(ConnectionEvent::SessionExpired { session_id });
            }
            Err(e) => {
                warn!("registry check failed: {e}");
                self.schedule_retry();
            }
        }
    }

    fn cancel_pending(&mut self) {
        self.connect_deadline = None;
        self.retry_at = None;
        self.validation = None;
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!("connection state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
        self.state_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn emit(&self, event: ConnectionEvent) {
        // The caller may not care about events at all.
        let _ = self.events.send(event);
    }
}

async fn next_socket_event(socket: &mut Option<SocketHandle>) -> Option<SocketEvent> {
    match socket {
        Some(socket) => socket.next_event().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn next_validation(
    validation: &mut Option<Validation>,
) -> Result<Vec<Session>, RegistryError> {
    match validation {
        Some(check) => check.await,
        None => std::future::pending().await,
    }
}
