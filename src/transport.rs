//! Transport socket: one physical duplex connection to a session.
//!
//! A [`Connector`] opens a socket and hands back a [`SocketHandle`]: a
//! command sender (send text / close) and a receiver of [`SocketEvent`]s.
//! The production [`WsConnector`] spawns one task per socket that owns the
//! tokio-tungstenite stream, so there is exactly one writer per socket.
//!
//! Dropping a handle abandons the socket: its task closes the connection
//! and any events it still produces go nowhere.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::protocol::{CLOSE_ABNORMAL, CLOSE_NORMAL};

/// Something that happened on a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// Handshake completed; the socket can carry frames.
    Opened,
    /// One text frame.
    Message(String),
    /// The connection ended. Streams that end without a close frame report 1006.
    Closed { code: u16, reason: String },
    /// Connect or I/O failure. No further events follow.
    Errored(String),
}

/// An instruction for the task that owns a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketCommand {
    Send(String),
    Close { code: u16, reason: String },
}

/// Exclusive handle to one open (or opening) socket.
#[derive(Debug)]
pub struct SocketHandle {
    commands: mpsc::UnboundedSender<SocketCommand>,
    events: mpsc::UnboundedReceiver<SocketEvent>,
}

impl SocketHandle {
    pub fn new(
        commands: mpsc::UnboundedSender<SocketCommand>,
        events: mpsc::UnboundedReceiver<SocketEvent>,
    ) -> Self {
        Self { commands, events }
    }

    /// Queue a text frame. Fails only if the socket task has already exited.
    pub fn send(&self, text: String) -> Result<(), String> {
        self.commands
            .send(SocketCommand::Send(text))
            .map_err(|_| "socket task has exited".to_string())
    }

    /// Ask the socket to close with `code`, consuming the handle.
    pub fn close(self, code: u16, reason: &str) {
        // Task may already be gone; nothing left to close then.
        let _ = self.commands.send(SocketCommand::Close {
            code,
            reason: reason.to_string(),
        });
    }

    /// Next event; `None` once the socket task has exited.
    pub async fn next_event(&mut self) -> Option<SocketEvent> {
        self.events.recv().await
    }
}

/// Opens transport sockets.
pub trait Connector: Send + Sync {
    /// Start connecting to `url`. Progress is reported on the returned handle.
    fn open(&self, url: &str) -> SocketHandle;
}

/// [`Connector`] backed by tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(&self, url: &str) -> SocketHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(ws_socket_task(url.to_string(), cmd_rx, event_tx));
        SocketHandle::new(cmd_tx, event_rx)
    }
}

/// Owns one WebSocket for its whole life: connect, pump frames, close.
async fn ws_socket_task(
    url: String,
    mut commands: mpsc::UnboundedReceiver<SocketCommand>,
    events: mpsc::UnboundedSender<SocketEvent>,
) {
    let ws_stream = tokio::select! {
        result = tokio_tungstenite::connect_async(url.as_str()) => match result {
            Ok((stream, _)) => stream,
            Err(e) => {
                let _ = events.send(SocketEvent::Errored(format!("connect to {url} failed: {e}")));
                return;
            }
        },
        // Handle dropped (or close requested) before the handshake finished.
        _ = wait_for_close(&mut commands) => return,
    };

    let (mut ws_sink, mut ws_reader) = ws_stream.split();
    if events.send(SocketEvent::Opened).is_err() {
        let _ = ws_sink.close().await;
        return;
    }

    loop {
        tokio::select! {
            msg = ws_reader.next() => {
                let event = match msg {
                    Some(Ok(Message::Text(text))) => SocketEvent::Message(text.as_str().to_owned()),
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                            .unwrap_or((CLOSE_ABNORMAL, String::new()));
                        let _ = events.send(SocketEvent::Closed { code, reason });
                        return;
                    }
                    None => {
                        let _ = events.send(SocketEvent::Closed {
                            code: CLOSE_ABNORMAL,
                            reason: String::new(),
                        });
                        return;
                    }
                    Some(Err(e)) => {
                        let _ = events.send(SocketEvent::Errored(e.to_string()));
                        return;
                    }
                    // Binary/Ping/Pong: tungstenite answers pings itself.
                    Some(Ok(_)) => continue,
                };
                if events.send(event).is_err() {
                    // Owner dropped the handle without closing.
                    let _ = ws_sink.close().await;
                    return;
                }
            }
            cmd = commands.recv() => {
                match cmd {
                    Some(SocketCommand::Send(text)) => {
                        if let Err(e) = ws_sink.send(Message::Text(text.into())).await {
                            warn!("WebSocket send failed, frame dropped: {e}");
                        }
                    }
                    Some(SocketCommand::Close { code, reason }) => {
                        debug!("closing WebSocket with code {code}");
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        if let Err(e) = ws_sink.send(Message::Close(Some(frame))).await {
                            debug!("close frame not delivered: {e}");
                        }
                        return;
                    }
                    None => {
                        let frame = CloseFrame {
                            code: CloseCode::from(CLOSE_NORMAL),
                            reason: "".into(),
                        };
                        let _ = ws_sink.send(Message::Close(Some(frame))).await;
                        return;
                    }
                }
            }
        }
    }
}

/// Resolves once the owner asks to close or drops the handle. Sends issued
/// before the handshake are discarded; the connection manager never sends
/// on a socket that has not reported [`SocketEvent::Opened`].
async fn wait_for_close(commands: &mut mpsc::UnboundedReceiver<SocketCommand>) {
    loop {
        match commands.recv().await {
            Some(SocketCommand::Send(_)) => continue,
            Some(SocketCommand::Close { .. }) | None => return,
        }
    }
}
