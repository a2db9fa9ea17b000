//! Outbound message queue.
//!
//! Holds caller messages while no socket is open and replays them in FIFO
//! order once one is. Messages are sent at most once: a send failure is
//! logged and the message is gone. Re-queueing could run a shell command
//! twice.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::protocol::OutboundMessage;
use crate::transport::SocketHandle;

#[derive(Debug, Default)]
pub struct OutboundQueue {
    pending: VecDeque<OutboundMessage>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send now if `socket` is open, otherwise hold the message. Never fails.
    pub fn enqueue(&mut self, message: OutboundMessage, socket: Option<&SocketHandle>) {
        match socket {
            Some(socket) => transmit(socket, &message),
            None => {
                debug!("socket not open, queueing {} message", message.kind());
                self.pending.push_back(message);
            }
        }
    }

    /// Send everything held, oldest first, and empty the queue.
    ///
    /// Returns how many messages were handed to the socket.
    pub fn flush(&mut self, socket: &SocketHandle) -> usize {
        let count = self.pending.len();
        if count > 0 {
            debug!("flushing {count} queued message(s)");
        }
        for message in self.pending.drain(..) {
            transmit(socket, &message);
        }
        count
    }

    /// Drop everything held.
    pub fn clear(&mut self) {
        if !self.pending.is_empty() {
            debug!("discarding {} queued message(s)", self.pending.len());
        }
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

fn transmit(socket: &SocketHandle, message: &OutboundMessage) {
    let frame = match message.to_frame() {
        Ok(frame) => frame,
        Err(e) => {
            warn!("failed to encode {} message: {e}", message.kind());
            return;
        }
    };
    if let Err(e) = socket.send(frame) {
        warn!("{} message lost: {e}", message.kind());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeConnector;
    use crate::transport::Connector;
    use serde_json::json;

    #[tokio::test]
    async fn holds_messages_without_socket() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(OutboundMessage::input("a"), None);
        queue.enqueue(OutboundMessage::resize(24, 80), None);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn sends_immediately_when_open() {
        let (connector, mut opened) = FakeConnector::new();
        let handle = connector.open("ws://x/ws/s");
        let mut far = opened.recv().await.unwrap();

        let mut queue = OutboundQueue::new();
        queue.enqueue(OutboundMessage::input("pwd\n"), Some(&handle));
        assert!(queue.is_empty());
        assert_eq!(far.sent_frames(), vec![json!({"type": "input", "data": "pwd\n"})]);
    }

    #[tokio::test]
    async fn flush_is_fifo_across_kinds() {
        let (connector, mut opened) = FakeConnector::new();
        let handle = connector.open("ws://x/ws/s");
        let mut far = opened.recv().await.unwrap();

        let mut queue = OutboundQueue::new();
        queue.enqueue(OutboundMessage::input("cd /tmp\n"), None);
        queue.enqueue(OutboundMessage::resize(30, 100), None);
        queue.enqueue(OutboundMessage::assist("why did it fail", true), None);
        queue.enqueue(OutboundMessage::input("ls\n"), None);

        assert_eq!(queue.flush(&handle), 4);
        assert!(queue.is_empty());
        assert_eq!(
            far.sent_frames(),
            vec![
                json!({"type": "input", "data": "cd /tmp\n"}),
                json!({"type": "resize", "rows": 30, "cols": 100}),
                json!({"type": "llm_assist", "command": "why did it fail", "is_output_analysis": true}),
                json!({"type": "input", "data": "ls\n"}),
            ]
        );
    }

    #[tokio::test]
    async fn flush_clears_even_when_sends_fail() {
        let (connector, mut opened) = FakeConnector::new();
        let handle = connector.open("ws://x/ws/s");
        drop(opened.recv().await.unwrap());

        let mut queue = OutboundQueue::new();
        queue.enqueue(OutboundMessage::input("a"), None);
        queue.enqueue(OutboundMessage::input("b"), None);
        assert_eq!(queue.flush(&handle), 2);
        assert!(queue.is_empty());
    }
}
