//! Inbound frame router.
//!
//! [`InboundRouter::route`] parses one raw text frame and hands it to the
//! caller's [`FrameHandler`]. Frames that are not JSON, carry an unknown
//! `type`, or miss required fields are logged and dropped; none of them
//! reach the handler.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::protocol::{AssistantResponse, InboundMessage};

/// Receives decoded frames. This is where terminal rendering and the chat
/// display plug in.
pub trait FrameHandler: Send + Sync {
    /// Shell output to be written to the terminal.
    fn on_output(&self, data: &str);

    /// An error reported by the server for this session.
    fn on_error(&self, message: &str);

    /// An assistant reply (possibly still loading).
    fn on_assistant_response(&self, response: &AssistantResponse);
}

/// What [`InboundRouter::route`] did with a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Dispatched,
    /// Not JSON, no `type`, or missing fields for a known type.
    Malformed,
    UnknownType(String),
}

pub struct InboundRouter {
    handler: Arc<dyn FrameHandler>,
}

impl InboundRouter {
    pub fn new(handler: Arc<dyn FrameHandler>) -> Self {
        Self { handler }
    }

    pub fn route(&self, raw: &str) -> RouteOutcome {
        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!("dropping non-JSON frame: {e}");
                return RouteOutcome::Malformed;
            }
        };

        let Some(kind) = value.get("type").and_then(Value::as_str) else {
            warn!("dropping frame without a type field");
            return RouteOutcome::Malformed;
        };
        if !InboundMessage::KNOWN_TYPES.iter().any(|known| *known == kind) {
            debug!("dropping frame with unknown type {kind:?}");
            return RouteOutcome::UnknownType(kind.to_string());
        }
        let kind = kind.to_string();

        let message: InboundMessage = match serde_json::from_value(value) {
            Ok(m) => m,
            Err(e) => {
                warn!("dropping malformed {kind} frame: {e}");
                return RouteOutcome::Malformed;
            }
        };

        match &message {
            InboundMessage::Output { data } => self.handler.on_output(data),
            InboundMessage::Error { message } => self.handler.on_error(message),
            InboundMessage::AssistantResponse(response) => {
                self.handler.on_assistant_response(response);
            }
        }
        RouteOutcome::Dispatched
    }
}


#[cfg(test)]
mod tests {
    use super::recording::{Call, RecordingHandler};
    use super::*;

    fn router() -> (InboundRouter, Arc<RecordingHandler>) {
        let handler = Arc::new(RecordingHandler::default());
        (InboundRouter::new(handler.clone()), handler)
    }

    #[test]
    fn dispatches_known_types_in_order() {
        let (router, handler) = router();
        assert_eq!(
            router.route(r#"{"type":"output","data":"total 0\r\n"}"#),
            RouteOutcome::Dispatched
        );
        assert_eq!(
            router.route(r#"{"type":"error","message":"shell exited"}"#),
            RouteOutcome::Dispatched
        );
        assert_eq!(
            router.route(r#"{"type":"llm_response","content":"try -r","loading":true,"error":false}"#),
            RouteOutcome::Dispatched
        );
        assert_eq!(
            handler.calls(),
            vec![
                Call::Output("total 0\r\n".into()),
                Call::Error("shell exited".into()),
                Call::Assistant(AssistantResponse {
                    content: "try -r".into(),
                    loading: true,
                    error: false,
                }),
            ]
        );
    }

    #[test]
    fn unknown_type_never_reaches_handler() {
        let (router, handler) = router();
        assert_eq!(
            router.route(r#"{"type":"unknown_type","data":"x"}"#),
            RouteOutcome::UnknownType("unknown_type".into())
        );
        assert!(handler.calls().is_empty());
    }

    #[test]
    fn garbage_is_dropped() {
        let (router, handler) = router();
        assert_eq!(router.route("not json"), RouteOutcome::Malformed);
        assert_eq!(router.route(r#"{"data":"no type"}"#), RouteOutcome::Malformed);
        assert_eq!(router.route(r#"{"type":42}"#), RouteOutcome::Malformed);
        assert_eq!(router.route(r#"{"type":"output"}"#), RouteOutcome::Malformed);
        assert_eq!(router.route(r#"{"type":"output","data":7}"#), RouteOutcome::Malformed);
        assert!(handler.calls().is_empty());
    }
}
