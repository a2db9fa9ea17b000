//! Wire types for the session WebSocket and the registry HTTP API.
//!
//! Every WebSocket frame is a JSON object with a `type` discriminator:
//!
//! | Direction | `type`         | Fields                                  |
//! |-----------|----------------|-----------------------------------------|
//! | out       | `input`        | `data`                                  |
//! | out       | `resize`       | `rows`, `cols`                          |
//! | out       | `llm_assist`   | `command`, `is_output_analysis`         |
//! | in        | `output`       | `data`                                  |
//! | in        | `error`        | `message`                               |
//! | in        | `llm_response` | `content`, `loading`, `error`           |

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Close code for an intentional, client-initiated disconnect.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code reported when the stream ends without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// A message the caller wants delivered to the remote shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Keystrokes / text for the shell's stdin.
    Input { data: String },
    /// New terminal dimensions.
    Resize { rows: u16, cols: u16 },
    /// Ask the assistant about a command or about recent output.
    #[serde(rename = "llm_assist")]
    AssistRequest {
        command: String,
        is_output_analysis: bool,
    },
}

impl OutboundMessage {
    pub fn input(data: impl Into<String>) -> Self {
        Self::Input { data: data.into() }
    }

    pub fn resize(rows: u16, cols: u16) -> Self {
        Self::Resize { rows, cols }
    }

    pub fn assist(command: impl Into<String>, is_output_analysis: bool) -> Self {
        Self::AssistRequest {
            command: command.into(),
            is_output_analysis,
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Input { .. } => "input",
            Self::Resize { .. } => "resize",
            Self::AssistRequest { .. } => "llm_assist",
        }
    }

    /// Encode as a JSON text frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// An assistant reply, possibly partial (`loading`) or failed (`error`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AssistantResponse {
    pub content: String,
    #[serde(default)]
    pub loading: bool,
    #[serde(default)]
    pub error: bool,
}

/// A frame received from the remote shell.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Output { data: String },
    Error { message: String },
    #[serde(rename = "llm_response")]
    AssistantResponse(AssistantResponse),
}

impl InboundMessage {
    /// The `type` values this client understands.
    pub const KNOWN_TYPES: &'static [&'static str] = &["output", "error", "llm_response"];
}

/// A shell session as reported by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(alias = "session_id")]
    pub id: String,
    #[serde(
        rename = "shellCommand",
        alias = "shell_command",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub shell_command: Option<String>,
    #[serde(
        rename = "createdAt",
        alias = "created_at",
        default,
        deserialize_with = "timestamp_text"
    )]
    pub created_at: String,
}

/// `GET /api/sessions` body.
#[derive(Debug, Deserialize)]
pub struct SessionList {
    #[serde(default)]
    pub sessions: Vec<Session>,
}

/// `POST /api/sessions` request body.
#[derive(Debug, Default, Serialize)]
pub struct CreateSessionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell_command: Option<&'a str>,
}

/// `POST /api/sessions` response body.
#[derive(Debug, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
}

/// Accept either a string or a numeric timestamp; the registry backend is
/// not ours, so keep whatever it sends as text.
fn timestamp_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}
