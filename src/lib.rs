#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

//! termlink: resilient transport for remote interactive shell sessions.
//!
//! The library keeps one WebSocket per attached session alive across
//! network trouble:
//! - `connection`: the connection manager actor and its state machine
//! - `backoff`: bounded exponential retry schedule
//! - `queue`: outbound messages held while no socket is open
//! - `router`: typed dispatch of inbound frames to caller handlers
//! - `registry`: HTTP client for listing/creating sessions
//! - `transport`: the socket abstraction and its tokio-tungstenite backend
//! - `protocol`: JSON wire types
//! - `config` / `settings`: TOML configuration and persisted preferences

pub mod backoff;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod router;
pub mod settings;
pub mod transport;

// Re-export key types at crate root for convenience.
pub use config::Config;
pub use connection::{
    ConnectionEvent, ConnectionManager, ConnectionOptions, ConnectionState, ConnectionStatus,
};
pub use protocol::{AssistantResponse, OutboundMessage, Session};
pub use registry::{RegistryClient, RegistryError, SessionRegistry};
pub use router::FrameHandler;
pub use settings::{FileSettingsStore, Settings, SettingsStore};
pub use transport::{Connector, WsConnector};
