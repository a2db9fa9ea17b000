//! HTTP client for the session registry.
//!
//! [`RegistryClient`] wraps `reqwest::Client` and exposes one typed method
//! per registry endpoint. Calls are plain request/response with no retry of
//! their own: deciding when to try again belongs to the connection manager.
//!
//! ## Error handling
//!
//! Non-2xx responses are parsed for an `error` field in the JSON body. If
//! that fails, the raw response body becomes the error message.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::protocol::{CreateSessionRequest, CreateSessionResponse, Session, SessionList};

/// Errors returned by registry calls.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Transport-level failure (connection refused, timeout, DNS, ...).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The registry answered with a non-2xx status.
    #[error("registry error (HTTP {status}): {message}")]
    Server { status: u16, message: String },
    /// The body was not the JSON we expected.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl RegistryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::Server { status: 404, .. })
    }
}

/// The registry operations the connection manager depends on.
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// All sessions the server currently knows about.
    async fn list_sessions(&self) -> Result<Vec<Session>, RegistryError>;

    /// Create a session, optionally with a specific shell command. Returns its id.
    async fn create_session(&self, shell_command: Option<&str>) -> Result<String, RegistryError>;

    /// Whether the registry answers its health probe.
    async fn is_available(&self) -> bool;

    /// Look a single session up by id.
    async fn get_session(&self, id: &str) -> Result<Option<Session>, RegistryError> {
        Ok(self.list_sessions().await?.into_iter().find(|s| s.id == id))
    }
}

/// reqwest-backed registry client.
pub struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
}

impl RegistryClient {
    /// Create a client for the registry at `base_url`.
    pub fn new(base_url: &str) -> Result<Self, RegistryError> {
        let mut default_headers = reqwest::header::HeaderMap::new();
        default_headers.insert(
            reqwest::header::HeaderName::from_static("x-termlink-client"),
            reqwest::header::HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
        );
        let http = reqwest::Client::builder()
            .default_headers(default_headers)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// The registry base URL (without trailing slash).
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /api/health`: liveness body.
    pub async fn health(&self) -> Result<serde_json::Value, RegistryError> {
        let resp = self
            .http
            .get(format!("{}/api/health", self.base_url))
            .send()
            .await?;
        Self::handle_response(resp).await
    }

    /// `DELETE /api/sessions/{id}`: ask the server to end a session.
    pub async fn delete_session(&self, id: &str) -> Result<(), RegistryError> {
        let resp = self
            .http
            .delete(format!("{}/api/sessions/{}", self.base_url, id))
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await?;
        Err(Self::server_error(status.as_u16(), body))
    }

    /// Parse a response as JSON `T`, or turn a failure status into [`RegistryError::Server`].
    async fn handle_response<T: DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, RegistryError> {
        let status = resp.status();
        let body = resp.text().await?;

        if status.is_success() {
            serde_json::from_str(&body)
                .map_err(|e| RegistryError::Protocol(format!("invalid JSON from registry: {e}")))
        } else {
            Err(Self::server_error(status.as_u16(), body))
        }
    }

    fn server_error(status: u16, body: String) -> RegistryError {
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v["error"].as_str().map(String::from))
            .unwrap_or(body);
        RegistryError::Server { status, message }
    }
}

#[async_trait]
impl SessionRegistry for RegistryClient {
    /// `GET /api/sessions`
    async fn list_sessions(&self) -> Result<Vec<Session>, RegistryError> {
        let resp = self
            .http
            .get(format!("{}/api/sessions", self.base_url))
            .send()
            .await?;
        let list: SessionList = Self::handle_response(resp).await?;
        Ok(list.sessions)
    }

    /// `POST /api/sessions`
    async fn create_session(&self, shell_command: Option<&str>) -> Result<String, RegistryError> {
        let resp = self
            .http
            .post(format!("{}/api/sessions", self.base_url))
            .json(&CreateSessionRequest { shell_command })
            .send()
            .await?;
        let created: CreateSessionResponse = Self::handle_response(resp).await?;
        Ok(created.session_id)
    }

    async fn is_available(&self) -> bool {
        match self.health().await {
            Ok(_) => true,
            Err(e) => {
                debug!("registry health probe failed: {e}");
                false
            }
        }
    }
}
