//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables**: `TERMLINK_URL`, `TERMLINK_WS_URL`,
//!    `TERMLINK_LOG`
//! 2. **Config file**: path via `--config <path>`, or `termlink.toml` in CWD
//! 3. **Compiled defaults**: see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [registry]
//! url = "http://localhost:8767"
//! # ws_url = "ws://localhost:8767/ws"   # default: url with ws scheme + /ws
//!
//! [connection]
//! connect_timeout_ms = 10000
//! backoff_base_ms = 500
//! backoff_max_ms = 30000
//! max_reconnect_attempts = 5
//!
//! [logging]
//! level = "info"
//!
//! [settings]
//! # path = "/home/me/.config/termlink/settings.toml"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::backoff::{self, Backoff};
use crate::connection::ConnectionOptions;

/// Name of the config file picked up from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "termlink.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid URL scheme in {0:?} (expected http:// or https://)")]
    Scheme(String),
    #[error("{0}")]
    Invalid(String),
}

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
}

/// Where the session registry and its WebSocket endpoint live.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// HTTP base URL (default `http://localhost:8767`). Override with `TERMLINK_URL`.
    #[serde(default = "default_registry_url")]
    pub url: String,
    /// WebSocket base; sessions connect to `<ws_url>/<id>`. Override with
    /// `TERMLINK_WS_URL`. Derived from `url` when omitted.
    pub ws_url: Option<String>,
}

/// Reconnect and handshake tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// Handshake deadline in milliseconds (default 10 000).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Delay before the first retry in milliseconds (default 500).
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Cap on any single retry delay in milliseconds (default and maximum 30 000).
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Retries before giving up (default 5).
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). `TERMLINK_LOG` overrides the file
    /// value and `RUST_LOG` overrides both.
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Location of the persisted client settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsConfig {
    /// Defaults to `$XDG_CONFIG_HOME/termlink/settings.toml`
    /// (or `~/.config/termlink/settings.toml`).
    pub path: Option<PathBuf>,
}

fn default_registry_url() -> String {
    "http://localhost:8767".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_backoff_base_ms() -> u64 {
    backoff::DEFAULT_BASE.as_millis() as u64
}
fn default_backoff_max_ms() -> u64 {
    backoff::DEFAULT_MAX.as_millis() as u64
}
fn default_max_reconnect_attempts() -> u32 {
    backoff::DEFAULT_MAX_ATTEMPTS
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: default_registry_url(),
            ws_url: None,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, that file must exist. Otherwise `termlink.toml` in
    /// the current directory is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply overrides from an environment lookup.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("TERMLINK_URL") {
            self.registry.url = url;
        }
        if let Some(ws_url) = var("TERMLINK_WS_URL") {
            self.registry.ws_url = Some(ws_url);
        }
        if let Some(level) = var("TERMLINK_LOG") {
            self.logging.level = level;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.max_reconnect_attempts == 0 {
            return Err(ConfigError::Invalid(
                "connection.max_reconnect_attempts must be at least 1".into(),
            ));
        }
        if self.connection.backoff_max_ms > default_backoff_max_ms() {
            return Err(ConfigError::Invalid(format!(
                "connection.backoff_max_ms must not exceed {}",
                default_backoff_max_ms()
            )));
        }
        if self.connection.backoff_base_ms > self.connection.backoff_max_ms {
            return Err(ConfigError::Invalid(
                "connection.backoff_base_ms exceeds backoff_max_ms".into(),
            ));
        }
        self.ws_base().map(|_| ())
    }

    /// WebSocket base URL: explicit `ws_url`, or `url` with a ws scheme and `/ws`.
    pub fn ws_base(&self) -> Result<String, ConfigError> {
        if let Some(ws) = &self.registry.ws_url {
            return Ok(ws.trim_end_matches('/').to_string());
        }
        let base = self.registry.url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(ConfigError::Scheme(base.to_string()));
        };
        Ok(format!("{ws_base}/ws"))
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.connection.backoff_base_ms),
            Duration::from_millis(self.connection.backoff_max_ms),
            self.connection.max_reconnect_attempts,
        )
    }

    pub fn connection_options(&self) -> Result<ConnectionOptions, ConfigError> {
        let mut options = ConnectionOptions::new(self.ws_base()?);
        options.connect_timeout = Duration::from_millis(self.connection.connect_timeout_ms);
        options.backoff = self.backoff();
        Ok(options)
    }

    /// Settings file location, if one can be determined.
    pub fn settings_path(&self) -> Option<PathBuf> {
        if let Some(p) = &self.settings.path {
            return Some(expand_tilde(p));
        }
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("termlink").join("settings.toml"))
    }
}

/// Expand a leading `~` to `$HOME`.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.registry.url, "http://localhost:8767");
        assert_eq!(config.ws_base().unwrap(), "ws://localhost:8767/ws");
        assert_eq!(config.backoff(), Backoff::default());
        assert_eq!(config.logging.level, "info");

        let options = config.connection_options().unwrap();
        assert_eq!(options.connect_timeout, Duration::from_secs(10));
        assert_eq!(options.session_url("abc"), "ws://localhost:8767/ws/abc");
    }

    #[test]
    fn parses_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [registry]
            url = "https://ops.example.com/"

            [connection]
            max_reconnect_attempts = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.ws_base().unwrap(), "wss://ops.example.com/ws");
        assert_eq!(config.connection.max_reconnect_attempts, 8);
        assert_eq!(config.connection.backoff_base_ms, 500);
        assert_eq!(config.backoff().delay(8), Duration::from_millis(30_000));
    }

    #[test]
    fn explicit_ws_url_wins() {
        let mut config = Config::default();
        config.registry.ws_url = Some("ws://terminals.internal:9000/sessions/".into());
        assert_eq!(
            config.ws_base().unwrap(),
            "ws://terminals.internal:9000/sessions"
        );
    }

    #[test]
    fn env_overrides_file() {
        let env: HashMap<&str, &str> = [
            ("TERMLINK_URL", "http://10.0.0.5:8767"),
            ("TERMLINK_LOG", "debug"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.registry.url, "http://10.0.0.5:8767");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.registry.ws_url, None);
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = Config::default();
        config.registry.url = "ftp://nope".into();
        assert!(matches!(config.validate(), Err(ConfigError::Scheme(_))));

        let mut config = Config::default();
        config.connection.max_reconnect_attempts = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.connection.backoff_max_ms = 120_000;
        config.connection.max_reconnect_attempts = 10;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.connection.backoff_max_ms = 30_000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[logging]\nlevel = \"warn\"\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.logging.level, "warn");

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            Config::from_file(&missing),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn explicit_settings_path() {
        let mut config = Config::default();
        config.settings.path = Some(PathBuf::from("/tmp/termlink-settings.toml"));
        assert_eq!(
            config.settings_path(),
            Some(PathBuf::from("/tmp/termlink-settings.toml"))
        );
    }
}
