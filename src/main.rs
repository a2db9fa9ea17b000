#![deny(clippy::all)]
#![warn(clippy::pedantic)]

//! # termlink
//!
//! Command-line client for remote shell sessions.
//!
//! ## Subcommands
//!
//! - `termlink health`: probe `GET /api/health`
//! - `termlink list`: list sessions known to the registry
//! - `termlink create [--shell CMD]`: create a session and print its id
//! - `termlink delete <id>`: end a session
//! - `termlink attach [id] [--new [--shell CMD]]`: stream a session on the
//!   terminal, line by line
//!
//! ## Attach mode
//!
//! Each stdin line is sent as input (with a trailing newline). Lines starting
//! with `:` are local commands:
//!
//! | Command              | Effect                                      |
//! |----------------------|---------------------------------------------|
//! | `:assist <text>`     | ask the assistant about a command           |
//! | `:analyze <text>`    | ask the assistant to analyse recent output  |
//! | `:resize <rows> <cols>` | send new terminal dimensions             |
//! | `:quit`              | disconnect and exit                         |
//!
//! Without an id, `attach` re-uses the last attached session.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tracing::{debug, info, warn};

use termlink::protocol::CLOSE_NORMAL;
use termlink::{
    AssistantResponse, Config, ConnectionEvent, ConnectionManager, FileSettingsStore,
    FrameHandler, OutboundMessage, RegistryClient, SessionRegistry, Settings, SettingsStore,
    WsConnector,
};

/// Client for remote interactive shell sessions.
#[derive(Parser)]
#[command(name = "termlink", version)]
struct Cli {
    /// Path to TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the registry is reachable.
    Health,
    /// List sessions.
    List,
    /// Create a session and print its id.
    Create {
        /// Command to run instead of the server's default shell.
        #[arg(long)]
        shell: Option<String>,
    },
    /// End a session.
    Delete { id: String },
    /// Attach to a session and stream it on this terminal.
    Attach {
        /// Session id (defaults to the last attached session).
        id: Option<String>,
        /// Create a fresh session and attach to it.
        #[arg(long, conflicts_with = "id")]
        new: bool,
        /// Shell command for `--new`.
        #[arg(long, requires = "new")]
        shell: Option<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("termlink: configuration error: {e}");
            std::process::exit(1);
        }
    };

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli.command, &config).await {
        eprintln!("termlink: {e}");
        std::process::exit(1);
    }
}

async fn run(command: Commands, config: &Config) -> Result<(), String> {
    let registry = RegistryClient::new(&config.registry.url).map_err(|e| e.to_string())?;

    match command {
        Commands::Health => {
            let body = registry.health().await.map_err(|e| e.to_string())?;
            println!(
                "{}",
                serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string())
            );
        }
        Commands::List => {
            let sessions = registry.list_sessions().await.map_err(|e| e.to_string())?;
            if sessions.is_empty() {
                println!("no sessions");
            }
            for s in sessions {
                println!(
                    "{}\t{}\t{}",
                    s.id,
                    s.shell_command.as_deref().unwrap_or("-"),
                    s.created_at
                );
            }
        }
        Commands::Create { shell } => {
            let id = registry
                .create_session(shell.as_deref())
                .await
                .map_err(|e| e.to_string())?;
            println!("{id}");
        }
        Commands::Delete { id } => {
            registry.delete_session(&id).await.map_err(|e| e.to_string())?;
            println!("deleted {id}");
        }
        Commands::Attach { id, new, shell } => {
            attach(config, registry, id, new, shell.as_deref()).await?;
        }
    }
    Ok(())
}

/// Writes session output to stdout and everything else to stderr.
struct TerminalPrinter;

impl FrameHandler for TerminalPrinter {
    fn on_output(&self, data: &str) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(data.as_bytes());
        let _ = out.flush();
    }

    fn on_error(&self, message: &str) {
        eprintln!("termlink: session error: {message}");
    }

    fn on_assistant_response(&self, response: &AssistantResponse) {
        if response.loading {
            eprintln!("termlink: assistant is thinking...");
        } else if response.error {
            eprintln!("termlink: assistant error: {}", response.content);
        } else {
            println!("\n[assistant]\n{}", response.content);
        }
    }
}

async fn attach(
    config: &Config,
    registry: RegistryClient,
    id: Option<String>,
    new: bool,
    shell: Option<&str>,
) -> Result<(), String> {
    let store = config.settings_path().map(FileSettingsStore::new);
    let mut settings = match &store {
        Some(store) => store.load().unwrap_or_else(|e| {
            warn!("ignoring unreadable settings: {e}");
            Settings::default()
        }),
        None => Settings::default(),
    };

    if !registry.is_available().await {
        return Err(format!("registry at {} is not reachable", registry.base_url()));
    }

    let session_id = if new {
        let id = registry
            .create_session(shell)
            .await
            .map_err(|e| e.to_string())?;
        eprintln!("termlink: created session {id}");
        id
    } else {
        id.or_else(|| settings.last_session_id.clone())
            .ok_or("no session id given and no previous session recorded")?
    };

    let options = config.connection_options().map_err(|e| e.to_string())?;
    let (manager, mut events) = ConnectionManager::spawn(
        Arc::new(registry),
        Arc::new(WsConnector),
        Arc::new(TerminalPrinter),
        options,
    );

    manager
        .connect_to_session(&session_id)
        .await
        .map_err(|e| e.to_string())?;
    post(&manager, OutboundMessage::resize(settings.rows, settings.cols))?;

    settings.last_session_id = Some(session_id.clone());
    save_settings(store.as_ref(), &settings);

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut ever_connected = false;

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    let outcome = loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        match parse_line(&line) {
                            LineAction::Send(message) => {
                                if let OutboundMessage::Resize { rows, cols } = message {
                                    settings.rows = rows;
                                    settings.cols = cols;
                                    save_settings(store.as_ref(), &settings);
                                }
                                post(&manager, message)?;
                            }
                            LineAction::Quit => break Ok(()),
                            LineAction::Usage(msg) => eprintln!("termlink: {msg}"),
                        }
                    }
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(format!("stdin: {e}")),
                }
            }
            event = events.recv() => {
                let Some(event) = event else {
                    break Err("connection manager stopped".to_string());
                };
                match event {
                    ConnectionEvent::Connected { session_id } => {
                        ever_connected = true;
                        eprintln!("termlink: connected to {session_id}");
                    }
                    ConnectionEvent::Disconnected { code, reason } if code == CLOSE_NORMAL => {
                        eprintln!("termlink: session ended {reason}");
                        break Ok(());
                    }
                    ConnectionEvent::Disconnected { code, reason } => {
                        eprintln!("termlink: connection lost (code {code}) {reason}");
                    }
                    ConnectionEvent::Reconnecting { attempt, max_attempts, delay } => {
                        eprintln!(
                            "termlink: reconnecting in {}ms (attempt {attempt}/{max_attempts})",
                            delay.as_millis()
                        );
                    }
                    ConnectionEvent::ReconnectionFailed { attempts } => {
                        break Err(format!("gave up after {attempts} reconnect attempt(s)"));
                    }
                    ConnectionEvent::SessionExpired { session_id } => {
                        break Err(format!("session {session_id} no longer exists"));
                    }
                }
            }
            _ = &mut interrupted => {
                debug!("interrupted");
                break Ok(());
            }
        }
    };

    if let Err(e) = manager.disconnect().await {
        debug!("disconnect after exit: {e}");
    }
    if outcome.is_err() && new && !ever_connected {
        eprintln!(
            "termlink: session {session_id} was created but never attached; \
             remove it with `termlink delete {session_id}`"
        );
    }
    info!("detached from {session_id}");
    outcome
}

fn post(manager: &ConnectionManager, message: OutboundMessage) -> Result<(), String> {
    manager.send(message).map_err(|e| e.to_string())
}

fn save_settings(store: Option<&FileSettingsStore>, settings: &Settings) {
    if let Some(store) = store {
        if let Err(e) = store.save(settings) {
            warn!("could not save settings: {e}");
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum LineAction {
    Send(OutboundMessage),
    Quit,
    Usage(&'static str),
}

/// Interpret one line typed in attach mode.
fn parse_line(line: &str) -> LineAction {
    let Some(command) = line.strip_prefix(':') else {
        return LineAction::Send(OutboundMessage::input(format!("{line}\n")));
    };
    let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
    let rest = rest.trim();
    match name {
        "quit" | "q" => LineAction::Quit,
        "assist" if !rest.is_empty() => LineAction::Send(OutboundMessage::assist(rest, false)),
        "analyze" if !rest.is_empty() => LineAction::Send(OutboundMessage::assist(rest, true)),
        "assist" | "analyze" => LineAction::Usage("usage: :assist <text> | :analyze <text>"),
        "resize" => {
            let mut dims = rest.split_whitespace().map(str::parse::<u16>);
            match (dims.next(), dims.next(), dims.next()) {
                (Some(Ok(rows)), Some(Ok(cols)), None) if rows > 0 && cols > 0 => {
                    LineAction::Send(OutboundMessage::resize(rows, cols))
                }
                _ => LineAction::Usage("usage: :resize <rows> <cols>"),
            }
        }
        // `::text` sends a literal line starting with ':'.
        _ if command.starts_with(':') => LineAction::Send(OutboundMessage::input(format!("{command}\n"))),
        _ => LineAction::Usage("unknown command (try :assist, :analyze, :resize, :quit)"),
    }
}
