//! # tether
//!
//! Terminal client: connects to a Tether server, keeps every session in
//! sync, prints the active conversation, and sends stdin lines as user
//! messages.

#![deny(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tether_client::render::render_update;
use tether_client::{ClientConfig, ClientHandle, ClientUpdate, SyncClient};
use tether_core::SessionId;
use tether_protocol::CreateWorktreeRequest;
use tether_settings::{load_settings, load_settings_from_path};
use tether_transport::HttpSyncBackend;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::info;

/// Tether terminal client.
#[derive(Parser, Debug)]
#[command(name = "tether", about = "Keep Tether agent sessions in sync from the terminal")]
struct Cli {
    /// Settings file (defaults to `~/.tether/settings.json`).
    #[arg(long)]
    settings: Option<std::path::PathBuf>,

    /// WebSocket URL (overrides settings).
    #[arg(long)]
    ws_url: Option<String>,

    /// HTTP sync API base URL (overrides settings).
    #[arg(long)]
    http_url: Option<String>,

    /// Session to open first (overrides settings).
    #[arg(long)]
    session: Option<String>,

    /// Log level when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Log JSON lines to stderr.
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

/// A parsed stdin line.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Say(String),
    Switch(SessionId),
    Interrupt,
    Resync,
    Models,
    Model(String),
    New(Option<String>),
    Close(SessionId),
    Connect,
    Disconnect,
    Help,
    Quit,
    Unknown(String),
}

impl Input {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Some(Self::Say(line.to_string()));
        };
        let (name, arg) = command
            .split_once(char::is_whitespace)
            .map_or((command, ""), |(n, a)| (n, a.trim()));
        let input = match (name, arg) {
            ("switch", id) if !id.is_empty() => Self::Switch(SessionId::from(id)),
            ("interrupt", _) => Self::Interrupt,
            ("resync", _) => Self::Resync,
            ("models", _) => Self::Models,
            ("model", id) if !id.is_empty() => Self::Model(id.to_string()),
            ("new", name) => Self::New((!name.is_empty()).then(|| name.to_string())),
            ("close", id) if !id.is_empty() => Self::Close(SessionId::from(id)),
            ("connect", _) => Self::Connect,
            ("disconnect", _) => Self::Disconnect,
            ("help", _) => Self::Help,
            ("quit" | "exit", _) => Self::Quit,
            _ => Self::Unknown(line.to_string()),
        };
        Some(input)
    }
}

const HELP: &str = "\
  <text>            send to the active session
  /switch <id>      view another session
  /interrupt        stop the active turn
  /resync           re-fetch every session
  /models           list models
  /model <id>       switch the active session's model
  /new [name]       create a session
  /close <id>       close a session
  /connect          connect (again)
  /disconnect       disconnect
  /quit             exit";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.settings {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => load_settings().context("Failed to load settings")?,
    };
    if let Some(url) = cli.ws_url {
        settings.server.ws_url = url;
    }
    if let Some(url) = cli.http_url {
        settings.server.http_url = url;
    }
    if let Some(session) = cli.session {
        settings.server.default_session = session;
    }
    let level = cli.log_level.unwrap_or_else(|| settings.logging.level.clone());
    if cli.json_logs || settings.logging.json {
        tether_core::logging::init_json_subscriber(&level);
    } else {
        tether_core::logging::init_subscriber(&level);
    }

    let backend = HttpSyncBackend::new(&settings.server.http_url)
        .with_context(|| format!("Invalid HTTP URL: {}", settings.server.http_url))?;
    let config = ClientConfig::from_settings(&settings);
    info!(ws_url = %config.supervisor.url, http_url = %settings.server.http_url, "starting tether");

    let (handle, client_task) = SyncClient::spawn(config, Arc::new(backend));
    let mut updates = handle.subscribe();
    handle.connect()?;

    let mut active = SessionId::main();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(update) => {
                    if let ClientUpdate::ActiveChanged(id) = &update {
                        active = id.clone();
                    }
                    if let Some(text) = render_update(&update, &active) {
                        println!("{text}");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    eprintln!("! display fell behind by {skipped} updates");
                }
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                let Some(input) = Input::parse(&line) else {
                    continue;
                };
                if input == Input::Quit {
                    break;
                }
                if let Err(error) = dispatch(&handle, &active, input).await {
                    eprintln!("! {error:#}");
                }
            }
        }
    }

    handle.shutdown()?;
    client_task.await.context("Client task panicked")?;
    Ok(())
}

async fn dispatch(handle: &ClientHandle, active: &SessionId, input: Input) -> Result<()> {
    match input {
        Input::Say(text) => handle.send_user_message(active, text).await?,
        Input::Switch(id) => handle.select_active(&id).await?,
        Input::Interrupt => handle.interrupt(active).await?,
        Input::Resync => handle.request_resync()?,
        Input::Models => handle.request_models().await?,
        Input::Model(model) => handle.set_model(active, model, None).await?,
        Input::New(name) => {
            let request = CreateWorktreeRequest {
                name,
                provider: None,
                model: None,
            };
            let id = handle.create_worktree(request).await?;
            println!("* created {id}; /switch {id} to view it");
        }
        Input::Close(id) => {
            if !handle.close_worktree(&id).await? {
                println!("* no session {id}");
            }
        }
        Input::Connect => handle.connect()?,
        Input::Disconnect => handle.disconnect()?,
        Input::Help => println!("{HELP}"),
        Input::Unknown(line) => println!("* unknown command {line:?}; /help lists commands"),
        Input::Quit => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_a_message() {
        assert_eq!(Input::parse("  hello there "), Some(Input::Say("hello there".into())));
        assert_eq!(Input::parse("   "), None);
    }

    #[test]
    fn slash_commands() {
        assert_eq!(
            Input::parse("/switch wt-2"),
            Some(Input::Switch(SessionId::from("wt-2")))
        );
        assert_eq!(Input::parse("/new"), Some(Input::New(None)));
        assert_eq!(Input::parse("/new fix ci"), Some(Input::New(Some("fix ci".into()))));
        assert_eq!(Input::parse("/exit"), Some(Input::Quit));
        assert_eq!(Input::parse("/switch"), Some(Input::Unknown("/switch".into())));
    }

    #[test]
    fn cli_parses_overrides() {
        let cli = Cli::try_parse_from(["tether", "--ws-url", "ws://box/ws", "--json-logs"]).unwrap();
        assert_eq!(cli.ws_url.as_deref(), Some("ws://box/ws"));
        assert!(cli.json_logs);
        assert!(cli.http_url.is_none());
    }
}
