//! folio-watch: join a template's collaboration session from a terminal.
//!
//! Prints every session event and reads simple commands from stdin:
//!
//! ```text
//! add {"kind":"chart"}        update E1 {"text":"hi"}    delete E1
//! template {"title":"P&L"}    cursor 10 20 [E1]          who
//! status                      connect | disconnect       hide | show
//! quit
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use folio_collab::{
    CollaborationSession, CursorPosition, FileToken, SessionConfig, SessionEvent, StaticToken,
    TemplateEdit, TokenStore, Visibility,
};
use log::info;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

#[derive(Parser)]
#[command(version, about = "Watch and edit a template collaboration session", long_about = None)]
struct Cli {
    /// Collaboration server, e.g. wss://dash.example.com
    #[arg(short, long, default_value = "wss://localhost")]
    base_url: String,

    /// Template id. Without it, configuration comes from FOLIO_* variables.
    #[arg(short, long)]
    template: Option<String>,

    /// Local user id (random if omitted)
    #[arg(short, long)]
    user: Option<String>,

    /// Display name announced to other collaborators
    #[arg(short, long)]
    name: Option<String>,

    /// Auth token
    #[arg(long, conflicts_with = "token_file")]
    token: Option<String>,

    /// File holding the auth token, re-read on every connect
    #[arg(long)]
    token_file: Option<PathBuf>,
}

impl Cli {
    fn session_config(&self) -> Result<SessionConfig> {
        let Some(template) = &self.template else {
            return SessionConfig::from_env().context("loading FOLIO_* configuration");
        };
        let user = self
            .user
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut config = SessionConfig::new(&self.base_url, template, user);
        if let Some(name) = &self.name {
            config = config.with_user_name(name);
        }
        Ok(config)
    }

    fn token_store(&self) -> Arc<dyn TokenStore> {
        match (&self.token, &self.token_file) {
            (_, Some(path)) => Arc::new(FileToken::new(path)),
            (Some(token), None) => Arc::new(StaticToken::new(token)),
            (None, None) => Arc::new(StaticToken::empty()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = cli.session_config()?;
    info!(
        "Joining template {} as {} via {}",
        config.template_id, config.user_id, config.base_url
    );

    let mut session = CollaborationSession::new(config, cli.token_store())?;
    let mut events = session
        .take_event_rx()
        .context("event receiver already taken")?;
    session.connect();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => print_event(&event),
                None => break,
            },
            line = lines.next_line() => match line? {
                Some(line) => {
                    match run_command(&session, line.trim()).await {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(e) => eprintln!("error: {e:#}"),
                    }
                }
                None => break,
            },
        }
    }

    session.shutdown().await?;
    Ok(())
}

/// Execute one stdin command. `Ok(false)` means quit.
async fn run_command(session: &CollaborationSession, line: &str) -> Result<bool> {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    let sent = match command {
        "" => return Ok(true),
        "quit" | "exit" => return Ok(false),
        "add" => session.send_edit(TemplateEdit::element_add(parse_json(rest)?)).await,
        "template" => {
            session
                .send_edit(TemplateEdit::template_update(parse_json(rest)?))
                .await
        }
        "update" => {
            let (element_id, changes) = rest
                .split_once(' ')
                .context("usage: update <element_id> <json>")?;
            session
                .send_edit(TemplateEdit::element_update(element_id, parse_json(changes)?))
                .await
        }
        "delete" => {
            if rest.is_empty() {
                bail!("usage: delete <element_id>");
            }
            session.send_edit(TemplateEdit::element_delete(rest)).await
        }
        "cursor" => session.send_cursor_move(parse_cursor(rest)?).await,
        "who" => {
            for c in session.collaborators().await {
                println!("  [{}] {} <{}> {:?}", c.initials, c.name, c.email, c.permission);
            }
            return Ok(true);
        }
        "status" => {
            println!("status: {}", session.connection_status().await);
            if let Some(error) = session.last_error().await {
                println!("  {error}");
            }
            return Ok(true);
        }
        "connect" => {
            session.connect();
            return Ok(true);
        }
        "disconnect" => {
            session.disconnect();
            return Ok(true);
        }
        "hide" => {
            session.set_visibility(Visibility::Hidden);
            return Ok(true);
        }
        "show" => {
            session.set_visibility(Visibility::Visible);
            return Ok(true);
        }
        other => bail!("unknown command {other:?}"),
    };

    if !sent {
        eprintln!("not connected, frame dropped");
    }
    Ok(true)
}

fn parse_json(text: &str) -> Result<Value> {
    if text.is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(text).with_context(|| format!("invalid JSON: {text}"))
}

fn parse_cursor(text: &str) -> Result<CursorPosition> {
    let mut parts = text.split_whitespace();
    let (Some(x), Some(y)) = (parts.next(), parts.next()) else {
        bail!("usage: cursor <x> <y> [element_id]");
    };
    let mut position = CursorPosition::new(
        x.parse().context("x must be a number")?,
        y.parse().context("y must be a number")?,
    );
    if let Some(element_id) = parts.next() {
        position = position.over(element_id);
    }
    Ok(position)
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::StatusChanged(status) => println!("* status {status}"),
        SessionEvent::Connected => println!("* connected"),
        SessionEvent::Disconnected { code } => match code {
            Some(code) => println!("* disconnected (code {code})"),
            None => println!("* disconnected"),
        },
        SessionEvent::ReconnectScheduled {
            attempt,
            max_attempts,
            delay,
        } => println!("* reconnecting in {delay:?} ({attempt}/{max_attempts})"),
        SessionEvent::ReconnectExhausted { attempts } => {
            println!("* gave up after {attempts} attempts; type `connect` to retry")
        }
        SessionEvent::TransportError(message) => println!("* transport error: {message}"),
        SessionEvent::ElementUpdated {
            sender_id,
            element_id,
            changes,
        } => println!("{sender_id} updated {element_id}: {changes}"),
        SessionEvent::TemplateChanged {
            sender_id,
            instruction,
        } => println!("{sender_id} changed template: {instruction:?}"),
        SessionEvent::CollaboratorsChanged(list) => {
            let names: Vec<&str> = list.iter().map(|c| c.name.as_str()).collect();
            println!("* collaborators: {}", names.join(", "));
        }
        SessionEvent::CursorMoved {
            sender_id,
            position,
        } => match &position.element_id {
            Some(element_id) => {
                println!("{sender_id} cursor ({}, {}) over {element_id}", position.x, position.y)
            }
            None => println!("{sender_id} cursor ({}, {})", position.x, position.y),
        },
    }
}
