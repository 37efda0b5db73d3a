use std::sync::Arc;

use chat::stomp::{StompBroker, StompConfig};
use chat::{ChatSession, RetryPolicy, RoomIdentity, SessionConfig};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

mod render;


#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("health check failed: HTTP {0}")]
    Unhealthy(u16),
    #[error("chat setup failed: {0}")]
    Chat(#[from] chat::ChatError),
    #[error("stdin read failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "everstar-chat", about = "Everstar room chat client")]
struct Cli {
    #[arg(long, env = "EVERSTAR_BASE_URL", default_value = "http://127.0.0.1:3000")]
    base_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the relay is up.
    Ping,
    /// Join a room and chat from the terminal. `/quit` or EOF leaves.
    Join(JoinArgs),
}

#[derive(Args, Debug)]
struct JoinArgs {
    /// STOMP WebSocket endpoint; derived from the base URL when unset.
    #[arg(long, env = "EVERSTAR_WS_URL")]
    ws_url: Option<String>,

    /// Room to join; blank joins the default room.
    #[arg(long, env = "EVERSTAR_ROOM_ID")]
    room: Option<String>,

    /// Display name attached to outgoing messages.
    #[arg(long, env = "EVERSTAR_SENDER")]
    sender: String,

    /// Give up on the first connection failure instead of backing off.
    #[arg(long, default_value_t = false)]
    no_retry: bool,

    /// Keep only the newest N messages; 0 keeps everything.
    #[arg(long)]
    history: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Ping => run_ping(&cli.base_url).await,
        Command::Join(args) => run_join(&cli.base_url, args).await,
    }
}

async fn run_ping(base_url: &str) -> Result<(), CliError> {
    let url = format!("{}/healthz", base_url.trim_end_matches('/'));
    let response = reqwest::Client::new().get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::Unhealthy(status.as_u16()));
    }
    println!("ok");
    Ok(())
}

async fn run_join(base_url: &str, args: JoinArgs) -> Result<(), CliError> {
    let url = match args.ws_url {
        Some(url) => url,
        None => ws_url(base_url)?,
    };

    let mut config = SessionConfig::from_env()?;
    if args.no_retry {
        config.retry = RetryPolicy::none();
    }
    if let Some(limit) = args.history {
        config.history_limit = Some(limit).filter(|limit| *limit > 0);
    }
    let broker = StompBroker::new(StompConfig { url, ..StompConfig::from_env() });
    let identity = RoomIdentity::new(args.room.as_deref(), args.sender);

    tracing::info!(url = %broker.config().url, room_id = %identity.room_id, "cli: joining");
    let mut session = ChatSession::activate(config, identity, Arc::new(broker));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                None => break,
                Some(line) if line.trim() == "/quit" => break,
                Some(line) => {
                    session.set_draft(line);
                    if !session.send() && !session.draft().trim().is_empty() {
                        println!("{}", render::not_sent(session.phase()));
                    }
                }
            },
            update = session.next_update() => match update {
                Some(update) => {
                    if let Some(line) = render::update_line(&update, session.identity()) {
                        println!("{line}");
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.deactivate().await;
    println!("{}", render::left(session.identity()));
    Ok(())
}

/// Relay STOMP endpoint for an HTTP base URL.
fn ws_url(base_url: &str) -> Result<String, CliError> {
    let base = base_url.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("http://") {
        return Ok(format!("ws://{rest}/api/chat/ws"));
    }
    if let Some(rest) = base.strip_prefix("https://") {
        return Ok(format!("wss://{rest}/api/chat/ws"));
    }
    Err(CliError::InvalidBaseUrl(base_url.to_owned()))
}
