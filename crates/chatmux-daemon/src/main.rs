//! chatmux daemon - bridges a tmux-hosted assistant session to a chat surface.
//!
//! Runs one conversation binding against a named tmux session, with a
//! console surface standing in for the chat platform: stdin lines become
//! user messages, assistant output streams back as message blocks.

use anyhow::Result;
use chatmux_daemon::{config, console, logging};
use chatmux_core::{Relay, RelayEvent, TmuxSessions};
use clap::Parser;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

use config::Config;
use console::ConsoleSurface;
use logging::{LogConfig, LogFormat};

/// chatmux daemon - terminal-to-chat output relay.
#[derive(Parser, Debug)]
#[command(name = "chatmux-daemon")]
#[command(about = "Relay a tmux-hosted assistant session to a chat surface")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the tmux session name from config
    #[arg(short, long)]
    tmux_session: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace logging (everything, including per-tick noise)
    #[arg(long)]
    trace: bool,

    /// Quiet mode (WARN and ERROR only)
    #[arg(short, long)]
    quiet: bool,

    /// Set log level for specific targets (e.g. "poll=debug").
    /// Targets are prefixed with "chatmux::" automatically.
    #[arg(long = "log", value_name = "TARGET=LEVEL")]
    log_overrides: Vec<String>,

    /// Log output format
    #[arg(long = "log-format", value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::from_cli(
        cli.debug,
        cli.trace,
        cli.quiet,
        cli.log_overrides,
        cli.log_format,
    );
    logging::init(&log_config);

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(session) = cli.tmux_session {
        config.tmux_session = session;
    }

    tracing::info!(
        target: "chatmux::startup",
        "Binding tmux session '{}' (poll every {}ms)",
        config.tmux_session,
        config.poll_interval_ms
    );

    let conversation_id = Uuid::new_v4();
    let tmux = TmuxSessions::new();
    tmux.register(conversation_id, config.tmux_session.clone()).await;

    let relay = Relay::new(tmux, ConsoleSurface::new(), config.relay_config());
    let mut events = relay.subscribe();
    relay.start_poller(conversation_id).await?;

    println!("chatmux: type a message and press Enter. /stop interrupts, /quit exits.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let text = line.trim();
                if text.is_empty() {
                    continue;
                }
                match text {
                    "/quit" => break,
                    "/stop" => {
                        if let Err(e) = relay.request_interrupt(conversation_id).await {
                            tracing::warn!(target: "chatmux::startup", "Interrupt failed: {}", e);
                        }
                    }
                    _ => match relay.dispatch_user_message(conversation_id, "console", text).await {
                        Ok(true) => {}
                        Ok(false) => println!("(send gate: message dropped, slow down)"),
                        Err(e) => tracing::warn!(target: "chatmux::startup", "Dispatch failed: {}", e),
                    },
                }
            }
            event = events.recv() => {
                match event {
                    Ok(RelayEvent::SideChannel { request, .. }) => {
                        println!(
                            "? side-channel request: {}",
                            serde_json::to_string(&request)?
                        );
                    }
                    Ok(RelayEvent::SessionEnded { .. }) => {
                        tracing::info!(target: "chatmux::startup", "Session ended, exiting");
                        break;
                    }
                    Err(_) => break,
                }
            }
        }
    }

    relay.stop_poller(conversation_id).await;
    Ok(())
}
