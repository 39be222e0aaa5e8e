#![forbid(unsafe_code)]

//! `agent-conduit` binary.
//!
//! Bootstraps configuration and logging, brings up the agent connection,
//! and runs a minimal line-based console front end — the reference consumer
//! of the bridge. Real chat platforms integrate through the same two calls:
//! [`SessionBridge::send_message`] and the `start`/`stop` lifecycle.

use std::io::Write as _;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_conduit::bridge::SessionBridge;
use agent_conduit::config::GlobalConfig;
use agent_conduit::{AppError, Result};

/// Conversation key used for the local console.
const CONSOLE_KEY: &str = "console";

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-conduit", about = "Chat bridge to an ACP agent process", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the workspace root handed to the agent.
    #[arg(long)]
    workspace: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-conduit bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(workspace) = args.workspace {
        config.workspace_root = workspace;
    }
    info!("configuration loaded");

    let bridge = SessionBridge::from_config(&config)?;
    bridge.start().await?;
    info!("agent connection ready; type a message, /clear, or /quit");

    let result = console_loop(&bridge).await;
    bridge.stop().await;
    result
}

/// Read console lines and relay them through the bridge, streaming reply
/// chunks to stdout as they arrive.
async fn console_loop(bridge: &SessionBridge) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|err| AppError::Io(err.to_string()))?
    {
        let line = line.trim();
        match line {
            "" => {}
            "/quit" => break,
            "/clear" => {
                let removed = bridge.clear(CONSOLE_KEY).await?;
                println!(
                    "{}",
                    if removed {
                        "conversation cleared"
                    } else {
                        "no conversation to clear"
                    }
                );
            }
            text => {
                let mut print_chunk = |chunk: &str| {
                    print!("{chunk}");
                    let _ = std::io::stdout().flush();
                };
                match bridge
                    .send_message(CONSOLE_KEY, text, &[], Some(&mut print_chunk))
                    .await
                {
                    Ok(rest) => {
                        if !rest.is_empty() {
                            print!("{rest}");
                        }
                        println!();
                    }
                    Err(err) => {
                        warn!(%err, "message failed");
                        println!("error: {err}");
                    }
                }
            }
        }
    }

    Ok(())
}

fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,agent_conduit=debug"));

    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}
