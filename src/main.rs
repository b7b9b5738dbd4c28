use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use relay_agent::agent::{config::Config, daemon};
use relay_agent::utils;

#[derive(Parser)]
#[command(name = "relay-agent", version, about = "Remote tool-execution agent")]
struct AppCli {
    /// Config file path (defaults to <config dir>/relay-agent/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Subcommands
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the relay and serve commands (default)
    Connect(ConnectArgs),
    /// Show the effective configuration
    Status,
}

#[derive(Args, Default)]
struct ConnectArgs {
    /// WebSocket endpoint, overrides config and RELAY_WS_URL
    #[arg(long)]
    ws_url: Option<String>,

    /// Directory tools are confined to (defaults to the current directory)
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Keep reconnecting after the link drops
    #[arg(long)]
    reconnect: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = AppCli::parse();
    utils::logging::init(args.verbose);

    let mut config = Config::load(args.config.as_deref())?;

    match args.command.unwrap_or(Commands::Connect(ConnectArgs::default())) {
        Commands::Connect(opts) => {
            if let Some(url) = opts.ws_url {
                config.ws_url = url;
            }
            if let Some(dir) = opts.work_dir {
                config.work_dir = Some(dir);
            }
            config.reconnect |= opts.reconnect;

            info!(version = relay_agent::VERSION, "relay-agent starting");
            let outcome = daemon::run(config).await?;
            println!("{outcome}");
        }
        Commands::Status => print_status(&config, args.config.as_deref()),
    }

    Ok(())
}

fn print_status(config: &Config, explicit: Option<&Path>) {
    let file = explicit
        .map(Path::to_path_buf)
        .or_else(Config::default_path)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<none>".to_string());
    println!("relay-agent {}", relay_agent::VERSION);
    println!("config file: {file}");
    println!("relay:       {}", config.ws_url);
    match &config.work_dir {
        Some(dir) => println!("work dir:    {}", dir.display()),
        None => println!("work dir:    <current directory>"),
    }
    if config.credentials.is_complete() {
        println!("session:     {}...", config.credentials.session_prefix());
    } else {
        println!("session:     not logged in");
    }
}
