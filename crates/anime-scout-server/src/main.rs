//! Anime Scout server: entry point.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use anime_scout::config::{find_chromium, parse_base_url};
use anime_scout::{Scout, ScoutConfig};
use anime_scout_server::rest;

#[derive(Parser)]
#[command(
    name = "anime-scout-server",
    about = "REST API for browser-rendered anime catalogue extraction",
    version
)]
struct Cli {
    /// Listen address (host:port).
    #[arg(long, default_value = "127.0.0.1:3000")]
    addr: String,

    /// Catalogue site root. Overrides SCOUT_BASE_URL.
    #[arg(long)]
    base_url: Option<String>,

    /// Path to a Chromium executable. Overrides SCOUT_CHROMIUM_PATH.
    #[arg(long)]
    chromium: Option<PathBuf>,

    /// Show the browser window instead of running headless.
    #[arg(long)]
    headed: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST server (default).
    Serve,

    /// Locate Chromium and try one launch.
    Doctor,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   anime-scout-server completions bash > ~/.local/share/bash-completion/completions/anime-scout-server
    ///   anime-scout-server completions zsh > ~/.zfunc/_anime-scout-server
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        None | Some(Commands::Serve) => {
            let config = resolve_config(&cli)?;
            tracing::info!("Anime Scout server");
            tracing::info!("Catalogue: {}", config.base_url);

            let scout = Arc::new(Scout::with_chromium(config)?);
            if let Err(e) = scout.init().await {
                tracing::warn!("Engine warm-up failed, will retry on first request: {e}");
            }

            rest::serve(&cli.addr, Arc::clone(&scout), shutdown_signal()).await?;
            scout.shutdown().await;
        }

        Some(Commands::Doctor) => {
            let config = resolve_config(&cli)?;
            match find_chromium(config.browser.executable.as_ref()) {
                Some(path) => println!("Chromium: {}", path.display()),
                None => {
                    eprintln!("Chromium: not found");
                    std::process::exit(1);
                }
            }

            let scout = Scout::with_chromium(config)?;
            match scout.init().await {
                Ok(()) => {
                    println!("Launch: ok");
                    scout.shutdown().await;
                }
                Err(e) => {
                    eprintln!("Launch: failed: {e}");
                    std::process::exit(1);
                }
            }
        }

        Some(Commands::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "anime-scout-server", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Environment first, then flags on top.
fn resolve_config(cli: &Cli) -> anyhow::Result<ScoutConfig> {
    let mut config = ScoutConfig::from_env()?;
    if let Some(base) = &cli.base_url {
        config.base_url = parse_base_url(base)?;
    }
    if let Some(path) = &cli.chromium {
        config.browser.executable = Some(path.clone());
    }
    if cli.headed {
        config.browser.headless = false;
    }
    Ok(config)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
