use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use stream_daemon::config::{AppConfig, DEFAULT_CONFIG_PATH};
use stream_daemon::logging::init_logging;
use stream_daemon::services::ServiceContainer;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "STREAM_DAEMON_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Also write daily-rotated log files to this directory
    #[arg(long, env = "STREAM_DAEMON_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Poll every channel once and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before parsing so env-backed flags and secrets see it
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let _log_guard = init_logging(args.log_dir.as_deref()).context("failed to initialize logging")?;

    let config = AppConfig::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    info!(config = %args.config.display(), "stream-daemon starting");

    let container = ServiceContainer::new(config).await?;

    if args.once {
        container.run_once().await;
        return Ok(());
    }

    let token = container.cancellation_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received shutdown signal");
                token.cancel();
            }
            Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
        }
    });

    container.run().await;
    info!("stream-daemon stopped");
    Ok(())
}
