use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use forum_indexer::config;
use forum_indexer::platform::{PlatformService, RestClient};
use forum_indexer::scanner::Scanner;
use forum_indexer::scheduler;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Path to the scanning-config JSON file
    #[arg(long, default_value = "config/scanning_config.json")]
    scanning_config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;
    let scanning = config::load_scanning(&args.scanning_config)?;
    info!(guilds = scanning.len(), "scanning configuration loaded");

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("shutdown signal received");
            shutdown.cancel();
        });
    }

    let platform: Arc<dyn PlatformService> = Arc::new(RestClient::new(
        cfg.platform.token.clone(),
        cfg.platform.api_base.clone(),
    ));
    let scanner = Scanner::new(platform, shutdown.clone());

    let schedule = scheduler::Schedule {
        scan_at_startup: cfg.bot.scan_at_startup,
        scan_interval: Duration::from_secs(cfg.bot.scan_interval_secs),
    };
    scheduler::run(scanner, scanning, schedule, shutdown).await;

    info!("shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
