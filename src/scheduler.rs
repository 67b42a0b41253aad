//! Timed scan triggers.
//!
//! A periodic incremental sweep plus an optional full scan at process start.
//! Overlapping triggers are absorbed by the scanner's busy flag.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ScanningConfig;
use crate::model::ScanMode;
use crate::scanner::Scanner;

#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub scan_at_startup: bool,
    pub scan_interval: Duration,
}

/// Drive the scan cadence until `shutdown` fires.
pub async fn run(
    scanner: Arc<Scanner>,
    config: ScanningConfig,
    schedule: Schedule,
    shutdown: CancellationToken,
) {
    let mut startup_scan: Option<JoinHandle<()>> = None;
    if schedule.scan_at_startup {
        info!("performing initial full scan on startup");
        let scanner = Arc::clone(&scanner);
        let config = config.clone();
        startup_scan = Some(tokio::spawn(async move {
            scanner.run_scan(&config, ScanMode::Full).await;
        }));
    } else {
        info!("skipping initial scan on startup per configuration");
    }

    let mut ticker = tokio::time::interval(schedule.scan_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick of an interval completes immediately.
    ticker.tick().await;

    info!(interval_secs = schedule.scan_interval.as_secs(), "scheduler started");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("scheduler stopped");
                break;
            }
            _ = ticker.tick() => {
                info!("running scheduled incremental scan");
                scanner.run_scan(&config, ScanMode::Incremental).await;
            }
        }
    }

    // A startup scan still in flight winds down via the shutdown token; wait
    // for it so its shard handles are closed before the runtime goes away.
    if let Some(job) = startup_scan {
        let _ = job.await;
    }
}
