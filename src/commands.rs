//! Manual scan trigger.
//!
//! The interaction surface acknowledges immediately and lets the scan run in
//! the background; completion is reported through a follow-up message. The
//! transport that delivers those messages sits behind [`ScanNotifier`].

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::config::ScanningConfig;
use crate::model::ScanMode;
use crate::scanner::{ScanOutcome, Scanner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanType {
    Global,
    Guild,
}

/// A parsed `/scan` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub scan_type: ScanType,
    pub mode: ScanMode,
    pub guild_id: Option<String>,
}

impl ScanRequest {
    /// Parse the command's string options. `scan_type` is `global` or
    /// `guild`; `scan_mode` is `full_scan` or `active_thread_scan`.
    pub fn parse(scan_type: &str, scan_mode: &str, guild_id: Option<&str>) -> Result<Self> {
        let scan_type = match scan_type {
            "global" => ScanType::Global,
            "guild" => ScanType::Guild,
            other => bail!("unknown scan type: {other}"),
        };
        let mode = match scan_mode {
            "full_scan" => ScanMode::Full,
            "active_thread_scan" => ScanMode::Incremental,
            other => bail!("unknown scan mode: {other}"),
        };
        let guild_id = guild_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        if scan_type == ScanType::Guild && guild_id.is_none() {
            bail!("guild id is required for a guild-specific scan");
        }
        Ok(Self {
            scan_type,
            mode,
            guild_id,
        })
    }

    /// Guild scans slice the configuration down to one guild. A global
    /// incremental scan carrying a guild id does the same.
    pub fn slice_config(&self, full: &ScanningConfig) -> Result<ScanningConfig> {
        let target = match (self.scan_type, &self.guild_id, self.mode) {
            (ScanType::Guild, Some(id), _) => Some(id),
            (ScanType::Global, Some(id), ScanMode::Incremental) => Some(id),
            _ => None,
        };
        match target {
            Some(id) => {
                let guild = full
                    .get(id)
                    .ok_or_else(|| anyhow!("guild {id} not found in scanning configuration"))?;
                Ok(BTreeMap::from([(id.clone(), guild.clone())]))
            }
            None => Ok(full.clone()),
        }
    }

    fn mode_option(&self) -> &'static str {
        match self.mode {
            ScanMode::Full => "full_scan",
            ScanMode::Incremental => "active_thread_scan",
        }
    }

    fn ack_message(&self, sliced: &ScanningConfig) -> String {
        match self.scan_type {
            ScanType::Global => format!(
                "Received command to start a **{}** global scan. Preparing to scan...",
                self.mode_option()
            ),
            ScanType::Guild => {
                let name = self
                    .guild_id
                    .as_deref()
                    .and_then(|id| sliced.get(id))
                    .map(|g| g.name.as_str())
                    .unwrap_or("unknown");
                format!(
                    "Received command to start a **{}** for guild **{}**. Preparing to scan...",
                    self.mode_option(),
                    name
                )
            }
        }
    }
}

/// Delivers follow-up messages once a background scan finishes.
#[async_trait]
pub trait ScanNotifier: Send + Sync {
    async fn follow_up(&self, content: String);
}

/// Handle a manual scan request: validate, acknowledge, run in the
/// background, and follow up with the outcome.
pub async fn handle_scan(
    scanner: Arc<Scanner>,
    full_config: &ScanningConfig,
    request: ScanRequest,
    notifier: Arc<dyn ScanNotifier>,
) -> Result<String> {
    let sliced = request.slice_config(full_config)?;
    let ack = request.ack_message(&sliced);
    info!(
        scan_type = ?request.scan_type,
        mode = request.mode.label(),
        guild_id = request.guild_id.as_deref().unwrap_or("-"),
        "manual scan requested"
    );

    tokio::spawn(async move {
        let outcome = scanner.run_scan(&sliced, request.mode).await;
        let content = match outcome {
            ScanOutcome::Completed(summary) => format!(
                "✅ Scan ({}) has completed: {} guilds, {} channels, {} posts in {:.1}s.",
                request.mode_option(),
                summary.guilds,
                summary.partitions,
                summary.posts_found,
                summary.elapsed.as_secs_f64()
            ),
            ScanOutcome::Skipped => {
                "⚠️ Scan skipped: another scan is already in progress.".to_string()
            }
        };
        notifier.follow_up(content).await;
    });

    Ok(ack)
}
