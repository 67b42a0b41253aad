//! Configuration loader and validator for the forum indexer.
//!
//! Two sources are merged at load time: a YAML base file for app/platform/bot
//! settings, and a JSON file carrying the per-guild scanning map.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("JSON parse error: {0}")]
    ParseJson(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub platform: Platform,
    pub bot: Bot,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Chat-platform REST API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Platform {
    pub token: String,
    pub api_base: String,
}

/// Scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bot {
    #[serde(alias = "ScanAtStartup")]
    pub scan_at_startup: bool,
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
}

fn default_scan_interval_secs() -> u64 {
    3600
}

/// Per-guild scanning map, keyed by guild id.
pub type ScanningConfig = BTreeMap<String, GuildConfig>;

/// Scanning configuration for a single guild.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuildConfig {
    pub name: String,
    #[serde(rename = "guilds_id")]
    pub guild_id: String,
    pub db_path: String,
    #[serde(default)]
    pub data: BTreeMap<String, CategoryEntry>,
}

/// One category to scan. An empty `channel_ids` means "every forum channel
/// whose parent is `id`".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryEntry {
    #[serde(rename = "category_name")]
    pub name: String,
    pub id: String,
    #[serde(rename = "channel_id", default)]
    pub channel_ids: Vec<String>,
}

/// On-disk shape of the scanning-config JSON file.
#[derive(Debug, Deserialize)]
struct ScanningFile {
    #[serde(default)]
    scanning_config: BTreeMap<String, GuildConfig>,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Load the per-guild scanning map from a JSON file.
///
/// Guild entries missing a name, guild id or database path are dropped with a
/// warning instead of failing the whole load.
pub fn load_scanning(path: &Path) -> Result<ScanningConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let file: ScanningFile = serde_json::from_str(&content)?;
    Ok(validate_scanning(file.scanning_config))
}

fn validate_scanning(raw: BTreeMap<String, GuildConfig>) -> ScanningConfig {
    raw.into_iter()
        .filter(|(key, guild)| {
            let complete = !guild.name.trim().is_empty()
                && !guild.guild_id.trim().is_empty()
                && !guild.db_path.trim().is_empty();
            if !complete {
                warn!(guild = %key, "dropping incomplete guild entry from scanning config");
            }
            complete
        })
        .collect()
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.platform.token.trim().is_empty() {
        return Err(ConfigError::Invalid("platform.token must be non-empty"));
    }
    if cfg.platform.api_base.trim().is_empty() {
        return Err(ConfigError::Invalid("platform.api_base must be non-empty"));
    }
    if cfg.bot.scan_interval_secs == 0 {
        return Err(ConfigError::Invalid("bot.scan_interval_secs must be > 0"));
    }
    Ok(())
}

/// Returns the canonical example YAML content.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

platform:
  token: "YOUR_PLATFORM_BOT_TOKEN"
  api_base: "https://chat.example.com/api/v10"

bot:
  scan_at_startup: true
  scan_interval_secs: 3600
"#
}

/// Returns an example scanning-config JSON document.
pub fn example_scanning() -> &'static str {
    r#"{
  "scanning_config": {
    "111111111111111111": {
      "name": "Example Guild",
      "guilds_id": "111111111111111111",
      "db_path": "./data/example_guild.db",
      "data": {
        "showcase": {
          "category_name": "Showcase",
          "id": "222222222222222222",
          "channel_id": []
        },
        "help": {
          "category_name": "Help",
          "id": "333333333333333333",
          "channel_id": ["444444444444444444", "555555555555555555"]
        }
      }
    }
  }
}
"#
}
