// src/config/mod.rs
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::notify::MsgFormat;

pub const ENV_CONFIG_PATH: &str = "RADAR_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "config/radar.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
    #[serde(default)]
    pub notifications: Vec<NotificationConfig>,
    #[serde(default)]
    pub storage: Vec<StorageConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Default headers applied to every outbound request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            headers: BTreeMap::new(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// When disabled the process runs one poll cycle and exits.
    #[serde(default = "default_true")]
    pub enable: bool,
    /// Global cap on concurrently running job instances.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enable: true,
            max_concurrent_jobs: default_max_concurrent_jobs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub enable: bool,
    /// Poll interval in minutes.
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default = "default_language")]
    pub language: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub enable: bool,
    /// Transport kind: "stdout" or "webhook".
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub immediate_send: bool,
    /// Truncate deferred send times to midnight of the release date.
    #[serde(default)]
    pub update_send_time: bool,
    #[serde(default)]
    pub msg_format: MsgFormat,
    /// Webhook endpoints, unused for stdout.
    #[serde(default)]
    pub endpoints: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub enable: bool,
    /// Backend kind, currently "sqlite".
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_retries() -> u8 {
    5
}
fn default_true() -> bool {
    true
}
fn default_max_concurrent_jobs() -> usize {
    50
}
fn default_interval_minutes() -> u64 {
    60
}
fn default_country() -> String {
    "HK".to_string()
}
fn default_language() -> String {
    "zh_cn".to_string()
}
fn default_backend() -> String {
    "sqlite".to_string()
}
fn default_db_path() -> String {
    "config/releases.db".to_string()
}

impl Config {
    pub fn enabled_sources(&self) -> impl Iterator<Item = (&String, &SourceConfig)> {
        self.sources.iter().filter(|(_, s)| s.enable)
    }

    pub fn enabled_notifications(&self) -> impl Iterator<Item = &NotificationConfig> {
        self.notifications.iter().filter(|n| n.enable)
    }

    pub fn enabled_storage(&self) -> impl Iterator<Item = &StorageConfig> {
        self.storage.iter().filter(|s| s.enable)
    }

    /// Startup validation. Zero enabled sources or a zero poll interval is
    /// fatal; missing consumers are a degraded mode the caller warns about.
    pub fn validate(&self) -> Result<()> {
        if self.enabled_sources().next().is_none() {
            bail!("no sources enabled");
        }
        for (name, source) in self.enabled_sources() {
            if source.interval_minutes == 0 {
                bail!("source {name} has a zero poll interval");
            }
        }
        Ok(())
    }
}

pub fn load_from(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
}

/// Load config from `$RADAR_CONFIG_PATH`, falling back to `config/radar.toml`.
pub fn load_default() -> Result<Config> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        return load_from(&PathBuf::from(p));
    }
    load_from(Path::new(DEFAULT_CONFIG_PATH))
}
