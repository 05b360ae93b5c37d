use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::{self, CatalogItem};
use crate::monitor::FirstObservation;
use crate::notifier::PruneScope;

/// Longest catalog name that still fits Telegram's 64-byte callback data
const MAX_ITEM_NAME_LEN: usize = 48;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub menu: MenuConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default = "catalog::default_items")]
    pub catalog: Vec<CatalogItem>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StoreConfig {
    /// SQLite database file holding subscribers
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_startup_delay_secs")]
    pub startup_delay_secs: u64,
    /// Pause between two notifications of the same batch
    #[serde(default = "default_send_delay_ms")]
    pub send_delay_ms: u64,
    #[serde(default)]
    pub prune_scope: PruneScope,
    #[serde(default)]
    pub first_observation: FirstObservation,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MenuConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct HealthConfig {
    /// Port for the health endpoint; disabled when unset
    #[serde(default)]
    pub port: Option<u16>,
}

fn default_poll_interval_secs() -> u64 {
    900
}

fn default_startup_delay_secs() -> u64 {
    10
}

fn default_send_delay_ms() -> u64 {
    500
}

fn default_page_size() -> usize {
    8
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            startup_delay_secs: default_startup_delay_secs(),
            send_delay_ms: default_send_delay_ms(),
            prune_scope: PruneScope::default(),
            first_observation: FirstObservation::default(),
        }
    }
}

impl Default for MenuConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    pub fn send_delay(&self) -> Duration {
        Duration::from_millis(self.send_delay_ms)
    }
}

impl Config {
    /// Load the optional TOML file, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let content = if path.exists() {
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?
        } else {
            String::new()
        };

        let mut config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Override file values with environment variables.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(token) = get("BOT_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Some(path) = get("DATABASE_PATH") {
            self.store.database_path = Some(PathBuf::from(path));
        }
        if let Some(v) = get("POLL_INTERVAL_SECS") {
            self.monitor.poll_interval_secs = parse_var("POLL_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("STARTUP_DELAY_SECS") {
            self.monitor.startup_delay_secs = parse_var("STARTUP_DELAY_SECS", &v)?;
        }
        if let Some(v) = get("SEND_DELAY_MS") {
            self.monitor.send_delay_ms = parse_var("SEND_DELAY_MS", &v)?;
        }
        if let Some(v) = get("PAGE_SIZE") {
            self.menu.page_size = parse_var("PAGE_SIZE", &v)?;
        }
        if let Some(v) = get("PORT") {
            self.health.port = Some(parse_var("PORT", &v)?);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.telegram.bot_token.trim().is_empty() {
            missing.push("BOT_TOKEN");
        }
        if self.store.database_path.is_none() {
            missing.push("DATABASE_PATH");
        }
        if !missing.is_empty() {
            anyhow::bail!(
                "Missing required configuration: {} (set the environment variable or the config file entry)",
                missing.join(", ")
            );
        }

        if self.monitor.poll_interval_secs == 0 {
            anyhow::bail!("POLL_INTERVAL_SECS must be greater than zero");
        }
        if !(100..=2000).contains(&self.monitor.send_delay_ms) {
            anyhow::bail!(
                "SEND_DELAY_MS must be between 100 and 2000, got {}",
                self.monitor.send_delay_ms
            );
        }
        if !(1..=20).contains(&self.menu.page_size) {
            anyhow::bail!("PAGE_SIZE must be between 1 and 20, got {}", self.menu.page_size);
        }

        if self.catalog.is_empty() {
            anyhow::bail!("Catalog is empty: define at least one [[catalog]] entry");
        }
        let mut seen = HashSet::new();
        for item in &self.catalog {
            if item.name.is_empty() || item.name.len() > MAX_ITEM_NAME_LEN || item.name.contains(':') {
                anyhow::bail!(
                    "Invalid catalog name '{}': must be 1-{} bytes without ':'",
                    item.name,
                    MAX_ITEM_NAME_LEN
                );
            }
            if !seen.insert(item.name.as_str()) {
                anyhow::bail!("Duplicate catalog name '{}'", item.name);
            }
            if item.feed_url.is_empty() {
                anyhow::bail!("Catalog item '{}' has no feed_url", item.name);
            }
        }

        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid value for {}: '{}' ({})", key, value, e))
}
