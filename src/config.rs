use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ipc::Endpoint;

/// Application id registered with the presence host.
pub const CLIENT_ID: &str = "492721776145596416";

pub const DEFAULT_RECONNECT_THRESHOLD: u32 = 5;

pub const DEFAULT_LOCK_NAME: &str = "dnvim";

fn default_client_id() -> String {
    CLIENT_ID.to_string()
}

fn default_reconnect_threshold() -> u32 {
    DEFAULT_RECONNECT_THRESHOLD
}

fn default_rich_presence() -> bool {
    true
}

fn default_lock_name() -> String {
    DEFAULT_LOCK_NAME.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_reconnect_threshold")]
    pub reconnect_threshold: u32,
    #[serde(default = "default_rich_presence")]
    pub rich_presence: bool,
    /// Regexes matched against the full file path
    #[serde(default)]
    pub blacklist: Vec<String>,
    #[serde(default)]
    pub fts_blacklist: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub io_timeout_ms: Option<u64>,
    #[serde(default = "default_lock_name")]
    pub lock_name: String,
    #[serde(default)]
    pub fts_aliases: BTreeMap<String, String>,

    // This field is not serialized, just used at runtime
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            reconnect_threshold: DEFAULT_RECONNECT_THRESHOLD,
            rich_presence: true,
            blacklist: Vec::new(),
            fts_blacklist: Vec::new(),
            socket_path: None,
            io_timeout_ms: None,
            lock_name: default_lock_name(),
            fts_aliases: BTreeMap::new(),
            config_path: None,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config at '{}'", path))?;
        config.config_path = Some(PathBuf::from(path));
        Ok(config)
    }

    /// Load the config file, falling back to defaults when it does not exist.
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        if Path::new(path).exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &str) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.client_id.trim().is_empty() {
            anyhow::bail!("client_id cannot be empty");
        }
        if self.lock_name.trim().is_empty() || self.lock_name.contains(std::path::is_separator) {
            anyhow::bail!("lock_name '{}' must be a plain file name", self.lock_name);
        }
        if self.io_timeout_ms == Some(0) {
            anyhow::bail!("io_timeout_ms must be greater than zero");
        }
        self.blacklist_patterns()?;
        Ok(())
    }

    pub fn blacklist_patterns(&self) -> anyhow::Result<Vec<Regex>> {
        self.blacklist
            .iter()
            .map(|pattern| {
                Regex::new(pattern)
                    .with_context(|| format!("Invalid blacklist pattern '{}'", pattern))
            })
            .collect()
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_ms.map(Duration::from_millis)
    }

    /// Configured socket override, or the platform default endpoint.
    pub fn endpoint(&self) -> Endpoint {
        match &self.socket_path {
            Some(path) => Endpoint::from_path(path),
            None => Endpoint::resolve(),
        }
    }
}
