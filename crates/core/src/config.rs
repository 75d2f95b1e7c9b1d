// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime configuration.
//!
//! Configuration is read from `telemed.toml`:
//!
//! ```toml
//! [store]
//! path = "/var/lib/telemed/local.db"
//!
//! [remote]            # omit to run against the local relay only
//! url = "https://xyzabc.example.co"
//! api_key = "..."
//!
//! [relay]
//! url = "http://localhost:4000"
//!
//! [sync]
//! max_rejections = 5
//!
//! [bus]
//! log_capacity = 500
//! ```
//!
//! Every section and field is optional.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// File name looked up by [`Config::find`].
pub const CONFIG_FILE_NAME: &str = "telemed.toml";

/// Remote URL shipped in sample configs; treated as "not configured".
pub const PLACEHOLDER_REMOTE_URL: &str = "https://your-project.supabase.co";
/// API key shipped in sample configs; treated as "not configured".
pub const PLACEHOLDER_API_KEY: &str = "your-anon-key";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    /// Hosted remote store. Absent means relay fallback mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteConfig>,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub bus: BusConfig,
}

/// Local store location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the store file. Defaults to the platform data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Hosted remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub url: String,
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Local relay service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_relay_url")]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Outbox delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Remote rejections after which an item is parked as rejected.
    #[serde(default = "default_max_rejections")]
    pub max_rejections: u32,
}

/// Message bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Entries kept in the durable message log.
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    /// Message ids remembered for de-duplication; at least `log_capacity`.
    #[serde(default = "default_dedupe_window")]
    pub dedupe_window: usize,
    /// How often `listen` probes for foreign signals.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_relay_url() -> String {
    "http://localhost:4000".to_string()
}

fn default_max_rejections() -> u32 {
    5
}

fn default_log_capacity() -> usize {
    500
}

fn default_dedupe_window() -> usize {
    1024
}

fn default_poll_interval_ms() -> u64 {
    250
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            url: default_relay_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            max_rejections: default_max_rejections(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            log_capacity: default_log_capacity(),
            dedupe_window: default_dedupe_window(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl RemoteConfig {
    /// True if the url or key is still the sample placeholder, or empty.
    pub fn is_placeholder(&self) -> bool {
        let url = self.url.trim();
        let key = self.api_key.trim();
        url.is_empty() || key.is_empty() || url == PLACEHOLDER_REMOTE_URL || key == PLACEHOLDER_API_KEY
    }
}

impl Config {
    /// Parses configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Loads `telemed.toml` from `dir` or its nearest ancestor that has one.
    ///
    /// Falls back to defaults when no file is found.
    pub fn find(dir: &Path) -> Result<Self> {
        let mut current = dir.to_path_buf();
        loop {
            let candidate = current.join(CONFIG_FILE_NAME);
            if candidate.is_file() {
                tracing::debug!(path = %candidate.display(), "loading config");
                return Self::load(&candidate);
            }
            if !current.pop() {
                return Ok(Config::default());
            }
        }
    }

    /// Checks values that would make the engine misbehave.
    pub fn validate(&self) -> Result<()> {
        if let Some(remote) = &self.remote {
            if !remote.is_placeholder() && !is_http_url(&remote.url) {
                return Err(Error::InvalidConfig(format!(
                    "remote url must start with http:// or https://, got '{}'",
                    remote.url
                )));
            }
        }
        if !is_http_url(&self.relay.url) {
            return Err(Error::InvalidConfig(format!(
                "relay url must start with http:// or https://, got '{}'",
                self.relay.url
            )));
        }
        if self.sync.max_rejections == 0 {
            return Err(Error::InvalidConfig(
                "sync.max_rejections must be at least 1".into(),
            ));
        }
        if self.bus.log_capacity == 0 {
            return Err(Error::InvalidConfig("bus.log_capacity must be at least 1".into()));
        }
        if self.bus.dedupe_window == 0 {
            return Err(Error::InvalidConfig(
                "bus.dedupe_window must be at least 1".into(),
            ));
        }
        if self.bus.dedupe_window < self.bus.log_capacity {
            return Err(Error::InvalidConfig(
                "bus.dedupe_window must cover bus.log_capacity".into(),
            ));
        }
        Ok(())
    }

    /// The remote store settings, unless missing or left at placeholders.
    pub fn remote_configured(&self) -> Option<&RemoteConfig> {
        self.remote.as_ref().filter(|r| !r.is_placeholder())
    }

    /// Path of the local store file.
    pub fn store_path(&self) -> PathBuf {
        match &self.store.path {
            Some(path) => path.clone(),
            None => dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("telemed")
                .join("local.db"),
        }
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
