//! # Configuration
//!
//! TOML file with one section per concern. Every field has a default, so a
//! missing file (or a missing section) yields a working local setup.
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8000"
//!
//! [search]
//! url = "http://elasticsearch:9200"
//!
//! [broker]
//! url = "nats://nats:4222"
//!
//! [[auth.users]]
//! username = "octoAdmin"
//! token_sha256 = "…"
//! ```

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub receiver: ReceiverSettings,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Config {
    /// Load from `path`. A missing file is not an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply `HQ_*` environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("HQ_SEARCH_URL") {
            self.search.url = url;
        }
        if let Some(url) = lookup("HQ_BROKER_URL") {
            self.broker.url = url;
        }
        if let Some(bind) = lookup("HQ_BIND") {
            self.server.bind = bind;
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            default_page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_search_url")]
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_inventory_index")]
    pub inventory_index: String,
    #[serde(default = "default_audit_index")]
    pub audit_index: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
}

impl SearchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs.max(1))
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            url: default_search_url(),
            username: None,
            password: None,
            inventory_index: default_inventory_index(),
            audit_index: default_audit_index(),
            timeout_ms: default_timeout_ms(),
            cache_capacity: default_cache_capacity(),
            health_interval_secs: default_health_interval(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_url")]
    pub url: String,
    #[serde(default = "default_queue")]
    pub queue: String,
    #[serde(default = "default_prefetch")]
    pub prefetch: u16,
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
}

impl BrokerConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            queue: default_queue(),
            prefetch: default_prefetch(),
            publish_timeout_ms: default_publish_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReceiverSettings {
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReceiverSettings {
    fn default() -> Self {
        Self {
            backoff_base_secs: default_backoff_base(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct AuthConfig {
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UserConfig {
    pub username: String,
    /// Hex SHA-256 of the user's bearer token.
    pub token_sha256: String,
}

fn default_bind() -> String {
    "127.0.0.1:8000".into()
}
fn default_page_size() -> usize {
    hq_core::DEFAULT_PAGE_SIZE
}
fn default_search_url() -> String {
    "http://localhost:9200".into()
}
fn default_inventory_index() -> String {
    "hosts".into()
}
fn default_audit_index() -> String {
    "search_query_logs".into()
}
fn default_timeout_ms() -> u64 {
    5000
}
fn default_cache_capacity() -> usize {
    1000
}
fn default_health_interval() -> u64 {
    30
}
fn default_broker_url() -> String {
    "nats://localhost:4222".into()
}
fn default_queue() -> String {
    "search_query_queue".into()
}
fn default_prefetch() -> u16 {
    10
}
fn default_publish_timeout_ms() -> u64 {
    3000
}
fn default_backoff_base() -> u64 {
    5
}
fn default_max_attempts() -> u32 {
    5
}
