//! Configuration loading and validation

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub origin: OriginConfig,
    #[serde(default)]
    pub esi: EsiConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Origin serving the pages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginConfig {
    #[serde(default = "default_origin_url")]
    pub url: String,
}

/// Include processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EsiConfig {
    /// Base URL for relative includes; the origin URL when unset
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    /// Literal origins or `regex:` patterns
    #[serde(default)]
    pub allowed_hosts: Option<Vec<String>>,
    #[serde(default = "default_cache_enabled")]
    pub cache_enabled: bool,
    /// Request headers passed on to the origin and to fragment requests
    #[serde(default)]
    pub forward_headers: Vec<String>,
}

/// Upstream HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub skip_tls_verify: bool,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// File receiving processor diagnostics such as security warnings
    #[serde(default)]
    pub log_file: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            url: default_origin_url(),
        }
    }
}

impl Default for EsiConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            max_depth: default_max_depth(),
            allowed_hosts: None,
            cache_enabled: default_cache_enabled(),
            forward_headers: Vec::new(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            user_agent: None,
            skip_tls_verify: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            log_file: None,
        }
    }
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_origin_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_max_depth() -> u32 {
    3
}

fn default_cache_enabled() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &str) -> Result<Self> {
        let config_path = Path::new(path);

        if !config_path.exists() {
            info!("Config file not found at {}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        info!("Loaded configuration from {}", path);
        Ok(config)
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<()> {
        let origin = self.origin.url.trim();
        if origin.is_empty() {
            bail!("origin.url must not be empty");
        }
        if !origin.starts_with("http://") && !origin.starts_with("https://") {
            bail!("origin.url must be an http(s) URL: {}", origin);
        }
        if self.http.timeout_ms == 0 {
            bail!("http.timeout_ms must be greater than zero");
        }
        Ok(())
    }

    /// Base URL for relative includes
    pub fn base_url(&self) -> &str {
        self.esi
            .base_url
            .as_deref()
            .filter(|b| !b.trim().is_empty())
            .unwrap_or(&self.origin.url)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.http.timeout_ms)
    }
}
