//! spotprice.toml configuration parser.
//!
//! Every field has a default, so an empty or missing file is a valid
//! configuration. Command-line flags are applied on top by the daemon.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// EC2 accepts `MaxResults` between 5 and 1000 for spot price history.
pub const MIN_PAGE_SIZE: u32 = 5;
pub const MAX_PAGE_SIZE: u32 = 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpotpriceConfig {
    pub store: StoreConfig,
    pub collector: CollectorConfig,
    pub source: SourceConfig,
    pub server: ServerConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// redb database file.
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CollectorConfig {
    /// Look-back window for the first cycle, when no checkpoint exists.
    pub initial_window_hours: u32,
    /// Sleep between cycles in daemon mode.
    pub interval_secs: u64,
    /// Regions starting with any of these prefixes are never queried.
    pub excluded_region_prefixes: Vec<String>,
    /// Attempts per page after a rate-limit response.
    pub max_retries: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    /// Region used for `DescribeRegions`.
    pub bootstrap_region: String,
    /// Send every request here instead of `https://ec2.{region}.amazonaws.com`.
    pub endpoint_override: Option<String>,
    pub page_size: u32,
    pub request_timeout_secs: u64,
    /// Restrict history queries to these products; empty means all.
    pub product_descriptions: Vec<String>,
    /// Restrict history queries to these instance types; empty means all.
    pub instance_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/spotprice/spotprice.redb"),
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            initial_window_hours: 8,
            interval_secs: 3600,
            excluded_region_prefixes: vec!["cn-".to_string(), "us-gov-".to_string()],
            max_retries: 5,
            retry_base_ms: 500,
            retry_max_ms: 30_000,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            bootstrap_region: "us-east-1".to_string(),
            endpoint_override: None,
            page_size: MAX_PAGE_SIZE,
            request_timeout_secs: 30,
            product_descriptions: Vec::new(),
            instance_types: Vec::new(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info,spotpriced=debug,spotprice=debug".to_string(),
        }
    }
}

impl SpotpriceConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: SpotpriceConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collector.initial_window_hours == 0 {
            return Err(ConfigError::Invalid(
                "collector.initial_window_hours must be at least 1".to_string(),
            ));
        }
        if self.collector.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "collector.interval_secs must be at least 1".to_string(),
            ));
        }
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.source.page_size) {
            return Err(ConfigError::Invalid(format!(
                "source.page_size must be between {MIN_PAGE_SIZE} and {MAX_PAGE_SIZE}, got {}",
                self.source.page_size
            )));
        }
        if self.collector.retry_base_ms > self.collector.retry_max_ms {
            return Err(ConfigError::Invalid(
                "collector.retry_base_ms must not exceed collector.retry_max_ms".to_string(),
            ));
        }
        if self.source.bootstrap_region.is_empty() {
            return Err(ConfigError::Invalid(
                "source.bootstrap_region must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
