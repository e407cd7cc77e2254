pub mod config;

pub use config::{
    CollectorConfig, ConfigError, LogConfig, ServerConfig, SourceConfig, SpotpriceConfig,
    StoreConfig,
};
