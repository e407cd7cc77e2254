//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use spotprice_core::{ConfigError, SpotpriceConfig};

#[derive(Parser, Debug)]
#[command(name = "spotpriced", about = "EC2 spot price collector and query server")]
pub struct Cli {
    /// Configuration file. Missing file means built-in defaults.
    #[arg(long, global = true, env = "SPOTPRICE_CONFIG", default_value = "spotprice.toml")]
    pub config: PathBuf,

    /// Directory for the state database, overrides `store.path`.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Collect spot prices, once or on an interval.
    Collect {
        #[command(flatten)]
        collect: CollectArgs,

        /// Run a single cycle and exit; a failed cycle exits non-zero.
        #[arg(long)]
        once: bool,
    },

    /// Serve the query API and chart page.
    Serve {
        #[command(flatten)]
        serve: ServeArgs,
    },

    /// Collector loop and query server in one process.
    Standalone {
        #[command(flatten)]
        collect: CollectArgs,

        #[command(flatten)]
        serve: ServeArgs,
    },

    /// Print the effective configuration as TOML.
    Config,
}

#[derive(clap::Args, Debug, Default, Clone, PartialEq, Eq)]
pub struct CollectArgs {
    /// Look-back window in hours when no checkpoint exists.
    #[arg(long, env = "HOURS")]
    pub hours: Option<u32>,

    /// Seconds to sleep between cycles.
    #[arg(long)]
    pub interval: Option<u64>,
}

#[derive(clap::Args, Debug, Default, Clone, PartialEq, Eq)]
pub struct ServeArgs {
    /// Port to listen on.
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Address to bind.
    #[arg(long, env = "ADDRESS")]
    pub address: Option<String>,
}

impl Cli {
    /// Load the config file and layer command-line flags on top.
    pub fn load_config(&self) -> Result<SpotpriceConfig, ConfigError> {
        let mut config = SpotpriceConfig::load_or_default(&self.config)?;

        if let Some(dir) = &self.data_dir {
            config.store.path = dir.join("spotprice.redb");
        }
        match &self.command {
            Command::Collect { collect, .. } => collect.apply(&mut config),
            Command::Serve { serve } => serve.apply(&mut config),
            Command::Standalone { collect, serve } => {
                collect.apply(&mut config);
                serve.apply(&mut config);
            }
            Command::Config => {}
        }

        config.validate()?;
        Ok(config)
    }
}

impl CollectArgs {
    fn apply(&self, config: &mut SpotpriceConfig) {
        if let Some(hours) = self.hours {
            config.collector.initial_window_hours = hours;
        }
        if let Some(interval) = self.interval {
            config.collector.interval_secs = interval;
        }
    }
}

impl ServeArgs {
    fn apply(&self, config: &mut SpotpriceConfig) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(address) = &self.address {
            config.server.address = address.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn collect_once_flags() {
        let cli = parse(&["spotpriced", "collect", "--once", "--hours", "2"]);
        match &cli.command {
            Command::Collect { collect, once } => {
                assert!(*once);
                assert_eq!(collect.hours, Some(2));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 9000\n[collector]\ninterval_secs = 600").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let cli = parse(&[
            "spotpriced",
            "--config",
            &path,
            "--data-dir",
            "/tmp/spot",
            "standalone",
            "--port",
            "9100",
        ]);
        let config = cli.load_config().unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.collector.interval_secs, 600);
        assert_eq!(config.store.path, PathBuf::from("/tmp/spot/spotprice.redb"));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let cli = parse(&["spotpriced", "--config", "/nonexistent/spotprice.toml", "config"]);
        let config = cli.load_config().unwrap();
        assert_eq!(config, SpotpriceConfig::default());
    }

    #[test]
    fn zero_hours_is_rejected() {
        let cli = parse(&[
            "spotpriced",
            "--config",
            "/nonexistent/spotprice.toml",
            "collect",
            "--hours",
            "0",
        ]);
        assert!(cli.load_config().is_err());
    }
}
