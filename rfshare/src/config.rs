//! Configuration file.
//!
//! ```toml
//! [database]
//! path = "rfshare.db"
//!
//! [logging]
//! log_dir = "logs"
//! retention_days = 7
//! level = "info"
//!
//! [tuning]
//! may_move_dish = true
//! dish_move_penalty = 1000
//!
//! [scan]
//! housekeeping_interval_secs = 5
//! max_num_subscriptions = 4
//! ```

use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::scheduler::ScanServiceConfig;
use crate::tuner::TuneOptions;

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "rfshare.toml";

/// Concurrent subscriptions of one scan unless configured.
pub const DEFAULT_MAX_NUM_SUBSCRIPTIONS: usize = 4;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Default tuning options.
    #[serde(default)]
    pub tuning: TuneOptions,
    #[serde(default)]
    pub scan: ScanConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    pub log_dir: Option<PathBuf>,
    pub retention_days: Option<u64>,
    /// Filter directive, e.g. `info` or `rfshare::tuner=debug`.
    pub level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScanConfig {
    pub housekeeping_interval_secs: Option<u64>,
    pub max_num_subscriptions: Option<usize>,
}

impl ScanConfig {
    pub fn service_config(&self) -> ScanServiceConfig {
        let mut config = ScanServiceConfig::default();
        if let Some(secs) = self.housekeeping_interval_secs {
            config.housekeeping_interval_secs = secs.max(1);
        }
        config
    }

    pub fn max_num_subscriptions(&self) -> usize {
        self.max_num_subscriptions
            .unwrap_or(DEFAULT_MAX_NUM_SUBSCRIPTIONS)
            .max(1)
    }
}

impl std::str::FromStr for ConfigFile {
    type Err = toml::de::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s)
    }
}

/// Load configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    content.parse().map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// The explicit path if given, else [`DEFAULT_CONFIG_FILE`] when it exists.
pub fn find_config(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            default.exists().then_some(default)
        }
    }
}
