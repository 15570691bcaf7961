use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

pub use crate::{
    mediator::mediator_timeout_default,
    state::{event_channel_capacity_default, max_commit_attempts_default},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The directory the relay's SQLite database lives in. If not set, state is kept in memory and lost on exit.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// How long to wait for the mediator to answer a query before giving up.
    #[serde(default = "mediator_timeout_default")]
    pub mediator_timeout: Duration,
    /// How many times a modifying transaction is attempted when it keeps conflicting with concurrent writers.
    #[serde(default = "max_commit_attempts_default")]
    pub max_commit_attempts: u32,
    /// Number of committed events buffered for slow subscribers before the oldest are dropped.
    #[serde(default = "event_channel_capacity_default")]
    pub event_channel_capacity: usize,
    /// Mediator endpoint written to the ledger on start-up, if none has been stored yet.
    #[serde(default)]
    pub mediator_address: Option<String>,
    /// File containing signing key material, written to the ledger on start-up if no key has been stored yet.
    #[serde(default)]
    pub private_key_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: None,
            mediator_timeout: mediator_timeout_default(),
            max_commit_attempts: max_commit_attempts_default(),
            event_channel_capacity: event_channel_capacity_default(),
            mediator_address: None,
            private_key_file: None,
        }
    }
}

impl Config {
    /// Load a configuration from several TOML files. Each top-level key may only be set by one file.
    pub fn from_files<P: AsRef<Path>>(files: &[P]) -> Result<Config> {
        let mut merged_config = toml::Table::new();
        for config_file in files {
            let config_file = config_file.as_ref();
            let config = fs::read_to_string(config_file)
                .map_err(|e| anyhow!("cannot read {config_file:?}: {e}"))?;
            let config: toml::Table = toml::from_str(&config)?;
            for key in config.keys() {
                if merged_config.contains_key(key) {
                    return Err(anyhow!(
                        "configuration conflict: {config_file:?} contained a key {key:?} that was already included in an earlier file"
                    ));
                }
            }
            merged_config.extend(config);
        }

        Ok(Config::deserialize(merged_config)?)
    }

    pub fn database_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join("relay.sqlite3"))
    }
}
