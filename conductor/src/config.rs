// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces for parsing configuration files and working with a conductor
//! server configuration

use camino::Utf8Path;
use camino::Utf8PathBuf;
use conductor_types::agent::steps::StepType;
use dropshot::ConfigDropshot;
use dropshot::ConfigLogging;
use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Configuration for a conductor server
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Config {
    /// Dropshot configuration for the API server
    pub dropshot: ConfigDropshot,
    /// Server-wide logging configuration.
    pub log: ConfigLogging,
    /// What the conductor tells agents to run
    pub agent: AgentConfig,
    #[serde(default)]
    pub background_tasks: BackgroundTaskConfig,
    #[serde(default)]
    pub blob_store: BlobStoreConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Config {
    /// Load a `Config` from the given TOML file
    ///
    /// This config object can then be used to create a new conductor server.
    pub fn from_file<P: AsRef<Utf8Path>>(path: P) -> Result<Config, LoadError> {
        let path = path.as_ref();
        let file_contents = std::fs::read_to_string(path)
            .map_err(|err| LoadError::Io { path: path.into(), err })?;
        let config_parsed: Config = toml::from_str(&file_contents)
            .map_err(|err| LoadError::Parse { path: path.into(), err })?;
        Ok(config_parsed)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AgentConfig {
    /// image of the discovery agent; agents reporting anything else are told
    /// to switch to it
    pub image: String,
    pub installer_image: String,
    pub controller_image: String,
    /// URL agents use to reach this service
    pub service_base_url: String,
    /// seconds between polls while a host is being actively checked; hosts
    /// that are waiting on something else poll half as often
    #[serde(default = "default_next_instruction_seconds")]
    pub next_instruction_seconds: i64,
    /// steps never handed out to agents
    #[serde(default)]
    pub disabled_steps: Vec<StepType>,
    #[serde(default = "default_disk_check_timeout_secs")]
    pub disk_check_timeout_secs: u64,
    /// NTP sources hosts are asked to synchronize with, if any
    #[serde(default)]
    pub ntp_sources: Vec<String>,
}

fn default_next_instruction_seconds() -> i64 {
    60
}

fn default_disk_check_timeout_secs() -> u64 {
    180
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct BackgroundTaskConfig {
    /// period (in seconds) for refreshing host and cluster statuses
    pub host_monitor_period_secs: u64,
    /// leaves host and cluster statuses alone unless an operation changes
    /// them explicitly (for tests)
    pub host_monitor_disable: bool,
    /// how long (in seconds) a host may go without polling before it is
    /// considered disconnected
    pub host_disconnect_timeout_secs: u64,
    /// period (in seconds) for the pre-install runner to look for queued
    /// jobs it was not explicitly woken up for
    pub preinstall_period_secs: u64,
}

impl Default for BackgroundTaskConfig {
    fn default() -> Self {
        BackgroundTaskConfig {
            host_monitor_period_secs: 60,
            host_monitor_disable: false,
            host_disconnect_timeout_secs: 180,
            preinstall_period_secs: 30,
        }
    }
}

impl BackgroundTaskConfig {
    pub fn host_monitor_period(&self) -> Duration {
        Duration::from_secs(self.host_monitor_period_secs)
    }

    pub fn host_disconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.host_disconnect_timeout_secs)
    }

    pub fn preinstall_period(&self) -> Duration {
        Duration::from_secs(self.preinstall_period_secs)
    }
}

/// Where generated cluster files are kept
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct BlobStoreConfig {
    /// directory holding the files; without one, files are kept in memory
    pub root: Option<Utf8PathBuf>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DatabaseConfig {
    /// how long (in milliseconds) a transaction waits for a row lock
    pub lock_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig { lock_timeout_ms: 10_000 }
    }
}

impl DatabaseConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("error reading \"{path}\": {err}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("error parsing \"{path}\": {err}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: toml::de::Error,
    },
}
