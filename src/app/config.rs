// Config - YAML configuration of the whole service

use crate::app::RetryPolicy;
use crate::reconciliation::ReconciliationConfig;
use crate::settings::CommissionSettings;
use crate::tracing::TracingConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub tracing: TracingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[serde_with::serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: Duration,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_refresh_jitter")]
    pub refresh_jitter: Duration,
    /// Seeded on first start; persisted settings win afterwards
    #[serde(default)]
    pub initial: CommissionSettings,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            refresh_interval: default_refresh_interval(),
            refresh_jitter: default_refresh_jitter(),
            initial: CommissionSettings::default(),
        }
    }
}

/// Values taken from the command line or environment
pub struct EnvOverride {
    pub data_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_path(path: impl AsRef<Path>, overrides: EnvOverride) -> anyhow::Result<Self> {
        let config_file =
            std::fs::read_to_string(path).context("Couldn't read config file")?;
        let config: Config =
            serde_yaml::from_str(&config_file).context("Couldn't parse config file")?;
        Ok(config.with_overrides(overrides))
    }

    pub fn with_overrides(mut self, EnvOverride { data_dir }: EnvOverride) -> Self {
        if let Some(data_dir) = data_dir {
            self.storage.data_dir = data_dir;
        }
        self
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".gigwallet")
}

fn default_refresh_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_refresh_jitter() -> Duration {
    Duration::from_secs(3)
}
