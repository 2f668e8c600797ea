//! Runtime configuration.
//!
//! Every field has a default, so an empty (or absent) TOML file is a valid config.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config syntax: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconConfig {
    /// Allow replacing the whole store with an SCM snapshot when counts diverge.
    pub snapshot_sync_enabled: bool,
    pub sync_interval_ms: u64,
    pub sync_initial_delay_ms: u64,
    /// Delay between pipeline list refreshes from the SCM.
    pub pipeline_sync_interval_ms: u64,
    /// Container count difference above which a full resync is taken.
    pub container_threshold: u64,
    pub report_lanes: usize,
    /// Bounded queue depth of each report lane.
    pub report_queue_depth: usize,
    pub task_soft_timeout_ms: u64,
    pub stale_node_interval_ms: u64,
    pub dead_node_interval_ms: u64,
    pub health_check_interval_ms: u64,
    pub history_flush_interval_ms: u64,
    pub shutdown_grace_ms: u64,
    pub db_dir: PathBuf,
    pub scm_address: String,
    pub http_bind: SocketAddr,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            snapshot_sync_enabled: true,
            sync_interval_ms: 24 * 60 * 60 * 1000,
            sync_initial_delay_ms: 60 * 1000,
            pipeline_sync_interval_ms: 5 * 60 * 1000,
            container_threshold: 100,
            report_lanes: 10,
            report_queue_depth: 10_000,
            task_soft_timeout_ms: 10 * 1000,
            stale_node_interval_ms: 5 * 60 * 1000,
            dead_node_interval_ms: 10 * 60 * 1000,
            health_check_interval_ms: 5 * 1000,
            history_flush_interval_ms: 60 * 1000,
            shutdown_grace_ms: 30 * 1000,
            db_dir: PathBuf::from("recon-db"),
            scm_address: "127.0.0.1:9860".to_string(),
            http_bind: SocketAddr::from(([0, 0, 0, 0], 9888)),
        }
    }
}

impl ReconConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: ReconConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.report_lanes == 0 {
            return Err(ConfigError::Invalid("report_lanes must be at least 1".into()));
        }
        if self.report_queue_depth == 0 {
            return Err(ConfigError::Invalid("report_queue_depth must be at least 1".into()));
        }
        for (name, value) in [
            ("sync_interval_ms", self.sync_interval_ms),
            ("pipeline_sync_interval_ms", self.pipeline_sync_interval_ms),
            ("task_soft_timeout_ms", self.task_soft_timeout_ms),
            ("health_check_interval_ms", self.health_check_interval_ms),
            ("history_flush_interval_ms", self.history_flush_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be positive", name)));
            }
        }
        if self.dead_node_interval_ms <= self.stale_node_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "dead_node_interval_ms ({}) must exceed stale_node_interval_ms ({})",
                self.dead_node_interval_ms, self.stale_node_interval_ms
            )));
        }
        Ok(())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn sync_initial_delay(&self) -> Duration {
        Duration::from_millis(self.sync_initial_delay_ms)
    }

    pub fn pipeline_sync_interval(&self) -> Duration {
        Duration::from_millis(self.pipeline_sync_interval_ms)
    }

    pub fn task_soft_timeout(&self) -> Duration {
        Duration::from_millis(self.task_soft_timeout_ms)
    }

    pub fn stale_node_interval(&self) -> Duration {
        Duration::from_millis(self.stale_node_interval_ms)
    }

    pub fn dead_node_interval(&self) -> Duration {
        Duration::from_millis(self.dead_node_interval_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn history_flush_interval(&self) -> Duration {
        Duration::from_millis(self.history_flush_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
