//! # Node Configuration
//!
//! Settings come from three layers, later ones winning:
//!
//! 1. built-in defaults,
//! 2. a TOML file (`--config`, or `config.toml` inside the data directory),
//! 3. CLI flags and their `QUORUM_*` environment variables.
//!
//! ```toml
//! data_dir = "./quorum-data"
//! sweep_interval_secs = 60
//! retention_days = 90
//! log_level = "quorum_node=info,quorum_core=info"
//! log_format = "pretty"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use quorum_core::config::DEFAULT_RETENTION_DAYS;

use crate::logging::LogFormat;

/// File name looked up inside the data directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Sub-directory of the data directory holding the sled database.
pub const DB_DIR: &str = "db";

const DEFAULT_DATA_DIR: &str = "./quorum-data";
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_LOG_LEVEL: &str = "quorum_node=info,quorum_core=info";

/// Effective node settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    /// Root of everything the node persists.
    pub data_dir: PathBuf,
    /// Seconds between maintenance sweeps in `run`.
    pub sweep_interval_secs: u64,
    /// Audit entries older than this many days are pruned by sweeps.
    pub retention_days: u32,
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            retention_days: DEFAULT_RETENTION_DAYS,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// Values supplied on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub sweep_interval_secs: Option<u64>,
    pub retention_days: Option<u32>,
}

impl NodeConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid node configuration")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("in {}", path.display()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize node configuration")
    }

    /// Build the effective configuration for `overrides`.
    ///
    /// An explicit `--config` path must exist. Without one, `config.toml`
    /// in the data directory is used when present.
    pub fn resolve(overrides: &Overrides) -> Result<Self> {
        let mut config = match &overrides.config {
            Some(path) => Self::from_file(path)?,
            None => {
                let dir = overrides
                    .data_dir
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
                let candidate = dir.join(CONFIG_FILE);
                if candidate.is_file() {
                    Self::from_file(&candidate)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, overrides: &Overrides) {
        if let Some(dir) = &overrides.data_dir {
            self.data_dir = dir.clone();
        }
        if let Some(level) = &overrides.log_level {
            self.log_level = level.clone();
        }
        if let Some(format) = overrides.log_format {
            self.log_format = format;
        }
        if let Some(secs) = overrides.sweep_interval_secs {
            self.sweep_interval_secs = secs;
        }
        if let Some(days) = overrides.retention_days {
            self.retention_days = days;
        }
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.sweep_interval_secs > 0, "sweep_interval_secs must be positive");
        anyhow::ensure!(self.retention_days > 0, "retention_days must be positive");
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = NodeConfig::from_toml("retention_days = 30\nlog_format = \"json\"\n").unwrap();
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.sweep_interval_secs, DEFAULT_SWEEP_INTERVAL_SECS);
        assert_eq!(config.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(NodeConfig::from_toml("rpc_port = 9741\n").is_err());
    }

    #[test]
    fn toml_round_trip() {
        let config = NodeConfig {
            retention_days: 7,
            ..NodeConfig::default()
        };
        let text = config.to_toml().unwrap();
        assert_eq!(NodeConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn overrides_beat_file_values() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "retention_days = 30\nsweep_interval_secs = 5\n",
        )
        .unwrap();

        let config = NodeConfig::resolve(&Overrides {
            data_dir: Some(dir.path().to_path_buf()),
            retention_days: Some(14),
            ..Overrides::default()
        })
        .unwrap();

        assert_eq!(config.retention_days, 14);
        assert_eq!(config.sweep_interval_secs, 5);
        assert_eq!(config.data_dir, dir.path());
        assert_eq!(config.db_path(), dir.path().join(DB_DIR));
    }

    #[test]
    fn explicit_config_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let result = NodeConfig::resolve(&Overrides {
            config: Some(dir.path().join("missing.toml")),
            ..Overrides::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn zero_interval_rejected() {
        let result = NodeConfig::resolve(&Overrides {
            data_dir: Some(PathBuf::from("/nonexistent/quorum")),
            sweep_interval_secs: Some(0),
            ..Overrides::default()
        });
        assert!(result.is_err());
    }
}
