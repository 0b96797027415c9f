//! # CLI Interface
//!
//! Defines the command-line argument structure for `quorum-node` using
//! `clap` derive.

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use quorum_core::{AuditFilter, ResourceType};

use crate::config::Overrides;
use crate::logging::LogFormat;

/// Quorum maintenance node.
///
/// Runs the time-driven side of the vault core: expiring escrows whose
/// deadline has passed and pruning audit entries past their retention. Also
/// answers audit queries against a local data directory.
#[derive(Parser, Debug)]
#[command(
    name = "quorum-node",
    about = "Quorum maintenance node",
    version,
    propagate_version = true
)]
pub struct QuorumNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the data directory, a default `config.toml` and an empty store.
    Init(InitArgs),
    /// Run periodic expiry and retention sweeps until SIGINT or SIGTERM.
    Run(RunArgs),
    /// Expire every overdue escrow once and exit.
    Expire(CommonArgs),
    /// Prune audit entries older than the retention window once and exit.
    Cleanup(CleanupArgs),
    /// Query the audit ledger.
    Audit(AuditArgs),
    /// Print version information and exit.
    Version,
}

/// Options shared by every command that opens the store.
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// Path to the node configuration file (TOML).
    ///
    /// When omitted, `config.toml` in the data directory is used if present.
    #[arg(long, short = 'c', env = "QUORUM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Data directory holding the store.
    #[arg(long, short = 'd', env = "QUORUM_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    #[arg(long, env = "QUORUM_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log output format.
    #[arg(long, value_enum, env = "QUORUM_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,
}

impl CommonArgs {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            config: self.config.clone(),
            data_dir: self.data_dir.clone(),
            log_level: self.log_level.clone(),
            log_format: self.log_format,
            ..Overrides::default()
        }
    }
}

/// Arguments for the `init` subcommand.
#[derive(Args, Debug)]
pub struct InitArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Overwrite an existing `config.toml`.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `run` subcommand.
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Seconds between sweeps.
    #[arg(long, env = "QUORUM_SWEEP_INTERVAL_SECS")]
    pub sweep_interval_secs: Option<u64>,

    /// Audit retention window in days.
    #[arg(long, env = "QUORUM_RETENTION_DAYS")]
    pub retention_days: Option<u32>,
}

impl RunArgs {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            sweep_interval_secs: self.sweep_interval_secs,
            retention_days: self.retention_days,
            ..self.common.overrides()
        }
    }
}

/// Arguments for the `cleanup` subcommand.
#[derive(Args, Debug)]
pub struct CleanupArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Audit retention window in days.
    #[arg(long, env = "QUORUM_RETENTION_DAYS")]
    pub retention_days: Option<u32>,
}

impl CleanupArgs {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            retention_days: self.retention_days,
            ..self.common.overrides()
        }
    }
}

/// Arguments for the `audit` subcommand.
#[derive(Args, Debug)]
pub struct AuditArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(subcommand)]
    pub command: AuditCommand,
}

#[derive(Subcommand, Debug)]
pub enum AuditCommand {
    /// Print matching entries, newest first, one JSON object per line.
    Search {
        #[command(flatten)]
        query: AuditQuery,

        /// Page size (default 100, at most 1000).
        #[arg(long)]
        limit: Option<usize>,

        /// Entries to skip before the page starts.
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Print aggregate counts over matching entries as JSON.
    Stats {
        #[command(flatten)]
        query: AuditQuery,
    },
}

/// Audit filter fields. Every field given must match.
#[derive(Args, Debug, Clone, Default)]
pub struct AuditQuery {
    #[arg(long)]
    pub vault: Option<u64>,

    /// Canonical actor identifier, or `system`.
    #[arg(long)]
    pub actor: Option<String>,

    #[arg(long)]
    pub action: Option<String>,

    #[arg(long, value_parser = parse_resource_type)]
    pub resource_type: Option<ResourceType>,

    #[arg(long)]
    pub resource_id: Option<String>,

    #[arg(long)]
    pub tx_hash: Option<String>,

    #[arg(long)]
    pub user_op_hash: Option<String>,

    /// Inclusive lower bound, RFC 3339.
    #[arg(long)]
    pub from: Option<DateTime<Utc>>,

    /// Exclusive upper bound, RFC 3339.
    #[arg(long)]
    pub to: Option<DateTime<Utc>>,
}

impl AuditQuery {
    pub fn to_filter(&self) -> AuditFilter {
        AuditFilter {
            vault_id: self.vault,
            actor: self.actor.clone(),
            action: self.action.clone(),
            resource_type: self.resource_type,
            resource_id: self.resource_id.clone(),
            tx_hash: self.tx_hash.clone(),
            user_op_hash: self.user_op_hash.clone(),
            from: self.from,
            to: self.to,
            ..AuditFilter::default()
        }
    }
}

fn parse_resource_type(s: &str) -> Result<ResourceType, String> {
    serde_json::from_value(serde_json::Value::String(s.to_ascii_lowercase()))
        .map_err(|_| format!("unknown resource type: {s}"))
}
