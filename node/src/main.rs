// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Quorum Node
//!
//! Entry point for the `quorum-node` binary. Parses CLI arguments, resolves
//! configuration, initializes logging, opens the store and runs one of:
//!
//! - `init`   : create the data directory, default config and store
//! - `run`    : periodic expiry and retention sweeps until shutdown
//! - `expire` : one expiry sweep
//! - `cleanup`: one retention sweep
//! - `audit`  : search or aggregate the audit ledger
//! - `version`: print build version information

mod cli;
mod config;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;
use tokio::signal;

use quorum_core::{ApprovalEngine, AuditLedger, VaultDB};

use cli::{AuditCommand, Commands, QuorumNodeCli};
use config::{NodeConfig, CONFIG_FILE};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = QuorumNodeCli::parse();

    match cli.command {
        Commands::Init(args) => {
            let config = setup(&args.common.overrides())?;
            init_node(&config, args.force)
        }
        Commands::Run(args) => {
            let config = setup(&args.overrides())?;
            run_node(config).await
        }
        Commands::Expire(args) => {
            let config = setup(&args.overrides())?;
            let db = open_store(&config)?;
            let expired = ApprovalEngine::new(db.clone()).expire_overdue()?;
            db.flush()?;
            println!("expired {} escrow(s)", expired.len());
            for id in expired {
                println!("  {id}");
            }
            Ok(())
        }
        Commands::Cleanup(args) => {
            let config = setup(&args.overrides())?;
            let db = open_store(&config)?;
            let removed = AuditLedger::new(db.clone()).cleanup(config.retention_days)?;
            db.flush()?;
            println!(
                "removed {removed} audit entr{} older than {} days",
                if removed == 1 { "y" } else { "ies" },
                config.retention_days
            );
            Ok(())
        }
        Commands::Audit(args) => {
            let config = setup(&args.common.overrides())?;
            let ledger = AuditLedger::new(open_store(&config)?);
            query_audit(&ledger, args.command)
        }
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Resolve configuration and start logging with it.
fn setup(overrides: &config::Overrides) -> Result<NodeConfig> {
    let config = NodeConfig::resolve(overrides)?;
    logging::init_logging(&config.log_level, config.log_format)?;
    Ok(config)
}

fn open_store(config: &NodeConfig) -> Result<VaultDB> {
    let db_path = config.db_path();
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let db = VaultDB::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database opened");
    Ok(db)
}

/// Initializes a data directory: `config.toml` plus an empty store.
fn init_node(config: &NodeConfig, force: bool) -> Result<()> {
    let data_dir = &config.data_dir;
    tracing::info!(data_dir = %data_dir.display(), "initializing node");

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let config_path = data_dir.join(CONFIG_FILE);
    if config_path.exists() && !force {
        tracing::warn!(path = %config_path.display(), "config exists, leaving it untouched");
    } else {
        std::fs::write(&config_path, config.to_toml()?)
            .with_context(|| format!("failed to write {}", config_path.display()))?;
        tracing::info!(path = %config_path.display(), "config written");
    }

    let db = open_store(config)?;
    db.flush()?;

    println!("Node initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Config         : {}", config_path.display());
    println!("  Store          : {}", config.db_path().display());

    Ok(())
}

/// Runs maintenance sweeps on a fixed interval until a shutdown signal.
async fn run_node(config: NodeConfig) -> Result<()> {
    tracing::info!(
        data_dir = %config.data_dir.display(),
        sweep_interval_secs = config.sweep_interval_secs,
        retention_days = config.retention_days,
        "starting quorum-node"
    );

    let db = open_store(&config)?;
    let engine = ApprovalEngine::new(db.clone());
    let ledger = AuditLedger::new(db.clone());
    let retention_days = config.retention_days;

    let sweeps = tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(config.sweep_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let engine = engine.clone();
            let ledger = ledger.clone();
            // sled calls block; keep them off the runtime workers.
            let outcome =
                tokio::task::spawn_blocking(move || sweep(&engine, &ledger, retention_days)).await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "maintenance sweep failed"),
                Err(e) => tracing::error!(error = %e, "maintenance sweep panicked"),
            }
        }
    });

    shutdown_signal().await;
    tracing::info!("shutdown signal received, stopping sweeps");
    sweeps.abort();

    db.flush()?;
    tracing::info!("quorum-node stopped");
    Ok(())
}

/// One maintenance pass: expiry first, then retention.
fn sweep(engine: &ApprovalEngine, ledger: &AuditLedger, retention_days: u32) -> Result<()> {
    let expired = engine.expire_overdue().context("expiry sweep")?;
    let pruned = ledger.cleanup(retention_days).context("retention sweep")?;
    if !expired.is_empty() || pruned > 0 {
        tracing::info!(expired = expired.len(), pruned, "maintenance sweep done");
    } else {
        tracing::debug!("maintenance sweep found nothing to do");
    }
    Ok(())
}

fn query_audit(ledger: &AuditLedger, command: AuditCommand) -> Result<()> {
    match command {
        AuditCommand::Search {
            query,
            limit,
            offset,
        } => {
            let mut filter = query.to_filter();
            filter.limit = limit;
            filter.offset = offset;
            for entry in ledger.search(&filter)? {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
        AuditCommand::Stats { query } => {
            let stats = ledger.stats(&query.to_filter())?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("quorum-node {}", env!("CARGO_PKG_VERSION"));
    println!("rustc       {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported. If a handler cannot be
/// installed, that signal is simply never observed.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
