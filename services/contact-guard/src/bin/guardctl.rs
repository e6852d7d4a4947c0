// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Operator CLI for the contact guard.
//!
//! Works directly on the data directory, so it can run from cron while the
//! service is up. Results are printed to stdout as JSON; logs go to stderr.
//!
//! Exit codes: 0 success, 65 invalid input, 74 storage failure,
//! 78 configuration error.

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use contact_guard::blocklist::BlocklistExport;
use contact_guard::{BlockDuration, Config, ConfigError, ContactGuard, GuardError, ValidationError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

const EX_DATAERR: u8 = 65;
const EX_SOFTWARE: u8 = 70;
const EX_IOERR: u8 = 74;
const EX_CONFIG: u8 = 78;

#[derive(Parser)]
#[command(name = "guardctl", version, about = "Contact guard administration")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON config file (overrides CONTACT_GUARD_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory (overrides DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Block an address or CIDR range
    Block {
        target: String,
        #[arg(long)]
        reason: Option<String>,
        /// Block duration in days; permanent when omitted
        #[arg(long)]
        days: Option<u32>,
        /// Extra metadata as key=value, repeatable
        #[arg(long = "meta", value_parser = parse_key_value)]
        metadata: Vec<(String, String)>,
    },
    /// Remove a block
    Unblock { target: String },
    /// Block every address or range listed in a file, one per line
    BulkBlock {
        file: PathBuf,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Exempt an address or range from blocking
    Whitelist {
        target: String,
        #[arg(long)]
        note: Option<String>,
    },
    /// Remove a whitelist entry
    Unwhitelist { target: String },
    /// Print the blocklist, or the whitelist with --whitelist
    List {
        #[arg(long)]
        whitelist: bool,
    },
    /// Blocklist counters and submission statistics
    Stats {
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
    /// Daily submission report
    Report {
        /// Day to report on (YYYY-MM-DD, default today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Per-day totals, oldest first
    Trend {
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
    /// Most recent submission records
    Recent {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        include_anonymized: bool,
    },
    /// Recent security events
    Events {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Anonymize addresses past the retention window
    Sweep,
    /// Delete anonymized records
    Purge {
        /// Age threshold in days (default from configuration)
        #[arg(long)]
        older_than_days: Option<u32>,
    },
    /// Anonymization audit trail, newest first
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Drop lapsed blocks
    CleanExpired,
    /// Write both lists as one JSON document to stdout
    Export,
    /// Replace both lists from an export document
    Import { file: PathBuf },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
        _ => Err(format!("expected key=value, got {s:?}")),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{err:#}"), "guardctl failed");
            ExitCode::from(exit_code(&err))
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let guard = ContactGuard::open(config)?;

    match cli.command {
        Command::Block {
            target,
            reason,
            days,
            metadata,
        } => {
            let duration = days.map_or(BlockDuration::Permanent, BlockDuration::Days);
            let metadata: BTreeMap<String, String> = metadata.into_iter().collect();
            print_json(&guard.block_address(&target, reason, duration, metadata)?)
        }
        Command::Unblock { target } => print_json(&guard.unblock_address(&target)?),
        Command::BulkBlock { file, reason } => {
            let targets = contact_guard::config::read_list(&file)?;
            let added = guard.bulk_block(&targets, reason.as_deref());
            print_json(&serde_json::json!({ "requested": targets.len(), "added": added }))
        }
        Command::Whitelist { target, note } => print_json(&guard.whitelist_address(&target, note)?),
        Command::Unwhitelist { target } => print_json(&guard.remove_whitelist(&target)?),
        Command::List { whitelist: true } => print_json(&guard.list_whitelist()?),
        Command::List { whitelist: false } => print_json(&guard.list_blocklist()?),
        Command::Stats { days } => print_json(&serde_json::json!({
            "blocklist": guard.blocklist_stats()?,
            "submissions": guard.statistics(days)?,
        })),
        Command::Report { date } => {
            let date = date.unwrap_or_else(|| chrono::Utc::now().date_naive());
            print_json(&guard.daily_report(date)?)
        }
        Command::Trend { days } => print_json(&guard.trend(days)?),
        Command::Recent {
            limit,
            include_anonymized,
        } => print_json(&guard.recent_records(limit, include_anonymized)?),
        Command::Events { limit } => print_json(&guard.security_events(limit)?),
        Command::Sweep => print_json(&guard.run_retention_sweep()?),
        Command::Purge { older_than_days } => {
            let purged = guard.purge_anonymized(older_than_days)?;
            print_json(&serde_json::json!({ "purged": purged }))
        }
        Command::History { limit } => print_json(&guard.retention_history(limit)?),
        Command::CleanExpired => {
            let removed = guard.clean_expired_blocks()?;
            print_json(&serde_json::json!({ "removed": removed }))
        }
        Command::Export => print_json(&guard.export_lists()?),
        Command::Import { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let export: BlocklistExport = serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", file.display()))?;
            guard.import_lists(&export)?;
            print_json(&serde_json::json!({
                "blocklist": export.blocklist.len(),
                "whitelist": export.whitelist.len(),
            }))
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => {
            dotenvy::dotenv().ok();
            let mut config = Config::from_file(path)?;
            config.apply_overrides(|key| std::env::var(key).ok())?;
            config.scoring.load_list_files()?;
            config
        }
        None => Config::load()?,
    };
    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Map the first recognised error in the chain to a sysexits code.
fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<GuardError>() {
            return match e {
                GuardError::Validation(_) => EX_DATAERR,
                GuardError::Config(_) => EX_CONFIG,
                GuardError::Storage { .. } | GuardError::Serialization { .. } => EX_IOERR,
                GuardError::Metrics(_) => EX_SOFTWARE,
            };
        }
        if cause.is::<ConfigError>() {
            return EX_CONFIG;
        }
        if cause.is::<ValidationError>() || cause.is::<serde_json::Error>() {
            return EX_DATAERR;
        }
        if cause.is::<std::io::Error>() {
            return EX_IOERR;
        }
    }
    EX_SOFTWARE
}
