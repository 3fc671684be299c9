//! shieldlink command line
//!
//! Usage:
//!   shieldlink analyze <txid>        - Rank likely counterparts of one flow
//!   shieldlink score <a> <b> <delta> - Score a hypothetical pair
//!   shieldlink batches               - Scan for batch deshield patterns
//!   shieldlink shield <txid>         - Check one shield for an equal split
//!   shieldlink patterns              - List stored patterns
//!   shieldlink import <file>         - Load a JSON fixture into the ledger
//!   shieldlink watch                 - Rescan periodically until Ctrl-C

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use shieldlink::LinkabilityEngine;
use shieldlink::batch::BatchOptions;
use shieldlink::config::Config;
use shieldlink::db::SqliteLedger;
use shieldlink::linkability::AnalyzeOptions;
use shieldlink::watch::{WatchOutput, run_watch};

#[derive(Parser)]
#[command(name = "shieldlink")]
#[command(about = "Shield/deshield linkability and batch pattern detection")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Ledger database (overrides the config file)
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank the opposite-direction flows most likely linked to a transaction
    Analyze {
        txid: String,
        /// Matches to return (1-20)
        #[arg(short, long)]
        limit: Option<usize>,
        /// Amount tolerance in zat (clamped to 10000-10000000)
        #[arg(short, long)]
        tolerance: Option<u64>,
    },

    /// Score a hypothetical shield/deshield pair
    Score {
        amount_a: u64,
        amount_b: u64,
        /// Seconds between the two flows
        #[arg(allow_hyphen_values = true)]
        delta: i64,
        /// How often the amount recurs
        #[arg(short, long, default_value = "1")]
        occurrences: u64,
    },

    /// Scan recent deshields for batches of identical amounts
    Batches {
        #[arg(long)]
        min_count: Option<usize>,
        /// Minimum per-transaction amount in zat
        #[arg(long)]
        min_amount: Option<u64>,
        #[arg(short, long)]
        days: Option<i64>,
        #[arg(short, long)]
        limit: Option<usize>,
        /// Group near-identical amounts within this many basis points
        #[arg(long)]
        tolerance_bps: Option<u32>,
        /// Store detected patterns
        #[arg(long)]
        store: bool,
    },

    /// Check whether a shield was withdrawn as equal parts
    Shield { txid: String },

    /// List stored, unexpired patterns
    Patterns {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Import transactions and flows from a JSON fixture
    Import {
        /// Fixture file (defaults to database.fixtures from the config)
        file: Option<PathBuf>,
    },

    /// Rescan for batch patterns on an interval
    Watch {
        /// Seconds between scans (overrides the config file)
        #[arg(short, long)]
        interval: Option<u64>,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("shieldlink=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config);
    tracing::debug!("Config: {:?}", config);

    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.database.path));
    let ledger = open_ledger(&db_path)?;
    let engine = LinkabilityEngine::from_config(Arc::new(ledger), &config);

    match cli.command {
        Commands::Analyze {
            txid,
            limit,
            tolerance,
        } => {
            let mut options = AnalyzeOptions::from(&config.linkability);
            if let Some(limit) = limit {
                options.limit = limit;
            }
            if let Some(tolerance) = tolerance {
                options.tolerance_zat = tolerance;
            }
            let result = engine
                .analyze_pair(&txid, &options)
                .with_context(|| format!("analyzing {txid}"))?;
            print_json(&result)
        }
        Commands::Score {
            amount_a,
            amount_b,
            delta,
            occurrences,
        } => print_json(&engine.score_pair(amount_a, amount_b, delta, occurrences)),
        Commands::Batches {
            min_count,
            min_amount,
            days,
            limit,
            tolerance_bps,
            store,
        } => {
            let mut options = BatchOptions::from(&config.batch);
            options.min_batch_count = min_count.unwrap_or(options.min_batch_count);
            options.min_amount_zat = min_amount.unwrap_or(options.min_amount_zat);
            options.time_window_days = days.unwrap_or(options.time_window_days);
            options.limit = limit.unwrap_or(options.limit);
            options.amount_tolerance_bps = tolerance_bps.unwrap_or(options.amount_tolerance_bps);

            let patterns = engine.detect_batches(&options).context("batch scan")?;
            if store {
                let now = engine.now();
                for pattern in &patterns {
                    engine.ledger().store_pattern(pattern, now)?;
                }
                tracing::info!("Stored {} patterns", patterns.len());
            }
            print_json(&patterns)
        }
        Commands::Shield { txid } => {
            let report = engine
                .detect_for_shield(&txid)
                .with_context(|| format!("checking shield {txid}"))?;
            print_json(&report)
        }
        Commands::Patterns { limit } => {
            let stored = engine.ledger().recent_patterns(limit, engine.now())?;
            print_json(&stored)
        }
        Commands::Import { file } => {
            let path = file
                .or_else(|| config.database.fixtures.as_ref().map(PathBuf::from))
                .context("no fixture file given and database.fixtures is not set")?;
            let summary = engine
                .ledger()
                .import_fixtures(&path)
                .with_context(|| format!("importing {}", path.display()))?;
            print_json(&summary)
        }
        Commands::Watch { interval } => {
            let mut watch_config = config.watch.clone();
            if let Some(interval) = interval {
                watch_config.interval_seconds = interval;
            }
            watch(engine, BatchOptions::from(&config.batch), watch_config)
        }
    }
}

fn open_ledger(path: &Path) -> Result<SqliteLedger> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating database directory {}", parent.display()))?;
    }
    let ledger = SqliteLedger::open(path)
        .with_context(|| format!("opening ledger database {}", path.display()))?;
    tracing::debug!("Ledger database opened at {}", path.display());
    Ok(ledger)
}

fn watch(
    engine: LinkabilityEngine<SqliteLedger>,
    options: BatchOptions,
    config: shieldlink::config::WatchConfig,
) -> Result<()> {
    let rt = tokio::runtime::Runtime::new().context("creating tokio runtime")?;
    rt.block_on(async move {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scanner = tokio::spawn(run_watch(engine, options, config, tx));
        loop {
            tokio::select! {
                output = rx.recv() => match output {
                    Some(WatchOutput::Scan(report)) => {
                        for pattern in report.high_risk() {
                            println!("{} {}", pattern.warning_level.emoji(), pattern.explanation);
                        }
                    }
                    Some(failed) => print_json(&failed)?,
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Ctrl-C received, stopping watch");
                    break;
                }
            }
        }
        scanner.abort();
        Ok::<(), anyhow::Error>(())
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
