use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::batch::{BatchOptions, BatchPattern};
use crate::config::WatchConfig;
use crate::core::WarningLevel;
use crate::db::SqliteLedger;
use crate::engine::LinkabilityEngine;
use crate::error::EngineError;

/// What one periodic batch scan produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub scanned_at: i64,
    pub patterns: Vec<BatchPattern>,
    /// Patterns written to `detected_patterns` (0 when persistence is off).
    pub stored: usize,
}

impl ScanReport {
    pub fn high_risk(&self) -> impl Iterator<Item = &BatchPattern> {
        self.patterns
            .iter()
            .filter(|p| p.warning_level == WarningLevel::High)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WatchOutput {
    Scan(ScanReport),
    Failed { scanned_at: i64, error: String },
}

/// Run one batch scan and optionally persist what it found.
pub fn scan_once(
    engine: &LinkabilityEngine<SqliteLedger>,
    options: &BatchOptions,
    persist: bool,
) -> Result<ScanReport, EngineError> {
    let now = engine.now();
    let patterns = engine.detect_batches(options)?;
    let mut stored = 0;
    if persist {
        for pattern in &patterns {
            engine.ledger().store_pattern(pattern, now)?;
            stored += 1;
        }
        let purged = engine.ledger().purge_expired_patterns(now)?;
        if purged > 0 {
            debug!("Purged {purged} expired patterns");
        }
    }
    Ok(ScanReport {
        scanned_at: now,
        patterns,
        stored,
    })
}

/// Scan on a fixed interval until the receiver goes away.
pub async fn run_watch(
    engine: LinkabilityEngine<SqliteLedger>,
    options: BatchOptions,
    config: WatchConfig,
    out: mpsc::UnboundedSender<WatchOutput>,
) {
    let period = Duration::from_secs(config.interval_seconds.max(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut scans: u64 = 0;

    info!("Watch started, scanning every {}s", period.as_secs());

    loop {
        ticker.tick().await;
        let scan_engine = engine.clone();
        let persist = config.persist_patterns;
        let result =
            tokio::task::spawn_blocking(move || scan_once(&scan_engine, &options, persist)).await;

        let output = match result {
            Ok(Ok(report)) => {
                scans += 1;
                let high = report.high_risk().count();
                if high > 0 {
                    warn!("Scan #{scans}: {high} high-risk batch patterns");
                } else {
                    info!("Scan #{scans}: {} patterns", report.patterns.len());
                }
                WatchOutput::Scan(report)
            }
            Ok(Err(e)) => {
                error!("Batch scan failed: {e}");
                WatchOutput::Failed {
                    scanned_at: engine.now(),
                    error: e.to_string(),
                }
            }
            Err(e) => {
                error!("Batch scan task panicked: {e}");
                WatchOutput::Failed {
                    scanned_at: engine.now(),
                    error: e.to_string(),
                }
            }
        };

        if out.send(output).is_err() {
            info!("Watch output closed, stopping after {scans} scans");
            break;
        }
    }
}
