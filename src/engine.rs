use std::sync::Arc;

use tracing::debug;

use crate::batch::{BatchDetector, BatchOptions, BatchPattern, ShieldBatchReport};
use crate::config::{BatchConfig, Config, LinkabilityConfig};
use crate::core::LinkabilityScore;
use crate::core::clock::{Clock, SystemClock};
use crate::error::EngineError;
use crate::ledger::Ledger;
use crate::linkability::{AnalyzeOptions, PairwiseAnalyzer, PairwiseLinkabilityResult};
use crate::signals::calculate_linkability_score;

/// Entry point for every linkability query.
///
/// Holds the ledger it reads from and the clock that anchors trailing windows.
/// Cheap to clone and safe to share across threads when the ledger is.
pub struct LinkabilityEngine<L: Ledger + ?Sized> {
    ledger: Arc<L>,
    clock: Arc<dyn Clock>,
    linkability: LinkabilityConfig,
    batch: BatchConfig,
}

impl<L: Ledger + ?Sized> Clone for LinkabilityEngine<L> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            clock: Arc::clone(&self.clock),
            linkability: self.linkability.clone(),
            batch: self.batch.clone(),
        }
    }
}

impl<L: Ledger + ?Sized> LinkabilityEngine<L> {
    /// Engine with default tuning on the wall clock.
    pub fn new(ledger: Arc<L>) -> Self {
        Self {
            ledger,
            clock: Arc::new(SystemClock),
            linkability: LinkabilityConfig::default(),
            batch: BatchConfig::default(),
        }
    }

    pub fn from_config(ledger: Arc<L>, config: &Config) -> Self {
        Self {
            ledger,
            clock: Arc::new(SystemClock),
            linkability: config.linkability.clone(),
            batch: config.batch.clone(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    /// The instant trailing windows are anchored at.
    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    pub fn linkability_config(&self) -> &LinkabilityConfig {
        &self.linkability
    }

    pub fn batch_config(&self) -> &BatchConfig {
        &self.batch
    }

    /// Rank the opposite-direction flows most likely paired with `txid`.
    pub fn analyze_pair(
        &self,
        txid: &str,
        options: &AnalyzeOptions,
    ) -> Result<PairwiseLinkabilityResult, EngineError> {
        let now = self.clock.now();
        debug!("analyze_pair {txid} at {now}");
        PairwiseAnalyzer::new(self.ledger.as_ref(), &self.linkability).analyze(txid, options, now)
    }

    /// Score one hypothetical pair without touching the ledger.
    pub fn score_pair(
        &self,
        amount_a_zat: u64,
        amount_b_zat: u64,
        time_delta_seconds: i64,
        occurrences: u64,
    ) -> LinkabilityScore {
        calculate_linkability_score(amount_a_zat, amount_b_zat, time_delta_seconds, occurrences)
    }

    /// Population scan for batches of identical deshields.
    pub fn detect_batches(&self, options: &BatchOptions) -> Result<Vec<BatchPattern>, EngineError> {
        let now = self.clock.now();
        BatchDetector::new(self.ledger.as_ref(), &self.batch).detect_batches(options, now)
    }

    /// Whether one known shield was withdrawn as equal parts.
    pub fn detect_for_shield(&self, shield_txid: &str) -> Result<ShieldBatchReport, EngineError> {
        BatchDetector::new(self.ledger.as_ref(), &self.batch).detect_for_shield(shield_txid)
    }
}
