pub mod cluster;
pub mod explain;
pub mod score;

use std::collections::{BTreeSet, HashSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::BatchConfig;
use crate::core::time::DAY;
use crate::core::txid::validate_txid;
use crate::core::{FlowType, ShieldedFlowEvent, WarningLevel};
use crate::error::EngineError;
use crate::ledger::{FlowQuery, Ledger, LedgerError, TimeOrder, ensure_addresses};
use crate::linkability::DEFAULT_TOLERANCE_ZAT;
use crate::signals::FEE_TOLERANCE_ZAT;
use cluster::AmountGroup;
use score::{BatchBreakdown, BatchFacts, score_batch};

/// How far a funding shield's amount may sit from a batch's summed total.
pub const SHIELD_SUM_TOLERANCE_ZAT: u64 = 10 * DEFAULT_TOLERANCE_ZAT;

/// Splits tried when asking whether one known shield was withdrawn in equal parts.
pub const SHIELD_DIVISORS: &[u64] = &[2, 3, 4, 5, 6, 8, 10, 12, 15, 20, 25, 50, 100];

const MAX_BATCH_LIMIT: usize = 500;
const MAX_AMOUNT_TOLERANCE_BPS: u32 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchOptions {
    pub min_batch_count: usize,
    pub min_amount_zat: u64,
    pub time_window_days: i64,
    pub limit: usize,
    /// 0 groups exact amounts only.
    pub amount_tolerance_bps: u32,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from(&BatchConfig::default())
    }
}

impl From<&BatchConfig> for BatchOptions {
    fn from(config: &BatchConfig) -> Self {
        Self {
            min_batch_count: config.min_batch_count,
            min_amount_zat: config.min_amount_zat,
            time_window_days: config.time_window_days,
            limit: config.limit,
            amount_tolerance_bps: config.amount_tolerance_bps,
        }
    }
}

impl BatchOptions {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.min_batch_count < 2 {
            return Err(EngineError::validation(
                "minBatchCount",
                format!("must be at least 2, got {}", self.min_batch_count),
            ));
        }
        if self.time_window_days < 1 {
            return Err(EngineError::validation(
                "timeWindowDays",
                format!("must be at least 1, got {}", self.time_window_days),
            ));
        }
        if self.limit == 0 || self.limit > MAX_BATCH_LIMIT {
            return Err(EngineError::validation(
                "limit",
                format!("must be between 1 and {MAX_BATCH_LIMIT}, got {}", self.limit),
            ));
        }
        if self.amount_tolerance_bps > MAX_AMOUNT_TOLERANCE_BPS {
            return Err(EngineError::validation(
                "amountToleranceBps",
                format!(
                    "must be at most {MAX_AMOUNT_TOLERANCE_BPS}, got {}",
                    self.amount_tolerance_bps
                ),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternType {
    /// Identical deshields found in a population scan.
    BatchDeshield,
    /// Near-identical deshields grouped with a relative tolerance.
    BatchDeshieldClustered,
    /// Deshields that split one known shield into equal parts.
    ShieldSplit,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::BatchDeshield => "BATCH_DESHIELD",
            PatternType::BatchDeshieldClustered => "BATCH_DESHIELD_CLUSTERED",
            PatternType::ShieldSplit => "SHIELD_SPLIT",
        }
    }
}

/// The shield that most plausibly funded a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchingShield {
    pub txid: String,
    pub amount_zat: u64,
    pub block_height: u32,
    pub block_time: i64,
    pub transparent_addresses: Vec<String>,
    /// |shield amount − batch total|.
    pub amount_difference_zat: u64,
    /// Shield → first deshield.
    pub latency_seconds: i64,
}

impl MatchingShield {
    fn new(shield: ShieldedFlowEvent, batch_total_zat: u64, first_deshield_time: i64) -> Self {
        Self {
            amount_difference_zat: shield.amount_zat.abs_diff(batch_total_zat),
            latency_seconds: first_deshield_time - shield.block_time,
            txid: shield.txid,
            amount_zat: shield.amount_zat,
            block_height: shield.block_height,
            block_time: shield.block_time,
            transparent_addresses: shield.transparent_addresses,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPattern {
    pub pattern_type: PatternType,
    /// SHA-256 over the sorted member txids; stable across rescans.
    pub pattern_hash: String,
    pub per_tx_amount_zat: u64,
    pub batch_count: usize,
    pub total_amount_zat: u64,
    pub txids: Vec<String>,
    pub heights: Vec<u32>,
    pub times: Vec<i64>,
    pub first_time: i64,
    pub last_time: i64,
    pub time_span_seconds: i64,
    pub time_span_hours: f64,
    /// Distinct recipient addresses, sorted.
    pub addresses: Vec<String>,
    /// Distinct addresses per deshield; lower is more concentrated.
    pub address_concentration: f64,
    pub matching_shield: Option<MatchingShield>,
    pub score: u8,
    pub warning_level: WarningLevel,
    pub breakdown: BatchBreakdown,
    pub explanation: String,
}

/// Result of checking one known shield for an equal-split withdrawal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShieldBatchReport {
    pub shield: ShieldedFlowEvent,
    pub matches: Vec<BatchPattern>,
    pub has_pattern: bool,
    pub warning_level: WarningLevel,
}

pub fn pattern_hash<S: AsRef<str>>(txids: &[S]) -> String {
    let mut sorted: Vec<&str> = txids.iter().map(AsRef::as_ref).collect();
    sorted.sort_unstable();
    let mut hasher = Sha256::new();
    hasher.update(sorted.join(",").as_bytes());
    hex::encode(hasher.finalize())
}

/// Population-level detector for "one shield, many identical deshields".
pub struct BatchDetector<'a, L: Ledger + ?Sized> {
    ledger: &'a L,
    config: &'a BatchConfig,
}

impl<'a, L: Ledger + ?Sized> BatchDetector<'a, L> {
    pub fn new(ledger: &'a L, config: &'a BatchConfig) -> Self {
        Self { ledger, config }
    }

    /// Scan deshields in the trailing window for repeated amounts.
    pub fn detect_batches(
        &self,
        options: &BatchOptions,
        now: i64,
    ) -> Result<Vec<BatchPattern>, EngineError> {
        options.validate()?;

        let since = now.saturating_sub(options.time_window_days.saturating_mul(DAY));
        let query = FlowQuery::new(FlowType::Deshield, self.config.population_cap)
            .amount_between(options.min_amount_zat, u64::MAX)
            .time_between(since, now)
            .order(TimeOrder::NewestFirst);
        let deshields = self.ledger.find_flow_events(&query)?;
        if deshields.len() >= self.config.population_cap {
            warn!(
                "Batch scan hit the population cap of {}; oldest deshields in the window were skipped",
                self.config.population_cap
            );
        }

        let pattern_type = if options.amount_tolerance_bps == 0 {
            PatternType::BatchDeshield
        } else {
            PatternType::BatchDeshieldClustered
        };
        let groups = cluster::group_near(
            deshields,
            options.amount_tolerance_bps,
            options.min_batch_count,
        );
        debug!("{} amount groups with at least {} members", groups.len(), options.min_batch_count);

        let mut patterns = Vec::new();
        for group in groups {
            let total = group.total_zat();
            let first_time = group.members.first().map(|e| e.block_time).unwrap_or(now);
            let shield = self.find_matching_shield(total, first_time)?;
            let pattern = self.build_pattern(pattern_type, group, shield);
            if pattern.score >= self.config.min_score {
                patterns.push(pattern);
            }
        }

        rank(&mut patterns);
        patterns.truncate(options.limit);
        info!(
            "Batch scan over {} days found {} patterns",
            options.time_window_days,
            patterns.len()
        );
        Ok(patterns)
    }

    /// Check whether a known shield was withdrawn as equal parts.
    pub fn detect_for_shield(&self, shield_txid: &str) -> Result<ShieldBatchReport, EngineError> {
        validate_txid(shield_txid)?;
        let mut shield = match self
            .ledger
            .get_flow_event_of_type(shield_txid, FlowType::Shield)?
        {
            Some(shield) => shield,
            None if self.ledger.transaction_exists(shield_txid)? => {
                return Err(EngineError::validation(
                    "txid",
                    format!("{shield_txid} is not a shield transaction"),
                ));
            }
            None => return Err(EngineError::not_found(shield_txid)),
        };
        ensure_addresses(self.ledger, &mut shield);

        let lookahead = self.config.shield_lookback_days.saturating_mul(DAY);
        let mut seen = HashSet::new();
        let mut matches = Vec::new();
        for &divisor in SHIELD_DIVISORS {
            let per_tx = shield.amount_zat / divisor;
            if per_tx < self.config.per_tx_floor_zat {
                continue;
            }
            let cap = self.config.shield_candidate_cap.max(divisor as usize);
            let query = FlowQuery::new(FlowType::Deshield, cap)
                .amount_around(per_tx, FEE_TOLERANCE_ZAT)
                .time_between(
                    shield.block_time + 1,
                    shield.block_time.saturating_add(lookahead),
                )
                .order(TimeOrder::OldestFirst);
            let found = self.ledger.find_flow_events(&query)?;
            let required = (divisor as usize).div_ceil(2).max(3);

            for mut group in cluster::group_exact(found, required) {
                group.members.truncate(divisor as usize);
                let total = group.total_zat();
                let first_time = group
                    .members
                    .first()
                    .map(|e| e.block_time)
                    .unwrap_or(shield.block_time);
                let matching = MatchingShield::new(shield.clone(), total, first_time);
                let pattern = self.build_pattern(PatternType::ShieldSplit, group, Some(matching));
                if pattern.score >= self.config.min_score && seen.insert(pattern.pattern_hash.clone()) {
                    debug!(
                        "Shield {shield_txid} split by {divisor}: {} deshields, score {}",
                        pattern.batch_count, pattern.score
                    );
                    matches.push(pattern);
                }
            }
        }

        rank(&mut matches);
        let warning_level = matches
            .first()
            .map(|p| p.warning_level)
            .unwrap_or(WarningLevel::Low);
        Ok(ShieldBatchReport {
            shield,
            has_pattern: !matches.is_empty(),
            matches,
            warning_level,
        })
    }

    /// Best shield in the lookback window by summed-amount proximity; latest wins ties.
    fn find_matching_shield(
        &self,
        total_zat: u64,
        first_deshield_time: i64,
    ) -> Result<Option<MatchingShield>, LedgerError> {
        let lookback = self.config.shield_lookback_days.saturating_mul(DAY);
        let query = FlowQuery::new(FlowType::Shield, self.config.shield_candidate_cap)
            .amount_around(total_zat, SHIELD_SUM_TOLERANCE_ZAT)
            .time_between(first_deshield_time.saturating_sub(lookback), first_deshield_time - 1)
            .order(TimeOrder::NewestFirst);
        let best = self
            .ledger
            .find_flow_events(&query)?
            .into_iter()
            .min_by_key(|s| s.amount_zat.abs_diff(total_zat));
        Ok(best.map(|mut shield| {
            ensure_addresses(self.ledger, &mut shield);
            MatchingShield::new(shield, total_zat, first_deshield_time)
        }))
    }

    fn build_pattern(
        &self,
        pattern_type: PatternType,
        group: AmountGroup,
        matching_shield: Option<MatchingShield>,
    ) -> BatchPattern {
        let total_amount_zat = group.total_zat();
        let AmountGroup {
            per_tx_amount_zat,
            spread_zat,
            mut members,
        } = group;
        members
            .par_iter_mut()
            .for_each(|e| ensure_addresses(self.ledger, e));

        let batch_count = members.len();
        let first_time = members.first().map(|e| e.block_time).unwrap_or_default();
        let last_time = members.last().map(|e| e.block_time).unwrap_or_default();
        let time_span_seconds = last_time - first_time;
        let addresses: Vec<String> = members
            .iter()
            .flat_map(|e| e.transparent_addresses.iter())
            .filter(|a| !a.is_empty())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let (score, breakdown) = score_batch(&BatchFacts {
            batch_count,
            per_tx_amount_zat,
            amount_spread_zat: spread_zat,
            time_span_seconds,
            distinct_addresses: addresses.len(),
            shield_difference_zat: matching_shield.as_ref().map(|s| s.amount_difference_zat),
            shield_latency_seconds: matching_shield.as_ref().map(|s| s.latency_seconds),
        });

        let txids: Vec<String> = members.iter().map(|e| e.txid.clone()).collect();
        let mut pattern = BatchPattern {
            pattern_type,
            pattern_hash: pattern_hash(&txids),
            per_tx_amount_zat,
            batch_count,
            total_amount_zat,
            heights: members.iter().map(|e| e.block_height).collect(),
            times: members.iter().map(|e| e.block_time).collect(),
            txids,
            first_time,
            last_time,
            time_span_seconds,
            time_span_hours: time_span_seconds as f64 / 3_600.0,
            address_concentration: if batch_count == 0 || addresses.is_empty() {
                0.0
            } else {
                addresses.len() as f64 / batch_count as f64
            },
            addresses,
            matching_shield,
            score,
            warning_level: WarningLevel::from_batch_score(score),
            breakdown,
            explanation: String::new(),
        };
        pattern.explanation = explain::describe(&pattern);
        pattern
    }
}

/// Highest score first; ties go to larger batches, then larger amounts.
fn rank(patterns: &mut [BatchPattern]) {
    patterns.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| b.batch_count.cmp(&a.batch_count))
            .then_with(|| b.per_tx_amount_zat.cmp(&a.per_tx_amount_zat))
            .then_with(|| a.pattern_hash.cmp(&b.pattern_hash))
    });
}
