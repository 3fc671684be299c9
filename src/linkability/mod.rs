pub mod explain;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LinkabilityConfig;
use crate::core::time::{DAY, format_relative};
use crate::core::txid::validate_txid;
use crate::core::{FlowType, LinkabilityScore, ShieldedFlowEvent, WarningLevel};
use crate::error::EngineError;
use crate::ledger::{FlowQuery, Ledger, TimeOrder, ensure_addresses, resolve_addresses_lossy};
use crate::rarity::RarityIndex;
use crate::signals::calculate_linkability_score;

pub const DEFAULT_LIMIT: usize = 5;
pub const MAX_LIMIT: usize = 20;
pub const DEFAULT_TOLERANCE_ZAT: u64 = 100_000;
pub const MIN_TOLERANCE_ZAT: u64 = 10_000;
pub const MAX_TOLERANCE_ZAT: u64 = 10_000_000;

/// Caller knobs for a single pairwise query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyzeOptions {
    /// 1..=20 ranked matches to return.
    pub limit: usize,
    /// Amount window on either side of the queried amount. Clamped, never rejected.
    pub tolerance_zat: u64,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            tolerance_zat: DEFAULT_TOLERANCE_ZAT,
        }
    }
}

impl From<&LinkabilityConfig> for AnalyzeOptions {
    fn from(config: &LinkabilityConfig) -> Self {
        Self {
            limit: config.default_limit,
            tolerance_zat: config.default_tolerance_zat,
        }
    }
}

impl AnalyzeOptions {
    /// Validate the limit and clamp the tolerance into its allowed range.
    pub fn normalized(&self) -> Result<Self, EngineError> {
        if self.limit == 0 || self.limit > MAX_LIMIT {
            return Err(EngineError::validation(
                "limit",
                format!("must be between 1 and {MAX_LIMIT}, got {}", self.limit),
            ));
        }
        Ok(Self {
            limit: self.limit,
            tolerance_zat: self.tolerance_zat.clamp(MIN_TOLERANCE_ZAT, MAX_TOLERANCE_ZAT),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchDirection {
    /// A deshield is explained by shields strictly before it.
    EarlierShields,
    /// A shield is explained by deshields strictly after it.
    LaterDeshields,
}

impl SearchDirection {
    pub fn for_flow(flow_type: FlowType) -> Self {
        match flow_type {
            FlowType::Deshield => SearchDirection::EarlierShields,
            FlowType::Shield => SearchDirection::LaterDeshields,
        }
    }
}

/// One ranked candidate counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedTransaction {
    pub txid: String,
    pub flow_type: FlowType,
    pub amount_zat: u64,
    pub block_height: u32,
    pub block_time: i64,
    /// Candidate time minus queried time.
    pub time_delta_seconds: i64,
    /// e.g. "42 minutes before".
    pub time_delta: String,
    pub linkability: LinkabilityScore,
    pub transparent_addresses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairwiseLinkabilityResult {
    pub txid: String,
    pub has_shielded_activity: bool,
    /// The queried flow, with its own addresses resolved.
    pub event: Option<ShieldedFlowEvent>,
    pub search_direction: Option<SearchDirection>,
    /// Exact-amount occurrences feeding every candidate's rarity score.
    pub amount_occurrences: u64,
    pub linked_transactions: Vec<LinkedTransaction>,
    pub warning_level: WarningLevel,
    pub highest_score: u8,
    pub educational_note: Option<String>,
}

impl PairwiseLinkabilityResult {
    /// A real transaction that never touched a shielded pool.
    pub fn no_shielded_activity(txid: &str) -> Self {
        Self {
            txid: txid.to_string(),
            has_shielded_activity: false,
            event: None,
            search_direction: None,
            amount_occurrences: 0,
            linked_transactions: Vec::new(),
            warning_level: WarningLevel::Low,
            highest_score: 0,
            educational_note: None,
        }
    }
}

/// Finds and ranks opposite-direction candidates for one transaction.
pub struct PairwiseAnalyzer<'a, L: Ledger + ?Sized> {
    ledger: &'a L,
    config: &'a LinkabilityConfig,
}

impl<'a, L: Ledger + ?Sized> PairwiseAnalyzer<'a, L> {
    pub fn new(ledger: &'a L, config: &'a LinkabilityConfig) -> Self {
        Self { ledger, config }
    }

    pub fn analyze(
        &self,
        txid: &str,
        options: &AnalyzeOptions,
        now: i64,
    ) -> Result<PairwiseLinkabilityResult, EngineError> {
        validate_txid(txid)?;
        let options = options.normalized()?;

        let Some(mut event) = self.ledger.get_flow_event(txid)? else {
            if self.ledger.transaction_exists(txid)? {
                debug!("{txid} has no shielded activity");
                return Ok(PairwiseLinkabilityResult::no_shielded_activity(txid));
            }
            return Err(EngineError::not_found(txid));
        };

        let query = self.candidate_query(&event, options.tolerance_zat);
        let candidates = self.ledger.find_flow_events(&query)?;
        let occurrences = RarityIndex::new(self.ledger, self.config.rarity_window_days)
            .occurrences(event.amount_zat, now)?;
        debug!(
            "{txid}: {} raw candidates, amount seen {occurrences} times",
            candidates.len()
        );

        let mut linked: Vec<LinkedTransaction> = candidates
            .into_iter()
            .map(|candidate| {
                let delta = candidate.block_time - event.block_time;
                LinkedTransaction {
                    linkability: calculate_linkability_score(
                        event.amount_zat,
                        candidate.amount_zat,
                        delta,
                        occurrences,
                    ),
                    txid: candidate.txid,
                    flow_type: candidate.flow_type,
                    amount_zat: candidate.amount_zat,
                    block_height: candidate.block_height,
                    block_time: candidate.block_time,
                    time_delta_seconds: delta,
                    time_delta: format_relative(delta),
                    transparent_addresses: Vec::new(),
                }
            })
            .collect();

        rank(&mut linked);
        linked.truncate(options.limit);

        // Only the kept matches are worth an address lookup.
        linked.par_iter_mut().for_each(|l| {
            l.transparent_addresses = resolve_addresses_lossy(self.ledger, &l.txid, l.flow_type);
        });
        ensure_addresses(self.ledger, &mut event);

        let (warning_level, highest_score) = linked
            .first()
            .map(|top| (top.linkability.warning_level, top.linkability.score))
            .unwrap_or((WarningLevel::Low, 0));
        let educational_note = explain::build_note(&event, &linked);

        Ok(PairwiseLinkabilityResult {
            txid: txid.to_string(),
            has_shielded_activity: true,
            search_direction: Some(SearchDirection::for_flow(event.flow_type)),
            event: Some(event),
            amount_occurrences: occurrences,
            linked_transactions: linked,
            warning_level,
            highest_score,
            educational_note,
        })
    }

    /// Opposite direction, amount window, and a window strictly on the
    /// causal side of the queried event, nearest in time first.
    fn candidate_query(&self, event: &ShieldedFlowEvent, tolerance_zat: u64) -> FlowQuery {
        let window = self.config.window_days.saturating_mul(DAY);
        let query = FlowQuery::new(event.flow_type.opposite(), self.config.candidate_cap)
            .amount_around(event.amount_zat, tolerance_zat)
            .excluding(&event.txid);
        match event.flow_type {
            FlowType::Deshield => query
                .time_between(event.block_time.saturating_sub(window), event.block_time - 1)
                .order(TimeOrder::NewestFirst),
            FlowType::Shield => query
                .time_between(event.block_time + 1, event.block_time.saturating_add(window))
                .order(TimeOrder::OldestFirst),
        }
    }
}

/// Highest score first; ties go to the candidate closest in time, then txid.
fn rank(linked: &mut [LinkedTransaction]) {
    linked.sort_by(|a, b| {
        b.linkability
            .score
            .cmp(&a.linkability.score)
            .then_with(|| {
                a.time_delta_seconds
                    .unsigned_abs()
                    .cmp(&b.time_delta_seconds.unsigned_abs())
            })
            .then_with(|| a.txid.cmp(&b.txid))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Pool;
    use crate::core::time::{HOUR, MINUTE};
    use crate::ledger::memory::MemoryLedger;

    const NOW: i64 = 1_750_000_000;
    const T: i64 = NOW - 10 * DAY;

    fn txid(n: u8) -> String {
        format!("{n:02x}").repeat(32)
    }

    fn event(n: u8, flow_type: FlowType, time: i64, amount: u64, addr: &str) -> ShieldedFlowEvent {
        ShieldedFlowEvent {
            txid: txid(n),
            flow_type,
            block_height: (time / 75) as u32,
            block_time: time,
            amount_zat: amount,
            pool: Pool::Orchard,
            transparent_addresses: vec![addr.to_string()],
        }
    }

    fn analyze(ledger: &MemoryLedger, id: u8) -> Result<PairwiseLinkabilityResult, EngineError> {
        let config = LinkabilityConfig::default();
        PairwiseAnalyzer::new(ledger, &config).analyze(&txid(id), &AnalyzeOptions::default(), NOW)
    }

    fn deshield_scenario() -> MemoryLedger {
        MemoryLedger::from_events([
            // the deshield under analysis
            event(1, FlowType::Deshield, T, 500_000_000, "t1Receiver"),
            // exact amount, 5 minutes earlier
            event(2, FlowType::Shield, T - 5 * MINUTE, 500_000_000, "t1Source"),
            // close amount, a day earlier
            event(3, FlowType::Shield, T - DAY, 500_050_000, "t1Other"),
            // exact amount but after the deshield: must never be returned
            event(4, FlowType::Shield, T + MINUTE, 500_000_000, "t1Late"),
            // outside the amount window
            event(5, FlowType::Shield, T - HOUR, 501_000_000, "t1Far"),
            // outside the 90-day window
            event(6, FlowType::Shield, T - 91 * DAY, 500_000_000, "t1Ancient"),
            // same direction, ignored
            event(7, FlowType::Deshield, T - HOUR, 500_000_000, "t1Peer"),
        ])
        .unwrap()
    }

    #[test]
    fn deshield_ranks_earlier_shields() {
        let ledger = deshield_scenario();
        let result = analyze(&ledger, 1).unwrap();
        assert!(result.has_shielded_activity);
        assert_eq!(result.search_direction, Some(SearchDirection::EarlierShields));
        let ids: Vec<&str> = result.linked_transactions.iter().map(|l| l.txid.as_str()).collect();
        assert_eq!(ids, [txid(2), txid(3)]);

        let top = &result.linked_transactions[0];
        assert_eq!(top.time_delta, "5 minutes before");
        assert_eq!(top.transparent_addresses, vec!["t1Source".to_string()]);
        assert_eq!(result.warning_level, top.linkability.warning_level);
        assert_eq!(result.highest_score, top.linkability.score);
    }

    #[test]
    fn rarity_is_shared_across_candidates() {
        let ledger = deshield_scenario();
        let result = analyze(&ledger, 1).unwrap();
        // 1, 2, 4, 7 carry the exact amount inside the trailing window; 6 is too old
        assert_eq!(result.amount_occurrences, 4);
        for l in &result.linked_transactions {
            assert_eq!(l.linkability.breakdown.amount_rarity, 25);
        }
    }

    #[test]
    fn deshield_never_links_later_shields() {
        let ledger = deshield_scenario();
        let result = analyze(&ledger, 1).unwrap();
        let origin = result.event.as_ref().unwrap();
        assert!(
            result
                .linked_transactions
                .iter()
                .all(|l| l.block_time < origin.block_time && l.flow_type == FlowType::Shield)
        );
    }

    #[test]
    fn shield_links_later_deshields_only() {
        let ledger = MemoryLedger::from_events([
            event(1, FlowType::Shield, T, 2_000_000_000, "t1Source"),
            event(2, FlowType::Deshield, T + 2 * HOUR, 2_000_000_000, "t1Dest"),
            event(3, FlowType::Deshield, T - HOUR, 2_000_000_000, "t1Before"),
        ])
        .unwrap();
        let result = analyze(&ledger, 1).unwrap();
        assert_eq!(result.search_direction, Some(SearchDirection::LaterDeshields));
        assert_eq!(result.linked_transactions.len(), 1);
        assert_eq!(result.linked_transactions[0].txid, txid(2));
        assert_eq!(result.linked_transactions[0].time_delta, "2 hours after");
        let note = result.educational_note.unwrap();
        assert!(note.contains("t1Source"));
        assert!(note.contains("t1Dest"));
    }

    #[test]
    fn no_candidates_is_not_an_error() {
        let ledger =
            MemoryLedger::from_events([event(1, FlowType::Deshield, T, 777_777_777, "t1Lonely")])
                .unwrap();
        let result = analyze(&ledger, 1).unwrap();
        assert!(result.has_shielded_activity);
        assert!(result.linked_transactions.is_empty());
        assert_eq!(result.warning_level, WarningLevel::Low);
        assert_eq!(result.highest_score, 0);
        assert_eq!(result.educational_note, None);
    }

    #[test]
    fn unknown_txid_is_not_found() {
        let ledger = deshield_scenario();
        assert!(matches!(analyze(&ledger, 99), Err(EngineError::NotFound { .. })));
    }

    #[test]
    fn plain_transaction_has_no_shielded_activity() {
        let mut ledger = deshield_scenario();
        ledger.insert_plain_transaction(&txid(42));
        let result = analyze(&ledger, 42).unwrap();
        assert!(!result.has_shielded_activity);
        assert!(result.event.is_none());
        assert_eq!(result.warning_level, WarningLevel::Low);
    }

    #[test]
    fn malformed_txid_is_rejected_before_lookup() {
        let ledger = deshield_scenario();
        let config = LinkabilityConfig::default();
        let err = PairwiseAnalyzer::new(&ledger, &config)
            .analyze("not-a-txid", &AnalyzeOptions::default(), NOW)
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation { field: "txid", .. }));
    }

    #[test]
    fn limit_is_validated() {
        let ledger = deshield_scenario();
        let config = LinkabilityConfig::default();
        let analyzer = PairwiseAnalyzer::new(&ledger, &config);
        for limit in [0, MAX_LIMIT + 1] {
            let options = AnalyzeOptions {
                limit,
                ..AnalyzeOptions::default()
            };
            let err = analyzer.analyze(&txid(1), &options, NOW).unwrap_err();
            assert!(matches!(err, EngineError::Validation { field: "limit", .. }));
        }
    }

    #[test]
    fn limit_truncates_ranked_results() {
        let ledger = deshield_scenario();
        let config = LinkabilityConfig::default();
        let options = AnalyzeOptions {
            limit: 1,
            ..AnalyzeOptions::default()
        };
        let result = PairwiseAnalyzer::new(&ledger, &config)
            .analyze(&txid(1), &options, NOW)
            .unwrap();
        assert_eq!(result.linked_transactions.len(), 1);
        assert_eq!(result.linked_transactions[0].txid, txid(2));
    }

    #[test]
    fn tolerance_is_clamped() {
        let tiny = AnalyzeOptions {
            limit: 5,
            tolerance_zat: 1,
        };
        assert_eq!(tiny.normalized().unwrap().tolerance_zat, MIN_TOLERANCE_ZAT);
        let huge = AnalyzeOptions {
            limit: 5,
            tolerance_zat: u64::MAX,
        };
        assert_eq!(huge.normalized().unwrap().tolerance_zat, MAX_TOLERANCE_ZAT);
    }

    #[test]
    fn wide_tolerance_finds_more() {
        let ledger = deshield_scenario();
        let config = LinkabilityConfig::default();
        let options = AnalyzeOptions {
            limit: 20,
            tolerance_zat: 2_000_000,
        };
        let result = PairwiseAnalyzer::new(&ledger, &config)
            .analyze(&txid(1), &options, NOW)
            .unwrap();
        assert!(result.linked_transactions.iter().any(|l| l.txid == txid(5)));
    }

    #[test]
    fn candidate_cap_bounds_scoring() {
        let mut ledger = MemoryLedger::new();
        ledger
            .insert(event(200, FlowType::Deshield, T, 100_000_000, "t1R"))
            .unwrap();
        for n in 0..60u8 {
            ledger
                .insert(event(n, FlowType::Shield, T - 1 - i64::from(n) * HOUR, 100_000_000, "t1S"))
                .unwrap();
        }
        let config = LinkabilityConfig {
            candidate_cap: 10,
            ..LinkabilityConfig::default()
        };
        let options = AnalyzeOptions {
            limit: 20,
            ..AnalyzeOptions::default()
        };
        let result = PairwiseAnalyzer::new(&ledger, &config)
            .analyze(&txid(200), &options, NOW)
            .unwrap();
        assert_eq!(result.linked_transactions.len(), 10);
        // nearest-in-time candidates survive the cap
        assert_eq!(result.linked_transactions[0].txid, txid(0));
    }

    #[test]
    fn failed_address_lookup_degrades() {
        let mut ledger = deshield_scenario();
        ledger.fail_address_resolution(&txid(2));
        let result = analyze(&ledger, 1).unwrap();
        let top = &result.linked_transactions[0];
        assert_eq!(top.txid, txid(2));
        assert!(top.transparent_addresses.is_empty());
        assert!(result.educational_note.unwrap().contains("an unknown address"));
    }

    #[test]
    fn analysis_is_idempotent() {
        let ledger = deshield_scenario();
        let first = analyze(&ledger, 1).unwrap();
        let second = analyze(&ledger, 1).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn ties_prefer_closer_in_time() {
        let ledger = MemoryLedger::from_events([
            event(1, FlowType::Deshield, T, 300_000_000, "t1R"),
            event(2, FlowType::Shield, T - 10 * MINUTE, 300_000_000, "t1A"),
            event(3, FlowType::Shield, T - 2 * MINUTE, 300_000_000, "t1B"),
        ])
        .unwrap();
        let result = analyze(&ledger, 1).unwrap();
        assert_eq!(
            result.linked_transactions[0].linkability.score,
            result.linked_transactions[1].linkability.score
        );
        assert_eq!(result.linked_transactions[0].txid, txid(3));
    }
}
