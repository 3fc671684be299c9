//! Multi-factor batch score. Deliberately separate from the pair scorer: it
//! reasons over sums, counts and address multisets, not single-pair deltas.

use serde::{Deserialize, Serialize};

use crate::core::time::{DAY, HOUR, WEEK};
use crate::linkability::DEFAULT_TOLERANCE_ZAT;
use crate::signals::score_roundness;

/// Roundness at or above the ÷10 tier reads as a deliberate, human-picked amount.
const ROUND_FINGERPRINT_POINTS: u8 = 12;

/// Aggregate facts about one candidate batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchFacts {
    pub batch_count: usize,
    pub per_tx_amount_zat: u64,
    pub amount_spread_zat: u64,
    pub time_span_seconds: i64,
    pub distinct_addresses: usize,
    /// |shield amount − batch total| when a matching shield was found.
    pub shield_difference_zat: Option<u64>,
    /// Shield → first deshield, when a matching shield was found.
    pub shield_latency_seconds: Option<i64>,
}

/// Points per factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchBreakdown {
    pub batch_count: u8,             // 10-30
    pub roundness: u8,               // 0-25
    pub matching_shield: u8,         // 0-35
    pub time_clustering: u8,         // 0-10
    pub address_concentration: u8,   // 0-20
    pub shield_latency: u8,          // 0-10
    pub is_round: bool,
    /// 0 when every member carries the identical amount.
    pub amount_spread_zat: u64,
}

impl BatchBreakdown {
    pub fn total(&self) -> u32 {
        [
            self.batch_count,
            self.roundness,
            self.matching_shield,
            self.time_clustering,
            self.address_concentration,
            self.shield_latency,
        ]
        .iter()
        .map(|p| u32::from(*p))
        .sum()
    }
}

/// Sum the factors and clamp to 100.
pub fn score_batch(facts: &BatchFacts) -> (u8, BatchBreakdown) {
    let roundness = score_roundness(facts.per_tx_amount_zat);
    let breakdown = BatchBreakdown {
        batch_count: batch_count_points(facts.batch_count),
        roundness,
        matching_shield: matching_shield_points(facts.shield_difference_zat),
        time_clustering: time_clustering_points(facts.time_span_seconds),
        address_concentration: address_concentration_points(
            facts.distinct_addresses,
            facts.batch_count,
        ),
        shield_latency: shield_latency_points(facts.shield_latency_seconds),
        is_round: roundness >= ROUND_FINGERPRINT_POINTS,
        amount_spread_zat: facts.amount_spread_zat,
    };
    (breakdown.total().min(100) as u8, breakdown)
}

pub fn batch_count_points(count: usize) -> u8 {
    match count {
        0..=4 => 10,
        5..=7 => 20,
        8..=11 => 25,
        _ => 30,
    }
}

/// Exact sum → 35, within the pair tolerance → 32, within 5× → 28, any
/// other match → 20, no match → 0.
pub fn matching_shield_points(difference_zat: Option<u64>) -> u8 {
    match difference_zat {
        None => 0,
        Some(0) => 35,
        Some(d) if d <= DEFAULT_TOLERANCE_ZAT => 32,
        Some(d) if d <= 5 * DEFAULT_TOLERANCE_ZAT => 28,
        Some(_) => 20,
    }
}

/// First → last deshield.
pub fn time_clustering_points(span_seconds: i64) -> u8 {
    let span = span_seconds.saturating_abs();
    if span < 6 * HOUR {
        10
    } else if span < DAY {
        8
    } else if span < 3 * DAY {
        5
    } else if span < WEEK {
        3
    } else {
        0
    }
}

/// Few recipients across many withdrawals means one actor.
pub fn address_concentration_points(distinct: usize, events: usize) -> u8 {
    if distinct == 0 || events == 0 {
        return 0;
    }
    if distinct == 1 && events >= 3 {
        20
    } else if distinct <= 2 && events >= 5 {
        15
    } else if distinct <= 3 && events >= 8 {
        10
    } else {
        // round(10 × (1 − distinct / events))
        let reused = events.saturating_sub(distinct);
        ((10 * reused + events / 2) / events) as u8
    }
}

/// Shield → first deshield. Fast turnaround is a strong tell.
pub fn shield_latency_points(latency_seconds: Option<i64>) -> u8 {
    let Some(latency) = latency_seconds else {
        return 0;
    };
    let latency = latency.saturating_abs();
    if latency < HOUR {
        10
    } else if latency < 6 * HOUR {
        8
    } else if latency < DAY {
        6
    } else if latency < 3 * DAY {
        3
    } else {
        0
    }
}
