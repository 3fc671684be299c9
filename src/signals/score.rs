use crate::core::{LinkabilityScore, ScoreBreakdown, WarningLevel};

use super::primitives::{score_amount_rarity, score_amount_similarity, score_time_proximity};

/// At or below this many occurrences an amount counts as very rare.
pub const RARE_OCCURRENCES: u64 = 3;
/// At or above this many occurrences an amount counts as very common.
pub const COMMON_OCCURRENCES: u64 = 50;

const RARE_BONUS: i32 = 10;
const RARE_TIME_CEILING: u8 = 15;
const COMMON_MALUS: i32 = 15;
const COMMON_TIME_CEILING: u8 = 20;
const COMMON_FLOOR: i32 = 10;

/// Score one (shield, deshield) candidate pair.
///
/// This is the only implementation of pair scoring; the pairwise analyzer and
/// any bulk caller go through it.
pub fn calculate_linkability_score(
    amount_a: u64,
    amount_b: u64,
    time_delta_seconds: i64,
    occurrences: u64,
) -> LinkabilityScore {
    let amount_similarity = score_amount_similarity(amount_a, amount_b);
    let time_proximity = score_time_proximity(time_delta_seconds);
    let amount_rarity = score_amount_rarity(occurrences);

    let base = i32::from(amount_similarity) + i32::from(time_proximity) + i32::from(amount_rarity);
    let adjusted = adjust_for_rarity(base, time_proximity, occurrences);
    let score = adjusted.clamp(0, 100) as u8;

    LinkabilityScore {
        score,
        warning_level: WarningLevel::from_pair_score(score),
        breakdown: ScoreBreakdown {
            amount_similarity,
            time_proximity,
            amount_rarity,
            adjustment: (adjusted - base) as i8,
        },
    }
}

/// Rare amounts stay suspicious across long gaps; common amounts need tight
/// timing to mean anything. At most one branch fires.
fn adjust_for_rarity(base: i32, time_score: u8, occurrences: u64) -> i32 {
    if occurrences <= RARE_OCCURRENCES && time_score < RARE_TIME_CEILING {
        base + RARE_BONUS
    } else if occurrences >= COMMON_OCCURRENCES && time_score < COMMON_TIME_CEILING {
        (base - COMMON_MALUS).max(COMMON_FLOOR)
    } else {
        base
    }
}
