//! Independent scoring primitives. Each returns points within a fixed budget:
//! similarity ≤ 40, proximity ≤ 30, rarity ≤ 30 (so the pair sum is ≤ 100),
//! roundness ≤ 25 (batch detector only).

use crate::core::time::{DAY, HOUR, MINUTE};
use crate::units::ZAT_PER_ZEC;

/// Typical network fee. A round amount that paid (or had deducted) a fee is
/// still recognized as round.
pub const FEE_TOLERANCE_ZAT: u64 = 100_000;

/// Roundness tiers checked from the largest modulus down; first match wins.
const ROUNDNESS_TIERS: &[(u64, u8)] = &[
    (1_000 * ZAT_PER_ZEC, 25),
    (500 * ZAT_PER_ZEC, 22),
    (100 * ZAT_PER_ZEC, 20),
    (50 * ZAT_PER_ZEC, 15),
    (10 * ZAT_PER_ZEC, 12),
    (ZAT_PER_ZEC, 8),
];

/// Absolute-difference similarity. Percentages are useless for small amounts,
/// so the bands are in atomic units. Anything that made it through an amount
/// window still earns the 10-point floor.
pub fn score_amount_similarity(a: u64, b: u64) -> u8 {
    match a.abs_diff(b) {
        0 => 40,
        d if d <= 10_000 => 38,
        d if d <= 20_000 => 36,
        d if d <= 50_000 => 33,
        d if d <= 100_000 => 30,
        d if d <= 200_000 => 25,
        d if d <= 500_000 => 20,
        d if d <= 1_000_000 => 15,
        _ => 10,
    }
}

/// Closer in time is more suspicious. Sign of the delta is ignored.
pub fn score_time_proximity(delta_seconds: i64) -> u8 {
    let d = delta_seconds.saturating_abs();
    if d < 15 * MINUTE {
        30
    } else if d < HOUR {
        25
    } else if d < 2 * HOUR {
        20
    } else if d < 6 * HOUR {
        12
    } else if d < DAY {
        8
    } else if d < 3 * DAY {
        5
    } else if d < 7 * DAY {
        4
    } else if d < 30 * DAY {
        3
    } else {
        2
    }
}

/// How often the exact amount recurs in the observation window.
/// Zero is treated as one: the queried amount itself.
pub fn score_amount_rarity(occurrences: u64) -> u8 {
    match occurrences {
        0..=1 => 30,
        2..=3 => 27,
        4..=5 => 25,
        6..=10 => 20,
        11..=20 => 15,
        21..=50 => 10,
        _ => 5,
    }
}

/// Psychologically round amounts (multiples of 1000/500/100/50/10 coins, or
/// whole coins), within [`FEE_TOLERANCE_ZAT`] on either side.
pub fn score_roundness(amount_zat: u64) -> u8 {
    ROUNDNESS_TIERS
        .iter()
        .find(|(modulus, _)| is_near_multiple(amount_zat, *modulus, FEE_TOLERANCE_ZAT))
        .map(|(_, points)| *points)
        .unwrap_or(0)
}

fn is_near_multiple(amount: u64, modulus: u64, tolerance: u64) -> bool {
    if amount.saturating_add(tolerance) < modulus {
        return false;
    }
    let rem = amount % modulus;
    rem <= tolerance || modulus - rem <= tolerance
}
