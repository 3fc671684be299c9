use std::collections::BTreeMap;

use crate::core::ShieldedFlowEvent;

/// Deshields sharing one per-transaction amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmountGroup {
    /// Exact shared amount, or the integer mean for near-identical groups.
    pub per_tx_amount_zat: u64,
    /// Largest minus smallest member amount; 0 for exact groups.
    pub spread_zat: u64,
    /// Ordered by block time, then txid.
    pub members: Vec<ShieldedFlowEvent>,
}

impl AmountGroup {
    /// Sum of member amounts, saturating at `u64::MAX`.
    pub fn total_zat(&self) -> u64 {
        saturating_total(&self.members)
    }
}

pub(crate) fn saturating_total(members: &[ShieldedFlowEvent]) -> u64 {
    let sum: u128 = members.iter().map(|e| u128::from(e.amount_zat)).sum();
    u64::try_from(sum).unwrap_or(u64::MAX)
}

/// Group by exact amount, keeping groups with at least `min_count` members.
/// Groups come out in ascending amount order.
pub fn group_exact(events: Vec<ShieldedFlowEvent>, min_count: usize) -> Vec<AmountGroup> {
    let mut by_amount: BTreeMap<u64, Vec<ShieldedFlowEvent>> = BTreeMap::new();
    for event in events {
        by_amount.entry(event.amount_zat).or_default().push(event);
    }
    by_amount
        .into_iter()
        .filter(|(_, members)| members.len() >= min_count)
        .map(|(amount, mut members)| {
            sort_by_time(&mut members);
            AmountGroup {
                per_tx_amount_zat: amount,
                spread_zat: 0,
                members,
            }
        })
        .collect()
}

/// Group amounts lying within `tolerance_bps` basis points of the smallest
/// amount in their group. Zero tolerance is exact grouping.
pub fn group_near(
    events: Vec<ShieldedFlowEvent>,
    tolerance_bps: u32,
    min_count: usize,
) -> Vec<AmountGroup> {
    if tolerance_bps == 0 {
        return group_exact(events, min_count);
    }

    let mut sorted = events;
    sorted.sort_by(|a, b| {
        a.amount_zat
            .cmp(&b.amount_zat)
            .then_with(|| a.block_time.cmp(&b.block_time))
    });

    let mut groups = Vec::new();
    let mut current: Vec<ShieldedFlowEvent> = Vec::new();
    for event in sorted {
        let joins = current
            .first()
            .is_none_or(|first| within_bps(first.amount_zat, event.amount_zat, tolerance_bps));
        if !joins {
            flush(&mut groups, std::mem::take(&mut current), min_count);
        }
        current.push(event);
    }
    flush(&mut groups, current, min_count);
    groups
}

fn within_bps(base: u64, amount: u64, tolerance_bps: u32) -> bool {
    u128::from(amount.abs_diff(base)) * 10_000 <= u128::from(base) * u128::from(tolerance_bps)
}

fn flush(groups: &mut Vec<AmountGroup>, mut members: Vec<ShieldedFlowEvent>, min_count: usize) {
    if members.is_empty() || members.len() < min_count {
        return;
    }
    let min = members.iter().map(|e| e.amount_zat).min().unwrap_or(0);
    let max = members.iter().map(|e| e.amount_zat).max().unwrap_or(0);
    let sum: u128 = members.iter().map(|e| u128::from(e.amount_zat)).sum();
    let mean = (sum / members.len() as u128) as u64;
    sort_by_time(&mut members);
    groups.push(AmountGroup {
        per_tx_amount_zat: mean,
        spread_zat: max - min,
        members,
    });
}

fn sort_by_time(members: &mut [ShieldedFlowEvent]) {
    members.sort_by(|a, b| {
        a.block_time
            .cmp(&b.block_time)
            .then_with(|| a.txid.cmp(&b.txid))
    });
}
