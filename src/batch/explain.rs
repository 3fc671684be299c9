use crate::core::time::format_duration;
use crate::core::txid::short_txid;
use crate::units::format_zec;

use super::BatchPattern;

/// Narrative for a detected batch: size, amount, recipients, and the
/// funding shield if one was found.
pub fn describe(pattern: &BatchPattern) -> String {
    let n = pattern.batch_count;
    let mut text = if pattern.breakdown.amount_spread_zat == 0 {
        format!(
            "{n} identical deshields of {} ZEC each (total {} ZEC)",
            format_zec(pattern.per_tx_amount_zat),
            format_zec(pattern.total_amount_zat),
        )
    } else {
        format!(
            "{n} near-identical deshields of about {} ZEC each (total {} ZEC)",
            format_zec(pattern.per_tx_amount_zat),
            format_zec(pattern.total_amount_zat),
        )
    };
    if pattern.time_span_seconds == 0 {
        text.push_str(" in a single block.");
    } else {
        text.push_str(&format!(" within {}.", format_duration(pattern.time_span_seconds)));
    }

    match pattern.addresses.as_slice() {
        [] => text.push_str(" Recipient addresses are not known yet."),
        [only] => text.push_str(&format!(" All of them paid the same address {only}.")),
        many if many.len() < n => text.push_str(&format!(
            " They paid only {} distinct addresses.",
            many.len()
        )),
        _ => text.push_str(" Each paid a different address."),
    }

    if pattern.breakdown.is_round {
        text.push_str(" A round amount like this is a recognizable fingerprint.");
    } else if pattern.breakdown.amount_spread_zat == 0 {
        text.push_str(" An unusual amount repeated exactly is an even stronger fingerprint.");
    }

    if let Some(shield) = &pattern.matching_shield {
        let relation = if shield.amount_difference_zat == 0 {
            "exactly match".to_string()
        } else {
            format!(
                "come within {} ZEC of",
                format_zec(shield.amount_difference_zat)
            )
        };
        text.push_str(&format!(
            " Together they {relation} a shield of {} ZEC ({}…) made {} before the first withdrawal.",
            format_zec(shield.amount_zat),
            short_txid(&shield.txid),
            format_duration(shield.latency_seconds),
        ));
    }
    text
}
