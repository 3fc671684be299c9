use crate::core::{FlowType, ShieldedFlowEvent};
use crate::units::format_zec;

use super::LinkedTransaction;

const UNKNOWN_ADDRESS: &str = "an unknown address";

/// Natural-language risk note for a pairwise result. `None` without candidates.
pub fn build_note(origin: &ShieldedFlowEvent, linked: &[LinkedTransaction]) -> Option<String> {
    let best = linked.first()?;
    let own_address = first_address(&origin.transparent_addresses);
    let their_address = first_address(&best.transparent_addresses);

    let mut note = match origin.flow_type {
        FlowType::Deshield => format!(
            "This deshield of {} ZEC sent funds to {own_address}. A shield of {} ZEC from \
             {their_address} happened {} (linkability {}/100). If they belong to the same \
             person, {their_address} and {own_address} are likely controlled by the same owner.",
            format_zec(origin.amount_zat),
            format_zec(best.amount_zat),
            best.time_delta,
            best.linkability.score,
        ),
        FlowType::Shield => format!(
            "This shield of {} ZEC came from {own_address}. A deshield of {} ZEC to \
             {their_address} happened {} (linkability {}/100). If they belong to the same \
             person, the funds likely moved from {own_address} to {their_address} through \
             the shielded pool.",
            format_zec(origin.amount_zat),
            format_zec(best.amount_zat),
            best.time_delta,
            best.linkability.score,
        ),
    };

    let others = linked.len() - 1;
    if others == 1 {
        note.push_str(" One other transaction is also a plausible match.");
    } else if others > 1 {
        note.push_str(&format!(" {others} other transactions are also plausible matches."));
    }
    note.push_str(
        " Moving a similar amount in and out of the shielded pool close together in time \
         undoes much of its privacy: vary amounts and wait longer between steps.",
    );
    Some(note)
}

fn first_address(addresses: &[String]) -> &str {
    addresses
        .iter()
        .map(String::as_str)
        .find(|a| !a.is_empty())
        .unwrap_or(UNKNOWN_ADDRESS)
}
