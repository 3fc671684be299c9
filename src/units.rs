//! Presentation-only rendering of atomic amounts. Scoring never calls into this.

/// Atomic units (zatoshis) per whole coin.
pub const ZAT_PER_ZEC: u64 = 100_000_000;

/// Render an atomic amount in whole coins using integer arithmetic,
/// trimming trailing zeros: `250_000_000_000` → `"2500"`, `150_000_000` → `"1.5"`.
pub fn format_zec(amount_zat: u64) -> String {
    let whole = amount_zat / ZAT_PER_ZEC;
    let frac = amount_zat % ZAT_PER_ZEC;
    if frac == 0 {
        return whole.to_string();
    }
    let digits = format!("{frac:08}");
    format!("{whole}.{}", digits.trim_end_matches('0'))
}
