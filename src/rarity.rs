use tracing::debug;

use crate::core::time::DAY;
use crate::ledger::{Ledger, LedgerError};

/// Trailing window for the rarity signal.
pub const DEFAULT_RARITY_WINDOW_DAYS: i64 = 90;

/// How often an exact amount recurs in a trailing window, in either direction.
///
/// The count is a property of the amount, not of any candidate pairing, so
/// callers compute it once per query.
pub struct RarityIndex<'a, L: Ledger + ?Sized> {
    ledger: &'a L,
    window_days: i64,
}

impl<'a, L: Ledger + ?Sized> RarityIndex<'a, L> {
    pub fn new(ledger: &'a L, window_days: i64) -> Self {
        Self {
            ledger,
            window_days,
        }
    }

    /// Start of the trailing window ending at `now`.
    pub fn since(&self, now: i64) -> i64 {
        now.saturating_sub(self.window_days.saturating_mul(DAY))
    }

    pub fn occurrences(&self, amount_zat: u64, now: i64) -> Result<u64, LedgerError> {
        let count = self.ledger.count_exact_amount(amount_zat, self.since(now))?;
        debug!(
            "Amount {amount_zat} zat seen {count} times in the last {} days",
            self.window_days
        );
        Ok(count)
    }
}
