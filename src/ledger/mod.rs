pub mod memory;

use thiserror::Error;
use tracing::warn;

use crate::core::{FlowType, ShieldedFlowEvent};

/// Failure inside a ledger adapter.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("fixture parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A stored row failed validation at the adapter boundary.
    #[error("invalid ledger row: {0}")]
    InvalidRow(String),
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeOrder {
    NewestFirst,
    OldestFirst,
}

/// Bounded search over flow events. Amount and time ranges are inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowQuery {
    pub flow_type: FlowType,
    pub min_amount_zat: u64,
    pub max_amount_zat: u64,
    pub min_time: i64,
    pub max_time: i64,
    pub exclude_txid: Option<String>,
    pub order: TimeOrder,
    pub limit: usize,
}

impl FlowQuery {
    pub fn new(flow_type: FlowType, limit: usize) -> Self {
        Self {
            flow_type,
            min_amount_zat: 0,
            max_amount_zat: u64::MAX,
            min_time: i64::MIN,
            max_time: i64::MAX,
            exclude_txid: None,
            order: TimeOrder::NewestFirst,
            limit,
        }
    }

    pub fn amount_between(mut self, min: u64, max: u64) -> Self {
        self.min_amount_zat = min;
        self.max_amount_zat = max;
        self
    }

    /// Amounts within `tolerance` of `center`, saturating at both ends.
    pub fn amount_around(self, center: u64, tolerance: u64) -> Self {
        self.amount_between(center.saturating_sub(tolerance), center.saturating_add(tolerance))
    }

    pub fn time_between(mut self, min: i64, max: i64) -> Self {
        self.min_time = min;
        self.max_time = max;
        self
    }

    pub fn excluding(mut self, txid: &str) -> Self {
        self.exclude_txid = Some(txid.to_string());
        self
    }

    pub fn order(mut self, order: TimeOrder) -> Self {
        self.order = order;
        self
    }

    /// Whether `event` satisfies every filter (ignores order and limit).
    pub fn matches(&self, event: &ShieldedFlowEvent) -> bool {
        event.flow_type == self.flow_type
            && event.amount_zat >= self.min_amount_zat
            && event.amount_zat <= self.max_amount_zat
            && event.block_time >= self.min_time
            && event.block_time <= self.max_time
            && self.exclude_txid.as_deref() != Some(event.txid.as_str())
    }
}

/// Read-only view of the indexed ledger the engine runs against.
///
/// Implementations validate rows at their boundary: every event handed to the
/// engine already carries integer amounts and a known flow type.
pub trait Ledger: Send + Sync {
    /// The record for `txid` with the given flow type.
    fn get_flow_event_of_type(
        &self,
        txid: &str,
        flow_type: FlowType,
    ) -> Result<Option<ShieldedFlowEvent>, LedgerError>;

    /// The record for `txid`, preferring the deshield when both exist.
    fn get_flow_event(&self, txid: &str) -> Result<Option<ShieldedFlowEvent>, LedgerError> {
        match self.get_flow_event_of_type(txid, FlowType::Deshield)? {
            Some(event) => Ok(Some(event)),
            None => self.get_flow_event_of_type(txid, FlowType::Shield),
        }
    }

    /// Events matching `query`, ordered by block time, at most `query.limit`.
    /// Returned events may carry empty `transparent_addresses`.
    fn find_flow_events(&self, query: &FlowQuery) -> Result<Vec<ShieldedFlowEvent>, LedgerError>;

    /// Events of either direction with exactly `amount_zat` at or after `since_time`.
    fn count_exact_amount(&self, amount_zat: u64, since_time: i64) -> Result<u64, LedgerError>;

    /// Transparent inputs of a shield, or transparent outputs of a deshield.
    fn resolve_transparent_addresses(
        &self,
        txid: &str,
        flow_type: FlowType,
    ) -> Result<Vec<String>, LedgerError>;

    /// Whether the ledger knows the transaction at all, shielded or not.
    fn transaction_exists(&self, txid: &str) -> Result<bool, LedgerError>;
}

/// Resolve addresses, degrading to an empty list on failure so one bad lookup
/// never fails the whole request. Empty strings are dropped.
pub fn resolve_addresses_lossy<L: Ledger + ?Sized>(
    ledger: &L,
    txid: &str,
    flow_type: FlowType,
) -> Vec<String> {
    match ledger.resolve_transparent_addresses(txid, flow_type) {
        Ok(addresses) => addresses.into_iter().filter(|a| !a.is_empty()).collect(),
        Err(e) => {
            warn!("Address resolution failed for {txid} ({flow_type}): {e}");
            Vec::new()
        }
    }
}

/// Use the addresses already on the event, resolving them only when missing.
pub fn ensure_addresses<L: Ledger + ?Sized>(ledger: &L, event: &mut ShieldedFlowEvent) {
    event.transparent_addresses.retain(|a| !a.is_empty());
    if event.transparent_addresses.is_empty() {
        event.transparent_addresses = resolve_addresses_lossy(ledger, &event.txid, event.flow_type);
    }
}
