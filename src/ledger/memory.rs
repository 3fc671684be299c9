use std::collections::{HashMap, HashSet};

use crate::core::{FlowType, ShieldedFlowEvent};

use super::{FlowQuery, Ledger, LedgerError, TimeOrder};

/// In-process ledger holding every event in memory.
///
/// Used for fixtures and tests; also handy for replaying an exported slice of
/// the real ledger.
#[derive(Debug, Default, Clone)]
pub struct MemoryLedger {
    events: HashMap<(String, FlowType), ShieldedFlowEvent>,
    /// Transactions known to the ledger that never touched a shielded pool.
    plain_transactions: HashSet<String>,
    /// Txids whose address resolution fails (fault injection).
    failing_resolution: HashSet<String>,
    /// When set, every flow query fails as if the backing store were down.
    failing_queries: bool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events(
        events: impl IntoIterator<Item = ShieldedFlowEvent>,
    ) -> Result<Self, LedgerError> {
        let mut ledger = Self::new();
        for event in events {
            ledger.insert(event)?;
        }
        Ok(ledger)
    }

    /// Append an event. A second event for the same `(txid, flow_type)` is rejected.
    pub fn insert(&mut self, event: ShieldedFlowEvent) -> Result<(), LedgerError> {
        let key = (event.txid.clone(), event.flow_type);
        if self.events.contains_key(&key) {
            return Err(LedgerError::InvalidRow(format!(
                "duplicate {} event for {}",
                event.flow_type, event.txid
            )));
        }
        self.events.insert(key, event);
        Ok(())
    }

    /// Record a transaction with no shielded activity.
    pub fn insert_plain_transaction(&mut self, txid: &str) {
        self.plain_transactions.insert(txid.to_string());
    }

    /// Backfill addresses on an existing event. Returns false if there is no such event.
    pub fn set_addresses(&mut self, txid: &str, flow_type: FlowType, addresses: Vec<String>) -> bool {
        match self.events.get_mut(&(txid.to_string(), flow_type)) {
            Some(event) => {
                event.transparent_addresses = addresses;
                true
            }
            None => false,
        }
    }

    /// Make address resolution for `txid` fail from now on.
    pub fn fail_address_resolution(&mut self, txid: &str) {
        self.failing_resolution.insert(txid.to_string());
    }

    /// Make every flow and existence query fail from now on. Address
    /// resolution keeps its own switch.
    pub fn fail_queries(&mut self) {
        self.failing_queries = true;
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.failing_queries {
            return Err(LedgerError::Unavailable("ledger queries are disabled".into()));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Ledger for MemoryLedger {
    fn get_flow_event_of_type(
        &self,
        txid: &str,
        flow_type: FlowType,
    ) -> Result<Option<ShieldedFlowEvent>, LedgerError> {
        self.check_available()?;
        Ok(self.events.get(&(txid.to_string(), flow_type)).cloned())
    }

    fn find_flow_events(&self, query: &FlowQuery) -> Result<Vec<ShieldedFlowEvent>, LedgerError> {
        self.check_available()?;
        let mut found: Vec<ShieldedFlowEvent> = self
            .events
            .values()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.block_time.cmp(&b.block_time).then_with(|| a.txid.cmp(&b.txid)));
        if query.order == TimeOrder::NewestFirst {
            found.reverse();
        }
        found.truncate(query.limit);
        Ok(found)
    }

    fn count_exact_amount(&self, amount_zat: u64, since_time: i64) -> Result<u64, LedgerError> {
        self.check_available()?;
        Ok(self
            .events
            .values()
            .filter(|e| e.amount_zat == amount_zat && e.block_time >= since_time)
            .count() as u64)
    }

    fn resolve_transparent_addresses(
        &self,
        txid: &str,
        flow_type: FlowType,
    ) -> Result<Vec<String>, LedgerError> {
        if self.failing_resolution.contains(txid) {
            return Err(LedgerError::Unavailable(format!(
                "address index has no entry for {txid}"
            )));
        }
        Ok(self
            .events
            .get(&(txid.to_string(), flow_type))
            .map(|e| e.transparent_addresses.clone())
            .unwrap_or_default())
    }

    fn transaction_exists(&self, txid: &str) -> Result<bool, LedgerError> {
        self.check_available()?;
        Ok(self.plain_transactions.contains(txid)
            || self.events.contains_key(&(txid.to_string(), FlowType::Shield))
            || self.events.contains_key(&(txid.to_string(), FlowType::Deshield)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Pool;

    fn event(txid: &str, flow_type: FlowType, time: i64, amount: u64) -> ShieldedFlowEvent {
        ShieldedFlowEvent {
            txid: txid.to_string(),
            flow_type,
            block_height: (time / 75) as u32,
            block_time: time,
            amount_zat: amount,
            pool: Pool::Orchard,
            transparent_addresses: vec![format!("t1{txid}")],
        }
    }

    fn sample() -> MemoryLedger {
        MemoryLedger::from_events([
            event("s1", FlowType::Shield, 1_000, 500),
            event("s2", FlowType::Shield, 2_000, 500),
            event("s3", FlowType::Shield, 3_000, 700),
            event("d1", FlowType::Deshield, 4_000, 500),
        ])
        .unwrap()
    }

    #[test]
    fn rejects_duplicate_flow() {
        let mut ledger = sample();
        assert!(ledger.insert(event("s1", FlowType::Shield, 5, 5)).is_err());
        // same txid, other direction is fine
        assert!(ledger.insert(event("s1", FlowType::Deshield, 5, 5)).is_ok());
        assert_eq!(ledger.len(), 5);
    }

    #[test]
    fn find_orders_and_limits() {
        let ledger = sample();
        let newest = ledger
            .find_flow_events(&FlowQuery::new(FlowType::Shield, 2))
            .unwrap();
        let ids: Vec<&str> = newest.iter().map(|e| e.txid.as_str()).collect();
        assert_eq!(ids, ["s3", "s2"]);

        let oldest = ledger
            .find_flow_events(&FlowQuery::new(FlowType::Shield, 10).order(TimeOrder::OldestFirst))
            .unwrap();
        let ids: Vec<&str> = oldest.iter().map(|e| e.txid.as_str()).collect();
        assert_eq!(ids, ["s1", "s2", "s3"]);
    }

    #[test]
    fn counts_exact_amount_both_directions() {
        let ledger = sample();
        assert_eq!(ledger.count_exact_amount(500, 0).unwrap(), 3);
        assert_eq!(ledger.count_exact_amount(500, 1_500).unwrap(), 2);
        assert_eq!(ledger.count_exact_amount(501, 0).unwrap(), 0);
    }

    #[test]
    fn existence() {
        let mut ledger = sample();
        ledger.insert_plain_transaction("plain");
        assert!(ledger.transaction_exists("plain").unwrap());
        assert!(ledger.transaction_exists("d1").unwrap());
        assert!(!ledger.transaction_exists("missing").unwrap());
    }

    #[test]
    fn backfill_addresses() {
        let mut ledger = sample();
        assert!(ledger.set_addresses("d1", FlowType::Deshield, vec!["t1new".into()]));
        assert!(!ledger.set_addresses("d1", FlowType::Shield, vec![]));
        assert_eq!(
            ledger.resolve_transparent_addresses("d1", FlowType::Deshield).unwrap(),
            vec!["t1new".to_string()]
        );
    }

    #[test]
    fn injected_resolution_failure() {
        let mut ledger = sample();
        ledger.fail_address_resolution("s1");
        assert!(ledger.resolve_transparent_addresses("s1", FlowType::Shield).is_err());
    }

    #[test]
    fn injected_query_failure() {
        let mut ledger = sample();
        ledger.fail_queries();
        assert!(matches!(
            ledger.get_flow_event_of_type("s1", FlowType::Shield),
            Err(LedgerError::Unavailable(_))
        ));
        assert!(ledger.find_flow_events(&FlowQuery::new(FlowType::Shield, 10)).is_err());
        assert!(ledger.count_exact_amount(500, 0).is_err());
        assert!(ledger.transaction_exists("s1").is_err());
        // address resolution is switched separately
        assert_eq!(
            ledger.resolve_transparent_addresses("s1", FlowType::Shield).unwrap(),
            vec!["t1s1".to_string()]
        );
    }
}
