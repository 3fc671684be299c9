pub mod schema;

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::batch::BatchPattern;
use crate::core::time::DAY;
use crate::core::{FlowType, Pool, ShieldedFlowEvent};
use crate::ledger::{FlowQuery, Ledger, LedgerError, TimeOrder};

/// How long a detected pattern stays visible without being re-detected.
pub const PATTERN_TTL_DAYS: i64 = 90;

/// A persisted batch pattern with its bookkeeping timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPattern {
    pub pattern: BatchPattern,
    pub detected_at: i64,
    pub updated_at: i64,
    pub expires_at: i64,
}

/// JSON fixture layout accepted by [`SqliteLedger::import_fixtures`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FixtureFile {
    pub transactions: Vec<FixtureTransaction>,
    pub flows: Vec<ShieldedFlowEvent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureTransaction {
    pub txid: String,
    pub block_height: u32,
    pub block_time: i64,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub transactions: usize,
    pub flows: usize,
}

pub struct LedgerDb {
    conn: Connection,
}

/// Thread-safe SQLite ledger.
#[derive(Clone)]
pub struct SqliteLedger {
    inner: Arc<Mutex<LedgerDb>>,
}

impl SqliteLedger {
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        Ok(Self::wrap(LedgerDb::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Ok(Self::wrap(LedgerDb::open_in_memory()?))
    }

    fn wrap(db: LedgerDb) -> Self {
        Self {
            inner: Arc::new(Mutex::new(db)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerDb>, LedgerError> {
        self.inner
            .lock()
            .map_err(|_| LedgerError::Unavailable("ledger connection lock poisoned".into()))
    }

    /// Record a transaction and its transparent inputs/outputs.
    pub fn insert_transaction(&self, tx: &FixtureTransaction) -> Result<bool, LedgerError> {
        self.lock()?.insert_transaction(tx)
    }

    /// Append a flow event. A second event for the same `(txid, flow_type)` is rejected.
    pub fn insert_event(&self, event: &ShieldedFlowEvent) -> Result<(), LedgerError> {
        self.lock()?.insert_event(event)
    }

    /// Load a JSON fixture file in one transaction. Already-known rows are skipped.
    pub fn import_fixtures(&self, path: &Path) -> Result<ImportSummary, LedgerError> {
        let file = std::fs::File::open(path)?;
        let fixtures: FixtureFile = serde_json::from_reader(std::io::BufReader::new(file))?;
        let summary = self.lock()?.import(&fixtures)?;
        info!(
            "Imported {} transactions and {} flows from {}",
            summary.transactions,
            summary.flows,
            path.display()
        );
        Ok(summary)
    }

    /// Upsert a detected pattern, pushing its expiry out to `now + PATTERN_TTL_DAYS`.
    pub fn store_pattern(&self, pattern: &BatchPattern, now: i64) -> Result<(), LedgerError> {
        self.lock()?.store_pattern(pattern, now)
    }

    /// Unexpired patterns, most recently detected first.
    pub fn recent_patterns(&self, limit: usize, now: i64) -> Result<Vec<StoredPattern>, LedgerError> {
        self.lock()?.recent_patterns(limit, now)
    }

    pub fn purge_expired_patterns(&self, now: i64) -> Result<usize, LedgerError> {
        self.lock()?.purge_expired_patterns(now)
    }
}

impl Ledger for SqliteLedger {
    fn get_flow_event_of_type(
        &self,
        txid: &str,
        flow_type: FlowType,
    ) -> Result<Option<ShieldedFlowEvent>, LedgerError> {
        self.lock()?.get_flow_event_of_type(txid, flow_type)
    }

    fn find_flow_events(&self, query: &FlowQuery) -> Result<Vec<ShieldedFlowEvent>, LedgerError> {
        self.lock()?.find_flow_events(query)
    }

    fn count_exact_amount(&self, amount_zat: u64, since_time: i64) -> Result<u64, LedgerError> {
        self.lock()?.count_exact_amount(amount_zat, since_time)
    }

    fn resolve_transparent_addresses(
        &self,
        txid: &str,
        flow_type: FlowType,
    ) -> Result<Vec<String>, LedgerError> {
        self.lock()?.resolve_transparent_addresses(txid, flow_type)
    }

    fn transaction_exists(&self, txid: &str) -> Result<bool, LedgerError> {
        self.lock()?.transaction_exists(txid)
    }
}

const FLOW_COLUMNS: &str = "txid, flow_type, block_height, block_time, amount_zat, pool";

/// A flow row as stored; converted into an event only after validation.
struct FlowRow {
    txid: String,
    flow_type: String,
    block_height: i64,
    block_time: i64,
    amount_zat: i64,
    pool: String,
}

impl FlowRow {
    fn read(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            txid: row.get(0)?,
            flow_type: row.get(1)?,
            block_height: row.get(2)?,
            block_time: row.get(3)?,
            amount_zat: row.get(4)?,
            pool: row.get(5)?,
        })
    }

    fn into_event(self) -> Result<ShieldedFlowEvent, LedgerError> {
        let amount_zat = u64::try_from(self.amount_zat).map_err(|_| {
            LedgerError::InvalidRow(format!("negative amount {} for {}", self.amount_zat, self.txid))
        })?;
        let block_height = u32::try_from(self.block_height).map_err(|_| {
            LedgerError::InvalidRow(format!(
                "block height {} out of range for {}",
                self.block_height, self.txid
            ))
        })?;
        let flow_type = self
            .flow_type
            .parse::<FlowType>()
            .map_err(|e| LedgerError::InvalidRow(format!("{e} for {}", self.txid)))?;
        let pool = self
            .pool
            .parse::<Pool>()
            .map_err(|e| LedgerError::InvalidRow(format!("{e} for {}", self.txid)))?;
        Ok(ShieldedFlowEvent {
            txid: self.txid,
            flow_type,
            block_height,
            block_time: self.block_time,
            amount_zat,
            pool,
            transparent_addresses: Vec::new(),
        })
    }
}

/// SQLite integers are signed. Query bounds and pattern index columns clamp;
/// flow rows go through [`stored_amount`] instead.
fn clamp_amount(amount_zat: u64) -> i64 {
    i64::try_from(amount_zat).unwrap_or(i64::MAX)
}

/// A flow amount as written to `shielded_flows`; anything that would not read
/// back unchanged is rejected.
fn stored_amount(event: &ShieldedFlowEvent) -> Result<i64, LedgerError> {
    i64::try_from(event.amount_zat).map_err(|_| {
        LedgerError::InvalidRow(format!(
            "amount {} of {} {} does not fit a signed 64-bit column",
            event.amount_zat, event.flow_type, event.txid
        ))
    })
}

fn address_table(flow_type: FlowType) -> &'static str {
    match flow_type {
        FlowType::Shield => "transaction_inputs",
        FlowType::Deshield => "transaction_outputs",
    }
}

impl LedgerDb {
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    fn insert_transaction(&self, tx: &FixtureTransaction) -> Result<bool, LedgerError> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO transactions (txid, block_height, block_time) VALUES (?1, ?2, ?3)",
            rusqlite::params![tx.txid, tx.block_height, tx.block_time],
        )?;
        self.insert_addresses(&tx.txid, "transaction_inputs", &tx.inputs)?;
        self.insert_addresses(&tx.txid, "transaction_outputs", &tx.outputs)?;
        Ok(inserted > 0)
    }

    fn insert_addresses(&self, txid: &str, table: &str, addresses: &[String]) -> Result<(), LedgerError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "INSERT OR IGNORE INTO {table} (txid, position, address) VALUES (?1, ?2, ?3)"
        ))?;
        for (position, address) in addresses.iter().enumerate() {
            stmt.execute(rusqlite::params![txid, position as i64, address])?;
        }
        Ok(())
    }

    fn insert_flow(&self, event: &ShieldedFlowEvent, or_ignore: bool) -> Result<bool, LedgerError> {
        let verb = if or_ignore { "INSERT OR IGNORE" } else { "INSERT" };
        let amount = stored_amount(event)?;
        let inserted = self.conn.execute(
            &format!("{verb} INTO shielded_flows ({FLOW_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
            rusqlite::params![
                event.txid,
                event.flow_type.as_str(),
                event.block_height,
                event.block_time,
                amount,
                event.pool.as_str(),
            ],
        )?;
        if inserted == 0 {
            return Ok(false);
        }
        self.conn.execute(
            "INSERT OR IGNORE INTO transactions (txid, block_height, block_time) VALUES (?1, ?2, ?3)",
            rusqlite::params![event.txid, event.block_height, event.block_time],
        )?;
        self.insert_addresses(
            &event.txid,
            address_table(event.flow_type),
            &event.transparent_addresses,
        )?;
        Ok(true)
    }

    fn insert_event(&self, event: &ShieldedFlowEvent) -> Result<(), LedgerError> {
        self.insert_flow(event, false)?;
        Ok(())
    }

    fn import(&self, fixtures: &FixtureFile) -> Result<ImportSummary, LedgerError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut summary = ImportSummary::default();
        for t in &fixtures.transactions {
            if self.insert_transaction(t)? {
                summary.transactions += 1;
            }
        }
        for flow in &fixtures.flows {
            if self.insert_flow(flow, true)? {
                summary.flows += 1;
            }
        }
        tx.commit()?;
        Ok(summary)
    }

    fn get_flow_event_of_type(
        &self,
        txid: &str,
        flow_type: FlowType,
    ) -> Result<Option<ShieldedFlowEvent>, LedgerError> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {FLOW_COLUMNS} FROM shielded_flows WHERE txid = ?1 AND flow_type = ?2"),
                rusqlite::params![txid, flow_type.as_str()],
                FlowRow::read,
            )
            .optional()?;
        row.map(FlowRow::into_event).transpose()
    }

    fn find_flow_events(&self, query: &FlowQuery) -> Result<Vec<ShieldedFlowEvent>, LedgerError> {
        let order = match query.order {
            TimeOrder::NewestFirst => "block_time DESC, txid DESC",
            TimeOrder::OldestFirst => "block_time ASC, txid ASC",
        };
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {FLOW_COLUMNS} FROM shielded_flows
             WHERE flow_type = ?1
               AND amount_zat >= ?2 AND amount_zat <= ?3
               AND block_time >= ?4 AND block_time <= ?5
               AND (?6 IS NULL OR txid != ?6)
             ORDER BY {order} LIMIT ?7"
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![
                query.flow_type.as_str(),
                clamp_amount(query.min_amount_zat),
                clamp_amount(query.max_amount_zat),
                query.min_time,
                query.max_time,
                query.exclude_txid,
                i64::try_from(query.limit).unwrap_or(i64::MAX),
            ],
            FlowRow::read,
        )?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?.into_event()?);
        }
        debug!("{} flow events matched {:?}", events.len(), query.flow_type);
        Ok(events)
    }

    fn count_exact_amount(&self, amount_zat: u64, since_time: i64) -> Result<u64, LedgerError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM shielded_flows WHERE amount_zat = ?1 AND block_time >= ?2",
            rusqlite::params![clamp_amount(amount_zat), since_time],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// Addresses in input/output order, duplicates and blanks dropped.
    fn resolve_transparent_addresses(
        &self,
        txid: &str,
        flow_type: FlowType,
    ) -> Result<Vec<String>, LedgerError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT address FROM {} WHERE txid = ?1 ORDER BY position",
            address_table(flow_type)
        ))?;
        let rows = stmt.query_map(rusqlite::params![txid], |row| row.get::<_, Option<String>>(0))?;
        let mut addresses: Vec<String> = Vec::new();
        for address in rows {
            if let Some(address) = address? {
                if !address.is_empty() && !addresses.contains(&address) {
                    addresses.push(address);
                }
            }
        }
        Ok(addresses)
    }

    fn transaction_exists(&self, txid: &str) -> Result<bool, LedgerError> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM transactions WHERE txid = ?1)
                 OR EXISTS(SELECT 1 FROM shielded_flows WHERE txid = ?1)",
            rusqlite::params![txid],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn store_pattern(&self, pattern: &BatchPattern, now: i64) -> Result<(), LedgerError> {
        let json = serde_json::to_string(pattern)?;
        let expires_at = now.saturating_add(PATTERN_TTL_DAYS * DAY);
        self.conn.execute(
            "INSERT INTO detected_patterns
                (pattern_hash, pattern_type, score, warning_level, batch_count,
                 per_tx_amount_zat, total_amount_zat, pattern_json, detected_at, updated_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, ?10)
             ON CONFLICT(pattern_hash) DO UPDATE SET
                score = excluded.score,
                warning_level = excluded.warning_level,
                pattern_json = excluded.pattern_json,
                updated_at = excluded.updated_at,
                expires_at = excluded.expires_at",
            rusqlite::params![
                pattern.pattern_hash,
                pattern.pattern_type.as_str(),
                pattern.score,
                pattern.warning_level.as_str(),
                pattern.batch_count as i64,
                clamp_amount(pattern.per_tx_amount_zat),
                clamp_amount(pattern.total_amount_zat),
                json,
                now,
                expires_at,
            ],
        )?;
        Ok(())
    }

    fn recent_patterns(&self, limit: usize, now: i64) -> Result<Vec<StoredPattern>, LedgerError> {
        let mut stmt = self.conn.prepare(
            "SELECT pattern_json, detected_at, updated_at, expires_at FROM detected_patterns
             WHERE expires_at > ?1
             ORDER BY detected_at DESC, score DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![now, i64::try_from(limit).unwrap_or(i64::MAX)],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )?;
        let mut patterns = Vec::new();
        for row in rows {
            let (json, detected_at, updated_at, expires_at) = row?;
            patterns.push(StoredPattern {
                pattern: serde_json::from_str(&json)?,
                detected_at,
                updated_at,
                expires_at,
            });
        }
        Ok(patterns)
    }

    fn purge_expired_patterns(&self, now: i64) -> Result<usize, LedgerError> {
        Ok(self.conn.execute(
            "DELETE FROM detected_patterns WHERE expires_at <= ?1",
            rusqlite::params![now],
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchDetector, BatchOptions};
    use crate::config::BatchConfig;
    use crate::core::time::HOUR;
    use crate::units::ZAT_PER_ZEC;

    const NOW: i64 = 1_750_000_000;

    fn txid(n: u8) -> String {
        format!("{n:02x}").repeat(32)
    }

    fn flow(n: u8, flow_type: FlowType, time: i64, amount: u64, addr: &str) -> ShieldedFlowEvent {
        ShieldedFlowEvent {
            txid: txid(n),
            flow_type,
            block_height: (time / 75) as u32,
            block_time: time,
            amount_zat: amount,
            pool: Pool::Sapling,
            transparent_addresses: vec![addr.to_string()],
        }
    }

    fn seeded() -> SqliteLedger {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        ledger.insert_event(&flow(1, FlowType::Shield, 1_000, 500, "t1in")).unwrap();
        ledger.insert_event(&flow(2, FlowType::Shield, 2_000, 500, "t1in2")).unwrap();
        ledger.insert_event(&flow(3, FlowType::Shield, 3_000, 700, "t1in3")).unwrap();
        ledger.insert_event(&flow(4, FlowType::Deshield, 4_000, 500, "t1out")).unwrap();
        ledger
    }

    #[test]
    fn event_roundtrip() {
        let ledger = seeded();
        let event = ledger
            .get_flow_event_of_type(&txid(4), FlowType::Deshield)
            .unwrap()
            .unwrap();
        assert_eq!(event.amount_zat, 500);
        assert_eq!(event.pool, Pool::Sapling);
        assert_eq!(event.block_time, 4_000);
        // addresses live in the output table
        assert!(event.transparent_addresses.is_empty());
        assert_eq!(
            ledger.resolve_transparent_addresses(&txid(4), FlowType::Deshield).unwrap(),
            vec!["t1out".to_string()]
        );
        assert!(ledger.get_flow_event_of_type(&txid(4), FlowType::Shield).unwrap().is_none());
    }

    #[test]
    fn duplicate_flow_is_rejected() {
        let ledger = seeded();
        assert!(ledger.insert_event(&flow(1, FlowType::Shield, 5, 5, "x")).is_err());
        assert!(ledger.insert_event(&flow(1, FlowType::Deshield, 5, 5, "x")).is_ok());
    }

    #[test]
    fn find_orders_filters_and_limits() {
        let ledger = seeded();
        let newest = ledger.find_flow_events(&FlowQuery::new(FlowType::Shield, 2)).unwrap();
        let ids: Vec<String> = newest.into_iter().map(|e| e.txid).collect();
        assert_eq!(ids, [txid(3), txid(2)]);

        let q = FlowQuery::new(FlowType::Shield, 10)
            .amount_around(500, 0)
            .time_between(0, 2_000)
            .excluding(&txid(2))
            .order(TimeOrder::OldestFirst);
        let ids: Vec<String> = ledger.find_flow_events(&q).unwrap().into_iter().map(|e| e.txid).collect();
        assert_eq!(ids, [txid(1)]);

        let unbounded = FlowQuery::new(FlowType::Shield, usize::MAX).amount_between(0, u64::MAX);
        assert_eq!(ledger.find_flow_events(&unbounded).unwrap().len(), 3);
    }

    #[test]
    fn counts_and_existence() {
        let ledger = seeded();
        assert_eq!(ledger.count_exact_amount(500, 0).unwrap(), 3);
        assert_eq!(ledger.count_exact_amount(500, 1_500).unwrap(), 2);
        assert!(ledger.transaction_exists(&txid(1)).unwrap());
        assert!(!ledger.transaction_exists(&txid(99)).unwrap());

        ledger
            .insert_transaction(&FixtureTransaction {
                txid: txid(50),
                block_height: 1,
                block_time: 75,
                inputs: vec!["t1a".into()],
                outputs: vec![],
            })
            .unwrap();
        assert!(ledger.transaction_exists(&txid(50)).unwrap());
        assert!(ledger.get_flow_event(&txid(50)).unwrap().is_none());
    }

    #[test]
    fn invalid_rows_are_rejected_at_the_boundary() {
        let ledger = seeded();
        {
            let db = ledger.lock().unwrap();
            db.conn
                .execute(
                    "INSERT INTO shielded_flows VALUES (?1, 'deshield', 1, 10, -5, 'sapling')",
                    [txid(60)],
                )
                .unwrap();
            db.conn
                .execute(
                    "INSERT INTO shielded_flows VALUES (?1, 'shield', 1, 10, 5, 'transparent')",
                    [txid(61)],
                )
                .unwrap();
        }
        assert!(matches!(
            ledger.get_flow_event_of_type(&txid(60), FlowType::Deshield),
            Err(LedgerError::InvalidRow(_))
        ));
        assert!(matches!(
            ledger.get_flow_event_of_type(&txid(61), FlowType::Shield),
            Err(LedgerError::InvalidRow(_))
        ));
    }

    #[test]
    fn oversized_amounts_are_rejected_on_write() {
        let ledger = seeded();
        let too_big = flow(62, FlowType::Deshield, 5_000, u64::MAX, "t1big");
        assert!(matches!(
            ledger.insert_event(&too_big),
            Err(LedgerError::InvalidRow(_))
        ));
        assert_eq!(ledger.get_flow_event_of_type(&txid(62), FlowType::Deshield).unwrap(), None);
        assert!(!ledger.transaction_exists(&txid(62)).unwrap());

        // the largest storable amount reads back unchanged
        let largest = flow(63, FlowType::Deshield, 5_000, i64::MAX as u64, "t1big");
        ledger.insert_event(&largest).unwrap();
        let stored = ledger
            .get_flow_event_of_type(&txid(63), FlowType::Deshield)
            .unwrap()
            .unwrap();
        assert_eq!(stored.amount_zat, i64::MAX as u64);
    }

    #[test]
    fn address_resolution_dedupes_and_skips_blanks() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        ledger
            .insert_transaction(&FixtureTransaction {
                txid: txid(7),
                block_height: 1,
                block_time: 75,
                inputs: vec!["".into(), "t1a".into(), "t1b".into(), "t1a".into()],
                outputs: vec!["t1z".into()],
            })
            .unwrap();
        assert_eq!(
            ledger.resolve_transparent_addresses(&txid(7), FlowType::Shield).unwrap(),
            vec!["t1a".to_string(), "t1b".to_string()]
        );
        assert_eq!(
            ledger.resolve_transparent_addresses(&txid(7), FlowType::Deshield).unwrap(),
            vec!["t1z".to_string()]
        );
    }

    #[test]
    fn fixture_import_is_idempotent() {
        let path = std::env::temp_dir().join(format!("shieldlink_fixtures_{}.json", std::process::id()));
        let json = serde_json::json!({
            "transactions": [
                { "txid": txid(30), "blockHeight": 10, "blockTime": 750, "inputs": ["t1plain"] }
            ],
            "flows": [
                {
                    "txid": txid(31), "flowType": "shield", "blockHeight": 11, "blockTime": 825,
                    "amountZat": 250_000_000u64, "pool": "orchard", "transparentAddresses": ["t1src"]
                },
                {
                    "txid": txid(32), "flowType": "deshield", "blockHeight": 12, "blockTime": 900,
                    "amountZat": 250_000_000u64, "pool": "orchard"
                }
            ]
        });
        std::fs::write(&path, json.to_string()).unwrap();

        let ledger = SqliteLedger::open_in_memory().unwrap();
        let first = ledger.import_fixtures(&path).unwrap();
        assert_eq!(first, ImportSummary { transactions: 1, flows: 2 });
        let second = ledger.import_fixtures(&path).unwrap();
        assert_eq!(second, ImportSummary::default());
        let _ = std::fs::remove_file(&path);

        assert!(ledger.transaction_exists(&txid(30)).unwrap());
        assert_eq!(
            ledger.resolve_transparent_addresses(&txid(31), FlowType::Shield).unwrap(),
            vec!["t1src".to_string()]
        );
        assert_eq!(ledger.count_exact_amount(250_000_000, 0).unwrap(), 2);
    }

    #[test]
    fn malformed_fixture_is_a_json_error() {
        let path = std::env::temp_dir().join(format!("shieldlink_bad_{}.json", std::process::id()));
        std::fs::write(&path, r#"{"flows": [{"txid": "x", "amountZat": -1}]}"#).unwrap();
        let ledger = SqliteLedger::open_in_memory().unwrap();
        assert!(matches!(ledger.import_fixtures(&path), Err(LedgerError::Json(_))));
        let _ = std::fs::remove_file(&path);
        assert!(matches!(
            ledger.import_fixtures(Path::new("/nonexistent/fixtures.json")),
            Err(LedgerError::Io(_))
        ));
    }

    fn detected_pattern(ledger: &SqliteLedger) -> BatchPattern {
        let t0 = NOW - DAY;
        ledger
            .insert_event(&flow(1, FlowType::Shield, t0 - HOUR, 300 * ZAT_PER_ZEC, "t1f"))
            .unwrap();
        for i in 0..3u8 {
            ledger
                .insert_event(&flow(
                    10 + i,
                    FlowType::Deshield,
                    t0 + i64::from(i) * HOUR,
                    100 * ZAT_PER_ZEC,
                    "t1c",
                ))
                .unwrap();
        }
        let config = BatchConfig::default();
        let mut patterns = BatchDetector::new(ledger, &config)
            .detect_batches(&BatchOptions::default(), NOW)
            .unwrap();
        assert_eq!(patterns.len(), 1);
        patterns.remove(0)
    }

    #[test]
    fn sqlite_ledger_drives_batch_detection() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let pattern = detected_pattern(&ledger);
        assert_eq!(pattern.batch_count, 3);
        assert_eq!(pattern.addresses, vec!["t1c".to_string()]);
        let shield = pattern.matching_shield.as_ref().unwrap();
        assert_eq!(shield.txid, txid(1));
        assert_eq!(shield.transparent_addresses, vec!["t1f".to_string()]);
    }

    #[test]
    fn patterns_upsert_and_expire() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let pattern = detected_pattern(&ledger);

        ledger.store_pattern(&pattern, NOW).unwrap();
        ledger.store_pattern(&pattern, NOW + HOUR).unwrap();
        let stored = ledger.recent_patterns(10, NOW + HOUR).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].pattern.pattern_hash, pattern.pattern_hash);
        assert_eq!(stored[0].pattern.txids, pattern.txids);
        assert_eq!(stored[0].pattern.score, pattern.score);
        assert_eq!(stored[0].detected_at, NOW);
        assert_eq!(stored[0].updated_at, NOW + HOUR);
        assert_eq!(stored[0].expires_at, NOW + HOUR + PATTERN_TTL_DAYS * DAY);

        let later = NOW + HOUR + PATTERN_TTL_DAYS * DAY;
        assert!(ledger.recent_patterns(10, later).unwrap().is_empty());
        assert_eq!(ledger.purge_expired_patterns(later).unwrap(), 1);
        assert_eq!(ledger.purge_expired_patterns(later).unwrap(), 0);
    }
}
