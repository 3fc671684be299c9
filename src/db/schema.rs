use rusqlite::Connection;

pub fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS transactions (
            txid         TEXT PRIMARY KEY,
            block_height INTEGER NOT NULL,
            block_time   INTEGER NOT NULL
        );

        -- amounts are validated on read, not constrained here
        CREATE TABLE IF NOT EXISTS shielded_flows (
            txid         TEXT NOT NULL,
            flow_type    TEXT NOT NULL,
            block_height INTEGER NOT NULL,
            block_time   INTEGER NOT NULL,
            amount_zat   INTEGER NOT NULL,
            pool         TEXT NOT NULL,
            PRIMARY KEY (txid, flow_type)
        );

        CREATE TABLE IF NOT EXISTS transaction_inputs (
            txid     TEXT NOT NULL,
            position INTEGER NOT NULL,
            address  TEXT,
            PRIMARY KEY (txid, position)
        );

        CREATE TABLE IF NOT EXISTS transaction_outputs (
            txid     TEXT NOT NULL,
            position INTEGER NOT NULL,
            address  TEXT,
            PRIMARY KEY (txid, position)
        );

        CREATE TABLE IF NOT EXISTS detected_patterns (
            pattern_hash      TEXT PRIMARY KEY,
            pattern_type      TEXT NOT NULL,
            score             INTEGER NOT NULL,
            warning_level     TEXT NOT NULL,
            batch_count       INTEGER NOT NULL,
            per_tx_amount_zat INTEGER NOT NULL,
            total_amount_zat  INTEGER NOT NULL,
            pattern_json      TEXT NOT NULL, -- JSON
            detected_at       INTEGER NOT NULL,
            updated_at        INTEGER NOT NULL,
            expires_at        INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_flows_type_time ON shielded_flows(flow_type, block_time);
        CREATE INDEX IF NOT EXISTS idx_flows_amount ON shielded_flows(amount_zat, block_time);
        CREATE INDEX IF NOT EXISTS idx_patterns_score ON detected_patterns(score DESC);
        CREATE INDEX IF NOT EXISTS idx_patterns_expires ON detected_patterns(expires_at);
        ",
    )?;
    Ok(())
}
