use rusqlite::{Connection, Result};

/// Initialize the wallet store schema
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS wallets (
            id TEXT PRIMARY KEY,
            created_at INTEGER DEFAULT (strftime('%s', 'now'))
        )",
        [],
    )?;

    // One owner per watched address
    conn.execute(
        "CREATE TABLE IF NOT EXISTS wallet_addresses (
            address TEXT PRIMARY KEY,
            wallet_id TEXT NOT NULL REFERENCES wallets(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS blocks (
            height INTEGER PRIMARY KEY,
            hash TEXT NOT NULL,
            time INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS outputs (
            txid TEXT NOT NULL,
            vout INTEGER NOT NULL,
            wallet_id TEXT NOT NULL,
            address TEXT NOT NULL,
            value INTEGER NOT NULL,
            height INTEGER NOT NULL,
            spent_txid TEXT,
            spent_height INTEGER,
            PRIMARY KEY (txid, vout)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS wallet_txs (
            wallet_id TEXT NOT NULL,
            txid TEXT NOT NULL,
            height INTEGER NOT NULL,
            PRIMARY KEY (wallet_id, txid)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS wallet_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            tip_height INTEGER,
            tip_hash TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_outputs_wallet ON outputs(wallet_id, spent_height)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_outputs_height ON outputs(height)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_wallet_txs_height ON wallet_txs(height)",
        [],
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO wallet_state (id, tip_height, tip_hash) VALUES (1, NULL, NULL)",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('wallets', 'wallet_addresses', 'blocks', 'outputs', 'wallet_txs', 'wallet_state')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 6);

        let state_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM wallet_state", [], |row| row.get(0))
            .unwrap();
        assert_eq!(state_rows, 1);
    }
}
