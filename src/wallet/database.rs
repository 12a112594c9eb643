use async_trait::async_trait;
use log::{debug, warn};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::chain::ChainClient;
use crate::error::WalletError;
use crate::logging::MetricsLogger;
use crate::models::{parse_display_hash, BalanceSnapshot, BlockEntry, ChainTip, Tx};
use crate::wallet::schema::initialize_schema;
use crate::wallet::{BalanceAccessor, TxLock, WalletDatabase};

fn lock_conn(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, WalletError> {
    conn.lock().map_err(|_| WalletError::Operation("Failed to acquire lock".to_string()))
}

/// Watch-only wallet store: tracks outputs paying to registered addresses and
/// their spends, block by block, with rollback to any stored height.
pub struct SqliteWalletDb {
    conn: Arc<Mutex<Connection>>,
    chain: Arc<dyn ChainClient>,
    rescanning: AtomicBool,
    tx_lock: TxLock,
    error_count: AtomicU64,
}

impl SqliteWalletDb {
    pub fn new(db_path: &str, chain: Arc<dyn ChainClient>) -> Result<Self, WalletError> {
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn, chain)
    }

    /// Create an in-memory store for testing
    pub fn new_in_memory(chain: Arc<dyn ChainClient>) -> Result<Self, WalletError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, chain)
    }

    fn from_connection(conn: Connection, chain: Arc<dyn ChainClient>) -> Result<Self, WalletError> {
        initialize_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            chain,
            rescanning: AtomicBool::new(false),
            tx_lock: TxLock::new(),
            error_count: AtomicU64::new(0),
        })
    }

    /// Create the wallet if needed and attach its watched addresses
    pub fn register_wallet(&self, wallet_id: &str, addresses: &[String]) -> Result<(), WalletError> {
        let mut conn = lock_conn(&self.conn)?;
        let tx = conn.transaction()?;

        tx.execute("INSERT OR IGNORE INTO wallets (id) VALUES (?1)", params![wallet_id])?;

        for address in addresses {
            let owner: Option<String> = tx
                .query_row(
                    "SELECT wallet_id FROM wallet_addresses WHERE address = ?1",
                    params![address],
                    |row| row.get(0),
                )
                .optional()?;

            match owner {
                Some(owner) if owner != wallet_id => {
                    return Err(WalletError::Operation(format!(
                        "Address {} already belongs to wallet {}",
                        address, owner
                    )));
                }
                Some(_) => {}
                None => {
                    tx.execute(
                        "INSERT INTO wallet_addresses (address, wallet_id) VALUES (?1, ?2)",
                        params![address, wallet_id],
                    )?;
                }
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn balance(&self, wallet_id: &str) -> Result<BalanceSnapshot, WalletError> {
        let conn = lock_conn(&self.conn)?;
        read_balance(&conn, wallet_id)
    }

    pub fn tip_height(&self) -> Result<Option<u32>, WalletError> {
        let conn = lock_conn(&self.conn)?;
        Ok(conn.query_row("SELECT tip_height FROM wallet_state WHERE id = 1", [], |row| row.get(0))?)
    }

    /// Number of failures reported through the error channel
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Apply a block, returning false if it was already applied
    fn apply_block(&self, entry: &BlockEntry, txs: &[Tx]) -> Result<bool, WalletError> {
        let started = Instant::now();
        let hash = entry.hash_hex();

        let mut conn = lock_conn(&self.conn)?;
        let tx = conn.transaction()?;

        let stored: Option<String> = tx
            .query_row("SELECT hash FROM blocks WHERE height = ?1", params![entry.height], |row| row.get(0))
            .optional()?;

        match stored {
            Some(stored) if stored == hash => return Ok(false),
            Some(stored) => {
                warn!(
                    "Block {} replaces stored block {} at height {}, unwinding",
                    hash, stored, entry.height
                );
                unwind_above(&tx, entry.height.saturating_sub(1))?;
            }
            None => {}
        }

        let touched = apply_transactions(&tx, entry, txs)?;

        tx.execute(
            "INSERT OR REPLACE INTO blocks (height, hash, time) VALUES (?1, ?2, ?3)",
            params![entry.height, hash, entry.time],
        )?;
        tx.execute(
            "UPDATE wallet_state SET
                tip_height = (SELECT height FROM blocks ORDER BY height DESC LIMIT 1),
                tip_hash = (SELECT hash FROM blocks ORDER BY height DESC LIMIT 1)
             WHERE id = 1",
            [],
        )?;
        tx.commit()?;

        MetricsLogger::log_database_operation("apply_block", started.elapsed().as_millis() as u64, Some(touched));
        Ok(true)
    }
}

fn read_balance(conn: &Connection, wallet_id: &str) -> Result<BalanceSnapshot, WalletError> {
    let confirmed: i64 = conn.query_row(
        "SELECT COALESCE(SUM(value), 0) FROM outputs WHERE wallet_id = ?1 AND spent_height IS NULL",
        params![wallet_id],
        |row| row.get(0),
    )?;
    let tx_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM wallet_txs WHERE wallet_id = ?1",
        params![wallet_id],
        |row| row.get(0),
    )?;

    // Blocks are the only input, so every coin is confirmed; the unconfirmed
    // balance includes confirmed coins.
    Ok(BalanceSnapshot {
        tx_count: tx_count as u64,
        unconfirmed: confirmed,
        confirmed,
    })
}

/// Record wallet-relevant spends and outputs, returning how many wallet txs were touched
fn apply_transactions(tx: &Transaction, entry: &BlockEntry, txs: &[Tx]) -> Result<usize, WalletError> {
    let mut touched_total = 0;

    for transaction in txs {
        let mut touched = BTreeSet::new();

        for input in &transaction.inputs {
            let owner: Option<String> = tx
                .query_row(
                    "SELECT wallet_id FROM outputs WHERE txid = ?1 AND vout = ?2 AND spent_height IS NULL",
                    params![input.txid, input.vout],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(owner) = owner {
                tx.execute(
                    "UPDATE outputs SET spent_txid = ?1, spent_height = ?2 WHERE txid = ?3 AND vout = ?4",
                    params![transaction.txid, entry.height, input.txid, input.vout],
                )?;
                touched.insert(owner);
            }
        }

        for (vout, output) in transaction.outputs.iter().enumerate() {
            let Some(address) = &output.address else { continue };

            let owner: Option<String> = tx
                .query_row(
                    "SELECT wallet_id FROM wallet_addresses WHERE address = ?1",
                    params![address],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(owner) = owner {
                tx.execute(
                    "INSERT OR IGNORE INTO outputs (txid, vout, wallet_id, address, value, height)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![transaction.txid, vout as u32, owner, address, output.value as i64, entry.height],
                )?;
                touched.insert(owner);
            }
        }

        for wallet_id in &touched {
            tx.execute(
                "INSERT OR IGNORE INTO wallet_txs (wallet_id, txid, height) VALUES (?1, ?2, ?3)",
                params![wallet_id, transaction.txid, entry.height],
            )?;
        }
        touched_total += touched.len();
    }

    Ok(touched_total)
}

/// Remove everything recorded above `height`
fn unwind_above(tx: &Transaction, height: u32) -> Result<(), WalletError> {
    tx.execute("DELETE FROM outputs WHERE height > ?1", params![height])?;
    tx.execute(
        "UPDATE outputs SET spent_txid = NULL, spent_height = NULL WHERE spent_height > ?1",
        params![height],
    )?;
    tx.execute("DELETE FROM wallet_txs WHERE height > ?1", params![height])?;
    tx.execute("DELETE FROM blocks WHERE height > ?1", params![height])?;
    Ok(())
}

#[async_trait]
impl WalletDatabase for SqliteWalletDb {
    async fn get(&self, wallet_id: &str) -> Result<Arc<dyn BalanceAccessor>, WalletError> {
        let exists = {
            let conn = lock_conn(&self.conn)?;
            conn.query_row("SELECT 1 FROM wallets WHERE id = ?1", params![wallet_id], |_| Ok(()))
                .optional()?
                .is_some()
        };

        if !exists {
            return Err(WalletError::WalletNotFound(wallet_id.to_string()));
        }

        Ok(Arc::new(SqliteWallet {
            id: wallet_id.to_string(),
            conn: Arc::clone(&self.conn),
        }))
    }

    async fn rollback(&self, height: u32) -> Result<(), WalletError> {
        let stored: Option<(String, u32)> = {
            let conn = lock_conn(&self.conn)?;
            conn.query_row(
                "SELECT hash, time FROM blocks WHERE height = ?1",
                params![height],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
        };

        // A block the store never saw becomes the new tip via the chain client.
        let (hash, time) = match stored {
            Some(found) => found,
            None => {
                let entry = self.chain.get_entry(height).await?;
                (entry.hash_hex(), entry.time)
            }
        };

        let mut conn = lock_conn(&self.conn)?;
        let tx = conn.transaction()?;
        unwind_above(&tx, height)?;
        tx.execute(
            "INSERT OR REPLACE INTO blocks (height, hash, time) VALUES (?1, ?2, ?3)",
            params![height, hash, time],
        )?;
        tx.execute(
            "UPDATE wallet_state SET tip_height = ?1, tip_hash = ?2 WHERE id = 1",
            params![height, hash],
        )?;
        tx.commit()?;

        debug!("Wallet store rolled back to height {}", height);
        Ok(())
    }

    async fn get_tip(&self) -> Result<ChainTip, WalletError> {
        let conn = lock_conn(&self.conn)?;
        let (height, hash): (Option<u32>, Option<String>) = conn.query_row(
            "SELECT tip_height, tip_hash FROM wallet_state WHERE id = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        match (height, hash) {
            (Some(height), Some(hash)) => Ok(ChainTip {
                height,
                hash: parse_display_hash(&hash).map_err(WalletError::Operation)?,
            }),
            _ => Err(WalletError::Operation("Wallet store has no tip yet".to_string())),
        }
    }

    async fn rescan_block(&self, entry: &BlockEntry, txs: &[Tx]) -> Result<(), WalletError> {
        if !self.apply_block(entry, txs)? {
            debug!("Replayed block {} already applied", entry.height);
        }
        Ok(())
    }

    async fn connect_block(&self, entry: &BlockEntry, txs: &[Tx]) -> Result<(), WalletError> {
        if self.is_rescanning() {
            debug!("Ignoring connected block {} while rescanning", entry.height);
            return Ok(());
        }

        // Held by a rescan from before `rescanning` is raised until completion
        let Some(_lock) = self.tx_lock.try_lock() else {
            debug!("Ignoring connected block {} while the transaction lock is held", entry.height);
            return Ok(());
        };

        if let Some(tip) = self.tip_height()? {
            if entry.height > tip.saturating_add(1) {
                warn!("Connected block {} skips heights after wallet tip {}", entry.height, tip);
            }
        }

        self.apply_block(entry, txs)?;
        Ok(())
    }

    fn set_rescanning(&self, rescanning: bool) {
        self.rescanning.store(rescanning, Ordering::SeqCst);
    }

    fn is_rescanning(&self) -> bool {
        self.rescanning.load(Ordering::SeqCst)
    }

    fn tx_lock(&self) -> &TxLock {
        &self.tx_lock
    }

    fn report_error(&self, error: &WalletError) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        log::error!("Wallet database error: {}", error);
    }
}

/// Balance handle for one wallet in the sqlite store
pub struct SqliteWallet {
    id: String,
    conn: Arc<Mutex<Connection>>,
}

#[async_trait]
impl BalanceAccessor for SqliteWallet {
    fn id(&self) -> &str {
        &self.id
    }

    async fn get_balance(&self) -> Result<BalanceSnapshot, WalletError> {
        let conn = lock_conn(&self.conn)?;
        read_balance(&conn, &self.id)
    }
}
