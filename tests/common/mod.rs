#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use monthly_balance_monitor::chain::ChainClient;
use monthly_balance_monitor::error::{ChainError, SinkError, WalletError};
use monthly_balance_monitor::models::{BalanceSnapshot, BlockEntry, CellValue, ChainTip, Tx};
use monthly_balance_monitor::sink::ReportSink;
use monthly_balance_monitor::wallet::{BalanceAccessor, TxLock, WalletDatabase};

pub fn unix(y: i32, m: u32, d: u32, h: u32) -> u32 {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap().timestamp() as u32
}

pub fn block(height: u32, time: u32) -> BlockEntry {
    let mut hash = [0u8; 32];
    hash[..4].copy_from_slice(&height.to_le_bytes());
    BlockEntry::new(height, time, hash)
}

pub struct MockChain {
    pub tip: AtomicU32,
    pub rescan_error: Mutex<Option<ChainError>>,
    pub rescan_requests: Mutex<Vec<String>>,
}

impl MockChain {
    pub fn new(tip: u32) -> Arc<Self> {
        Arc::new(Self {
            tip: AtomicU32::new(tip),
            rescan_error: Mutex::new(None),
            rescan_requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn get_tip(&self) -> Result<ChainTip, ChainError> {
        let height = self.tip.load(Ordering::SeqCst);
        Ok(ChainTip { height, hash: block(height, 0).hash })
    }

    async fn get_entry(&self, height: u32) -> Result<BlockEntry, ChainError> {
        Ok(block(height, 0))
    }

    async fn rescan(&self, start_hash: &str) -> Result<(), ChainError> {
        self.rescan_requests.lock().unwrap().push(start_hash.to_string());
        match self.rescan_error.lock().unwrap().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

pub struct MockWallet {
    pub id: String,
    pub balance: Mutex<BalanceSnapshot>,
}

#[async_trait]
impl BalanceAccessor for MockWallet {
    fn id(&self) -> &str {
        &self.id
    }

    async fn get_balance(&self) -> Result<BalanceSnapshot, WalletError> {
        Ok(*self.balance.lock().unwrap())
    }
}

/// Wallet database double that records how the monitor drives it
#[derive(Default)]
pub struct MockWalletDb {
    pub lock: TxLock,
    pub rescanning: AtomicBool,
    pub rescanning_changes: Mutex<Vec<bool>>,
    pub wallets: Mutex<HashMap<String, Arc<MockWallet>>>,
    pub rollbacks: Mutex<Vec<u32>>,
    pub replayed: Mutex<Vec<u32>>,
    pub connected: Mutex<Vec<u32>>,
    pub failing_replays: Mutex<HashSet<u32>>,
    pub reported_errors: Mutex<Vec<String>>,
}

impl MockWalletDb {
    pub fn with_wallets(wallets: &[(&str, BalanceSnapshot)]) -> Arc<Self> {
        let db = Self::default();
        {
            let mut map = db.wallets.lock().unwrap();
            for (id, balance) in wallets {
                map.insert(
                    id.to_string(),
                    Arc::new(MockWallet { id: id.to_string(), balance: Mutex::new(*balance) }),
                );
            }
        }
        Arc::new(db)
    }

    pub fn releases(&self) -> usize {
        self.rescanning_changes.lock().unwrap().iter().filter(|v| !**v).count()
    }
}

#[async_trait]
impl WalletDatabase for MockWalletDb {
    async fn get(&self, wallet_id: &str) -> Result<Arc<dyn BalanceAccessor>, WalletError> {
        match self.wallets.lock().unwrap().get(wallet_id) {
            Some(wallet) => Ok(wallet.clone()),
            None => Err(WalletError::WalletNotFound(wallet_id.to_string())),
        }
    }

    async fn rollback(&self, height: u32) -> Result<(), WalletError> {
        self.rollbacks.lock().unwrap().push(height);
        Ok(())
    }

    async fn get_tip(&self) -> Result<ChainTip, WalletError> {
        let height = self.rollbacks.lock().unwrap().last().copied().unwrap_or(0);
        Ok(ChainTip { height, hash: block(height, 0).hash })
    }

    async fn rescan_block(&self, entry: &BlockEntry, _txs: &[Tx]) -> Result<(), WalletError> {
        if self.failing_replays.lock().unwrap().contains(&entry.height) {
            return Err(WalletError::Operation(format!("cannot apply block {}", entry.height)));
        }
        self.replayed.lock().unwrap().push(entry.height);
        Ok(())
    }

    async fn connect_block(&self, entry: &BlockEntry, _txs: &[Tx]) -> Result<(), WalletError> {
        if !self.is_rescanning() {
            self.connected.lock().unwrap().push(entry.height);
        }
        Ok(())
    }

    fn set_rescanning(&self, rescanning: bool) {
        self.rescanning.store(rescanning, Ordering::SeqCst);
        self.rescanning_changes.lock().unwrap().push(rescanning);
    }

    fn is_rescanning(&self) -> bool {
        self.rescanning.load(Ordering::SeqCst)
    }

    fn tx_lock(&self) -> &TxLock {
        &self.lock
    }

    fn report_error(&self, error: &WalletError) {
        self.reported_errors.lock().unwrap().push(error.to_string());
    }
}

/// Sink double: records rows and fails for selected destinations
#[derive(Default)]
pub struct MockSink {
    pub rows: Mutex<Vec<(String, Vec<CellValue>)>>,
    pub failing: Mutex<HashSet<String>>,
}

impl MockSink {
    pub fn rows_for(&self, destination: &str) -> Vec<Vec<CellValue>> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .filter(|(dest, _)| dest == destination)
            .map(|(_, row)| row.clone())
            .collect()
    }
}

#[async_trait]
impl ReportSink for MockSink {
    async fn append_row(&self, destination: &str, row: &[CellValue]) -> Result<String, SinkError> {
        if self.failing.lock().unwrap().contains(destination) {
            return Err(SinkError::Authorization("token expired".to_string()));
        }
        let mut rows = self.rows.lock().unwrap();
        rows.push((destination.to_string(), row.to_vec()));
        Ok(format!("Updated spreadsheet range: {}!A{}:E{}", destination, rows.len(), rows.len()))
    }
}
