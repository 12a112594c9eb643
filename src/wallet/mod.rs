//! Wallet database interface and the sqlite-backed watch-only store.

pub mod lock;
pub mod schema;
pub mod database;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::WalletError;
use crate::models::{BalanceSnapshot, BlockEntry, ChainTip, Tx};

pub use lock::{LockHandle, TxLock};
pub use database::{SqliteWallet, SqliteWalletDb};

/// Per-wallet capability to read the current balance
#[async_trait]
pub trait BalanceAccessor: Send + Sync {
    fn id(&self) -> &str;

    async fn get_balance(&self) -> Result<BalanceSnapshot, WalletError>;
}

/// The wallet database the monitor drives during rescans
#[async_trait]
pub trait WalletDatabase: Send + Sync {
    async fn get(&self, wallet_id: &str) -> Result<Arc<dyn BalanceAccessor>, WalletError>;

    /// Discard all wallet state above `height` and make that block the tip
    async fn rollback(&self, height: u32) -> Result<(), WalletError>;

    async fn get_tip(&self) -> Result<ChainTip, WalletError>;

    /// Apply a block delivered on the replay path
    async fn rescan_block(&self, entry: &BlockEntry, txs: &[Tx]) -> Result<(), WalletError>;

    /// Apply a block delivered on the live path (the database's own connect handler)
    async fn connect_block(&self, entry: &BlockEntry, txs: &[Tx]) -> Result<(), WalletError>;

    fn set_rescanning(&self, rescanning: bool);

    fn is_rescanning(&self) -> bool;

    /// Held by a rescan for its whole duration. Live connects skip blocks
    /// while it is taken.
    fn tx_lock(&self) -> &TxLock;

    /// The database's own error channel
    fn report_error(&self, error: &WalletError) {
        log::error!("Wallet database error: {}", error);
    }
}
