use log::{debug, error, warn};
use std::sync::Arc;

use crate::chain::ChainClient;
use crate::error::{ChainError, RescanError};
use crate::models::BlockEntry;
use crate::wallet::{LockHandle, WalletDatabase};

/// A validated rescan start height
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RescanHeight(u32);

impl RescanHeight {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for RescanHeight {
    type Error = RescanError;

    fn try_from(height: u32) -> Result<Self, Self::Error> {
        Ok(RescanHeight(height))
    }
}

impl TryFrom<i64> for RescanHeight {
    type Error = RescanError;

    fn try_from(height: i64) -> Result<Self, Self::Error> {
        u32::try_from(height)
            .map(RescanHeight)
            .map_err(|_| RescanError::InvalidArgument(format!("{} is not a 32-bit unsigned height", height)))
    }
}

impl TryFrom<f64> for RescanHeight {
    type Error = RescanError;

    fn try_from(height: f64) -> Result<Self, Self::Error> {
        if height.fract() != 0.0 || height < 0.0 || height > f64::from(u32::MAX) {
            return Err(RescanError::InvalidArgument(format!("{} is not a 32-bit unsigned height", height)));
        }
        Ok(RescanHeight(height as u32))
    }
}

impl TryFrom<&str> for RescanHeight {
    type Error = RescanError;

    fn try_from(height: &str) -> Result<Self, Self::Error> {
        height
            .trim()
            .parse::<u32>()
            .map(RescanHeight)
            .map_err(|_| RescanError::InvalidArgument(format!("{:?} is not a 32-bit unsigned height", height)))
    }
}

/// Whether a historical rescan currently owns the wallet database
#[derive(Debug, Default)]
pub enum RescanState {
    #[default]
    Idle,
    Active { target_height: u32, lock: LockHandle },
}

/// The replay request issued at the end of `RescanGuard::start`.
///
/// Replayed blocks come back through the same event stream the router is
/// reading, so the request must run concurrently with the router.
pub struct ReplayTrigger {
    chain: Arc<dyn ChainClient>,
    start_hash: String,
}

impl ReplayTrigger {
    pub fn start_hash(&self) -> &str {
        &self.start_hash
    }

    /// Request the replay. A timeout is expected for long replays and is not an error;
    /// the rescan stays active either way and completes on the target block.
    pub async fn run(self) -> Result<(), RescanError> {
        match self.chain.rescan(&self.start_hash).await {
            Ok(()) => {
                debug!("Replay request from {} completed", self.start_hash);
                Ok(())
            }
            Err(e @ ChainError::Timeout { .. }) => {
                warn!("Expected timeout error caught: {}", e);
                Ok(())
            }
            Err(e) => {
                error!("Replay request from {} failed: {}", self.start_hash, e);
                Err(RescanError::Trigger(e))
            }
        }
    }
}

/// Serializes historical replay against the live block path
pub struct RescanGuard {
    chain: Arc<dyn ChainClient>,
    wallet_db: Arc<dyn WalletDatabase>,
    state: RescanState,
}

impl RescanGuard {
    pub fn new(chain: Arc<dyn ChainClient>, wallet_db: Arc<dyn WalletDatabase>) -> Self {
        Self {
            chain,
            wallet_db,
            state: RescanState::Idle,
        }
    }

    pub fn state(&self) -> &RescanState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, RescanState::Active { .. })
    }

    pub fn target_height(&self) -> Option<u32> {
        match &self.state {
            RescanState::Active { target_height, .. } => Some(*target_height),
            RescanState::Idle => None,
        }
    }

    /// Roll the wallet database back to `height` and prepare a replay up to the current tip.
    ///
    /// The database lock is held from here until `check_completion` sees the tip block.
    /// Validation and tip lookup failures leave the state untouched.
    pub async fn start<H>(&mut self, height: H) -> Result<ReplayTrigger, RescanError>
    where
        H: TryInto<RescanHeight, Error = RescanError>,
    {
        let height = height.try_into()?.get();

        if let Some(target_height) = self.target_height() {
            return Err(RescanError::AlreadyActive { target_height });
        }

        let target_height = self.chain.get_tip().await?.height;
        if height > target_height {
            return Err(RescanError::InvalidArgument(format!(
                "{} is above the chain tip {}",
                height, target_height
            )));
        }

        let lock = self.wallet_db.tx_lock().lock().await;
        self.wallet_db.set_rescanning(true);
        self.state = RescanState::Active { target_height, lock };

        warn!("Rolling back WalletDB to height {}.", height);
        if let Err(e) = self.wallet_db.rollback(height).await {
            self.abort();
            return Err(e.into());
        }

        warn!("Initiating rescan.");
        let tip = match self.wallet_db.get_tip().await {
            Ok(tip) => tip,
            Err(e) => {
                self.abort();
                return Err(e.into());
            }
        };

        Ok(ReplayTrigger {
            chain: Arc::clone(&self.chain),
            start_hash: tip.hash_hex(),
        })
    }

    /// Finish the rescan when `entry` is the target block. Returns true if this call released the lock.
    pub fn check_completion(&mut self, entry: &BlockEntry) -> bool {
        match &self.state {
            RescanState::Active { target_height, .. } if *target_height == entry.height => {}
            _ => return false,
        }

        if let RescanState::Active { lock, .. } = std::mem::take(&mut self.state) {
            warn!("Target rescan block {} reached.", entry.height);
            self.wallet_db.set_rescanning(false);
            lock.release();
        }
        true
    }

    fn abort(&mut self) {
        if let RescanState::Active { lock, .. } = std::mem::take(&mut self.state) {
            self.wallet_db.set_rescanning(false);
            lock.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WalletError;
    use crate::models::{BalanceSnapshot, ChainTip, Tx};
    use crate::wallet::{BalanceAccessor, TxLock};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct TestChain {
        tip: u32,
        rescan_result: Mutex<Option<ChainError>>,
        rescans: Mutex<Vec<String>>,
    }

    impl TestChain {
        fn new(tip: u32) -> Self {
            Self { tip, rescan_result: Mutex::new(None), rescans: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl ChainClient for TestChain {
        async fn get_tip(&self) -> Result<ChainTip, ChainError> {
            Ok(ChainTip { height: self.tip, hash: [0xab; 32] })
        }

        async fn get_entry(&self, height: u32) -> Result<BlockEntry, ChainError> {
            Ok(BlockEntry::new(height, 0, [0; 32]))
        }

        async fn rescan(&self, start_hash: &str) -> Result<(), ChainError> {
            self.rescans.lock().unwrap().push(start_hash.to_string());
            match self.rescan_result.lock().unwrap().take() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }

    #[derive(Default)]
    struct TestWalletDb {
        lock: TxLock,
        rescanning: AtomicBool,
        rolled_back_to: Mutex<Option<u32>>,
        fail_rollback: bool,
    }

    #[async_trait]
    impl WalletDatabase for TestWalletDb {
        async fn get(&self, wallet_id: &str) -> Result<Arc<dyn BalanceAccessor>, WalletError> {
            Err(WalletError::WalletNotFound(wallet_id.to_string()))
        }

        async fn rollback(&self, height: u32) -> Result<(), WalletError> {
            if self.fail_rollback {
                return Err(WalletError::Operation("disk full".to_string()));
            }
            *self.rolled_back_to.lock().unwrap() = Some(height);
            Ok(())
        }

        async fn get_tip(&self) -> Result<ChainTip, WalletError> {
            let height = self.rolled_back_to.lock().unwrap().unwrap_or(0);
            let mut hash = [0u8; 32];
            hash[0] = 0x01;
            hash[31] = 0xff;
            Ok(ChainTip { height, hash })
        }

        async fn rescan_block(&self, _entry: &BlockEntry, _txs: &[Tx]) -> Result<(), WalletError> {
            Ok(())
        }

        async fn connect_block(&self, _entry: &BlockEntry, _txs: &[Tx]) -> Result<(), WalletError> {
            Ok(())
        }

        fn set_rescanning(&self, rescanning: bool) {
            self.rescanning.store(rescanning, Ordering::SeqCst);
        }

        fn is_rescanning(&self) -> bool {
            self.rescanning.load(Ordering::SeqCst)
        }

        fn tx_lock(&self) -> &TxLock {
            &self.lock
        }
    }

    fn guard_with(chain: TestChain, db: TestWalletDb) -> (RescanGuard, Arc<TestChain>, Arc<TestWalletDb>) {
        let chain = Arc::new(chain);
        let db = Arc::new(db);
        let guard = RescanGuard::new(chain.clone(), db.clone());
        (guard, chain, db)
    }

    #[test]
    fn test_height_validation() {
        assert_eq!(RescanHeight::try_from(5000i64).unwrap().get(), 5000);
        assert_eq!(RescanHeight::try_from(12.0f64).unwrap().get(), 12);
        assert_eq!(RescanHeight::try_from(" 42 ").unwrap().get(), 42);

        assert!(matches!(RescanHeight::try_from(-1i64), Err(RescanError::InvalidArgument(_))));
        assert!(matches!(RescanHeight::try_from(1.5f64), Err(RescanError::InvalidArgument(_))));
        assert!(matches!(RescanHeight::try_from(f64::NAN), Err(RescanError::InvalidArgument(_))));
        assert!(matches!(RescanHeight::try_from(4_294_967_296i64), Err(RescanError::InvalidArgument(_))));
        assert!(matches!(RescanHeight::try_from("abc"), Err(RescanError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_start_locks_and_rolls_back() {
        let (mut guard, chain, db) = guard_with(TestChain::new(5000), TestWalletDb::default());

        let trigger = guard.start(4000u32).await.unwrap();

        assert!(guard.is_active());
        assert_eq!(guard.target_height(), Some(5000));
        assert!(db.tx_lock().is_locked());
        assert!(db.is_rescanning());
        assert_eq!(*db.rolled_back_to.lock().unwrap(), Some(4000));
        assert!(trigger.start_hash().starts_with("ff"));
        assert!(trigger.start_hash().ends_with("01"));

        trigger.run().await.unwrap();
        assert_eq!(chain.rescans.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_completion_releases_once() {
        let (mut guard, _chain, db) = guard_with(TestChain::new(5000), TestWalletDb::default());
        guard.start(4998u32).await.unwrap();

        assert!(!guard.check_completion(&BlockEntry::new(4999, 0, [0; 32])));
        assert!(guard.is_active());

        assert!(guard.check_completion(&BlockEntry::new(5000, 0, [0; 32])));
        assert!(!guard.is_active());
        assert!(!db.tx_lock().is_locked());
        assert!(!db.is_rescanning());

        assert!(!guard.check_completion(&BlockEntry::new(5000, 0, [0; 32])));
        assert!(!guard.check_completion(&BlockEntry::new(5001, 0, [0; 32])));
        assert!(!db.tx_lock().is_locked());
    }

    #[tokio::test]
    async fn test_invalid_heights_leave_state_untouched() {
        let (mut guard, _chain, db) = guard_with(TestChain::new(5000), TestWalletDb::default());

        assert!(matches!(guard.start(-1i64).await, Err(RescanError::InvalidArgument(_))));
        assert!(matches!(guard.start(1.5f64).await, Err(RescanError::InvalidArgument(_))));
        assert!(matches!(guard.start(6000u32).await, Err(RescanError::InvalidArgument(_))));

        assert!(!guard.is_active());
        assert!(!db.tx_lock().is_locked());
        assert_eq!(*db.rolled_back_to.lock().unwrap(), None);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let (mut guard, _chain, _db) = guard_with(TestChain::new(5000), TestWalletDb::default());
        guard.start(10u32).await.unwrap();

        let result = guard.start(20u32).await;
        assert!(matches!(result, Err(RescanError::AlreadyActive { target_height: 5000 })));
    }

    #[tokio::test]
    async fn test_failed_rollback_releases_lock() {
        let db = TestWalletDb { fail_rollback: true, ..Default::default() };
        let (mut guard, _chain, db) = guard_with(TestChain::new(5000), db);

        let result = guard.start(10u32).await;
        assert!(matches!(result, Err(RescanError::Wallet(_))));
        assert!(!guard.is_active());
        assert!(!db.tx_lock().is_locked());
        assert!(!db.is_rescanning());
    }

    #[tokio::test]
    async fn test_trigger_timeout_is_swallowed() {
        let chain = TestChain::new(5000);
        *chain.rescan_result.lock().unwrap() = Some(ChainError::Timeout { seconds: 600 });
        let (mut guard, _chain, _db) = guard_with(chain, TestWalletDb::default());

        let trigger = guard.start(10u32).await.unwrap();
        assert!(trigger.run().await.is_ok());
        assert!(guard.is_active());
    }

    #[tokio::test]
    async fn test_trigger_failure_keeps_rescan_active() {
        let chain = TestChain::new(5000);
        *chain.rescan_result.lock().unwrap() = Some(ChainError::Connection("refused".to_string()));
        let (mut guard, _chain, db) = guard_with(chain, TestWalletDb::default());

        let trigger = guard.start(10u32).await.unwrap();
        assert!(matches!(trigger.run().await, Err(RescanError::Trigger(ChainError::Connection(_)))));
        assert!(guard.is_active());
        assert!(db.tx_lock().is_locked());
    }
}
