use log::debug;
use std::sync::Arc;

use crate::chain::ChainClient;
use crate::error::{MonitorError, RescanError};
use crate::logging::{ErrorLogger, LogContext, MetricsLogger};
use crate::models::{BlockEntry, Tx};
use crate::monitor::{
    BalanceReportEmitter, EmitSummary, MonthBoundaryTracker, MonthState, ReplayTrigger, RescanGuard,
    RescanHeight, TimeAdjuster, TrackedWallet,
};
use crate::sink::ReportSink;
use crate::wallet::WalletDatabase;

/// Startup settings for the router
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub wallet_ids: Vec<String>,
    pub log_destination: String,
    pub timezone_offset_hours: i32,
    /// Raw rescan height, validated when the rescan starts
    pub rescan_height: Option<String>,
}

/// Coordinates the live and replay block paths.
///
/// Owns the rescan state and the month state; every block is handled to
/// completion before the next one is accepted.
pub struct BlockEventRouter {
    wallet_db: Arc<dyn WalletDatabase>,
    guard: RescanGuard,
    tracker: MonthBoundaryTracker,
    emitter: BalanceReportEmitter,
    adjuster: TimeAdjuster,
    config: RouterConfig,
    wallets: Vec<TrackedWallet>,
}

impl BlockEventRouter {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        wallet_db: Arc<dyn WalletDatabase>,
        sink: Arc<dyn ReportSink>,
        config: RouterConfig,
    ) -> Self {
        let adjuster = TimeAdjuster::new(config.timezone_offset_hours);

        Self {
            guard: RescanGuard::new(chain, Arc::clone(&wallet_db)),
            wallet_db,
            tracker: MonthBoundaryTracker::new(),
            emitter: BalanceReportEmitter::new(sink, adjuster),
            adjuster,
            config,
            wallets: Vec::new(),
        }
    }

    /// One-time setup: writes the startup row, resolves the tracked wallets and
    /// starts the configured rescan.
    ///
    /// Only a wallet lookup failure is fatal. The returned trigger must be run
    /// alongside the event loop.
    pub async fn open(&mut self) -> Result<Option<ReplayTrigger>, MonitorError> {
        self.emitter
            .emit_startup(&self.config.log_destination, &self.config.wallet_ids)
            .await;

        self.wallets.clear();
        for id in &self.config.wallet_ids {
            let accessor = self.wallet_db.get(id).await?;
            self.wallets.push(TrackedWallet::new(accessor));
        }

        let Some(raw_height) = self.config.rescan_height.clone() else {
            return Ok(None);
        };

        match self.start_rescan(raw_height.as_str()).await {
            Ok(trigger) => Ok(Some(trigger)),
            Err(e) => {
                let context = LogContext::new("monthly-balance", "open")
                    .with_metadata("rescan_height", serde_json::json!(raw_height));
                ErrorLogger::log_error(&MonitorError::Rescan(e), Some(context));
                Ok(None)
            }
        }
    }

    pub async fn start_rescan<H>(&mut self, height: H) -> Result<ReplayTrigger, RescanError>
    where
        H: TryInto<RescanHeight, Error = RescanError>,
    {
        self.guard.start(height).await
    }

    /// Live block connected. Dropped while a rescan is active, since the same
    /// height will arrive on the replay path.
    pub async fn on_live_block(&mut self, entry: &BlockEntry) -> Option<EmitSummary> {
        if self.guard.is_active() {
            debug!("Rescan active, leaving live block {} to the replay path", entry.height);
            return None;
        }
        self.check_block(entry, false).await
    }

    /// Replayed block: the wallet database applies it first, then the month check runs
    /// whether or not that succeeded.
    pub async fn on_replay_block(&mut self, entry: &BlockEntry, txs: &[Tx]) -> Option<EmitSummary> {
        if let Err(e) = self.wallet_db.rescan_block(entry, txs).await {
            LogContext::new("monthly-balance", "replay_block")
                .with_height(entry.height)
                .error(&format!("Wallet database failed to process replayed block: {}", e));
            self.wallet_db.report_error(&e);
        }
        self.check_block(entry, true).await
    }

    async fn check_block(&mut self, entry: &BlockEntry, replay: bool) -> Option<EmitSummary> {
        let initialized = self.tracker.is_initialized();
        let crossed = self.tracker.classify(entry.time, &self.adjuster);

        if initialized {
            MetricsLogger::log_block_scanned(entry.height, &self.adjuster.format_unix(entry.time), replay);
        }

        let summary = if crossed {
            Some(self.emitter.emit(entry, &self.wallets).await)
        } else {
            None
        };

        self.guard.check_completion(entry);
        summary
    }

    pub fn is_rescanning(&self) -> bool {
        self.guard.is_active()
    }

    pub fn rescan_target(&self) -> Option<u32> {
        self.guard.target_height()
    }

    pub fn month_state(&self) -> MonthState {
        self.tracker.state()
    }

    pub fn wallets(&self) -> &[TrackedWallet] {
        &self.wallets
    }
}
