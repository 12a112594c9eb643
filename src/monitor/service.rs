use log::{error, info};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{MonitorError, RescanError};
use crate::models::BlockEvent;
use crate::monitor::{BlockEventRouter, EmitSummary};
use crate::wallet::WalletDatabase;

/// Counters for a finished service run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServiceStats {
    pub live_blocks: u64,
    pub replay_blocks: u64,
    pub reports_sent: u64,
    pub reports_failed: u64,
}

impl ServiceStats {
    fn record(&mut self, summary: Option<EmitSummary>) {
        if let Some(summary) = summary {
            self.reports_sent += summary.reported.len() as u64;
            self.reports_failed += summary.failed.len() as u64;
        }
    }
}

/// Feeds the block event stream into the router, one event at a time.
///
/// `Connect` events go to the wallet database's own connect handler and then
/// to the router's live path; `Rescan` events go to the replay path.
pub struct MonitorService {
    router: BlockEventRouter,
    wallet_db: Arc<dyn WalletDatabase>,
    events: mpsc::Receiver<BlockEvent>,
    stats: ServiceStats,
}

impl MonitorService {
    pub fn new(
        router: BlockEventRouter,
        wallet_db: Arc<dyn WalletDatabase>,
        events: mpsc::Receiver<BlockEvent>,
    ) -> Self {
        Self {
            router,
            wallet_db,
            events,
            stats: ServiceStats::default(),
        }
    }

    pub fn router(&self) -> &BlockEventRouter {
        &self.router
    }

    pub fn stats(&self) -> ServiceStats {
        self.stats
    }

    /// Open the router, then process events until the stream closes
    pub async fn run(mut self) -> Result<ServiceStats, MonitorError> {
        let replay = self.open().await?;

        while let Some(event) = self.events.recv().await {
            self.handle_event(event).await;
        }

        info!(
            "Block event stream closed after {} live and {} replayed blocks",
            self.stats.live_blocks, self.stats.replay_blocks
        );

        if let Some(handle) = replay {
            handle.abort();
        }

        Ok(self.stats)
    }

    /// Open the router and spawn the replay request, if a rescan was started
    pub async fn open(&mut self) -> Result<Option<JoinHandle<Result<(), RescanError>>>, MonitorError> {
        let trigger = self.router.open().await?;
        info!("Monitoring {} wallets", self.router.wallets().len());

        Ok(trigger.map(|trigger| {
            tokio::spawn(async move {
                let result = trigger.run().await;
                if let Err(e) = &result {
                    error!("Rescan stays active until its target block arrives: {}", e);
                }
                result
            })
        }))
    }

    pub async fn handle_event(&mut self, event: BlockEvent) {
        match event {
            BlockEvent::Connect { entry, txs } => {
                self.stats.live_blocks += 1;
                if let Err(e) = self.wallet_db.connect_block(&entry, &txs).await {
                    self.wallet_db.report_error(&e);
                }
                let summary = self.router.on_live_block(&entry).await;
                self.stats.record(summary);
            }
            BlockEvent::Rescan { entry, txs } => {
                self.stats.replay_blocks += 1;
                let summary = self.router.on_replay_block(&entry, &txs).await;
                self.stats.record(summary);
            }
        }
    }
}
