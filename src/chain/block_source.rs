use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, timeout, MissedTickBehavior};

use crate::chain::{ChainClient, RpcClient};
use crate::error::ChainError;
use crate::models::{BlockEntry, BlockEvent, ChainTip};

/// Buffered events between the source and the dispatcher
const EVENT_BUFFER: usize = 64;

pub struct BlockSourceConfig {
    pub poll_interval_seconds: u64,
    pub rescan_timeout_seconds: u64,
}

impl Default for BlockSourceConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 10,
            rescan_timeout_seconds: 600,
        }
    }
}

/// A pending request to replay blocks from `start_hash` up to the current tip
pub struct ReplayRequest {
    start_hash: String,
    done: oneshot::Sender<Result<(), ChainError>>,
}

/// Polls the node for new blocks and publishes them as `Connect` events;
/// serves replay requests by publishing historical blocks as `Rescan` events.
///
/// Live polling pauses while a replay is being served, so events stay in
/// height order on the single stream.
pub struct BlockSource {
    rpc: Arc<RpcClient>,
    events: mpsc::Sender<BlockEvent>,
    replay_requests: mpsc::Receiver<ReplayRequest>,
    config: BlockSourceConfig,
    pub shutdown_signal: Arc<AtomicBool>,
    last_delivered: Option<u32>,
}

/// Build a block source, the chain client that talks to it, and the event stream
pub fn block_source(
    rpc: RpcClient,
    config: BlockSourceConfig,
) -> (BlockSource, NodeChainClient, mpsc::Receiver<BlockEvent>) {
    let rpc = Arc::new(rpc);
    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
    let (replay_tx, replay_rx) = mpsc::channel(1);

    let client = NodeChainClient {
        rpc: Arc::clone(&rpc),
        replay_requests: replay_tx,
        rescan_timeout: Duration::from_secs(config.rescan_timeout_seconds),
    };

    let source = BlockSource {
        rpc,
        events: event_tx,
        replay_requests: replay_rx,
        config,
        shutdown_signal: Arc::new(AtomicBool::new(false)),
        last_delivered: None,
    };

    (source, client, event_rx)
}

impl BlockSource {
    /// Start publishing after `height` instead of after the current tip
    pub fn resume_after(mut self, height: u32) -> Self {
        self.last_delivered = Some(height);
        self
    }

    pub fn last_delivered(&self) -> Option<u32> {
        self.last_delivered
    }

    /// Run until shutdown is requested or the event stream is dropped
    pub async fn run(mut self) -> Result<(), ChainError> {
        info!("Starting block source with {} second polling interval", self.config.poll_interval_seconds);

        let mut ticker = interval(Duration::from_secs(self.config.poll_interval_seconds));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut replay_open = true;

        loop {
            if self.shutdown_signal.load(Ordering::Relaxed) || self.events.is_closed() {
                info!("Block source stopping");
                return Ok(());
            }

            tokio::select! {
                _ = ticker.tick() => {
                    match self.poll_new_blocks().await {
                        Ok(0) => {}
                        Ok(count) => debug!("Published {} new blocks", count),
                        Err(ChainError::SourceClosed) => return Ok(()),
                        Err(e) => warn!("Error polling for new blocks: {}", e),
                    }
                }
                request = self.replay_requests.recv(), if replay_open => {
                    match request {
                        Some(request) => self.serve_replay(request).await,
                        None => replay_open = false,
                    }
                }
            }
        }
    }

    /// Publish every block above the last delivered height, returning how many were sent
    pub async fn poll_new_blocks(&mut self) -> Result<u32, ChainError> {
        let tip = self.rpc.get_block_count().await?;

        let last = match self.last_delivered {
            Some(last) => last,
            None => {
                info!("No previous position, following the chain from tip {}", tip);
                self.last_delivered = Some(tip);
                return Ok(0);
            }
        };

        let mut published = 0;
        for height in last.saturating_add(1)..=tip {
            let (entry, txs) = self.rpc.get_block_at(height).await?;
            self.events
                .send(BlockEvent::Connect { entry, txs })
                .await
                .map_err(|_| ChainError::SourceClosed)?;
            self.last_delivered = Some(height);
            published += 1;
        }

        Ok(published)
    }

    async fn serve_replay(&mut self, request: ReplayRequest) {
        let result = self.replay_from(&request.start_hash).await;
        if let Err(e) = &result {
            warn!("Replay from {} failed: {}", request.start_hash, e);
        }
        // The requester may have stopped waiting; that is not an error here.
        let _ = request.done.send(result);
    }

    async fn replay_from(&mut self, start_hash: &str) -> Result<(), ChainError> {
        let start = self.rpc.get_block_header(start_hash).await?.height;
        let tip = self.rpc.get_block_count().await?;
        info!("Replaying blocks {} through {}", start, tip);

        for height in start..=tip {
            let (entry, txs) = self.rpc.get_block_at(height).await?;
            self.events
                .send(BlockEvent::Rescan { entry, txs })
                .await
                .map_err(|_| ChainError::SourceClosed)?;
        }

        self.last_delivered = Some(self.last_delivered.map_or(tip, |last| last.max(tip)));
        Ok(())
    }
}

/// Chain client backed by the node RPC connection and a running `BlockSource`
#[derive(Clone)]
pub struct NodeChainClient {
    rpc: Arc<RpcClient>,
    replay_requests: mpsc::Sender<ReplayRequest>,
    rescan_timeout: Duration,
}

#[async_trait]
impl ChainClient for NodeChainClient {
    async fn get_tip(&self) -> Result<ChainTip, ChainError> {
        self.rpc.get_tip().await
    }

    async fn get_entry(&self, height: u32) -> Result<BlockEntry, ChainError> {
        self.rpc.get_entry(height).await
    }

    /// Resolves once every replayed block has been handed to the event stream,
    /// or fails with `Timeout` if that takes longer than the rescan timeout.
    async fn rescan(&self, start_hash: &str) -> Result<(), ChainError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.replay_requests
            .send(ReplayRequest { start_hash: start_hash.to_string(), done: done_tx })
            .await
            .map_err(|_| ChainError::SourceClosed)?;

        match timeout(self.rescan_timeout, done_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ChainError::SourceClosed),
            Err(_) => Err(ChainError::Timeout { seconds: self.rescan_timeout.as_secs() }),
        }
    }
}
