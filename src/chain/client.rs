//! Chain client interface consumed by the monitor core.

use async_trait::async_trait;

use crate::error::ChainError;
use crate::models::{BlockEntry, ChainTip};

/// The node-facing half of the wallet client.
///
/// Block events themselves are delivered through the event stream published by
/// the block source; this trait covers the request/response calls.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current chain tip as known by the node
    async fn get_tip(&self) -> Result<ChainTip, ChainError>;

    /// Block entry at the given height on the active chain
    async fn get_entry(&self, height: u32) -> Result<BlockEntry, ChainError>;

    /// Ask the node to replay blocks starting at `start_hash` (display hex).
    ///
    /// Replayed blocks arrive as rescan events. The call may return
    /// `ChainError::Timeout` while the replay is still running.
    async fn rescan(&self, start_hash: &str) -> Result<(), ChainError>;
}
