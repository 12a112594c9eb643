pub mod client;
pub mod rpc_client;
pub mod block_source;

pub use client::ChainClient;
pub use rpc_client::{RpcClient, BlockHeader};
pub use block_source::{block_source, BlockSource, BlockSourceConfig, NodeChainClient, ReplayRequest};
