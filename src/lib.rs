pub mod chain;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod retry;
pub mod sink;
pub mod wallet;

pub use chain::{block_source, BlockSource, BlockSourceConfig, ChainClient, NodeChainClient, RpcClient};
pub use config::{AppConfig, LoggingConfig, NodeConfig, ReportConfig, SinkKind, WalletConfig};
pub use error::{ChainError, MonitorError, RescanError, Result, SinkError, WalletError};
pub use logging::{ErrorLogger, LogContext, MetricsLogger, PerformanceMonitor};
pub use monitor::{BlockEventRouter, MonitorService, RescanGuard, RouterConfig, TimeAdjuster};
pub use retry::{RetryConfig, RetryManager};
pub use sink::{ReportSink, SheetsSink, SqliteSink};
pub use wallet::{SqliteWalletDb, WalletDatabase};
