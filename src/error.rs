use thiserror::Error;

/// Main error type for the monthly balance monitor
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Chain client error: {0}")]
    Chain(#[from] ChainError),

    #[error("Wallet database error: {0}")]
    Wallet(#[from] WalletError),

    #[error("Report sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Rescan error: {0}")]
    Rescan(#[from] RescanError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("System error: {0}")]
    System(#[from] SystemError),
}

/// Errors raised by the chain client and the node RPC transport
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("RPC method error: code={code}, message={message}")]
    Method { code: i32, message: String },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Timeout after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Block not found at height {height}")]
    BlockNotFound { height: u32 },

    #[error("Block source is not running")]
    SourceClosed,
}

/// Wallet database errors
#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Storage failure: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Wallet operation failed: {0}")]
    Operation(String),

    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("Chain lookup failed: {0}")]
    Chain(#[from] ChainError),
}

/// Errors raised while dispatching a row to the reporting sink
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Sink rejected the row: status={status}, body={body}")]
    Rejected { status: u16, body: String },

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Invalid sink response: {0}")]
    InvalidResponse(String),

    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    #[error("Storage failure: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Sink operation failed: {0}")]
    Operation(String),
}

/// Errors raised while starting or driving a historical rescan
#[derive(Error, Debug)]
pub enum RescanError {
    #[error("Invalid rescan height: {0}")]
    InvalidArgument(String),

    #[error("A rescan is already active (target height {target_height})")]
    AlreadyActive { target_height: u32 },

    #[error("Chain client failed: {0}")]
    Chain(#[from] ChainError),

    #[error("Wallet database failed: {0}")]
    Wallet(#[from] WalletError),

    #[error("Replay request failed: {0}")]
    Trigger(ChainError),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Configuration parsing failed: {0}")]
    Parsing(String),

    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
}

/// System-level errors
#[derive(Error, Debug)]
pub enum SystemError {
    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Signal received: {0}")]
    Signal(String),

    #[error("Task failed: {0}")]
    Task(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Error severity levels for logging and monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical errors that require immediate attention
    Critical,
    /// High priority errors that affect functionality
    High,
    /// Medium priority errors that may affect performance
    Medium,
    /// Low priority errors that are mostly informational
    Low,
}

/// Errors that a retry loop can classify
pub trait Retryable: std::fmt::Display {
    fn is_recoverable(&self) -> bool;
}

impl Retryable for ChainError {
    fn is_recoverable(&self) -> bool {
        match self {
            ChainError::Timeout { .. } => true,
            ChainError::Connection(_) => true,
            ChainError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Appends are not idempotent: a timeout or a 5xx may still have written the
/// row, so only failures where the request was never applied are retried.
impl Retryable for SinkError {
    fn is_recoverable(&self) -> bool {
        match self {
            SinkError::Http(e) => e.is_connect(),
            SinkError::Rejected { status, .. } => *status == 429,
            _ => false,
        }
    }
}

impl Retryable for MonitorError {
    fn is_recoverable(&self) -> bool {
        MonitorError::is_recoverable(self)
    }
}

impl MonitorError {
    /// Get the severity level of an error
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            MonitorError::Config(_) => ErrorSeverity::Critical,
            MonitorError::Wallet(WalletError::Storage(_)) => ErrorSeverity::Critical,
            MonitorError::System(SystemError::FileSystem(_)) => ErrorSeverity::Critical,

            MonitorError::Chain(ChainError::Connection(_)) => ErrorSeverity::High,
            MonitorError::Chain(ChainError::SourceClosed) => ErrorSeverity::High,
            MonitorError::Sink(SinkError::Authorization(_)) => ErrorSeverity::High,
            MonitorError::Rescan(RescanError::Trigger(_)) => ErrorSeverity::High,

            MonitorError::Chain(ChainError::Timeout { .. }) => ErrorSeverity::Medium,
            MonitorError::Sink(_) => ErrorSeverity::Medium,
            MonitorError::Wallet(_) => ErrorSeverity::Medium,

            MonitorError::Rescan(RescanError::InvalidArgument(_)) => ErrorSeverity::Low,
            MonitorError::Rescan(RescanError::AlreadyActive { .. }) => ErrorSeverity::Low,
            MonitorError::Chain(ChainError::BlockNotFound { .. }) => ErrorSeverity::Low,
            _ => ErrorSeverity::Medium,
        }
    }

    /// Check if the error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            MonitorError::Chain(e) => e.is_recoverable(),
            MonitorError::Sink(e) => e.is_recoverable(),
            MonitorError::Config(_) => false,
            MonitorError::Rescan(_) => false,
            _ => false,
        }
    }
}
