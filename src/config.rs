use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::Path;
use crate::error::ConfigError;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub node: NodeConfig,
    pub wallet: WalletConfig,
    pub report: ReportConfig,
    pub logging: LoggingConfig,
    /// Height to roll the wallet back to on startup. Kept raw so a malformed
    /// value is rejected by the rescan guard rather than at parse time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rescan_height: Option<String>,
}

/// Node RPC configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// JSON-RPC endpoint URL
    pub endpoint: String,
    /// RPC basic-auth user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_user: Option<String>,
    /// RPC basic-auth password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_password: Option<String>,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// Maximum number of attempts per RPC call
    pub max_retries: u32,
    /// Initial retry delay in seconds
    pub retry_delay_seconds: u64,
    /// Maximum retry delay in seconds
    pub max_retry_delay_seconds: u64,
    /// Tip polling interval in seconds
    pub poll_interval_seconds: u64,
    /// How long a rescan request waits for the replay to finish
    pub rescan_timeout_seconds: u64,
}

/// Wallet database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// SQLite database file path
    pub database_path: String,
    /// Wallets whose balances are reported
    #[serde(default)]
    pub tracked: Vec<TrackedWalletConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackedWalletConfig {
    pub id: String,
    #[serde(default)]
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Sheets,
    Sqlite,
}

/// Report emission configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    pub sink: SinkKind,
    /// Whole-hour offset applied to block times before month detection
    pub timezone_offset_hours: i32,
    /// Destination receiving the startup row
    pub log_destination: String,
    pub sheets: SheetsConfig,
    pub sqlite: SqliteSinkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetsConfig {
    pub spreadsheet_id: String,
    pub api_base_url: String,
    /// Service-account key file; takes precedence over `token_file`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_file: Option<String>,
    /// File holding an OAuth access token, re-read before every append
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_file: Option<String>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteSinkConfig {
    pub path: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8332/".to_string(),
            rpc_user: None,
            rpc_password: None,
            timeout_seconds: 30,
            max_retries: 5,
            retry_delay_seconds: 2,
            max_retry_delay_seconds: 60,
            poll_interval_seconds: 10,
            rescan_timeout_seconds: 600,
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            database_path: "./wallet.db".to_string(),
            tracked: vec![TrackedWalletConfig {
                id: "primary".to_string(),
                addresses: Vec::new(),
            }],
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            sink: SinkKind::Sqlite,
            timezone_offset_hours: 0,
            log_destination: "log".to_string(),
            sheets: SheetsConfig::default(),
            sqlite: SqliteSinkConfig::default(),
        }
    }
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: String::new(),
            api_base_url: "https://sheets.googleapis.com/v4".to_string(),
            credentials_file: None,
            token_file: None,
            timeout_seconds: 30,
        }
    }
}

impl Default for SqliteSinkConfig {
    fn default() -> Self {
        Self {
            path: "./reports.db".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

impl AppConfig {
    /// Load configuration from file and environment variables
    /// Environment variables take precedence over file values
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());
        Self::load_from(&config_path)
    }

    /// Load from an explicit path, then apply environment overrides and validate
    pub fn load_from(config_path: &str) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(config_path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults when it is absent
    pub fn load_from_file(config_path: &str) -> Result<Self, ConfigError> {
        if !Path::new(config_path).exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path)
            .map_err(|_| ConfigError::FileNotFound(config_path.to_string()))?;
        toml::from_str(&content)
            .map_err(|e| ConfigError::Parsing(e.to_string()))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(endpoint) = env::var("NODE_RPC_URL") {
            self.node.endpoint = endpoint;
        }
        if let Ok(user) = env::var("NODE_RPC_USER") {
            self.node.rpc_user = Some(user);
        }
        if let Ok(password) = env::var("NODE_RPC_PASSWORD") {
            self.node.rpc_password = Some(password);
        }
        if let Ok(timeout) = env::var("NODE_RPC_TIMEOUT_SECONDS") {
            self.node.timeout_seconds = parse_env("NODE_RPC_TIMEOUT_SECONDS", timeout)?;
        }
        if let Ok(interval) = env::var("BLOCK_POLL_INTERVAL") {
            self.node.poll_interval_seconds = parse_env("BLOCK_POLL_INTERVAL", interval)?;
        }
        if let Ok(timeout) = env::var("RESCAN_TIMEOUT_SECONDS") {
            self.node.rescan_timeout_seconds = parse_env("RESCAN_TIMEOUT_SECONDS", timeout)?;
        }

        if let Ok(path) = env::var("WALLET_DATABASE_PATH") {
            self.wallet.database_path = path;
        }

        if let Ok(sink) = env::var("REPORT_SINK") {
            self.report.sink = match sink.as_str() {
                "sheets" => SinkKind::Sheets,
                "sqlite" => SinkKind::Sqlite,
                _ => return Err(ConfigError::InvalidValue {
                    key: "REPORT_SINK".to_string(),
                    value: sink,
                }),
            };
        }
        if let Ok(offset) = env::var("TIMEZONE_OFFSET_HOURS") {
            self.report.timezone_offset_hours = parse_env("TIMEZONE_OFFSET_HOURS", offset)?;
        }
        if let Ok(sheet_id) = env::var("SHEETS_SPREADSHEET_ID") {
            self.report.sheets.spreadsheet_id = sheet_id;
        }
        if let Ok(credentials_file) = env::var("SHEETS_CREDENTIALS_FILE") {
            self.report.sheets.credentials_file = Some(credentials_file);
        }
        if let Ok(token_file) = env::var("SHEETS_TOKEN_FILE") {
            self.report.sheets.token_file = Some(token_file);
        }
        if let Ok(path) = env::var("REPORT_DATABASE_PATH") {
            self.report.sqlite.path = path;
        }

        if let Ok(height) = env::var("RESCAN_HEIGHT") {
            self.rescan_height = Some(height);
        }

        if let Ok(level) = env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = env::var("LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.node.endpoint.starts_with("http://") && !self.node.endpoint.starts_with("https://") {
            return Err(ConfigError::InvalidUrl(self.node.endpoint.clone()));
        }

        if self.node.timeout_seconds == 0 || self.node.timeout_seconds > 300 {
            return Err(ConfigError::InvalidValue {
                key: "node.timeout_seconds".to_string(),
                value: self.node.timeout_seconds.to_string(),
            });
        }

        if self.node.max_retries == 0 || self.node.max_retries > 20 {
            return Err(ConfigError::InvalidValue {
                key: "node.max_retries".to_string(),
                value: self.node.max_retries.to_string(),
            });
        }

        if self.node.poll_interval_seconds == 0 || self.node.poll_interval_seconds > 3600 {
            return Err(ConfigError::InvalidValue {
                key: "node.poll_interval_seconds".to_string(),
                value: self.node.poll_interval_seconds.to_string(),
            });
        }

        if self.node.rescan_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                key: "node.rescan_timeout_seconds".to_string(),
                value: self.node.rescan_timeout_seconds.to_string(),
            });
        }

        if self.wallet.database_path.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "wallet.database_path".to_string(),
                value: self.wallet.database_path.clone(),
            });
        }

        if self.wallet.tracked.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "wallet.tracked".to_string(),
                value: "[]".to_string(),
            });
        }

        let mut seen_ids = HashSet::new();
        for wallet in &self.wallet.tracked {
            if wallet.id.trim().is_empty() || !seen_ids.insert(wallet.id.as_str()) {
                return Err(ConfigError::InvalidValue {
                    key: "wallet.tracked.id".to_string(),
                    value: wallet.id.clone(),
                });
            }
        }

        if !(-12..=14).contains(&self.report.timezone_offset_hours) {
            return Err(ConfigError::InvalidValue {
                key: "report.timezone_offset_hours".to_string(),
                value: self.report.timezone_offset_hours.to_string(),
            });
        }

        if self.report.log_destination.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "report.log_destination".to_string(),
                value: self.report.log_destination.clone(),
            });
        }

        match self.report.sink {
            SinkKind::Sheets => {
                if self.report.sheets.spreadsheet_id.trim().is_empty() {
                    return Err(ConfigError::InvalidValue {
                        key: "report.sheets.spreadsheet_id".to_string(),
                        value: self.report.sheets.spreadsheet_id.clone(),
                    });
                }
                let base = &self.report.sheets.api_base_url;
                if !base.starts_with("http://") && !base.starts_with("https://") {
                    return Err(ConfigError::InvalidUrl(base.clone()));
                }
            }
            SinkKind::Sqlite => {
                if self.report.sqlite.path.trim().is_empty() {
                    return Err(ConfigError::InvalidValue {
                        key: "report.sqlite.path".to_string(),
                        value: self.report.sqlite.path.clone(),
                    });
                }
            }
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.level".to_string(),
                value: self.logging.level.clone(),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.format".to_string(),
                value: self.logging.format.clone(),
            });
        }

        Ok(())
    }

    pub fn tracked_wallet_ids(&self) -> Vec<String> {
        self.wallet.tracked.iter().map(|w| w.id.clone()).collect()
    }

    /// Generate a sample configuration file
    pub fn generate_sample_config() -> Result<String, ConfigError> {
        let config = Self::default();
        toml::to_string_pretty(&config)
            .map_err(|e| ConfigError::Parsing(e.to_string()))
    }
}
