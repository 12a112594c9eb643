use clap::{Parser, Subcommand};
use std::sync::Arc;
use thiserror::Error;

use crate::chain::RpcClient;
use crate::config::AppConfig;
use crate::error::{ChainError, ConfigError, SinkError, WalletError};
use crate::models::{satoshis_to_coins, CellValue};
use crate::sink::SqliteSink;
use crate::wallet::SqliteWalletDb;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Report store error: {0}")]
    Sink(#[from] SinkError),

    #[error("Wallet store error: {0}")]
    Wallet(#[from] WalletError),

    #[error("Node client error: {0}")]
    Chain(#[from] ChainError),
}

#[derive(Parser)]
#[command(name = "monthly-balance-cli")]
#[command(about = "Inspect monthly balance reports and the watch-only wallet store")]
#[command(version = "0.1.0")]
pub struct Cli {
    /// Configuration file
    #[arg(long, default_value = "config.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print a sample configuration file
    SampleConfig,
    /// Show rows recorded by the sqlite report sink
    Reports {
        /// Only rows for this destination (wallet id or log sheet)
        #[arg(long)]
        destination: Option<String>,
        /// Maximum number of rows, newest first
        #[arg(long, default_value = "20")]
        limit: u32,
    },
    /// Show the current balance of a tracked wallet
    Balance {
        #[arg(long)]
        wallet: String,
    },
}

pub struct CliHandler {
    config: AppConfig,
}

impl CliHandler {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub async fn execute_command(&self, command: &Commands) -> Result<(), CliError> {
        match command {
            Commands::SampleConfig => {
                println!("{}", AppConfig::generate_sample_config()?);
            }
            Commands::Reports { destination, limit } => {
                for line in self.report_lines(destination.as_deref(), *limit)? {
                    println!("{}", line);
                }
            }
            Commands::Balance { wallet } => {
                println!("{}", self.balance_line(wallet)?);
            }
        }
        Ok(())
    }

    pub fn report_lines(&self, destination: Option<&str>, limit: u32) -> Result<Vec<String>, CliError> {
        let sink = SqliteSink::new(&self.config.report.sqlite.path)?;
        let rows = sink.list_rows(destination, limit)?;

        if rows.is_empty() {
            return Ok(vec!["No report rows recorded".to_string()]);
        }

        Ok(rows
            .iter()
            .map(|row| {
                let cells: Vec<String> = row.cells.iter().map(render_cell).collect();
                format!("{} [{}] {}", row.appended_at, row.destination, cells.join(" | "))
            })
            .collect())
    }

    pub fn balance_line(&self, wallet_id: &str) -> Result<String, CliError> {
        let rpc = RpcClient::new(self.config.node.endpoint.clone())?;
        let wallet_db = SqliteWalletDb::new(&self.config.wallet.database_path, Arc::new(rpc))?;

        let tip = wallet_db
            .tip_height()?
            .map_or_else(|| "none".to_string(), |height| height.to_string());
        let balance = wallet_db.balance(wallet_id)?;

        Ok(format!(
            "Wallet: {} TXs: {} Unconfirmed: {} Confirmed: {} (wallet tip: {})",
            wallet_id,
            balance.tx_count,
            satoshis_to_coins(balance.unconfirmed),
            satoshis_to_coins(balance.confirmed),
            tip
        ))
    }
}

fn render_cell(cell: &CellValue) -> String {
    match cell {
        CellValue::Integer(value) => value.to_string(),
        CellValue::Number(value) => value.to_string(),
        CellValue::Text(value) => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ReportSink;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["cli", "reports", "--destination", "primary", "--limit", "5"]);
        match cli.command {
            Commands::Reports { destination, limit } => {
                assert_eq!(destination.as_deref(), Some("primary"));
                assert_eq!(limit, 5);
            }
            _ => panic!("expected reports command"),
        }
        assert_eq!(cli.config, "config.toml");

        let cli = Cli::parse_from(["cli", "--config", "other.toml", "balance", "--wallet", "savings"]);
        assert!(matches!(cli.command, Commands::Balance { ref wallet } if wallet == "savings"));
        assert_eq!(cli.config, "other.toml");
    }

    #[tokio::test]
    async fn test_report_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.report.sqlite.path = dir.path().join("reports.db").to_str().unwrap().to_string();

        let handler = CliHandler::new(config.clone());
        assert_eq!(handler.report_lines(None, 10).unwrap(), vec!["No report rows recorded".to_string()]);

        let sink = SqliteSink::new(&config.report.sqlite.path).unwrap();
        sink.append_row("primary", &[CellValue::Integer(100), CellValue::Number(1.5)]).await.unwrap();

        let lines = handler.report_lines(Some("primary"), 10).unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("[primary] 100 | 1.5"));
    }

    #[test]
    fn test_balance_line_for_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.wallet.database_path = dir.path().join("wallet.db").to_str().unwrap().to_string();

        let line = CliHandler::new(config).balance_line("primary").unwrap();
        assert_eq!(line, "Wallet: primary TXs: 0 Unconfirmed: 0 Confirmed: 0 (wallet tip: none)");
    }
}
