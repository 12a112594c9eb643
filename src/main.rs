use clap::Parser;
use log::{error, info};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::signal;

use monthly_balance_monitor::chain::{block_source, BlockSourceConfig, ChainClient, RpcClient};
use monthly_balance_monitor::config::{AppConfig, SinkKind};
use monthly_balance_monitor::error::{ConfigError, MonitorError, SystemError};
use monthly_balance_monitor::logging::{init_logging, ErrorLogger};
use monthly_balance_monitor::monitor::{BlockEventRouter, MonitorService, RouterConfig};
use monthly_balance_monitor::retry::RetryConfig;
use monthly_balance_monitor::sink::{ReportSink, SheetsSink, SqliteSink, TokenSource};
use monthly_balance_monitor::wallet::{SqliteWalletDb, WalletDatabase};

#[derive(Parser)]
#[command(name = "monthly-balance-monitor")]
#[command(about = "Reports tracked wallet balances at every calendar month boundary")]
#[command(version = "0.1.0")]
struct Args {
    /// Configuration file (defaults to CONFIG_FILE or config.toml)
    #[arg(long)]
    config: Option<String>,

    /// Roll the wallet store back to this height and replay to the tip before following the chain
    #[arg(long)]
    rescan_height: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    if args.rescan_height.is_some() {
        config.rescan_height = args.rescan_height.clone();
    }

    init_logging(&config.logging)?;
    info!("Starting monthly balance monitor");

    if let Err(e) = run(config).await {
        ErrorLogger::log_error(&e, None);
        return Err(e.into());
    }

    Ok(())
}

async fn run(config: AppConfig) -> Result<(), MonitorError> {
    let retry = RetryConfig::for_rpc(
        config.node.max_retries,
        config.node.retry_delay_seconds,
        config.node.max_retry_delay_seconds,
    );
    let mut rpc = RpcClient::new_with_config(config.node.endpoint.clone(), config.node.timeout_seconds, retry)?;
    if let (Some(user), Some(password)) = (&config.node.rpc_user, &config.node.rpc_password) {
        rpc = rpc.with_credentials(user.clone(), password.clone());
    }

    let (source, chain, events) = block_source(
        rpc,
        BlockSourceConfig {
            poll_interval_seconds: config.node.poll_interval_seconds,
            rescan_timeout_seconds: config.node.rescan_timeout_seconds,
        },
    );
    let chain: Arc<dyn ChainClient> = Arc::new(chain);

    let wallet_db = SqliteWalletDb::new(&config.wallet.database_path, Arc::clone(&chain))?;
    for wallet in &config.wallet.tracked {
        wallet_db.register_wallet(&wallet.id, &wallet.addresses)?;
    }
    let resume_height = wallet_db.tip_height()?;
    let wallet_db: Arc<dyn WalletDatabase> = Arc::new(wallet_db);

    let sink = build_sink(&config)?;

    let router = BlockEventRouter::new(
        Arc::clone(&chain),
        Arc::clone(&wallet_db),
        sink,
        RouterConfig {
            wallet_ids: config.tracked_wallet_ids(),
            log_destination: config.report.log_destination.clone(),
            timezone_offset_hours: config.report.timezone_offset_hours,
            rescan_height: config.rescan_height.clone(),
        },
    );

    let source = match resume_height {
        Some(height) => source.resume_after(height),
        None => source,
    };
    let shutdown_signal = Arc::clone(&source.shutdown_signal);

    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal");
                shutdown_signal.store(true, Ordering::Relaxed);
            }
            Err(err) => error!("Unable to listen for shutdown signal: {}", err),
        }
    });

    let source_task = tokio::spawn(source.run());
    let service = MonitorService::new(router, wallet_db, events);
    let stats = service.run().await?;

    match source_task.await {
        Ok(result) => result?,
        Err(e) => return Err(SystemError::Task(e.to_string()).into()),
    }

    info!(
        "Monitor stopped: {} reports sent, {} failed",
        stats.reports_sent, stats.reports_failed
    );
    Ok(())
}

fn build_sink(config: &AppConfig) -> Result<Arc<dyn ReportSink>, MonitorError> {
    match config.report.sink {
        SinkKind::Sqlite => Ok(Arc::new(SqliteSink::new(&config.report.sqlite.path)?)),
        SinkKind::Sheets => {
            let sheets = &config.report.sheets;
            let token = match (&sheets.credentials_file, &sheets.token_file) {
                (Some(credentials), _) => TokenSource::service_account(Path::new(credentials))?,
                (None, Some(path)) => TokenSource::File(PathBuf::from(path)),
                (None, None) => TokenSource::Static(
                    std::env::var("SHEETS_ACCESS_TOKEN")
                        .map_err(|_| ConfigError::MissingEnvVar("SHEETS_ACCESS_TOKEN".to_string()))?,
                ),
            };

            let sink = SheetsSink::new(&sheets.api_base_url, &sheets.spreadsheet_id, token, sheets.timeout_seconds)?
                .with_retry(RetryConfig::for_rpc(3, 1, 10));
            Ok(Arc::new(sink))
        }
    }
}
