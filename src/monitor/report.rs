use serde_json::json;
use std::sync::Arc;

use crate::logging::{LogContext, MetricsLogger};
use crate::models::{BlockEntry, CellValue, ReportRow};
use crate::monitor::TimeAdjuster;
use crate::sink::ReportSink;
use crate::wallet::BalanceAccessor;

/// A wallet reported on at every month boundary
#[derive(Clone)]
pub struct TrackedWallet {
    id: String,
    accessor: Arc<dyn BalanceAccessor>,
}

impl TrackedWallet {
    pub fn new(accessor: Arc<dyn BalanceAccessor>) -> Self {
        Self {
            id: accessor.id().to_string(),
            accessor,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn accessor(&self) -> &Arc<dyn BalanceAccessor> {
        &self.accessor
    }
}

/// Outcome of one boundary batch
#[derive(Debug, Default, Clone, PartialEq)]
pub struct EmitSummary {
    pub reported: Vec<String>,
    pub failed: Vec<String>,
}

/// Builds and dispatches one snapshot row per tracked wallet.
///
/// Failures are isolated per wallet and only surface in the log.
pub struct BalanceReportEmitter {
    sink: Arc<dyn ReportSink>,
    adjuster: TimeAdjuster,
}

impl BalanceReportEmitter {
    pub fn new(sink: Arc<dyn ReportSink>, adjuster: TimeAdjuster) -> Self {
        Self { sink, adjuster }
    }

    pub async fn emit(&self, entry: &BlockEntry, wallets: &[TrackedWallet]) -> EmitSummary {
        let date = self.adjuster.format_unix(entry.time);
        let mut summary = EmitSummary::default();

        for wallet in wallets {
            let context = LogContext::new("monthly-balance", "emit_report")
                .with_wallet(wallet.id())
                .with_height(entry.height);

            let balance = match wallet.accessor().get_balance().await {
                Ok(balance) => balance,
                Err(e) => {
                    context.error(&format!("Failed to fetch balance for wallet {}: {}", wallet.id(), e));
                    summary.failed.push(wallet.id().to_string());
                    continue;
                }
            };

            let row = ReportRow::new(entry.height, date.clone(), &balance);
            match self.sink.append_row(wallet.id(), &row.to_cells()).await {
                Ok(ack) => {
                    context.info(&ack);
                    summary.reported.push(wallet.id().to_string());
                }
                Err(e) => {
                    context
                        .with_metadata("error", json!(e.to_string()))
                        .error(&format!("Failed to append report row for wallet {}: {}", wallet.id(), e));
                    summary.failed.push(wallet.id().to_string());
                }
            }

            MetricsLogger::log_wallet_report(wallet.id(), row.tx_count, row.unconfirmed_coins, row.confirmed_coins);
        }

        summary
    }

    /// Append the `OPEN at <time> Wallets: <ids>` row to the log destination
    pub async fn emit_startup(&self, destination: &str, wallet_ids: &[String]) -> bool {
        let message = format!(
            "OPEN at {} Wallets: {}",
            self.adjuster.tz_string(self.adjuster.now()),
            wallet_ids.join(",")
        );

        match self.sink.append_row(destination, &[CellValue::from(message)]).await {
            Ok(ack) => {
                log::info!("{}", ack);
                true
            }
            Err(e) => {
                log::error!("Failed to write startup row to {}: {}", destination, e);
                false
            }
        }
    }
}
