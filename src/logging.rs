use log::{info, warn, error, debug, trace, LevelFilter};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::LoggingConfig;

/// Structured logging context for the monitor
pub struct LogContext {
    pub component: String,
    pub operation: String,
    pub metadata: HashMap<String, Value>,
}

impl LogContext {
    pub fn new(component: &str, operation: &str) -> Self {
        Self {
            component: component.to_string(),
            operation: operation.to_string(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn with_height(self, height: u32) -> Self {
        self.with_metadata("height", json!(height))
    }

    pub fn with_wallet(self, wallet_id: &str) -> Self {
        self.with_metadata("wallet", json!(wallet_id))
    }

    pub fn with_destination(self, destination: &str) -> Self {
        self.with_metadata("destination", json!(destination))
    }

    pub fn with_duration_ms(self, duration_ms: u64) -> Self {
        self.with_metadata("duration_ms", json!(duration_ms))
    }

    pub fn with_retry_count(self, retry_count: u32) -> Self {
        self.with_metadata("retry_count", json!(retry_count))
    }

    fn format_message(&self, level: &str, message: &str) -> String {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let mut log_entry = json!({
            "timestamp": timestamp,
            "level": level,
            "component": self.component,
            "operation": self.operation,
            "message": message,
        });

        for (key, value) in &self.metadata {
            log_entry[key] = value.clone();
        }

        log_entry.to_string()
    }

    pub fn info(&self, message: &str) {
        info!("{}", self.format_message("INFO", message));
    }

    pub fn warn(&self, message: &str) {
        warn!("{}", self.format_message("WARN", message));
    }

    pub fn error(&self, message: &str) {
        error!("{}", self.format_message("ERROR", message));
    }

    pub fn debug(&self, message: &str) {
        debug!("{}", self.format_message("DEBUG", message));
    }

    pub fn trace(&self, message: &str) {
        trace!("{}", self.format_message("TRACE", message));
    }
}

/// Performance monitoring utilities
pub struct PerformanceMonitor {
    pub start_time: SystemTime,
    operation: String,
    metadata: HashMap<String, Value>,
}

impl PerformanceMonitor {
    pub fn new(operation: &str) -> Self {
        Self {
            start_time: SystemTime::now(),
            operation: operation.to_string(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    fn elapsed_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.start_time)
            .unwrap_or_default()
            .as_millis() as u64
    }

    pub fn finish_with_result<T, E>(self, result: &Result<T, E>) -> u64
    where
        E: std::fmt::Display
    {
        let duration = self.elapsed_ms();

        let mut context = LogContext::new("performance", &self.operation)
            .with_duration_ms(duration);

        for (key, value) in self.metadata {
            context = context.with_metadata(&key, value);
        }

        match result {
            Ok(_) => {
                context.trace(&format!("Operation completed successfully in {}ms", duration));
            }
            Err(e) => {
                context = context.with_metadata("error", json!(e.to_string()));
                context.debug(&format!("Operation failed after {}ms: {}", duration, e));
            }
        }

        duration
    }
}

/// Error logging utilities
pub struct ErrorLogger;

impl ErrorLogger {
    pub fn log_error(error: &crate::error::MonitorError, context: Option<LogContext>) {
        let severity = error.severity();

        let log_context = context
            .unwrap_or_else(|| LogContext::new("error", "unknown"))
            .with_metadata("error_type", json!(format!("{:?}", error)))
            .with_metadata("severity", json!(format!("{:?}", severity)))
            .with_metadata("recoverable", json!(error.is_recoverable()));

        let message = format!("Error occurred: {}", error);

        match severity {
            crate::error::ErrorSeverity::Critical => log_context.error(&message),
            crate::error::ErrorSeverity::High => log_context.error(&message),
            crate::error::ErrorSeverity::Medium => log_context.warn(&message),
            crate::error::ErrorSeverity::Low => log_context.info(&message),
        }
    }

    pub fn log_recovery_attempt<E: std::fmt::Display>(operation: &str, error: &E, attempt: u32, max_attempts: u32) {
        let context = LogContext::new("recovery", "retry_attempt")
            .with_retry_count(attempt)
            .with_metadata("operation", json!(operation))
            .with_metadata("max_attempts", json!(max_attempts));

        if attempt == max_attempts {
            context.error(&format!("Final retry attempt failed: {}", error));
        } else {
            context.warn(&format!("Retry attempt {} of {}: {}", attempt, max_attempts, error));
        }
    }

    pub fn log_recovery_success(operation: &str, attempts: u32, total_duration_ms: u64) {
        let context = LogContext::new("recovery", "success")
            .with_metadata("operation", json!(operation))
            .with_retry_count(attempts)
            .with_duration_ms(total_duration_ms);

        context.info(&format!("Operation recovered after {} attempts in {}ms", attempts, total_duration_ms));
    }
}

/// Monitor metrics and progress reporting
pub struct MetricsLogger;

impl MetricsLogger {
    pub fn log_block_scanned(height: u32, date: &str, replay: bool) {
        let context = LogContext::new("monthly-balance", "block_scanned")
            .with_height(height)
            .with_metadata("replay", json!(replay));

        context.info(&format!("Scanning block {} ({})", height, date));
    }

    pub fn log_wallet_report(wallet_id: &str, tx_count: u64, unconfirmed: f64, confirmed: f64) {
        let context = LogContext::new("monthly-balance", "wallet_report")
            .with_wallet(wallet_id)
            .with_metadata("tx_count", json!(tx_count))
            .with_metadata("unconfirmed", json!(unconfirmed))
            .with_metadata("confirmed", json!(confirmed));

        context.info(&format!(
            "Wallet: {} TXs: {} Unconfirmed: {} Confirmed: {}",
            wallet_id, tx_count, unconfirmed, confirmed
        ));
    }

    pub fn log_rpc_call(method: &str, duration_ms: u64, success: bool) {
        let context = LogContext::new("metrics", "rpc_call")
            .with_metadata("method", json!(method))
            .with_duration_ms(duration_ms)
            .with_metadata("success", json!(success));

        if success {
            context.debug(&format!("RPC call {} completed in {}ms", method, duration_ms));
        } else {
            context.warn(&format!("RPC call {} failed after {}ms", method, duration_ms));
        }
    }

    pub fn log_database_operation(operation: &str, duration_ms: u64, rows_affected: Option<usize>) {
        let mut context = LogContext::new("metrics", "database_operation")
            .with_metadata("operation", json!(operation))
            .with_duration_ms(duration_ms);

        if let Some(rows) = rows_affected {
            context = context.with_metadata("rows_affected", json!(rows));
        }

        context.debug(&format!("Database {} completed in {}ms", operation, duration_ms));
    }
}

fn level_filter(level: &str) -> LevelFilter {
    match level {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// Initialize structured logging for the monitor.
///
/// `RUST_LOG` still takes precedence over the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let pretty = config.format == "pretty";

    env_logger::Builder::new()
        .filter_level(level_filter(&config.level))
        .parse_default_env()
        .format(move |buf, record| {
            use std::io::Write;

            match serde_json::from_str::<Value>(record.args().to_string().as_str()) {
                Ok(json_value) if json_value.is_object() => {
                    if pretty {
                        writeln!(buf, "{}", serde_json::to_string_pretty(&json_value)?)
                    } else {
                        writeln!(buf, "{}", json_value)
                    }
                }
                _ => writeln!(
                    buf,
                    "{} [{}] {}: {}",
                    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                    record.level(),
                    record.target(),
                    record.args()
                ),
            }
        })
        .try_init()?;

    info!("Structured logging initialized");
    Ok(())
}
