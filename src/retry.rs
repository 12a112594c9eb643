use std::time::Duration;
use tokio::time::sleep;
use crate::error::Retryable;
use crate::logging::{LogContext, ErrorLogger, PerformanceMonitor};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Initial delay between retries in seconds
    pub initial_delay_seconds: u64,
    /// Maximum delay between retries in seconds
    pub max_delay_seconds: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Whether to add jitter to prevent thundering herd
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_seconds: 1,
            max_delay_seconds: 60,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a configuration for node RPC operations
    pub fn for_rpc(max_attempts: u32, initial_delay_seconds: u64, max_delay_seconds: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay_seconds,
            max_delay_seconds,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_seconds: 0,
            max_delay_seconds: 0,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }
}

/// Retry mechanism with exponential backoff and jitter
pub struct RetryManager {
    config: RetryConfig,
    operation_name: String,
}

impl RetryManager {
    pub fn new(operation_name: &str, config: RetryConfig) -> Self {
        Self {
            config,
            operation_name: operation_name.to_string(),
        }
    }

    /// Execute an operation, retrying recoverable failures
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        E: Retryable,
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let monitor = PerformanceMonitor::new(&format!("retry_{}", self.operation_name));
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let error = match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        ErrorLogger::log_recovery_success(
                            &self.operation_name,
                            attempt,
                            monitor.start_time.elapsed().unwrap_or_default().as_millis() as u64,
                        );
                    }
                    return Ok(result);
                }
                Err(error) => error,
            };

            if !error.is_recoverable() {
                let context = LogContext::new("retry", &self.operation_name)
                    .with_retry_count(attempt)
                    .with_metadata("reason", serde_json::json!("non_recoverable"));
                context.debug(&format!("Non-recoverable error, not retrying: {}", error));
                return Err(error);
            }

            if attempt >= max_attempts {
                if max_attempts > 1 {
                    ErrorLogger::log_recovery_attempt(&self.operation_name, &error, attempt, max_attempts);
                }
                return Err(error);
            }

            ErrorLogger::log_recovery_attempt(&self.operation_name, &error, attempt, max_attempts);

            let delay = self.calculate_delay(attempt);
            let context = LogContext::new("retry", &self.operation_name)
                .with_retry_count(attempt)
                .with_metadata("delay_ms", serde_json::json!(delay.as_millis() as u64));
            context.info(&format!("Retrying in {:?} (attempt {} of {})", delay, attempt, max_attempts));

            sleep(delay).await;
            attempt += 1;
        }
    }

    /// Calculate delay for the given attempt number
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = self.config.initial_delay_seconds as f64;
        let exponential_delay = base_delay * self.config.backoff_multiplier.powi(attempt as i32 - 1);

        let capped_delay = exponential_delay.min(self.config.max_delay_seconds as f64);

        let final_delay = if self.config.jitter {
            let jitter_factor = 0.1;
            let jitter = capped_delay * jitter_factor * (rand::random::<f64>() - 0.5);
            (capped_delay + jitter).max(0.0)
        } else {
            capped_delay
        };

        Duration::from_secs_f64(final_delay)
    }
}
