use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::SinkError;
use crate::logging::{LogContext, PerformanceMonitor};
use crate::models::CellValue;
use crate::retry::{RetryConfig, RetryManager};
use crate::sink::oauth::ServiceAccountAuth;
use crate::sink::{check_destination, ReportSink};

/// Where the bearer token for the Sheets API comes from
#[derive(Debug, Clone)]
pub enum TokenSource {
    Static(String),
    /// Re-read on every request so an external refresher can rotate it
    File(PathBuf),
    /// Service-account key; tokens are minted and renewed by the sink itself
    ServiceAccount(Arc<ServiceAccountAuth>),
}

impl TokenSource {
    pub fn service_account(credentials_path: &std::path::Path) -> Result<Self, SinkError> {
        Ok(TokenSource::ServiceAccount(Arc::new(ServiceAccountAuth::from_file(credentials_path)?)))
    }

    async fn token(&self, client: &Client) -> Result<String, SinkError> {
        match self {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::ServiceAccount(auth) => auth.access_token(client).await,
            TokenSource::File(path) => {
                let token = std::fs::read_to_string(path).map_err(|e| {
                    SinkError::Authorization(format!("Cannot read token file {}: {}", path.display(), e))
                })?;
                let token = token.trim();
                if token.is_empty() {
                    return Err(SinkError::Authorization(format!("Token file {} is empty", path.display())));
                }
                Ok(token.to_string())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendResponse {
    updates: Option<AppendUpdates>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendUpdates {
    updated_range: Option<String>,
}

/// Appends rows to a Google spreadsheet, one sheet per destination
pub struct SheetsSink {
    client: Client,
    base_url: String,
    spreadsheet_id: String,
    token: TokenSource,
    retry: RetryConfig,
}

impl SheetsSink {
    pub fn new(
        base_url: &str,
        spreadsheet_id: &str,
        token: TokenSource,
        timeout_seconds: u64,
    ) -> Result<Self, SinkError> {
        let client = Client::builder().timeout(Duration::from_secs(timeout_seconds)).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            spreadsheet_id: spreadsheet_id.to_string(),
            token,
            retry: RetryConfig::no_retry(),
        })
    }

    /// Only failures where the append never reached the API are retried,
    /// see `SinkError::is_recoverable`.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// `{base}/spreadsheets/{id}/values/{destination}!A1:A1:append`
    fn append_url(&self, destination: &str) -> Result<Url, SinkError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| SinkError::InvalidDestination(format!("Invalid Sheets base URL {}: {}", self.base_url, e)))?;

        url.path_segments_mut()
            .map_err(|_| SinkError::InvalidDestination(format!("Sheets base URL cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .push("spreadsheets")
            .push(&self.spreadsheet_id)
            .push("values")
            .push(&format!("{}!A1:A1:append", destination));

        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        Ok(url)
    }

    async fn send_append(&self, url: &Url, row: &[CellValue]) -> Result<String, SinkError> {
        let token = self.token.token(&self.client).await?;

        let response = self
            .client
            .post(url.clone())
            .bearer_auth(token)
            .json(&json!({ "values": [row] }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SinkError::Authorization(format!("status {}: {}", status.as_u16(), body)));
        }
        if !status.is_success() {
            return Err(SinkError::Rejected { status: status.as_u16(), body });
        }

        let parsed: AppendResponse = serde_json::from_str(&body)
            .map_err(|e| SinkError::InvalidResponse(format!("Unexpected append response: {}", e)))?;

        let range = parsed
            .updates
            .and_then(|updates| updates.updated_range)
            .ok_or_else(|| SinkError::InvalidResponse("Append response has no updated range".to_string()))?;

        Ok(format!("Updated spreadsheet range: {}", range))
    }
}

#[async_trait]
impl ReportSink for SheetsSink {
    async fn append_row(&self, destination: &str, row: &[CellValue]) -> Result<String, SinkError> {
        check_destination(destination)?;
        let url = self.append_url(destination)?;

        let retry_manager = RetryManager::new("sheets_append", self.retry.clone());
        let monitor = PerformanceMonitor::new("sheets_append");
        let result = retry_manager.execute(|| self.send_append(&url, row)).await;
        let duration = monitor.finish_with_result(&result);

        LogContext::new("sheets_sink", "append_row")
            .with_destination(destination)
            .with_duration_ms(duration)
            .debug(&format!("Append to {} finished, success: {}", destination, result.is_ok()));

        result
    }
}
