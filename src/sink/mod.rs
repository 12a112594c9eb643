//! Reporting sinks: where monthly snapshot rows and the startup row are appended.

pub mod oauth;
pub mod sheets;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::SinkError;
use crate::models::CellValue;

pub use oauth::{ServiceAccountAuth, ServiceAccountKey};
pub use sheets::{SheetsSink, TokenSource};
pub use sqlite::{SqliteSink, StoredRow};

/// Appends a row of scalar cells to a named destination.
///
/// The returned string is the sink's human-readable acknowledgement.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn append_row(&self, destination: &str, row: &[CellValue]) -> Result<String, SinkError>;
}

pub(crate) fn check_destination(destination: &str) -> Result<(), SinkError> {
    if destination.trim().is_empty() {
        return Err(SinkError::InvalidDestination("destination name cannot be empty".to_string()));
    }
    Ok(())
}
