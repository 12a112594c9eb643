use async_trait::async_trait;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::error::SinkError;
use crate::logging::MetricsLogger;
use crate::models::CellValue;
use crate::sink::{check_destination, ReportSink};

/// A row previously appended to the local report store
#[derive(Debug, Clone, Serialize)]
pub struct StoredRow {
    pub id: i64,
    pub destination: String,
    pub cells: Vec<CellValue>,
    pub appended_at: String,
}

/// Report sink that appends rows to a local sqlite table, one logical sheet per destination
pub struct SqliteSink {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSink {
    pub fn new(db_path: &str) -> Result<Self, SinkError> {
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    /// Create an in-memory sink for testing
    pub fn new_in_memory() -> Result<Self, SinkError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, SinkError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS report_rows (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                destination TEXT NOT NULL,
                row_json TEXT NOT NULL,
                appended_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_report_rows_destination ON report_rows(destination);",
        )?;

        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, SinkError> {
        self.conn.lock().map_err(|_| SinkError::Operation("Failed to acquire lock".to_string()))
    }

    /// Most recent rows first, optionally restricted to one destination
    pub fn list_rows(&self, destination: Option<&str>, limit: u32) -> Result<Vec<StoredRow>, SinkError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, destination, row_json, appended_at FROM report_rows
             WHERE (?1 IS NULL OR destination = ?1)
             ORDER BY id DESC LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![destination, limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut stored = Vec::new();
        for row in rows {
            let (id, destination, row_json, appended_at) = row?;
            let cells = serde_json::from_str(&row_json)
                .map_err(|e| SinkError::InvalidResponse(format!("Stored row {} is not valid JSON: {}", id, e)))?;
            stored.push(StoredRow { id, destination, cells, appended_at });
        }

        Ok(stored)
    }

    pub fn row_count(&self, destination: &str) -> Result<u64, SinkError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM report_rows WHERE destination = ?1",
            params![destination],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

#[async_trait]
impl ReportSink for SqliteSink {
    async fn append_row(&self, destination: &str, row: &[CellValue]) -> Result<String, SinkError> {
        check_destination(destination)?;
        let started = Instant::now();

        let row_json = serde_json::to_string(row)
            .map_err(|e| SinkError::InvalidResponse(format!("Row is not serializable: {}", e)))?;

        let id = {
            let conn = self.conn()?;
            conn.execute(
                "INSERT INTO report_rows (destination, row_json) VALUES (?1, ?2)",
                params![destination, row_json],
            )?;
            conn.last_insert_rowid()
        };

        MetricsLogger::log_database_operation("append_row", started.elapsed().as_millis() as u64, Some(1));
        Ok(format!("Appended row {} to {}", id, destination))
    }
}
