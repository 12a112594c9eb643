use serde::{Deserialize, Serialize};

use crate::models::BalanceSnapshot;

/// A single scalar spreadsheet cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Integer(i64),
    Number(f64),
    Text(String),
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

/// One monthly snapshot row: `(height, date, txCount, unconfirmed, confirmed)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub height: u32,
    pub date: String,
    pub tx_count: u64,
    pub unconfirmed_coins: f64,
    pub confirmed_coins: f64,
}

impl ReportRow {
    pub fn new(height: u32, date: String, balance: &BalanceSnapshot) -> Self {
        Self {
            height,
            date,
            tx_count: balance.tx_count,
            unconfirmed_coins: balance.unconfirmed_coins(),
            confirmed_coins: balance.confirmed_coins(),
        }
    }

    pub fn to_cells(&self) -> Vec<CellValue> {
        vec![
            CellValue::Integer(i64::from(self.height)),
            CellValue::Text(self.date.clone()),
            CellValue::Integer(self.tx_count as i64),
            CellValue::Number(self.unconfirmed_coins),
            CellValue::Number(self.confirmed_coins),
        ]
    }
}
