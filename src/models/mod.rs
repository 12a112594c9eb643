pub mod block;
pub mod balance;
pub mod report;

pub use block::{BlockEntry, BlockEvent, ChainTip, OutPoint, Tx, TxOutput, parse_display_hash};
pub use balance::{BalanceSnapshot, satoshis_to_coins, SATOSHIS_PER_COIN};
pub use report::{CellValue, ReportRow};
