//! Block-processing core: month boundary detection, rescan serialization and
//! snapshot reporting.

pub mod month;
pub mod report;
pub mod rescan;
pub mod router;
pub mod service;
pub mod time;

pub use month::{MonthBoundaryTracker, MonthState};
pub use report::{BalanceReportEmitter, EmitSummary, TrackedWallet};
pub use rescan::{ReplayTrigger, RescanGuard, RescanHeight, RescanState};
pub use router::{BlockEventRouter, RouterConfig};
pub use service::{MonitorService, ServiceStats};
pub use time::TimeAdjuster;
