//! Repositories for run history tables

mod drift;
mod runs;
mod trade_log;
mod weights;

pub use drift::DriftReportRepository;
pub use runs::RunRepository;
pub use trade_log::{TradeLogEntry, TradeLogRepository};
pub use weights::{WeightSnapshot, WeightSnapshotRepository};
