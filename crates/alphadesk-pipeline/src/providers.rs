//! Input provider traits
//!
//! The pipeline does not ingest market data itself; upstream jobs hand it
//! scored signals and risk estimates through these seams. Implementations
//! may read files, query a feature store, or serve fixtures in tests.

use alphadesk_core::{AlphaSignal, DataError, ReturnHistory, RiskTable};
use alphadesk_monitor::FeatureTable;
use async_trait::async_trait;
use chrono::NaiveDate;

/// Scored signals for one trading date.
#[derive(Debug, Clone, Default)]
pub struct SignalBundle {
    pub alpha: AlphaSignal,
    /// Feature values behind today's scores.
    pub features: FeatureTable,
    /// Reference distribution the drift check compares against.
    pub baseline: FeatureTable,
    /// Features the drift monitor should inspect.
    pub monitored_features: Vec<String>,
}

/// Risk inputs for one trading date.
#[derive(Debug, Clone)]
pub struct RiskBundle {
    pub risk: RiskTable,
    pub returns: ReturnHistory,
}

#[async_trait]
pub trait SignalProvider: Send + Sync {
    async fn signals(&self, date: NaiveDate) -> Result<SignalBundle, DataError>;
}

#[async_trait]
pub trait RiskProvider: Send + Sync {
    async fn risk(&self, date: NaiveDate) -> Result<RiskBundle, DataError>;
}
