//! Run configuration
//!
//! One top-level [`AppConfig`] is assembled per run and passed explicitly to
//! each component; nothing reads global state. Loaded from TOML with
//! defaults for every field so a missing file still yields a working
//! simulation setup.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Execution mode for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionMode {
    /// Log the rebalance, submit nothing.
    Simulation,
    /// Submit to the paper-trading endpoint.
    Paper,
    /// Submit real orders.
    Live,
}

impl ExecutionMode {
    pub fn submits_orders(&self) -> bool {
        matches!(self, Self::Paper | Self::Live)
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simulation => write!(f, "SIMULATION"),
            Self::Paper => write!(f, "PAPER"),
            Self::Live => write!(f, "LIVE"),
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SIMULATION" => Ok(Self::Simulation),
            "PAPER" => Ok(Self::Paper),
            "LIVE" => Ok(Self::Live),
            other => Err(ConfigError::InvalidValue {
                field: "mode".into(),
                message: format!("unknown execution mode: {other}"),
            }),
        }
    }
}

/// Weight construction method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstructorMethod {
    Heuristic,
    Convex,
}

/// Covariance estimation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CovarianceMethod {
    Sample,
    Diagonal,
    LedoitWolf,
}

/// Event-risk overlay tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventOverlayConfig {
    pub enabled: bool,
    /// Multiplier slope: weight *= max(1 - alpha * event_risk, floor).
    pub alpha: f64,
    pub multiplier_floor: f64,
}

impl Default for EventOverlayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            alpha: 1.0,
            multiplier_floor: 0.25,
        }
    }
}

/// Portfolio construction tunables shared by both constructors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioConfig {
    pub method: ConstructorMethod,
    pub top_n: usize,
    pub max_weight: f64,
    pub gross_exposure: f64,
    pub event_overlay: EventOverlayConfig,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            method: ConstructorMethod::Heuristic,
            top_n: 20,
            max_weight: 0.10,
            gross_exposure: 1.0,
            event_overlay: EventOverlayConfig::default(),
        }
    }
}

/// Covariance estimator tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CovarianceConfig {
    pub method: CovarianceMethod,
    pub lookback: usize,
}

impl Default for CovarianceConfig {
    fn default() -> Self {
        Self {
            method: CovarianceMethod::LedoitWolf,
            lookback: 60,
        }
    }
}

/// Convex optimizer tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub risk_aversion: f64,
    /// Linear transaction cost in basis points of turnover.
    pub cost_bps: f64,
    pub turnover_cap: f64,
    /// Weights below this are zeroed post-solve.
    pub min_position_weight: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            risk_aversion: 1.0,
            cost_bps: 5.0,
            turnover_cap: 0.30,
            min_position_weight: 0.001,
        }
    }
}

/// Cluster exposure cap tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub enabled: bool,
    pub max_cluster_exposure: f64,
    /// Pairwise correlation above which two symbols join a cluster.
    pub correlation_threshold: f64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_cluster_exposure: 0.25,
            correlation_threshold: 0.7,
        }
    }
}

/// Feature drift monitoring tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    pub buckets: usize,
    pub warn_threshold: f64,
    pub critical_threshold: f64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            buckets: 10,
            warn_threshold: 0.2,
            critical_threshold: 0.5,
        }
    }
}

/// Rebalance execution tunables.
///
/// The skip thresholds are heuristics, not hard laws; both live here rather
/// than as constants in the diff algorithm.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Orders below this notional (USD) are skipped.
    pub min_order_notional: f64,
    /// Skip deltas below this fraction of the current position value.
    pub rebalance_threshold: f64,
    /// Partial sells are capped at this fraction of current value so
    /// precision drift cannot over-sell.
    pub sell_safety_factor: f64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            min_order_notional: 1.0,
            rebalance_threshold: 0.005,
            sell_safety_factor: 0.99,
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

/// Orchestrator tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub mode: ExecutionMode,
    /// On a failed run, copy the prior day's weights artifact forward.
    pub allow_fallback_weights: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Simulation,
            allow_fallback_weights: false,
        }
    }
}

/// Persistence locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub db_path: String,
    pub artifacts_dir: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: "data/alphadesk.db".into(),
            artifacts_dir: "data/artifacts".into(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub portfolio: PortfolioConfig,
    pub covariance: CovarianceConfig,
    pub optimizer: OptimizerConfig,
    pub cluster: ClusterConfig,
    pub drift: DriftConfig,
    pub execution: ExecutionConfig,
    pub pipeline: PipelineConfig,
    pub persistence: PersistenceConfig,
}

impl AppConfig {
    /// Load from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path.display().to_string()))?;
        Ok(toml::from_str(&content)?)
    }

    /// Sanity checks on values that would make a run meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.portfolio.max_weight <= 0.0 || self.portfolio.max_weight > 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "portfolio.max_weight".into(),
                message: format!("must be in (0, 1], got {}", self.portfolio.max_weight),
            });
        }
        if self.portfolio.gross_exposure <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "portfolio.gross_exposure".into(),
                message: "must be positive".into(),
            });
        }
        if self.drift.buckets < 2 {
            return Err(ConfigError::InvalidValue {
                field: "drift.buckets".into(),
                message: "need at least 2 buckets".into(),
            });
        }
        if !(0.0..1.0).contains(&self.execution.rebalance_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "execution.rebalance_threshold".into(),
                message: "must be in [0, 1)".into(),
            });
        }
        Ok(())
    }
}
