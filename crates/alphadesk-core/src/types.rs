//! Core data model shared across the pipeline
//!
//! Weight and analytics paths are `f64`; money at the broker boundary
//! (equity, market values, order notionals) is `Decimal`.

use crate::error::ConstraintError;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cross-sectional predictive signal: instrument -> score.
///
/// Produced externally per run, consumed once, never persisted here.
pub type AlphaSignal = BTreeMap<String, f64>;

/// Per-instrument cluster id. Instruments without an assignment are treated
/// as singleton cluster [`UNASSIGNED_CLUSTER`].
pub type ClusterAssignment = BTreeMap<String, i32>;

/// Cluster id for instruments without an assignment.
pub const UNASSIGNED_CLUSTER: i32 = -1;

/// Risk estimates for one instrument.
///
/// Either column may be absent upstream; consumers fall back rather than
/// fail (equal weight when no `vol_hat`, no overlay when no `event_risk`).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RiskEstimate {
    /// Annualized volatility forecast, >= 0.
    pub vol_hat: Option<f64>,
    /// Probability-like event risk in [0, 1].
    pub event_risk: Option<f64>,
}

/// Risk table indexed by instrument.
pub type RiskTable = BTreeMap<String, RiskEstimate>;

/// Historical periodic returns: instruments as columns, dates as rows.
///
/// Read-only here; missing observations are `None`.
#[derive(Debug, Clone, Default)]
pub struct ReturnHistory {
    symbols: Vec<String>,
    dates: Vec<NaiveDate>,
    /// Row-major: `rows[date][symbol]`.
    rows: Vec<Vec<Option<f64>>>,
}

impl ReturnHistory {
    pub fn new(symbols: Vec<String>) -> Self {
        Self {
            symbols,
            dates: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Append one date of returns. The row length must match the symbol count.
    pub fn push_row(&mut self, date: NaiveDate, row: Vec<Option<f64>>) {
        debug_assert_eq!(row.len(), self.symbols.len());
        self.dates.push(date);
        self.rows.push(row);
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.symbols.is_empty()
    }

    /// The most recent `lookback` rows.
    pub fn tail(&self, lookback: usize) -> ReturnHistory {
        let start = self.rows.len().saturating_sub(lookback);
        ReturnHistory {
            symbols: self.symbols.clone(),
            dates: self.dates[start..].to_vec(),
            rows: self.rows[start..].to_vec(),
        }
    }

    /// All observations for one symbol, in date order, skipping gaps.
    pub fn column(&self, symbol: &str) -> Vec<f64> {
        match self.symbols.iter().position(|s| s == symbol) {
            Some(idx) => self.rows.iter().filter_map(|r| r[idx]).collect(),
            None => Vec::new(),
        }
    }

    /// Indices of symbols with a complete history in this window.
    pub fn complete_columns(&self) -> Vec<usize> {
        (0..self.symbols.len())
            .filter(|&j| self.rows.iter().all(|r| r[j].is_some()))
            .collect()
    }

    /// Dense value for a cell; `None` when missing.
    pub fn value(&self, row: usize, col: usize) -> Option<f64> {
        self.rows[row][col]
    }

    /// Sample variance of a symbol's available observations (0.0 when < 2).
    pub fn variance(&self, symbol: &str) -> f64 {
        let xs = self.column(symbol);
        if xs.len() < 2 {
            return 0.0;
        }
        let mean = xs.iter().sum::<f64>() / xs.len() as f64;
        xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (xs.len() - 1) as f64
    }
}

/// Validated target portfolio: instrument -> capital weight.
///
/// Immutable after construction. The `BTreeMap` keeps iteration (and thus
/// order submission and audit logs) deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetWeights {
    weights: BTreeMap<String, f64>,
}

impl TargetWeights {
    pub fn new(weights: BTreeMap<String, f64>) -> Self {
        Self { weights }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &str) -> Option<f64> {
        self.weights.get(symbol).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.weights.iter()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &String> {
        self.weights.keys()
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.weights.values().sum()
    }

    /// L1 distance to another weight vector (turnover).
    pub fn turnover(&self, other: &TargetWeights) -> f64 {
        let mut symbols: Vec<&String> = self.weights.keys().collect();
        symbols.extend(other.weights.keys());
        symbols.sort();
        symbols.dedup();
        symbols
            .into_iter()
            .map(|s| (self.get(s).unwrap_or(0.0) - other.get(s).unwrap_or(0.0)).abs())
            .sum()
    }

    /// Final-output invariant check: every weight in [0, max_weight + eps],
    /// finite, and total <= gross_exposure + eps.
    pub fn validate(&self, max_weight: f64, gross_exposure: f64) -> Result<(), ConstraintError> {
        const EPS: f64 = 1e-4;
        for (symbol, &w) in &self.weights {
            if !w.is_finite() {
                return Err(ConstraintError::NonFiniteWeight(symbol.clone()));
            }
            if w < -EPS || w > max_weight + EPS {
                return Err(ConstraintError::WeightOutOfBounds {
                    symbol: symbol.clone(),
                    weight: w,
                    max: max_weight,
                });
            }
        }
        let total = self.total();
        if total > gross_exposure + EPS {
            return Err(ConstraintError::GrossExposureExceeded {
                total,
                limit: gross_exposure,
            });
        }
        Ok(())
    }

    pub fn as_map(&self) -> &BTreeMap<String, f64> {
        &self.weights
    }
}

/// Broker account snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub equity: Decimal,
    pub cash: Decimal,
    pub buying_power: Decimal,
}

/// Live broker position; read at execution time, never cached across runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub qty: Decimal,
    pub market_value: Decimal,
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Order status as reported by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    Accepted,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Accepted => write!(f, "accepted"),
            Self::PartiallyFilled => write!(f, "partially_filled"),
            Self::Filled => write!(f, "filled"),
            Self::Canceled => write!(f, "canceled"),
            Self::Rejected => write!(f, "rejected"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A submitted order. Owned by the broker once accepted; this core only
/// observes its resulting status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Broker-assigned id.
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub notional: Option<Decimal>,
    pub qty: Option<Decimal>,
    pub status: OrderStatus,
}

/// Drift severity classification for a single feature's PSI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftSeverity {
    Stable,
    Material,
    Critical,
}

/// Per-feature PSI values for one run. Ephemeral; persisted by the
/// orchestrator and not mutated afterward.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriftReport {
    pub psi: BTreeMap<String, f64>,
}

impl DriftReport {
    pub fn is_empty(&self) -> bool {
        self.psi.is_empty()
    }

    /// The largest PSI in the report, if any.
    pub fn worst(&self) -> Option<(&String, f64)> {
        self.psi
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(k, v)| (k, *v))
    }
}

/// Pipeline stage identifiers, in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Signals,
    DriftCheck,
    Construct,
    Execute,
    Report,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Signals,
        Stage::DriftCheck,
        Stage::Construct,
        Stage::Execute,
        Stage::Report,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Signals => "signals",
            Self::DriftCheck => "drift_check",
            Self::Construct => "construct",
            Self::Execute => "execute",
            Self::Report => "report",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-stage status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Ok,
    Failed,
    Skipped,
}

/// Terminal run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Started,
    Success,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Started => write!(f, "STARTED"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Audit record for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: String,
    pub date: NaiveDate,
    pub mode: String,
    pub status: RunStatus,
    pub stages: BTreeMap<Stage, StageStatus>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn start(run_id: String, date: NaiveDate, mode: String) -> Self {
        let stages = Stage::ALL
            .iter()
            .map(|s| (*s, StageStatus::Pending))
            .collect();
        Self {
            run_id,
            date,
            mode,
            status: RunStatus::Started,
            stages,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn set_stage(&mut self, stage: Stage, status: StageStatus) {
        self.stages.insert(stage, status);
    }

    pub fn stage(&self, stage: Stage) -> StageStatus {
        self.stages
            .get(&stage)
            .copied()
            .unwrap_or(StageStatus::Pending)
    }

    pub fn finish_success(&mut self) {
        self.status = RunStatus::Success;
        self.finished_at = Some(Utc::now());
    }

    pub fn finish_failed(&mut self, error: String) {
        self.status = RunStatus::Failed;
        self.error = Some(error);
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights(pairs: &[(&str, f64)]) -> TargetWeights {
        TargetWeights::new(
            pairs
                .iter()
                .map(|(s, w)| (s.to_string(), *w))
                .collect(),
        )
    }

    #[test]
    fn validate_accepts_well_formed_weights() {
        let w = weights(&[("AAPL", 0.08), ("MSFT", 0.05)]);
        assert!(w.validate(0.10, 1.0).is_ok());
    }

    #[test]
    fn validate_rejects_gross_exposure_breach() {
        let w = weights(&[("A", 0.10), ("B", 0.10), ("C", 0.10)]);
        assert!(w.validate(0.10, 0.25).is_err());
    }

    #[test]
    fn validate_rejects_non_finite() {
        let w = weights(&[("A", f64::NAN)]);
        assert!(matches!(
            w.validate(0.10, 1.0),
            Err(ConstraintError::NonFiniteWeight(_))
        ));
    }

    #[test]
    fn validate_rejects_over_max_weight() {
        let w = weights(&[("A", 0.15)]);
        assert!(w.validate(0.10, 1.0).is_err());
    }

    #[test]
    fn turnover_is_l1_distance_over_union() {
        let a = weights(&[("A", 0.6), ("B", 0.4)]);
        let b = weights(&[("A", 0.4), ("C", 0.4)]);
        let t = a.turnover(&b);
        assert!((t - (0.2 + 0.4 + 0.4)).abs() < 1e-12);
    }

    #[test]
    fn return_history_window_and_completeness() {
        let mut h = ReturnHistory::new(vec!["A".into(), "B".into()]);
        for i in 0..5 {
            let b = if i == 2 { None } else { Some(0.01) };
            h.push_row(
                NaiveDate::from_ymd_opt(2024, 1, 1 + i as u32).unwrap(),
                vec![Some(0.01 * i as f64), b],
            );
        }
        assert_eq!(h.tail(3).num_rows(), 3);
        // B has a gap inside the full window
        assert_eq!(h.complete_columns(), vec![0]);
        // but is complete in the trailing window
        assert_eq!(h.tail(2).complete_columns(), vec![0, 1]);
    }

    #[test]
    fn pipeline_run_tracks_stages() {
        let mut run = PipelineRun::start(
            "r1".into(),
            NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            "SIMULATION".into(),
        );
        assert_eq!(run.stage(Stage::Construct), StageStatus::Pending);
        run.set_stage(Stage::Construct, StageStatus::Ok);
        run.finish_success();
        assert_eq!(run.status, RunStatus::Success);
        assert!(run.finished_at.is_some());
    }
}
