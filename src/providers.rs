//! File-backed input providers
//!
//! Upstream jobs drop `signals_YYYYMMDD.json` and `risk_YYYYMMDD.json` into
//! a data directory; these providers parse them into pipeline inputs. The
//! file formats are private DTOs so the library types stay decoupled from
//! the on-disk layout.

use alphadesk_core::{DataError, ReturnHistory, RiskEstimate};
use alphadesk_monitor::{FeatureColumn, FeatureTable};
use alphadesk_pipeline::{RiskBundle, RiskProvider, SignalBundle, SignalProvider};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct SignalFile {
    alpha: BTreeMap<String, f64>,
    #[serde(default)]
    features: BTreeMap<String, Vec<f64>>,
    #[serde(default)]
    baseline: BTreeMap<String, Vec<f64>>,
    #[serde(default)]
    monitored_features: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RiskFile {
    #[serde(default)]
    risk: BTreeMap<String, RiskEstimate>,
    #[serde(default)]
    returns: Option<ReturnsFile>,
}

#[derive(Debug, Deserialize)]
struct ReturnsFile {
    symbols: Vec<String>,
    dates: Vec<NaiveDate>,
    rows: Vec<Vec<Option<f64>>>,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, DataError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| DataError::MissingInput(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&contents).map_err(|e| DataError::ParseError(e.to_string()))
}

fn numeric_table(columns: BTreeMap<String, Vec<f64>>) -> FeatureTable {
    columns
        .into_iter()
        .map(|(name, values)| (name, FeatureColumn::Numeric(values)))
        .collect()
}

/// Reads `signals_YYYYMMDD.json` from a data directory.
pub struct JsonSignalProvider {
    dir: PathBuf,
}

impl JsonSignalProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SignalProvider for JsonSignalProvider {
    async fn signals(&self, date: NaiveDate) -> Result<SignalBundle, DataError> {
        let path = self.dir.join(format!("signals_{}.json", date.format("%Y%m%d")));
        let file: SignalFile = read_json(&path)?;
        if file.alpha.is_empty() {
            return Err(DataError::EmptySignal);
        }
        Ok(SignalBundle {
            alpha: file.alpha,
            features: numeric_table(file.features),
            baseline: numeric_table(file.baseline),
            monitored_features: file.monitored_features,
        })
    }
}

/// Reads `risk_YYYYMMDD.json` from a data directory.
pub struct JsonRiskProvider {
    dir: PathBuf,
}

impl JsonRiskProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl RiskProvider for JsonRiskProvider {
    async fn risk(&self, date: NaiveDate) -> Result<RiskBundle, DataError> {
        let path = self.dir.join(format!("risk_{}.json", date.format("%Y%m%d")));
        let file: RiskFile = read_json(&path)?;

        let returns = match file.returns {
            Some(r) => {
                if r.dates.len() != r.rows.len() {
                    return Err(DataError::ShapeMismatch(format!(
                        "{} dates vs {} return rows",
                        r.dates.len(),
                        r.rows.len()
                    )));
                }
                let width = r.symbols.len();
                let mut history = ReturnHistory::new(r.symbols);
                for (date, row) in r.dates.into_iter().zip(r.rows) {
                    if row.len() != width {
                        return Err(DataError::ShapeMismatch(format!(
                            "return row for {date} has {} values, expected {width}",
                            row.len()
                        )));
                    }
                    history.push_row(date, row);
                }
                history
            }
            None => ReturnHistory::default(),
        };

        Ok(RiskBundle {
            risk: file.risk,
            returns,
        })
    }
}
