//! Feature drift monitoring
//!
//! Computes the Population Stability Index (PSI) between a baseline feature
//! distribution and the current one, per feature. Baseline values define
//! equal-width bin edges; the same edges are applied to the current values.
//! Empty-bucket percentages are floored so the log term stays finite.
//!
//! Drift output is advisory: it feeds pipeline status and retraining
//! triggers but never blocks order submission by itself.

use alphadesk_core::{DriftConfig, DriftReport, DriftSeverity};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Floor applied to empty bucket percentages.
const BUCKET_EPS: f64 = 0.0001;

/// One feature column. Non-numeric columns are carried so callers can pass
/// whole tables through; PSI skips them.
#[derive(Debug, Clone)]
pub enum FeatureColumn {
    Numeric(Vec<f64>),
    Categorical(Vec<String>),
}

/// Feature table: feature name -> column.
pub type FeatureTable = BTreeMap<String, FeatureColumn>;

/// Population Stability Index between two samples.
///
/// Bins span the baseline's min/max; current values outside that range fall
/// out of every bucket, which shows up as baseline-vs-current mass imbalance.
/// Degenerate inputs (either sample empty after dropping non-finite values,
/// or a constant baseline) yield 0.0 rather than an error.
pub fn psi(baseline: &[f64], current: &[f64], buckets: usize) -> f64 {
    let baseline: Vec<f64> = baseline.iter().copied().filter(|x| x.is_finite()).collect();
    let current: Vec<f64> = current.iter().copied().filter(|x| x.is_finite()).collect();
    if baseline.is_empty() || current.is_empty() || buckets < 2 {
        return 0.0;
    }

    let min = baseline.iter().copied().fold(f64::INFINITY, f64::min);
    let max = baseline.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;
    if span <= 0.0 {
        debug!("Constant baseline, PSI undefined, returning 0");
        return 0.0;
    }

    let expected = bucket_percents(&baseline, min, span, buckets);
    let actual = bucket_percents(&current, min, span, buckets);

    expected
        .iter()
        .zip(&actual)
        .map(|(&e, &a)| {
            let e = e.max(BUCKET_EPS);
            let a = a.max(BUCKET_EPS);
            (e - a) * (e / a).ln()
        })
        .sum()
}

fn bucket_percents(values: &[f64], min: f64, span: f64, buckets: usize) -> Vec<f64> {
    let mut counts = vec![0usize; buckets];
    for &x in values {
        let offset = x - min;
        if offset < 0.0 || offset > span {
            continue;
        }
        let idx = ((offset / span) * buckets as f64) as usize;
        counts[idx.min(buckets - 1)] += 1;
    }
    counts
        .into_iter()
        .map(|c| c as f64 / values.len() as f64)
        .collect()
}

/// PSI-based drift monitor for feature tables.
#[derive(Debug, Clone)]
pub struct DriftMonitor {
    config: DriftConfig,
}

impl DriftMonitor {
    pub fn new(config: DriftConfig) -> Self {
        Self { config }
    }

    /// Compute per-feature PSI between a baseline table and the current one.
    ///
    /// Features missing from either table, and non-numeric features, are
    /// skipped rather than errored.
    pub fn check_feature_drift(
        &self,
        baseline: &FeatureTable,
        current: &FeatureTable,
        features: &[String],
    ) -> DriftReport {
        let mut report = DriftReport::default();
        for feature in features {
            let (base, cur) = match (baseline.get(feature), current.get(feature)) {
                (Some(FeatureColumn::Numeric(b)), Some(FeatureColumn::Numeric(c))) => (b, c),
                (None, _) | (_, None) => continue,
                _ => {
                    debug!(feature = %feature, "Skipping non-numeric feature");
                    continue;
                }
            };

            let value = psi(base, cur, self.config.buckets);
            report.psi.insert(feature.clone(), value);

            match self.severity(value) {
                DriftSeverity::Critical => warn!(
                    feature = %feature,
                    psi = format!("{value:.4}"),
                    "Critical feature drift"
                ),
                DriftSeverity::Material => warn!(
                    feature = %feature,
                    psi = format!("{value:.4}"),
                    "Drift detected"
                ),
                DriftSeverity::Stable => {}
            }
        }
        report
    }

    /// Classify one PSI value.
    pub fn severity(&self, psi: f64) -> DriftSeverity {
        if psi > self.config.critical_threshold {
            DriftSeverity::Critical
        } else if psi > self.config.warn_threshold {
            DriftSeverity::Material
        } else {
            DriftSeverity::Stable
        }
    }

    /// Worst severity in a report; `Stable` for an empty report.
    pub fn report_severity(&self, report: &DriftReport) -> DriftSeverity {
        report
            .worst()
            .map(|(_, v)| self.severity(v))
            .unwrap_or(DriftSeverity::Stable)
    }
}
