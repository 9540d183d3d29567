//! Covariance matrix estimation
//!
//! Estimates an n x n covariance matrix of instrument returns from a trailing
//! window of a return table. Three methods: raw sample covariance, diagonal
//! (variances only), and Ledoit-Wolf shrinkage toward a scaled identity.
//! Every output is symmetrized and eigenvalue-clipped to be positive
//! semi-definite before it can reach a quadratic form.

use alphadesk_core::{CovarianceConfig, CovarianceMethod, ReturnHistory};
use nalgebra::{DMatrix, SymmetricEigen};
use tracing::{debug, info, warn};

/// Below this many usable rows the estimator degrades to a diagonal matrix
/// instead of erroring.
const MIN_ROWS: usize = 20;

/// Floor applied to eigenvalues when clipping to PSD.
const PSD_EPS: f64 = 1e-6;

/// Estimated covariance, carrying the symbols its rows/columns refer to.
///
/// Rebuilt every run from a trailing window; never persisted as mutable
/// state.
#[derive(Debug, Clone)]
pub struct CovarianceMatrix {
    symbols: Vec<String>,
    matrix: DMatrix<f64>,
}

impl CovarianceMatrix {
    pub fn new(symbols: Vec<String>, matrix: DMatrix<f64>) -> Self {
        debug_assert_eq!(symbols.len(), matrix.nrows());
        debug_assert_eq!(matrix.nrows(), matrix.ncols());
        Self { symbols, matrix }
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn dim(&self) -> usize {
        self.symbols.len()
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.matrix[(i, j)]
    }

    /// Variance of one symbol, if present.
    pub fn variance(&self, symbol: &str) -> Option<f64> {
        let i = self.symbols.iter().position(|s| s == symbol)?;
        Some(self.matrix[(i, i)])
    }

    /// w' Sigma w for a weight vector aligned to `self.symbols`.
    pub fn quad_form(&self, w: &[f64]) -> f64 {
        debug_assert_eq!(w.len(), self.dim());
        let mut total = 0.0;
        for i in 0..self.dim() {
            for j in 0..self.dim() {
                total += w[i] * self.matrix[(i, j)] * w[j];
            }
        }
        total
    }

    /// Submatrix reordered to `symbols`; `None` when any symbol is missing.
    pub fn aligned(&self, symbols: &[String]) -> Option<DMatrix<f64>> {
        let idx: Option<Vec<usize>> = symbols
            .iter()
            .map(|s| self.symbols.iter().position(|t| t == s))
            .collect();
        let idx = idx?;
        let n = idx.len();
        Some(DMatrix::from_fn(n, n, |i, j| {
            self.matrix[(idx[i], idx[j])]
        }))
    }

    pub fn min_eigenvalue(&self) -> f64 {
        let eigen = SymmetricEigen::new(self.matrix.clone());
        eigen.eigenvalues.iter().copied().fold(f64::INFINITY, f64::min)
    }
}

/// Covariance estimator with a configurable method and lookback.
#[derive(Debug, Clone)]
pub struct CovarianceEstimator {
    config: CovarianceConfig,
}

impl CovarianceEstimator {
    pub fn new(config: CovarianceConfig) -> Self {
        Self { config }
    }

    /// Estimate a PSD covariance matrix from the trailing window.
    ///
    /// Symbols with incomplete history inside the window are dropped from
    /// the window (not from the universe). With fewer than [`MIN_ROWS`]
    /// usable rows the estimator never errors: it falls back to a diagonal
    /// matrix of each instrument's own full-history variance and logs the
    /// degradation.
    pub fn estimate(&self, returns: &ReturnHistory) -> CovarianceMatrix {
        let window = returns.tail(self.config.lookback);
        let complete = window.complete_columns();
        let rows = window.num_rows();

        if rows < MIN_ROWS || complete.is_empty() {
            warn!(
                rows = rows,
                required = MIN_ROWS,
                "Insufficient data for covariance, degrading to diagonal"
            );
            return self.diagonal_from_full_history(returns);
        }

        let symbols: Vec<String> = complete
            .iter()
            .map(|&j| returns.symbols()[j].clone())
            .collect();
        let data = DMatrix::from_fn(rows, complete.len(), |i, j| {
            // complete columns have no gaps in the window
            window.value(i, complete[j]).unwrap_or(0.0)
        });

        let raw = match self.config.method {
            CovarianceMethod::Sample => sample_covariance(&data),
            CovarianceMethod::Diagonal => diagonal_covariance(&data),
            CovarianceMethod::LedoitWolf => ledoit_wolf(&data),
        };

        CovarianceMatrix::new(symbols, ensure_psd(raw))
    }

    fn diagonal_from_full_history(&self, returns: &ReturnHistory) -> CovarianceMatrix {
        let symbols = returns.symbols().to_vec();
        let n = symbols.len();
        let mut matrix = DMatrix::zeros(n, n);
        for (i, symbol) in symbols.iter().enumerate() {
            matrix[(i, i)] = returns.variance(symbol).max(PSD_EPS);
        }
        CovarianceMatrix::new(symbols, matrix)
    }
}

/// Clip negative eigenvalues to a small positive floor and reconstruct.
///
/// Required before the matrix can feed any convex quadratic form.
pub fn ensure_psd(matrix: DMatrix<f64>) -> DMatrix<f64> {
    let symmetric = (&matrix + matrix.transpose()) * 0.5;
    let eigen = SymmetricEigen::new(symmetric);
    let clipped = eigen.eigenvalues.map(|ev| ev.max(PSD_EPS));
    let negatives = eigen.eigenvalues.iter().filter(|&&ev| ev < 0.0).count();
    if negatives > 0 {
        debug!(clipped = negatives, "Clipped negative eigenvalues to PSD floor");
    }
    let reconstructed =
        &eigen.eigenvectors * DMatrix::from_diagonal(&clipped) * eigen.eigenvectors.transpose();
    (&reconstructed + reconstructed.transpose()) * 0.5
}

fn column_means(data: &DMatrix<f64>) -> Vec<f64> {
    (0..data.ncols())
        .map(|j| data.column(j).iter().sum::<f64>() / data.nrows() as f64)
        .collect()
}

fn centered(data: &DMatrix<f64>) -> DMatrix<f64> {
    let means = column_means(data);
    DMatrix::from_fn(data.nrows(), data.ncols(), |i, j| data[(i, j)] - means[j])
}

/// Raw sample covariance (n - 1 denominator).
fn sample_covariance(data: &DMatrix<f64>) -> DMatrix<f64> {
    let c = centered(data);
    let t = data.nrows() as f64;
    (c.transpose() * &c) / (t - 1.0)
}

/// Variances only, zero off-diagonal.
fn diagonal_covariance(data: &DMatrix<f64>) -> DMatrix<f64> {
    let full = sample_covariance(data);
    DMatrix::from_diagonal(&full.diagonal())
}

/// Ledoit-Wolf shrinkage toward a scaled identity target.
///
/// Shrinkage intensity follows the 2004 "well-conditioned estimator"
/// formulation: intensity = min(b^2, d^2) / d^2 where d^2 is the squared
/// distance of the sample covariance from the target and b^2 measures
/// estimation noise.
fn ledoit_wolf(data: &DMatrix<f64>) -> DMatrix<f64> {
    let t = data.nrows() as f64;
    let n = data.ncols();
    let c = centered(data);
    // ML sample covariance (1/T) for the shrinkage formulas
    let sample = (c.transpose() * &c) / t;

    let mu = sample.trace() / n as f64;
    let target = DMatrix::from_diagonal_element(n, n, mu);

    let d2 = (&sample - &target).norm_squared() / n as f64;
    if d2 <= f64::EPSILON {
        return sample;
    }

    // b_bar^2: average squared Frobenius distance of per-observation outer
    // products from the sample covariance
    let mut b_bar2 = 0.0;
    for i in 0..data.nrows() {
        let x = c.row(i).transpose();
        let outer = &x * x.transpose();
        b_bar2 += (&outer - &sample).norm_squared() / n as f64;
    }
    b_bar2 /= t * t;

    let b2 = b_bar2.min(d2);
    let intensity = b2 / d2;
    info!(shrinkage = format!("{intensity:.4}"), "Ledoit-Wolf shrinkage");

    target * intensity + sample * (1.0 - intensity)
}

/// Pairwise correlation matrix over complete columns of the trailing window.
///
/// Used by cluster derivation; returns the retained symbols alongside the
/// matrix.
pub fn correlation_matrix(
    returns: &ReturnHistory,
    lookback: usize,
) -> (Vec<String>, DMatrix<f64>) {
    let window = returns.tail(lookback);
    let complete = window.complete_columns();
    let symbols: Vec<String> = complete
        .iter()
        .map(|&j| returns.symbols()[j].clone())
        .collect();
    let rows = window.num_rows();
    if rows < 2 || symbols.is_empty() {
        let n = symbols.len();
        return (symbols, DMatrix::identity(n, n));
    }
    let data = DMatrix::from_fn(rows, complete.len(), |i, j| {
        window.value(i, complete[j]).unwrap_or(0.0)
    });
    let cov = sample_covariance(&data);
    let n = cov.nrows();
    let corr = DMatrix::from_fn(n, n, |i, j| {
        let denom = (cov[(i, i)] * cov[(j, j)]).sqrt();
        if denom <= f64::EPSILON {
            if i == j {
                1.0
            } else {
                0.0
            }
        } else {
            cov[(i, j)] / denom
        }
    });
    (symbols, corr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alphadesk_core::{CovarianceConfig, CovarianceMethod};
    use chrono::NaiveDate;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn history(symbols: &[&str], rows: usize, seed: u64) -> ReturnHistory {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut h = ReturnHistory::new(symbols.iter().map(|s| s.to_string()).collect());
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        for i in 0..rows {
            let row = (0..symbols.len())
                .map(|_| Some(rng.gen_range(-0.03..0.03)))
                .collect();
            h.push_row(start + chrono::Duration::days(i as i64), row);
        }
        h
    }

    fn estimator(method: CovarianceMethod, lookback: usize) -> CovarianceEstimator {
        CovarianceEstimator::new(CovarianceConfig { method, lookback })
    }

    #[test]
    fn sample_covariance_is_symmetric_psd() {
        let h = history(&["A", "B", "C"], 60, 1);
        let cov = estimator(CovarianceMethod::Sample, 60).estimate(&h);
        assert_eq!(cov.dim(), 3);
        for i in 0..3 {
            for j in 0..3 {
                assert!((cov.get(i, j) - cov.get(j, i)).abs() < 1e-12);
            }
        }
        assert!(cov.min_eigenvalue() >= 0.0);
    }

    #[test]
    fn short_history_degrades_to_diagonal() {
        let h = history(&["A", "B"], 10, 2);
        let cov = estimator(CovarianceMethod::Sample, 60).estimate(&h);
        assert_eq!(cov.dim(), 2);
        assert!((cov.get(0, 1)).abs() < 1e-12);
        assert!(cov.get(0, 0) > 0.0);
    }

    #[test]
    fn diagonal_method_zeroes_off_diagonal() {
        let h = history(&["A", "B", "C"], 40, 3);
        let cov = estimator(CovarianceMethod::Diagonal, 40).estimate(&h);
        for i in 0..3 {
            for j in 0..3 {
                if i != j {
                    assert!(cov.get(i, j).abs() < 1e-9);
                }
            }
        }
    }

    #[test]
    fn ledoit_wolf_is_psd_when_universe_exceeds_history() {
        // 25 rows, 30 symbols: sample covariance would be rank-deficient
        let symbols: Vec<String> = (0..30).map(|i| format!("S{i}")).collect();
        let refs: Vec<&str> = symbols.iter().map(|s| s.as_str()).collect();
        let h = history(&refs, 25, 4);
        let cov = estimator(CovarianceMethod::LedoitWolf, 25).estimate(&h);
        assert_eq!(cov.dim(), 30);
        assert!(cov.min_eigenvalue() >= -1e-9);
    }

    #[test]
    fn incomplete_symbols_dropped_from_window_only() {
        let mut h = ReturnHistory::new(vec!["A".into(), "B".into()]);
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        for i in 0..30 {
            let b = if i == 25 { None } else { Some(0.01) };
            h.push_row(start + chrono::Duration::days(i), vec![Some(0.005), b]);
        }
        let cov = estimator(CovarianceMethod::Sample, 30).estimate(&h);
        assert_eq!(cov.symbols(), &["A".to_string()]);
    }

    #[test]
    fn ensure_psd_clips_negative_eigenvalues() {
        // indefinite matrix
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        let fixed = ensure_psd(m);
        let eigen = SymmetricEigen::new(fixed);
        assert!(eigen.eigenvalues.iter().all(|&ev| ev >= 0.0));
    }

    #[test]
    fn correlation_matrix_has_unit_diagonal() {
        let h = history(&["A", "B", "C"], 50, 5);
        let (symbols, corr) = correlation_matrix(&h, 50);
        assert_eq!(symbols.len(), 3);
        for i in 0..3 {
            assert!((corr[(i, i)] - 1.0).abs() < 1e-9);
        }
    }
}
