//! Convex portfolio construction
//!
//! Solves maximize `alpha.w - risk_aversion * w'Sigma*w - cost * |w - w_prev|_1`
//! subject to long-only box constraints, a gross-exposure budget, and a
//! turnover cap. The L1 terms are linearized with auxiliary variables and the
//! whole program is handed to Clarabel as a QP in CSC form.
//!
//! A failed or non-optimal solve is never a run failure: the constructor
//! falls back to a capped equal-weight allocation and records the outcome
//! explicitly in [`OptimizerInfo`] so fallbacks cannot masquerade as solved
//! runs in the audit trail.

use crate::covariance::{CovarianceEstimator, CovarianceMatrix};
use alphadesk_core::{
    AlphaSignal, OptimizerConfig, PortfolioConfig, ReturnHistory, TargetWeights,
};
use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, NonnegativeConeT, SolverStatus,
    SupportedConeT,
};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// How the weights in a result were produced.
#[derive(Debug, Clone, PartialEq)]
pub enum OptimizerOutcome {
    /// The solver returned an (almost) optimal solution.
    Optimal,
    /// The solver failed or was infeasible; equal-weight fallback used.
    Fallback { reason: String },
}

/// Audit record for one optimization. Required output, not telemetry.
#[derive(Debug, Clone)]
pub struct OptimizerInfo {
    pub outcome: OptimizerOutcome,
    pub solver_status: String,
    /// Realized L1 distance to the previous weights.
    pub turnover: f64,
    /// Positions above the negligible-weight threshold.
    pub positions: usize,
    /// Quadratic risk term w' Sigma w at the returned weights.
    pub risk_term: f64,
    /// Objective value at the returned weights.
    pub objective: f64,
}

/// Convex weight constructor.
pub struct ConvexOptimizer {
    portfolio: PortfolioConfig,
    config: OptimizerConfig,
    estimator: CovarianceEstimator,
}

impl ConvexOptimizer {
    pub fn new(
        portfolio: PortfolioConfig,
        config: OptimizerConfig,
        estimator: CovarianceEstimator,
    ) -> Self {
        Self {
            portfolio,
            config,
            estimator,
        }
    }

    /// Solve for target weights.
    ///
    /// `prev_weights` enters the transaction-cost term and the turnover cap;
    /// absent previous weights mean a cold start from zero.
    pub fn optimize(
        &self,
        alpha: &AlphaSignal,
        returns: &ReturnHistory,
        prev_weights: Option<&TargetWeights>,
        gross_exposure: f64,
    ) -> (TargetWeights, OptimizerInfo) {
        let symbols: Vec<String> = alpha
            .iter()
            .filter(|(_, score)| score.is_finite())
            .map(|(s, _)| s.clone())
            .collect();
        let n = symbols.len();

        if n == 0 {
            return (
                TargetWeights::empty(),
                self.info(
                    OptimizerOutcome::Fallback {
                        reason: "empty alpha signal".into(),
                    },
                    "empty",
                    &[],
                    &[],
                    &[],
                    None,
                ),
            );
        }

        info!(assets = n, "Optimizing portfolio");

        let alpha_vec: Vec<f64> = symbols.iter().map(|s| alpha[s]).collect();
        let w_prev: Vec<f64> = symbols
            .iter()
            .map(|s| prev_weights.and_then(|p| p.get(s)).unwrap_or(0.0))
            .collect();

        let cov = self.estimator.estimate(returns);
        let sigma = self.aligned_sigma(&cov, &symbols, returns);

        match self.solve(&symbols, &alpha_vec, &sigma, &w_prev, gross_exposure) {
            Ok((weights, status)) => {
                let cleaned = self.clean(&weights, gross_exposure);
                let info = self.info(
                    OptimizerOutcome::Optimal,
                    &status,
                    &cleaned,
                    &w_prev,
                    &alpha_vec,
                    Some(&sigma),
                );
                info!(
                    positions = info.positions,
                    turnover = format!("{:.4}", info.turnover),
                    "Optimization complete"
                );
                (self.to_weights(&symbols, cleaned), info)
            }
            Err(reason) => {
                warn!(reason = %reason, "Solver failed, using equal-weight fallback");
                let fallback = self.fallback(n, gross_exposure);
                let info = self.info(
                    OptimizerOutcome::Fallback {
                        reason: reason.clone(),
                    },
                    &reason,
                    &fallback,
                    &w_prev,
                    &alpha_vec,
                    Some(&sigma),
                );
                (self.to_weights(&symbols, fallback), info)
            }
        }
    }

    /// Covariance aligned to the alpha universe; diagonal of per-symbol
    /// variances when the estimate does not cover every symbol.
    fn aligned_sigma(
        &self,
        cov: &CovarianceMatrix,
        symbols: &[String],
        returns: &ReturnHistory,
    ) -> Vec<Vec<f64>> {
        if let Some(m) = cov.aligned(symbols) {
            let n = symbols.len();
            return (0..n)
                .map(|i| (0..n).map(|j| m[(i, j)]).collect())
                .collect();
        }
        warn!("Covariance does not cover the alpha universe, using diagonal");
        let n = symbols.len();
        let mut sigma = vec![vec![0.0; n]; n];
        for (i, s) in symbols.iter().enumerate() {
            sigma[i][i] = cov
                .variance(s)
                .unwrap_or_else(|| returns.variance(s))
                .max(1e-6);
        }
        sigma
    }

    /// Build and solve the QP. Variables are `x = [w; u]` with
    /// `u >= |w - w_prev|` elementwise.
    fn solve(
        &self,
        symbols: &[String],
        alpha: &[f64],
        sigma: &[Vec<f64>],
        w_prev: &[f64],
        gross_exposure: f64,
    ) -> Result<(Vec<f64>, String), String> {
        let n = symbols.len();
        let nvars = 2 * n;
        let lambda = self.config.risk_aversion;
        let cost = self.config.cost_bps / 10_000.0;

        // P: 2*lambda*Sigma in the w block, zero elsewhere (CSC, column-major)
        let mut p_data = Vec::new();
        let mut p_indices = Vec::new();
        let mut p_indptr = vec![0];
        for j in 0..n {
            for (i, row) in sigma.iter().enumerate() {
                let val = 2.0 * lambda * row[j];
                if val.abs() > 1e-12 {
                    p_data.push(val);
                    p_indices.push(i);
                }
            }
            p_indptr.push(p_data.len());
        }
        for _ in 0..n {
            p_indptr.push(p_data.len());
        }
        let p = CscMatrix::new(nvars, nvars, p_indptr, p_indices, p_data);

        // q: minimize -alpha.w + cost * 1'u
        let mut q = vec![0.0; nvars];
        for j in 0..n {
            q[j] = -alpha[j];
            q[n + j] = cost;
        }

        // Inequality rows (b - Ax >= 0), in order:
        //   [0, n)       -w <= 0
        //   [n, 2n)       w <= max_weight
        //   2n            sum(w) <= gross_exposure
        //   [2n+1, 3n+1)  w - u <= w_prev
        //   [3n+1, 4n+1) -w - u <= -w_prev
        //   4n+1          sum(u) <= turnover_cap
        let nrows = 4 * n + 2;
        let mut a_data = Vec::new();
        let mut a_indices = Vec::new();
        let mut a_indptr = vec![0];
        for j in 0..n {
            a_data.push(-1.0);
            a_indices.push(j);
            a_data.push(1.0);
            a_indices.push(n + j);
            a_data.push(1.0);
            a_indices.push(2 * n);
            a_data.push(1.0);
            a_indices.push(2 * n + 1 + j);
            a_data.push(-1.0);
            a_indices.push(3 * n + 1 + j);
            a_indptr.push(a_data.len());
        }
        for j in 0..n {
            a_data.push(-1.0);
            a_indices.push(2 * n + 1 + j);
            a_data.push(-1.0);
            a_indices.push(3 * n + 1 + j);
            a_data.push(1.0);
            a_indices.push(4 * n + 1);
            a_indptr.push(a_data.len());
        }
        let a = CscMatrix::new(nrows, nvars, a_indptr, a_indices, a_data);

        let mut b = vec![0.0; nrows];
        for j in 0..n {
            b[n + j] = self.portfolio.max_weight;
            b[2 * n + 1 + j] = w_prev[j];
            b[3 * n + 1 + j] = -w_prev[j];
        }
        b[2 * n] = gross_exposure;
        b[4 * n + 1] = self.config.turnover_cap;

        let cones: Vec<SupportedConeT<f64>> = vec![NonnegativeConeT(nrows)];

        let settings = DefaultSettingsBuilder::default()
            .max_iter(200)
            .verbose(false)
            .build()
            .map_err(|e| format!("settings: {e}"))?;

        let mut solver = DefaultSolver::new(&p, &q, &a, &b, &cones, settings)
            .map_err(|e| format!("solver setup: {e:?}"))?;
        solver.solve();

        let status = solver.solution.status;
        match status {
            SolverStatus::Solved | SolverStatus::AlmostSolved => {
                let w = solver.solution.x[..n].to_vec();
                Ok((w, format!("{status:?}")))
            }
            other => Err(format!("{other:?}")),
        }
    }

    /// Zero negligible weights and renormalize to the gross exposure, then
    /// re-clip at max_weight so the scale-up cannot breach the box.
    fn clean(&self, weights: &[f64], gross_exposure: f64) -> Vec<f64> {
        let mut out: Vec<f64> = weights
            .iter()
            .map(|&w| {
                let w = w.max(0.0);
                if w < self.config.min_position_weight {
                    0.0
                } else {
                    w
                }
            })
            .collect();
        let total: f64 = out.iter().sum();
        if total > 0.0 {
            let scale = gross_exposure / total;
            for w in out.iter_mut() {
                *w = (*w * scale).min(self.portfolio.max_weight);
            }
        }
        out
    }

    fn fallback(&self, n: usize, gross_exposure: f64) -> Vec<f64> {
        let w = (gross_exposure / n as f64).min(self.portfolio.max_weight);
        vec![w; n]
    }

    fn to_weights(&self, symbols: &[String], weights: Vec<f64>) -> TargetWeights {
        let map: BTreeMap<String, f64> = symbols
            .iter()
            .cloned()
            .zip(weights)
            .filter(|(_, w)| *w > 0.0)
            .collect();
        TargetWeights::new(map)
    }

    fn info(
        &self,
        outcome: OptimizerOutcome,
        status: &str,
        weights: &[f64],
        w_prev: &[f64],
        alpha: &[f64],
        sigma: Option<&Vec<Vec<f64>>>,
    ) -> OptimizerInfo {
        let turnover = weights
            .iter()
            .zip(w_prev.iter().chain(std::iter::repeat(&0.0)))
            .map(|(w, p)| (w - p).abs())
            .sum();
        let positions = weights
            .iter()
            .filter(|&&w| w > self.config.min_position_weight)
            .count();
        let risk_term = match sigma {
            Some(sigma) if !weights.is_empty() => {
                let n = weights.len();
                let mut total = 0.0;
                for i in 0..n {
                    for j in 0..n {
                        total += weights[i] * sigma[i][j] * weights[j];
                    }
                }
                total
            }
            _ => 0.0,
        };
        let alpha_term: f64 = weights
            .iter()
            .zip(alpha.iter().chain(std::iter::repeat(&0.0)))
            .map(|(w, a)| w * a)
            .sum();
        let objective = alpha_term
            - self.config.risk_aversion * risk_term
            - self.config.cost_bps / 10_000.0 * turnover;
        OptimizerInfo {
            outcome,
            solver_status: status.to_string(),
            turnover,
            positions,
            risk_term,
            objective,
        }
    }
}
