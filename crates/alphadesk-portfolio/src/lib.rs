//! Alphadesk Portfolio
//!
//! Covariance estimation, heuristic and convex weight construction, and
//! cluster exposure caps.

pub mod cluster;
pub mod covariance;
pub mod heuristic;
pub mod optimizer;

pub use cluster::{derive_clusters, ClusterCapEnforcer};
pub use covariance::{correlation_matrix, ensure_psd, CovarianceEstimator, CovarianceMatrix};
pub use heuristic::HeuristicConstructor;
pub use optimizer::{ConvexOptimizer, OptimizerInfo, OptimizerOutcome};
