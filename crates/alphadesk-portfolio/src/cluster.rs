//! Cluster exposure caps
//!
//! Caps aggregate weight per correlation cluster to control hidden
//! concentration in related names. The enforcer shrinks every member of an
//! over-cap cluster proportionally, preserving relative ranking within the
//! cluster, and performs no renormalization back to full exposure; that is
//! the caller's decision.

use crate::covariance::correlation_matrix;
use alphadesk_core::{ClusterAssignment, ClusterConfig, ReturnHistory, TargetWeights, UNASSIGNED_CLUSTER};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Enforces a maximum aggregate weight per cluster.
#[derive(Debug, Clone)]
pub struct ClusterCapEnforcer {
    config: ClusterConfig,
}

impl ClusterCapEnforcer {
    pub fn new(config: ClusterConfig) -> Self {
        Self { config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Apply cluster caps to a weight vector.
    ///
    /// Instruments without an assignment are singleton clusters
    /// ([`UNASSIGNED_CLUSTER`]) and are only shrunk when they individually
    /// exceed the cap. Disabled configuration is a strict pass-through.
    pub fn apply_caps(
        &self,
        weights: &TargetWeights,
        clusters: &ClusterAssignment,
    ) -> TargetWeights {
        if !self.config.enabled {
            return weights.clone();
        }

        let cap = self.config.max_cluster_exposure;

        // Aggregate exposure per assigned cluster.
        let mut totals: BTreeMap<i32, f64> = BTreeMap::new();
        for (symbol, &w) in weights.iter() {
            let cluster = cluster_of(clusters, symbol);
            if cluster != UNASSIGNED_CLUSTER {
                *totals.entry(cluster).or_insert(0.0) += w;
            }
        }

        let mut scaled = BTreeMap::new();
        for (symbol, &w) in weights.iter() {
            let cluster = cluster_of(clusters, symbol);
            let new_w = if cluster == UNASSIGNED_CLUSTER {
                // singleton: capped only by its own weight
                w.min(cap)
            } else {
                let total = totals[&cluster];
                if total > cap {
                    w * (cap / total)
                } else {
                    w
                }
            };
            scaled.insert(symbol.clone(), new_w);
        }

        for (cluster, total) in &totals {
            if *total > cap {
                info!(
                    cluster = cluster,
                    exposure = format!("{total:.4}"),
                    cap = cap,
                    "Cluster over cap, scaling members"
                );
            }
        }

        TargetWeights::new(scaled)
    }

    /// HHI-style concentration index over cluster aggregates. Lower is more
    /// diversified.
    pub fn concentration_index(
        &self,
        weights: &TargetWeights,
        clusters: &ClusterAssignment,
    ) -> f64 {
        let mut totals: BTreeMap<i32, f64> = BTreeMap::new();
        for (symbol, &w) in weights.iter() {
            *totals.entry(cluster_of(clusters, symbol)).or_insert(0.0) += w;
        }
        totals.values().map(|t| t * t).sum()
    }
}

fn cluster_of(clusters: &ClusterAssignment, symbol: &str) -> i32 {
    clusters.get(symbol).copied().unwrap_or(UNASSIGNED_CLUSTER)
}

/// Derive a cluster assignment from the return correlation structure.
///
/// Single-linkage over the pairwise correlation graph: symbols whose
/// correlation exceeds the configured threshold end up in the same cluster.
/// Cluster ids are small integers ordered by first member; symbols dropped
/// from the correlation window get no assignment.
pub fn derive_clusters(
    returns: &ReturnHistory,
    lookback: usize,
    correlation_threshold: f64,
) -> ClusterAssignment {
    let (symbols, corr) = correlation_matrix(returns, lookback);
    let n = symbols.len();
    if n == 0 {
        return ClusterAssignment::new();
    }

    // union-find over the threshold graph
    let mut parent: Vec<usize> = (0..n).collect();
    fn find(parent: &mut Vec<usize>, i: usize) -> usize {
        if parent[i] != i {
            let root = find(parent, parent[i]);
            parent[i] = root;
        }
        parent[i]
    }
    for i in 0..n {
        for j in (i + 1)..n {
            if corr[(i, j)] > correlation_threshold {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[rj.max(ri)] = rj.min(ri);
                }
            }
        }
    }

    // relabel roots to consecutive ids in symbol order
    let mut next_id = 0;
    let mut root_to_id: BTreeMap<usize, i32> = BTreeMap::new();
    let mut assignment = ClusterAssignment::new();
    for i in 0..n {
        let root = find(&mut parent, i);
        let id = *root_to_id.entry(root).or_insert_with(|| {
            let id = next_id;
            next_id += 1;
            id
        });
        assignment.insert(symbols[i].clone(), id);
    }
    debug!(
        symbols = n,
        clusters = next_id,
        "Derived correlation clusters"
    );
    assignment
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn weights(pairs: &[(&str, f64)]) -> TargetWeights {
        TargetWeights::new(pairs.iter().map(|(s, w)| (s.to_string(), *w)).collect())
    }

    fn clusters(pairs: &[(&str, i32)]) -> ClusterAssignment {
        pairs.iter().map(|(s, c)| (s.to_string(), *c)).collect()
    }

    fn enforcer(enabled: bool, cap: f64) -> ClusterCapEnforcer {
        ClusterCapEnforcer::new(ClusterConfig {
            enabled,
            max_cluster_exposure: cap,
            correlation_threshold: 0.7,
        })
    }

    #[test]
    fn disabled_is_identity() {
        let w = weights(&[("A", 0.4), ("B", 0.3)]);
        let out = enforcer(false, 0.25).apply_caps(&w, &clusters(&[("A", 0), ("B", 0)]));
        assert_eq!(out, w);
    }

    #[test]
    fn over_cap_cluster_shrinks_proportionally() {
        let w = weights(&[("A", 0.20), ("B", 0.10), ("C", 0.05)]);
        let c = clusters(&[("A", 0), ("B", 0), ("C", 1)]);
        let out = enforcer(true, 0.25).apply_caps(&w, &c);

        // cluster 0 total 0.30 -> scaled by 0.25/0.30
        let scale = 0.25 / 0.30;
        assert!((out.get("A").unwrap() - 0.20 * scale).abs() < 1e-12);
        assert!((out.get("B").unwrap() - 0.10 * scale).abs() < 1e-12);
        // relative ranking preserved
        assert!(out.get("A").unwrap() > out.get("B").unwrap());
        // cluster 1 untouched
        assert!((out.get("C").unwrap() - 0.05).abs() < 1e-12);

        let post: f64 = out.get("A").unwrap() + out.get("B").unwrap();
        assert!(post <= 0.25 + 1e-9);
    }

    #[test]
    fn unassigned_singletons_only_cap_individually() {
        let w = weights(&[("A", 0.30), ("B", 0.10)]);
        let out = enforcer(true, 0.25).apply_caps(&w, &ClusterAssignment::new());
        assert!((out.get("A").unwrap() - 0.25).abs() < 1e-12);
        assert!((out.get("B").unwrap() - 0.10).abs() < 1e-12);
    }

    #[test]
    fn concentration_index_is_hhi() {
        let w = weights(&[("A", 0.5), ("B", 0.5)]);
        let e = enforcer(true, 0.25);
        // same cluster: one block of weight 1.0
        let same = e.concentration_index(&w, &clusters(&[("A", 0), ("B", 0)]));
        assert!((same - 1.0).abs() < 1e-12);
        // split clusters: 0.25 + 0.25
        let split = e.concentration_index(&w, &clusters(&[("A", 0), ("B", 1)]));
        assert!((split - 0.5).abs() < 1e-12);
    }

    #[test]
    fn derive_clusters_groups_correlated_symbols() {
        // A and B identical returns, C independent pattern
        let mut h = ReturnHistory::new(vec!["A".into(), "B".into(), "C".into()]);
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        for i in 0..40 {
            let x = (i as f64 * 0.7).sin() * 0.01;
            let y = if i % 2 == 0 { 0.01 } else { -0.01 };
            h.push_row(
                start + chrono::Duration::days(i),
                vec![Some(x), Some(x), Some(y)],
            );
        }
        let assignment = derive_clusters(&h, 40, 0.9);
        assert_eq!(assignment["A"], assignment["B"]);
        assert_ne!(assignment["A"], assignment["C"]);
    }
}
