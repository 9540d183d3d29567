//! Heuristic portfolio construction
//!
//! Converts an alpha score vector into target weights: top-N selection,
//! inverse-volatility base weights, an optional event-risk overlay, and a
//! max-weight cap with cap-aware renormalization. The output never contains
//! a non-finite weight.

use alphadesk_core::{AlphaSignal, PortfolioConfig, RiskTable, TargetWeights};
use std::collections::BTreeMap;
use tracing::{debug, error, warn};

/// Volatility forecasts are floored here before inversion.
const MIN_VOL: f64 = 0.001;

/// Heuristic weight constructor.
#[derive(Debug, Clone)]
pub struct HeuristicConstructor {
    config: PortfolioConfig,
}

impl HeuristicConstructor {
    pub fn new(config: PortfolioConfig) -> Self {
        Self { config }
    }

    /// Build target weights from alpha scores and risk estimates.
    ///
    /// An empty or all-invalid alpha signal yields empty weights, not an
    /// error. Missing `vol_hat` for the whole selection falls back to equal
    /// weighting; a missing `event_risk` entry means no overlay for that
    /// instrument.
    pub fn construct(&self, alpha: &AlphaSignal, risk: &RiskTable) -> TargetWeights {
        // 1. Drop invalid scores, rank descending, keep top-N.
        let mut ranked: Vec<(&String, f64)> = alpha
            .iter()
            .filter(|(_, score)| score.is_finite())
            .map(|(s, score)| (s, *score))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked.truncate(self.config.top_n);

        if ranked.is_empty() {
            debug!("Empty alpha signal, returning empty weights");
            return TargetWeights::empty();
        }

        let selected: Vec<&String> = ranked.iter().map(|(s, _)| *s).collect();
        let n = selected.len();

        // 2. Base weights: inverse volatility, equal weight when no vol data.
        let has_vol = selected
            .iter()
            .any(|s| risk.get(*s).and_then(|r| r.vol_hat).is_some());
        let mut weights: Vec<f64> = if has_vol {
            selected
                .iter()
                .map(|s| {
                    let vol = risk
                        .get(*s)
                        .and_then(|r| r.vol_hat)
                        .unwrap_or(0.0)
                        .max(MIN_VOL);
                    1.0 / vol
                })
                .collect()
        } else {
            warn!("No volatility forecasts available, falling back to equal weight");
            vec![1.0; n]
        };
        normalize(&mut weights);

        // 3. Event-risk overlay.
        if self.config.event_overlay.enabled {
            let overlay = &self.config.event_overlay;
            for (w, symbol) in weights.iter_mut().zip(&selected) {
                let event_risk = risk
                    .get(*symbol)
                    .and_then(|r| r.event_risk)
                    .unwrap_or(0.0);
                let mult = (1.0 - overlay.alpha * event_risk).max(overlay.multiplier_floor);
                *w *= mult;
            }
            // 4. Renormalize after the overlay.
            normalize(&mut weights);
        }

        // 5/6. Cap at max_weight and redistribute the excess among uncapped
        // names; repeated so no weight ends above the cap.
        cap_and_redistribute(&mut weights, self.config.max_weight);

        // Scale the unit budget to the configured gross exposure.
        let gross = self.config.gross_exposure;
        if (gross - 1.0).abs() > f64::EPSILON {
            for w in weights.iter_mut() {
                *w = (*w * gross).min(self.config.max_weight);
            }
        }

        // 7. Final safety pass: no non-finite value may escape.
        for (w, symbol) in weights.iter_mut().zip(&selected) {
            if !w.is_finite() {
                error!(symbol = %symbol, "Non-finite weight scrubbed to zero");
                *w = 0.0;
            }
        }

        let map: BTreeMap<String, f64> = selected
            .into_iter()
            .cloned()
            .zip(weights)
            .collect();
        TargetWeights::new(map)
    }
}

fn normalize(weights: &mut [f64]) {
    let total: f64 = weights.iter().sum();
    if total > 0.0 {
        for w in weights.iter_mut() {
            *w /= total;
        }
    }
}

/// Clip weights to `cap`, renormalizing the uncapped remainder to absorb the
/// freed mass. Converges because the capped set only grows; if every name
/// ends at the cap the total is allowed to fall below 1.
fn cap_and_redistribute(weights: &mut [f64], cap: f64) {
    let n = weights.len();
    let mut capped = vec![false; n];
    loop {
        let capped_total: f64 = weights
            .iter()
            .zip(&capped)
            .filter(|(_, &c)| c)
            .map(|(w, _)| *w)
            .sum();
        let free_total: f64 = weights
            .iter()
            .zip(&capped)
            .filter(|(_, &c)| !c)
            .map(|(w, _)| *w)
            .sum();
        if free_total <= 0.0 {
            break;
        }
        let scale = ((1.0 - capped_total) / free_total).max(0.0);
        let mut newly_capped = false;
        for (w, c) in weights.iter_mut().zip(capped.iter_mut()) {
            if *c {
                continue;
            }
            *w *= scale;
            if *w >= cap {
                *w = cap;
                *c = true;
                newly_capped = true;
            }
        }
        if !newly_capped {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alphadesk_core::{EventOverlayConfig, RiskEstimate};

    fn config(top_n: usize, max_weight: f64) -> PortfolioConfig {
        PortfolioConfig {
            top_n,
            max_weight,
            ..PortfolioConfig::default()
        }
    }

    fn alpha(pairs: &[(&str, f64)]) -> AlphaSignal {
        pairs.iter().map(|(s, v)| (s.to_string(), *v)).collect()
    }

    fn risk_with_vol(pairs: &[(&str, f64)]) -> RiskTable {
        pairs
            .iter()
            .map(|(s, vol)| {
                (
                    s.to_string(),
                    RiskEstimate {
                        vol_hat: Some(*vol),
                        event_risk: None,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn inverse_vol_weighting_sums_to_one() {
        // vol 0.10 / 0.20 / 0.40 => weights proportional to 10 / 5 / 2.5
        let constructor = HeuristicConstructor::new(config(3, 1.0));
        let a = alpha(&[("A", 0.05), ("B", 0.03), ("C", 0.01)]);
        let r = risk_with_vol(&[("A", 0.10), ("B", 0.20), ("C", 0.40)]);
        let w = constructor.construct(&a, &r);

        let (wa, wb, wc) = (
            w.get("A").unwrap(),
            w.get("B").unwrap(),
            w.get("C").unwrap(),
        );
        assert!((w.total() - 1.0).abs() < 1e-9);
        assert!(wa > wb && wb > wc);
        assert!((wa / wb - 2.0).abs() < 1e-9);
        assert!((wb / wc - 2.0).abs() < 1e-9);
    }

    #[test]
    fn empty_alpha_gives_empty_weights() {
        let constructor = HeuristicConstructor::new(config(10, 0.1));
        let w = constructor.construct(&AlphaSignal::new(), &RiskTable::new());
        assert!(w.is_empty());
    }

    #[test]
    fn nan_scores_are_dropped() {
        let constructor = HeuristicConstructor::new(config(10, 1.0));
        let a = alpha(&[("A", 0.05), ("B", f64::NAN)]);
        let w = constructor.construct(&a, &RiskTable::new());
        assert_eq!(w.len(), 1);
        assert!((w.get("A").unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn top_n_limits_selection() {
        let constructor = HeuristicConstructor::new(config(2, 1.0));
        let a = alpha(&[("A", 0.3), ("B", 0.2), ("C", 0.1)]);
        let w = constructor.construct(&a, &RiskTable::new());
        assert_eq!(w.len(), 2);
        assert!(w.get("C").is_none());
    }

    #[test]
    fn missing_vol_column_falls_back_to_equal_weight() {
        let constructor = HeuristicConstructor::new(config(3, 1.0));
        let a = alpha(&[("A", 0.3), ("B", 0.2), ("C", 0.1)]);
        let w = constructor.construct(&a, &RiskTable::new());
        for s in ["A", "B", "C"] {
            assert!((w.get(s).unwrap() - 1.0 / 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn event_overlay_shrinks_risky_names() {
        let mut cfg = config(2, 1.0);
        cfg.event_overlay = EventOverlayConfig {
            enabled: true,
            alpha: 1.0,
            multiplier_floor: 0.25,
        };
        let constructor = HeuristicConstructor::new(cfg);
        let a = alpha(&[("A", 0.3), ("B", 0.2)]);
        let mut r = RiskTable::new();
        r.insert(
            "A".into(),
            RiskEstimate {
                vol_hat: Some(0.2),
                event_risk: Some(0.9),
            },
        );
        r.insert(
            "B".into(),
            RiskEstimate {
                vol_hat: Some(0.2),
                event_risk: Some(0.0),
            },
        );
        let w = constructor.construct(&a, &r);
        assert!(w.get("A").unwrap() < w.get("B").unwrap());
        assert!((w.total() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn no_weight_exceeds_cap_after_renormalization() {
        // 3 names, cap 0.25: renormalizing naively would push each to 1/3
        let constructor = HeuristicConstructor::new(config(3, 0.25));
        let a = alpha(&[("A", 0.3), ("B", 0.2), ("C", 0.1)]);
        let w = constructor.construct(&a, &RiskTable::new());
        for (_, &weight) in w.iter() {
            assert!(weight <= 0.25 + 1e-9);
        }
        assert!(w.total() <= 1.0 + 1e-9);
        assert!(w.validate(0.25, 1.0).is_ok());
    }

    #[test]
    fn concentrated_vol_gets_capped_and_excess_redistributed() {
        // A's tiny vol would give it ~87% uncapped
        let constructor = HeuristicConstructor::new(config(3, 0.5));
        let a = alpha(&[("A", 0.3), ("B", 0.2), ("C", 0.1)]);
        let r = risk_with_vol(&[("A", 0.01), ("B", 0.2), ("C", 0.2)]);
        let w = constructor.construct(&a, &r);
        assert!((w.get("A").unwrap() - 0.5).abs() < 1e-9);
        assert!((w.total() - 1.0).abs() < 1e-9);
        assert!(w.validate(0.5, 1.0).is_ok());
    }
}
