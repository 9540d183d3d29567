//! Rebalance execution engine
//!
//! Diffs current broker positions against target weights and emits the
//! minimal set of orders needed to converge, respecting minimum-order and
//! minimum-delta thresholds so negligible drift never produces order spam.
//!
//! Cycle per run: CANCEL_PENDING -> FETCH_STATE -> DIFF -> SUBMIT -> DONE.
//! DONE is reachable even when individual submissions fail; the report
//! enumerates successes and failures instead of aborting on the first error.

use crate::broker::{BrokerConnector, OrderAmount};
use alphadesk_core::{BrokerError, ExecutionConfig, Position, TargetWeights};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the diff decided for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RebalanceAction {
    /// Buy this notional.
    Buy(Decimal),
    /// Sell this notional, capped below current value.
    SellPartial(Decimal),
    /// Close the position entirely (target below the dust threshold).
    Close,
}

/// One instrument's diff decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceInstruction {
    pub symbol: String,
    pub action: RebalanceAction,
    /// Raw target-minus-current delta that produced the action.
    pub delta: Decimal,
}

/// Outcome of submitting one instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderOutcome {
    pub symbol: String,
    pub action: RebalanceAction,
    pub order_id: Option<String>,
    pub error: Option<String>,
}

impl OrderOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of one rebalance cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RebalanceReport {
    pub orders_submitted: usize,
    pub buys: usize,
    pub sells: usize,
    pub failures: usize,
    pub details: Vec<OrderOutcome>,
}

/// Converts target weights into broker orders.
pub struct RebalanceExecutor {
    broker: Arc<dyn BrokerConnector>,
    config: ExecutionConfig,
}

impl RebalanceExecutor {
    pub fn new(broker: Arc<dyn BrokerConnector>, config: ExecutionConfig) -> Self {
        Self { broker, config }
    }

    /// Run one full rebalance cycle.
    ///
    /// Errors only when account state cannot be fetched; per-instrument
    /// submission failures are captured in the report.
    pub async fn execute(
        &self,
        targets: &TargetWeights,
    ) -> Result<RebalanceReport, BrokerError> {
        info!("Starting rebalance cycle");

        // CANCEL_PENDING: best effort, stale orders must not double-count
        // buying power
        if let Err(e) = self.broker.cancel_all_orders().await {
            warn!(error = %e, "Failed to cancel pending orders, continuing");
        }

        // FETCH_STATE
        let account = self.broker.get_account().await?;
        let positions = self.broker.get_positions().await?;
        info!(
            equity = %account.equity,
            positions = positions.len(),
            "Fetched account state"
        );

        // DIFF
        let instructions = diff_positions(account.equity, &positions, targets, &self.config);
        debug!(instructions = instructions.len(), "Computed rebalance diff");

        // SUBMIT: sequential, deterministic order; one failure never stops
        // the rest
        let mut report = RebalanceReport::default();
        for instruction in instructions {
            let outcome = self.submit_one(&instruction).await;
            if outcome.succeeded() {
                report.orders_submitted += 1;
                match instruction.action {
                    RebalanceAction::Buy(_) => report.buys += 1,
                    RebalanceAction::SellPartial(_) | RebalanceAction::Close => report.sells += 1,
                }
            } else {
                report.failures += 1;
            }
            report.details.push(outcome);
        }

        info!(
            submitted = report.orders_submitted,
            buys = report.buys,
            sells = report.sells,
            failures = report.failures,
            "Rebalance cycle done"
        );
        Ok(report)
    }

    async fn submit_one(&self, instruction: &RebalanceInstruction) -> OrderOutcome {
        use alphadesk_core::OrderSide;

        let symbol = instruction.symbol.as_str();
        let result = match &instruction.action {
            RebalanceAction::Buy(notional) => {
                info!(symbol = %symbol, notional = %notional, "Submitting buy");
                self.broker
                    .submit_order(symbol, OrderSide::Buy, OrderAmount::Notional(*notional))
                    .await
            }
            RebalanceAction::SellPartial(notional) => {
                info!(symbol = %symbol, notional = %notional, "Submitting sell");
                self.broker
                    .submit_order(symbol, OrderSide::Sell, OrderAmount::Notional(*notional))
                    .await
            }
            RebalanceAction::Close => {
                info!(symbol = %symbol, "Closing position");
                self.broker.close_position(symbol).await
            }
        };

        match result {
            Ok(order) => OrderOutcome {
                symbol: instruction.symbol.clone(),
                action: instruction.action.clone(),
                order_id: Some(order.id),
                error: None,
            },
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Order failed");
                OrderOutcome {
                    symbol: instruction.symbol.clone(),
                    action: instruction.action.clone(),
                    order_id: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

/// Compute the order diff between current positions and target weights.
///
/// Pure function over a snapshot of account state; running it twice against
/// unchanged state yields the same instructions, and running it against a
/// fully converged account yields none.
pub fn diff_positions(
    equity: Decimal,
    positions: &[Position],
    targets: &TargetWeights,
    config: &ExecutionConfig,
) -> Vec<RebalanceInstruction> {
    let min_notional = decimal(config.min_order_notional);
    let threshold = decimal(config.rebalance_threshold);
    let sell_cap = decimal(config.sell_safety_factor);

    let current: BTreeMap<&str, Decimal> = positions
        .iter()
        .map(|p| (p.symbol.as_str(), p.market_value))
        .collect();

    // union of held and targeted instruments, sorted for deterministic
    // submission and audit ordering
    let mut symbols: Vec<&str> = current.keys().copied().collect();
    symbols.extend(targets.symbols().map(|s| s.as_str()));
    symbols.sort_unstable();
    symbols.dedup();

    let mut instructions = Vec::new();
    for symbol in symbols {
        let current_value = current.get(symbol).copied().unwrap_or(Decimal::ZERO);
        let weight = targets.get(symbol).filter(|w| w.is_finite()).unwrap_or(0.0);
        let target_value = equity * decimal(weight.max(0.0));
        let delta = target_value - current_value;

        // negligible absolute drift
        if delta.abs() < min_notional {
            continue;
        }
        // negligible relative drift against an existing position
        if current_value > Decimal::ZERO && (delta / current_value).abs() < threshold {
            continue;
        }

        let action = if delta > Decimal::ZERO {
            RebalanceAction::Buy(delta.round_dp(2))
        } else if target_value < min_notional {
            // a partial sell would leave a dust position
            RebalanceAction::Close
        } else {
            let sell = (-delta).min(current_value * sell_cap);
            RebalanceAction::SellPartial(sell.round_dp(2))
        };

        instructions.push(RebalanceInstruction {
            symbol: symbol.to_string(),
            action,
            delta,
        });
    }
    instructions
}

fn decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alphadesk_core::{Account, Order, OrderSide, OrderStatus};
    use crate::broker::OrderQuery;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap as Map;
    use std::sync::Mutex;

    fn config() -> ExecutionConfig {
        ExecutionConfig::default()
    }

    fn position(symbol: &str, value: Decimal) -> Position {
        Position {
            symbol: symbol.into(),
            qty: Decimal::ONE,
            market_value: value,
        }
    }

    fn targets(pairs: &[(&str, f64)]) -> TargetWeights {
        TargetWeights::new(pairs.iter().map(|(s, w)| (s.to_string(), *w)).collect())
    }

    #[test]
    fn diff_emits_buys_sells_and_skips() {
        // equity 10_000; AAPL 4000 -> 6000 (buy 2000),
        // MSFT 4000 -> 1000 (partial sell), GOOGL 0 -> 2000 (buy)
        let positions = vec![
            position("AAPL", dec!(4000)),
            position("MSFT", dec!(4000)),
        ];
        let t = targets(&[("AAPL", 0.6), ("MSFT", 0.1), ("GOOGL", 0.2)]);
        let instructions = diff_positions(dec!(10000), &positions, &t, &config());

        assert_eq!(instructions.len(), 3);
        let by_symbol: Map<&str, &RebalanceInstruction> = instructions
            .iter()
            .map(|i| (i.symbol.as_str(), i))
            .collect();

        assert_eq!(by_symbol["AAPL"].action, RebalanceAction::Buy(dec!(2000)));
        assert_eq!(by_symbol["GOOGL"].action, RebalanceAction::Buy(dec!(2000)));
        match by_symbol["MSFT"].action {
            RebalanceAction::SellPartial(notional) => {
                assert_eq!(notional, dec!(3000));
                // never exceeds current value
                assert!(notional <= dec!(4000) * dec!(0.99));
            }
            ref other => panic!("expected partial sell, got {other:?}"),
        }
    }

    #[test]
    fn diff_is_idempotent_when_converged() {
        let positions = vec![
            position("AAPL", dec!(6000)),
            position("MSFT", dec!(1000)),
            position("GOOGL", dec!(2000)),
        ];
        let t = targets(&[("AAPL", 0.6), ("MSFT", 0.1), ("GOOGL", 0.2)]);
        let instructions = diff_positions(dec!(10000), &positions, &t, &config());
        assert!(instructions.is_empty());
    }

    #[test]
    fn diff_skips_sub_threshold_relative_drift() {
        // delta of $10 on a $5000 position is 0.2% < 0.5% threshold
        let positions = vec![position("AAPL", dec!(5000))];
        let t = targets(&[("AAPL", 0.501)]);
        let instructions = diff_positions(dec!(10000), &positions, &t, &config());
        assert!(instructions.is_empty());
    }

    #[test]
    fn diff_skips_dust_orders() {
        let t = targets(&[("AAPL", 0.00005)]);
        let instructions = diff_positions(dec!(10000), &[], &t, &config());
        assert!(instructions.is_empty());
    }

    #[test]
    fn dropped_target_closes_position() {
        // held but not targeted: full close, never a dust-leaving partial
        let positions = vec![position("AAPL", dec!(3000))];
        let t = targets(&[("MSFT", 0.3)]);
        let instructions = diff_positions(dec!(10000), &positions, &t, &config());
        let aapl = instructions.iter().find(|i| i.symbol == "AAPL").unwrap();
        assert_eq!(aapl.action, RebalanceAction::Close);
    }

    #[test]
    fn partial_sell_capped_below_current_value() {
        // target 50 on a 10_000 position: target is above the dust
        // threshold, so a partial sell of ~9950 is wanted; the cap keeps it
        // at 99% of current value
        let positions = vec![position("AAPL", dec!(10000))];
        let t = targets(&[("AAPL", 0.005)]);
        let instructions = diff_positions(dec!(10000), &positions, &t, &config());
        match instructions[0].action {
            RebalanceAction::SellPartial(notional) => {
                assert!(notional <= dec!(9900));
            }
            ref other => panic!("expected partial sell, got {other:?}"),
        }
    }

    #[test]
    fn non_finite_weights_treated_as_zero() {
        let positions = vec![position("AAPL", dec!(3000))];
        let t = targets(&[("AAPL", f64::NAN)]);
        let instructions = diff_positions(dec!(10000), &positions, &t, &config());
        assert_eq!(instructions[0].action, RebalanceAction::Close);
    }

    // mock broker for cycle tests

    #[derive(Default)]
    struct MockBroker {
        equity: Decimal,
        positions: Vec<Position>,
        fail_symbols: Vec<String>,
        cancel_fails: bool,
        submitted: Mutex<Vec<(String, OrderSide, Decimal)>>,
        closed: Mutex<Vec<String>>,
        cancels: Mutex<usize>,
    }

    impl MockBroker {
        fn new(equity: Decimal, positions: Vec<Position>) -> Self {
            Self {
                equity,
                positions,
                ..Default::default()
            }
        }

        fn order(symbol: &str) -> Order {
            Order {
                id: format!("mock-{symbol}"),
                symbol: symbol.into(),
                side: OrderSide::Buy,
                notional: None,
                qty: None,
                status: OrderStatus::Accepted,
            }
        }
    }

    #[async_trait]
    impl BrokerConnector for MockBroker {
        async fn get_account(&self) -> Result<Account, BrokerError> {
            Ok(Account {
                equity: self.equity,
                cash: self.equity,
                buying_power: self.equity,
            })
        }

        async fn get_positions(&self) -> Result<Vec<Position>, BrokerError> {
            Ok(self.positions.clone())
        }

        async fn get_orders(&self, _query: OrderQuery) -> Result<Vec<Order>, BrokerError> {
            Ok(Vec::new())
        }

        async fn submit_order(
            &self,
            symbol: &str,
            side: OrderSide,
            amount: OrderAmount,
        ) -> Result<Order, BrokerError> {
            if self.fail_symbols.iter().any(|s| s == symbol) {
                return Err(BrokerError::Rejected(format!("{symbol} not tradable")));
            }
            let notional = match amount {
                OrderAmount::Notional(n) => n,
                OrderAmount::Qty(q) => q,
            };
            self.submitted
                .lock()
                .unwrap()
                .push((symbol.to_string(), side, notional));
            Ok(Self::order(symbol))
        }

        async fn close_position(&self, symbol: &str) -> Result<Order, BrokerError> {
            if self.fail_symbols.iter().any(|s| s == symbol) {
                return Err(BrokerError::Rejected(format!("{symbol} locked")));
            }
            self.closed.lock().unwrap().push(symbol.to_string());
            Ok(Self::order(symbol))
        }

        async fn cancel_all_orders(&self) -> Result<(), BrokerError> {
            *self.cancels.lock().unwrap() += 1;
            if self.cancel_fails {
                return Err(BrokerError::HttpError("cancel endpoint down".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn cycle_submits_expected_orders() {
        let broker = Arc::new(MockBroker::new(
            dec!(10000),
            vec![position("AAPL", dec!(4000)), position("MSFT", dec!(4000))],
        ));
        let executor = RebalanceExecutor::new(broker.clone(), config());
        let t = targets(&[("AAPL", 0.6), ("MSFT", 0.1), ("GOOGL", 0.2)]);

        let report = executor.execute(&t).await.unwrap();
        assert_eq!(report.orders_submitted, 3);
        assert!(report.buys >= 2);
        assert!(report.sells >= 1);
        assert_eq!(report.failures, 0);
        assert_eq!(*broker.cancels.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_cycle() {
        let mut broker = MockBroker::new(
            dec!(10000),
            vec![position("AAPL", dec!(4000))],
        );
        broker.fail_symbols = vec!["AAPL".into()];
        let broker = Arc::new(broker);
        let executor = RebalanceExecutor::new(broker.clone(), config());
        let t = targets(&[("AAPL", 0.9), ("GOOGL", 0.1)]);

        let report = executor.execute(&t).await.unwrap();
        assert_eq!(report.failures, 1);
        assert_eq!(report.orders_submitted, 1);
        let googl = report.details.iter().find(|d| d.symbol == "GOOGL").unwrap();
        assert!(googl.succeeded());
    }

    #[tokio::test]
    async fn cancel_failure_is_tolerated() {
        let mut broker = MockBroker::new(dec!(10000), Vec::new());
        broker.cancel_fails = true;
        let broker = Arc::new(broker);
        let executor = RebalanceExecutor::new(broker.clone(), config());
        let t = targets(&[("AAPL", 0.5)]);

        let report = executor.execute(&t).await.unwrap();
        assert_eq!(report.orders_submitted, 1);
    }

    #[tokio::test]
    async fn converged_account_submits_nothing() {
        let broker = Arc::new(MockBroker::new(
            dec!(10000),
            vec![position("AAPL", dec!(5000)), position("MSFT", dec!(5000))],
        ));
        let executor = RebalanceExecutor::new(broker.clone(), config());
        let t = targets(&[("AAPL", 0.5), ("MSFT", 0.5)]);

        let report = executor.execute(&t).await.unwrap();
        assert_eq!(report.orders_submitted, 0);
        assert!(broker.submitted.lock().unwrap().is_empty());
    }
}
