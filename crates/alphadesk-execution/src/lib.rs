//! Alphadesk Execution
//!
//! Broker connectivity and the rebalance engine that converges live
//! positions onto target weights.

pub mod alpaca;
pub mod broker;
pub mod rebalance;

pub use alpaca::AlpacaConnector;
pub use broker::{BrokerConnector, OrderAmount, OrderQuery};
pub use rebalance::{
    diff_positions, OrderOutcome, RebalanceAction, RebalanceExecutor, RebalanceInstruction,
    RebalanceReport,
};
