//! Broker connector abstraction
//!
//! The single shared mutable resource of a rebalance cycle. Callers must
//! ensure only one cycle runs per account at a time; nothing here locks.

use alphadesk_core::{Account, BrokerError, Order, OrderSide, Position};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Order sizing: dollar notional or share quantity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderAmount {
    Notional(Decimal),
    Qty(Decimal),
}

/// Order query filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderQuery {
    Open,
    Closed,
    All,
}

impl OrderQuery {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::All => "all",
        }
    }
}

/// Brokerage interface consumed by the rebalance executor.
///
/// Every method may fail with a transport error; the executor catches
/// per-call and continues where the cycle design allows. Reads and cancels
/// are safe to retry; `submit_order` is not idempotent and must never be
/// retried after broker acceptance.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn get_account(&self) -> Result<Account, BrokerError>;

    async fn get_positions(&self) -> Result<Vec<Position>, BrokerError>;

    async fn get_orders(&self, query: OrderQuery) -> Result<Vec<Order>, BrokerError>;

    async fn submit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        amount: OrderAmount,
    ) -> Result<Order, BrokerError>;

    /// Close a position completely, leaving no dust.
    async fn close_position(&self, symbol: &str) -> Result<Order, BrokerError>;

    async fn cancel_all_orders(&self) -> Result<(), BrokerError>;
}
