//! Alpaca v2 REST broker connector
//!
//! Credentials come from `ALPACA_API_KEY` / `ALPACA_SECRET_KEY`; the base
//! URL defaults to the paper endpoint. GET and cancel calls are retried with
//! backoff; order submission is not retried because a timed-out submit may
//! already have been accepted broker-side.

use crate::broker::{BrokerConnector, OrderAmount, OrderQuery};
use alphadesk_core::{Account, BrokerError, ExecutionConfig, Order, OrderSide, OrderStatus, Position};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

const DEFAULT_BASE_URL: &str = "https://paper-api.alpaca.markets";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize)]
struct AlpacaAccount {
    equity: String,
    cash: String,
    buying_power: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AlpacaPosition {
    symbol: String,
    qty: String,
    market_value: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AlpacaOrder {
    id: String,
    symbol: String,
    side: String,
    #[serde(default)]
    notional: Option<String>,
    #[serde(default)]
    qty: Option<String>,
    status: String,
}

#[derive(Debug, Clone, Serialize)]
struct AlpacaOrderRequest {
    symbol: String,
    side: String,
    #[serde(rename = "type")]
    order_type: String,
    time_in_force: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    notional: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    qty: Option<String>,
}

/// Alpaca REST connector.
pub struct AlpacaConnector {
    base_url: String,
    client: Client,
    api_key: String,
    secret_key: String,
    config: ExecutionConfig,
}

impl AlpacaConnector {
    /// Build from environment variables.
    pub fn from_env(config: ExecutionConfig) -> Result<Self, BrokerError> {
        let api_key = std::env::var("ALPACA_API_KEY")
            .map_err(|_| BrokerError::MissingCredentials("ALPACA_API_KEY".into()))?;
        let secret_key = std::env::var("ALPACA_SECRET_KEY")
            .map_err(|_| BrokerError::MissingCredentials("ALPACA_SECRET_KEY".into()))?;
        let base_url =
            std::env::var("ALPACA_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Ok(Self::new(base_url, api_key, secret_key, config))
    }

    pub fn new(
        base_url: String,
        api_key: String,
        secret_key: String,
        config: ExecutionConfig,
    ) -> Self {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            base_url,
            client,
            api_key,
            secret_key,
            config,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.secret_key)
    }

    /// Send one request, mapping transport and status errors.
    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, BrokerError> {
        let response = builder
            .send()
            .await
            .map_err(|e| BrokerError::HttpError(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(BrokerError::AuthError(format!("status {status}")));
        }
        if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::Rejected(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::HttpError(format!("status {status}: {body}")));
        }
        Ok(response)
    }

    /// Retry wrapper for idempotent calls (GET, DELETE cancel).
    async fn send_with_retry(
        &self,
        method: Method,
        path: &str,
    ) -> Result<reqwest::Response, BrokerError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.send(self.request(method.clone(), path)).await {
                Ok(resp) => return Ok(resp),
                // rejections and auth failures will not heal on retry
                Err(e @ (BrokerError::AuthError(_) | BrokerError::Rejected(_))) => return Err(e),
                Err(e) => {
                    if attempts >= self.config.max_retries {
                        return Err(BrokerError::RetryExhausted {
                            attempts,
                            message: e.to_string(),
                        });
                    }
                    let backoff = self.config.retry_backoff_ms * 2u64.pow(attempts - 1);
                    warn!(
                        path = %path,
                        attempt = attempts,
                        backoff_ms = backoff,
                        error = %e,
                        "Broker call failed, retrying"
                    );
                    sleep(Duration::from_millis(backoff)).await;
                }
            }
        }
    }

    fn parse_decimal(value: &str, field: &str) -> Result<Decimal, BrokerError> {
        Decimal::from_str(value)
            .map_err(|e| BrokerError::ParseError(format!("{field}: {e}")))
    }

    fn convert_order(raw: AlpacaOrder) -> Result<Order, BrokerError> {
        let side = match raw.side.as_str() {
            "buy" => OrderSide::Buy,
            "sell" => OrderSide::Sell,
            other => return Err(BrokerError::ParseError(format!("order side: {other}"))),
        };
        let status = match raw.status.as_str() {
            "new" => OrderStatus::New,
            "accepted" | "pending_new" => OrderStatus::Accepted,
            "partially_filled" => OrderStatus::PartiallyFilled,
            "filled" => OrderStatus::Filled,
            "canceled" | "pending_cancel" => OrderStatus::Canceled,
            "rejected" => OrderStatus::Rejected,
            _ => OrderStatus::Unknown,
        };
        let notional = raw
            .notional
            .as_deref()
            .map(|v| Self::parse_decimal(v, "notional"))
            .transpose()?;
        let qty = raw
            .qty
            .as_deref()
            .map(|v| Self::parse_decimal(v, "qty"))
            .transpose()?;
        Ok(Order {
            id: raw.id,
            symbol: raw.symbol,
            side,
            notional,
            qty,
            status,
        })
    }
}

#[async_trait]
impl BrokerConnector for AlpacaConnector {
    async fn get_account(&self) -> Result<Account, BrokerError> {
        let raw: AlpacaAccount = self
            .send_with_retry(Method::GET, "/v2/account")
            .await?
            .json()
            .await
            .map_err(|e| BrokerError::ParseError(e.to_string()))?;
        Ok(Account {
            equity: Self::parse_decimal(&raw.equity, "equity")?,
            cash: Self::parse_decimal(&raw.cash, "cash")?,
            buying_power: Self::parse_decimal(&raw.buying_power, "buying_power")?,
        })
    }

    async fn get_positions(&self) -> Result<Vec<Position>, BrokerError> {
        let raw: Vec<AlpacaPosition> = self
            .send_with_retry(Method::GET, "/v2/positions")
            .await?
            .json()
            .await
            .map_err(|e| BrokerError::ParseError(e.to_string()))?;
        raw.into_iter()
            .map(|p| {
                Ok(Position {
                    qty: Self::parse_decimal(&p.qty, "qty")?,
                    market_value: Self::parse_decimal(&p.market_value, "market_value")?,
                    symbol: p.symbol,
                })
            })
            .collect()
    }

    async fn get_orders(&self, query: OrderQuery) -> Result<Vec<Order>, BrokerError> {
        let path = format!("/v2/orders?status={}", query.as_str());
        let raw: Vec<AlpacaOrder> = self
            .send_with_retry(Method::GET, &path)
            .await?
            .json()
            .await
            .map_err(|e| BrokerError::ParseError(e.to_string()))?;
        raw.into_iter().map(Self::convert_order).collect()
    }

    async fn submit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        amount: OrderAmount,
    ) -> Result<Order, BrokerError> {
        let (notional, qty) = match amount {
            OrderAmount::Notional(n) => (Some(n.round_dp(2).to_string()), None),
            OrderAmount::Qty(q) => (None, Some(q.to_string())),
        };
        let payload = AlpacaOrderRequest {
            symbol: symbol.to_string(),
            side: side.to_string(),
            order_type: "market".into(),
            time_in_force: "day".into(),
            notional,
            qty,
        };

        info!(symbol = %symbol, side = %side, "Submitting order");
        // no retry: a timed-out submit may already be live broker-side
        let response = self
            .send(self.request(Method::POST, "/v2/orders").json(&payload))
            .await?;
        let raw: AlpacaOrder = response
            .json()
            .await
            .map_err(|e| BrokerError::ParseError(e.to_string()))?;
        Self::convert_order(raw)
    }

    async fn close_position(&self, symbol: &str) -> Result<Order, BrokerError> {
        info!(symbol = %symbol, "Closing position");
        let path = format!("/v2/positions/{symbol}");
        let response = self.send(self.request(Method::DELETE, &path)).await?;
        let raw: AlpacaOrder = response
            .json()
            .await
            .map_err(|e| BrokerError::ParseError(e.to_string()))?;
        Self::convert_order(raw)
    }

    async fn cancel_all_orders(&self) -> Result<(), BrokerError> {
        debug!("Cancelling all open orders");
        match self.send_with_retry(Method::DELETE, "/v2/orders").await {
            Ok(_) => Ok(()),
            Err(e) => {
                error!(error = %e, "Cancel-all failed");
                Err(e)
            }
        }
    }
}
