//! Trait definitions for the external collaborators of the core

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::broadcast;

use crate::errors::CoreError;
use crate::ws::events::OrderEventBatch;

/// Raw per-currency balance row as reported by the provider, before prices
/// are attached
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceRecord {
    pub currency: String,
    pub free: Decimal,
    pub held: Decimal,
}

/// Streaming transport that delivers order-event batches.
///
/// The transport gives no marker for the end of the historical replay after a
/// subscribe; the coordinator compensates with a bounded settling window.
#[async_trait]
pub trait OrderFeed: Send {
    /// Establish the connection
    async fn open(&mut self) -> Result<(), CoreError>;

    /// Subscribe to a named channel
    async fn subscribe(&mut self, channel: &str) -> Result<(), CoreError>;

    /// Unsubscribe from a named channel
    async fn unsubscribe(&mut self, channel: &str) -> Result<(), CoreError>;

    /// Close the connection and release the socket
    async fn close(&mut self) -> Result<(), CoreError>;

    /// Receiver for inbound order-event batches
    fn events(&self) -> broadcast::Receiver<OrderEventBatch>;
}

/// Account data provider for balances and last prices.
///
/// Pagination is the provider's concern; callers always see complete listings.
#[async_trait]
pub trait AccountDataProvider: Send + Sync {
    /// List every currency the account holds
    async fn list_balances(&self) -> Result<Vec<BalanceRecord>, CoreError>;

    /// Last traded price per currency for the USD product; a currency with no
    /// tradable product is absent from the result
    async fn list_prices(
        &self,
        currencies: &[String],
    ) -> Result<HashMap<String, Decimal>, CoreError>;
}

/// Destructive account actions, keyed by currency.
///
/// The core only ever supplies the currency; order lookup, request building
/// and error handling belong to the implementation.
#[async_trait]
pub trait TradeActions: Send + Sync {
    /// Cancel all open orders on the currency's USD product; returns the ids
    /// that were cancelled
    async fn cancel_orders(&self, currency: &str) -> Result<Vec<String>, CoreError>;

    /// Market-sell the entire free balance of the currency
    async fn market_sell_all(&self, currency: &str) -> Result<(), CoreError>;
}
