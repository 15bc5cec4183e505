//! Signed REST client for the exchange brokerage API
//!
//! Implements the account-data provider (balances, last prices) and the
//! destructive trade actions (cancel per currency, market-sell everything).
//! Pagination never leaks to callers: listings are drained cursor by cursor
//! and returned whole.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::auth_env::{build_signed_headers, ApiCredentials};
use crate::core::traits::{AccountDataProvider, BalanceRecord, TradeActions};
use crate::errors::CoreError;
use crate::types::ProductId;

/// REST client configuration
#[derive(Debug, Clone)]
pub struct RestConfig {
    pub base_url: String,
    /// Page size for cursor-paginated listings
    pub page_limit: u32,
    pub request_timeout_secs: u64,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.coinbase.com".to_string(),
            page_limit: 250,
            request_timeout_secs: 30,
        }
    }
}

/// Signed REST client for account data and trade actions
pub struct RestClient {
    http: reqwest::Client,
    config: RestConfig,
    credentials: ApiCredentials,
}

impl RestClient {
    pub fn new(config: RestConfig, credentials: ApiCredentials) -> Result<Self, CoreError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| CoreError::DataProvider(e.to_string()))?;
        Ok(Self {
            http,
            config,
            credentials,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, CoreError> {
        let url = format!("{}{}", self.config.base_url, path);
        let mut request = self.http.get(&url);
        for (name, value) in build_signed_headers(&self.credentials, "GET", path, None)
            .map_err(|e| CoreError::DataProvider(e.to_string()))?
        {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CoreError::DataProvider(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::DataProvider(format!(
                "GET {} failed with {}: {}",
                path, status, body
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| CoreError::DataProvider(e.to_string()))
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, CoreError> {
        let url = format!("{}{}", self.config.base_url, path);
        let body_str = body.to_string();
        let mut request = self.http.post(&url);
        for (name, value) in build_signed_headers(&self.credentials, "POST", path, Some(&body_str))
            .map_err(|e| CoreError::DataProvider(e.to_string()))?
        {
            request = request.header(name, value);
        }

        let response = request
            .header("Content-Type", "application/json")
            .body(body_str)
            .send()
            .await
            .map_err(|e| CoreError::DataProvider(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::DataProvider(format!(
                "POST {} failed with {}: {}",
                path, status, body
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| CoreError::DataProvider(e.to_string()))
    }

    /// List the ids of all open orders on a product, draining the cursor
    async fn list_open_order_ids(&self, product_id: &str) -> Result<Vec<String>, CoreError> {
        let mut ids = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut path = format!(
                "/api/v3/brokerage/orders/historical/batch?order_status=OPEN&product_id={}&limit={}",
                product_id, self.config.page_limit
            );
            if let Some(cursor) = &cursor {
                path.push_str(&format!("&cursor={}", cursor));
            }
            let page: OrdersPage = self.get_json(&path).await?;
            ids.extend(page.orders.into_iter().map(|o| o.order_id));
            if !page.has_next {
                break;
            }
            cursor = page.cursor;
            if cursor.is_none() {
                break;
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl AccountDataProvider for RestClient {
    async fn list_balances(&self) -> Result<Vec<BalanceRecord>, CoreError> {
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut path = format!(
                "/api/v3/brokerage/accounts?limit={}",
                self.config.page_limit
            );
            if let Some(cursor) = &cursor {
                path.push_str(&format!("&cursor={}", cursor));
            }
            let page: AccountsPage = self.get_json(&path).await?;
            for account in page.accounts {
                records.push(BalanceRecord {
                    currency: account.currency,
                    free: account.available_balance.value,
                    held: account.hold.value,
                });
            }
            if !page.has_next {
                break;
            }
            cursor = page.cursor;
            if cursor.is_none() {
                break;
            }
        }
        debug!(currencies = records.len(), "Fetched account balances");
        Ok(records)
    }

    async fn list_prices(
        &self,
        currencies: &[String],
    ) -> Result<HashMap<String, Decimal>, CoreError> {
        let mut prices = HashMap::new();
        // The products endpoint caps the number of ids per request
        for chunk in currencies.chunks(50) {
            let query: Vec<String> = chunk
                .iter()
                .map(|c| format!("product_ids={}", ProductId::usd(c)))
                .collect();
            let path = format!("/api/v3/brokerage/products?{}", query.join("&"));
            let response: ProductsResponse = self.get_json(&path).await?;

            for product in response.products {
                let Ok(product_id) = ProductId::parse(&product.product_id) else {
                    warn!(product_id = %product.product_id, "Skipping unparsable product id");
                    continue;
                };
                // An empty price means the product is not currently tradable
                match product.price.as_deref() {
                    None | Some("") => {}
                    Some(price) => match price.parse::<Decimal>() {
                        Ok(price) => {
                            prices.insert(product_id.base, price);
                        }
                        Err(_) => {
                            warn!(
                                product_id = %product.product_id,
                                price = %price,
                                "Skipping unparsable product price"
                            );
                        }
                    },
                }
            }
        }
        debug!(priced = prices.len(), requested = currencies.len(), "Fetched last prices");
        Ok(prices)
    }
}

#[async_trait]
impl TradeActions for RestClient {
    async fn cancel_orders(&self, currency: &str) -> Result<Vec<String>, CoreError> {
        let product_id = ProductId::usd(currency).to_string();
        let ids = self.list_open_order_ids(&product_id).await?;
        if ids.is_empty() {
            info!(product = %product_id, "No open orders to cancel");
            return Ok(Vec::new());
        }

        let body = serde_json::json!({ "order_ids": ids });
        let response: BatchCancelResponse = self
            .post_json("/api/v3/brokerage/orders/batch_cancel", &body)
            .await?;

        let mut cancelled = Vec::new();
        for result in response.results {
            if result.success {
                cancelled.push(result.order_id);
            } else {
                warn!(order_id = %result.order_id, "Exchange refused to cancel order");
            }
        }
        info!(product = %product_id, cancelled = cancelled.len(), "Cancelled open orders");
        Ok(cancelled)
    }

    async fn market_sell_all(&self, currency: &str) -> Result<(), CoreError> {
        let balances = self.list_balances().await?;
        let free = balances
            .iter()
            .find(|b| b.currency.eq_ignore_ascii_case(currency))
            .map(|b| b.free)
            .unwrap_or(Decimal::ZERO);
        if free <= Decimal::ZERO {
            info!(currency = %currency, "No free balance to sell");
            return Ok(());
        }

        let product_id = ProductId::usd(currency).to_string();
        let body = serde_json::json!({
            "client_order_id": format!("ordertools-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default()),
            "product_id": product_id,
            "side": "SELL",
            "order_configuration": {
                "market_market_ioc": { "base_size": free.to_string() }
            }
        });
        let _: serde_json::Value = self
            .post_json("/api/v3/brokerage/orders", &body)
            .await?;
        info!(product = %product_id, size = %free, "Placed market sell for entire position");
        Ok(())
    }
}

// ---- Wire formats ----

#[derive(Debug, Deserialize)]
struct AccountsPage {
    #[serde(default)]
    accounts: Vec<AccountEntry>,
    #[serde(default)]
    has_next: bool,
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountEntry {
    currency: String,
    available_balance: MoneyAmount,
    hold: MoneyAmount,
}

#[derive(Debug, Deserialize)]
struct MoneyAmount {
    value: Decimal,
}

#[derive(Debug, Deserialize)]
struct ProductsResponse {
    #[serde(default)]
    products: Vec<ProductEntry>,
}

#[derive(Debug, Deserialize)]
struct ProductEntry {
    product_id: String,
    #[serde(default)]
    price: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrdersPage {
    #[serde(default)]
    orders: Vec<OpenOrderEntry>,
    #[serde(default)]
    has_next: bool,
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenOrderEntry {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct BatchCancelResponse {
    #[serde(default)]
    results: Vec<CancelResult>,
}

#[derive(Debug, Deserialize)]
struct CancelResult {
    success: bool,
    order_id: String,
}
