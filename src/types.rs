//! Common type definitions used across the ordertools system

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Trading side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Hash)]
pub enum Side {
    Buy,
    Sell,
}

impl<'de> serde::Deserialize<'de> for Side {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.to_lowercase().as_str() {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            _ => Err(serde::de::Error::unknown_variant(&s, &["buy", "sell"])),
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "Buy"),
            Side::Sell => write!(f, "Sell"),
        }
    }
}

/// Order kind — only limit orders rest on the book; everything the user
/// channel replays as "open" is a limit order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Hash)]
pub enum OrderKind {
    Limit,
    Market,
}

impl<'de> serde::Deserialize<'de> for OrderKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.to_lowercase().as_str() {
            "limit" => Ok(OrderKind::Limit),
            "market" => Ok(OrderKind::Market),
            _ => Err(serde::de::Error::unknown_variant(&s, &["limit", "market"])),
        }
    }
}

impl std::fmt::Display for OrderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderKind::Limit => write!(f, "Limit"),
            OrderKind::Market => write!(f, "Market"),
        }
    }
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Open,
    Filled,
    Cancelled,
    Rejected,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Open => write!(f, "Open"),
            OrderStatus::Filled => write!(f, "Filled"),
            OrderStatus::Cancelled => write!(f, "Cancelled"),
            OrderStatus::Rejected => write!(f, "Rejected"),
        }
    }
}

#[derive(Error, Debug)]
#[error("Invalid product id: {0}")]
pub struct ProductIdError(String);

/// Product identifier, e.g. `BTC-USD`. The quote currency is always USD in
/// this system.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProductId {
    pub base: String,
    pub quote: String,
}

impl Serialize for ProductId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl ProductId {
    /// Build the USD product for a base currency
    pub fn usd(base: &str) -> Self {
        Self {
            base: base.to_uppercase(),
            quote: "USD".to_string(),
        }
    }

    /// Parse `"BTC-USD"` style product ids
    pub fn parse(s: &str) -> Result<Self, ProductIdError> {
        match s.split_once('-') {
            Some((base, quote)) if !base.is_empty() && !quote.is_empty() => Ok(Self {
                base: base.to_uppercase(),
                quote: quote.to_uppercase(),
            }),
            _ => Err(ProductIdError(s.to_string())),
        }
    }
}

impl<'de> serde::Deserialize<'de> for ProductId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ProductId::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.base, self.quote)
    }
}

/// A single order record as held by the order store.
///
/// The latest ingested event for an id fully replaces the prior record; no
/// field is patched incrementally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Exchange-assigned order id, globally unique
    pub id: String,
    /// Product the order rests on
    pub product: ProductId,
    pub side: Side,
    pub kind: OrderKind,
    /// Present for limit orders; a limit order without a price is malformed
    pub limit_price: Option<Decimal>,
    /// Quantity not yet filled, in base currency
    pub remaining_quantity: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn is_open(&self) -> bool {
        self.status == OrderStatus::Open
    }
}

/// Per-currency balance as reported by the account data provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub currency: String,
    /// Quantity tradable now
    pub free: Decimal,
    /// Quantity locked by open orders
    pub held: Decimal,
    /// Most recent traded price; `None` when the currency is untradeable,
    /// which is distinct from a quoted price of zero
    pub last_price: Option<Decimal>,
}

impl Balance {
    /// Total quantity, free plus held
    pub fn total_quantity(&self) -> Decimal {
        self.free + self.held
    }
}
