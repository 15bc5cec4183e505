//! Event models for the exchange user channel

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{Order, OrderKind, OrderStatus, ProductId, Side};

#[derive(Error, Debug)]
pub enum EventError {
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),
}

/// Raw WebSocket message envelope.
///
/// Every frame the feed sends carries a `channel` plus a list of events;
/// only the `user` channel contains order data.
#[derive(Debug, Clone, Deserialize)]
pub struct WsMessage {
    pub channel: String,
    #[serde(default)]
    pub events: Vec<serde_json::Value>,
}

/// One batch of order records parsed from a user-channel message.
///
/// Order records that fail to parse are dropped and counted in `malformed`;
/// a bad record never aborts the rest of the batch.
#[derive(Debug, Clone, Default)]
pub struct OrderEventBatch {
    pub orders: Vec<Order>,
    pub malformed: usize,
}

/// Subscription request for a named channel
#[derive(Debug, Serialize)]
pub struct SubscribeRequest {
    #[serde(rename = "type")]
    pub request_type: String, // "subscribe" | "unsubscribe"
    pub channel: String,
    pub api_key: String,
    pub timestamp: String,
    pub signature: String,
}

impl SubscribeRequest {
    pub fn subscribe(channel: &str, api_key: String, timestamp: String, signature: String) -> Self {
        Self {
            request_type: "subscribe".to_string(),
            channel: channel.to_string(),
            api_key,
            timestamp,
            signature,
        }
    }

    pub fn unsubscribe(
        channel: &str,
        api_key: String,
        timestamp: String,
        signature: String,
    ) -> Self {
        Self {
            request_type: "unsubscribe".to_string(),
            channel: channel.to_string(),
            api_key,
            timestamp,
            signature,
        }
    }
}

/// User-channel event: a replay snapshot or an incremental update, both of
/// which carry whole order records
#[derive(Debug, Deserialize)]
struct UserEvent {
    #[serde(rename = "type", default)]
    _event_type: String, // "snapshot" | "update"
    #[serde(default)]
    orders: Vec<serde_json::Value>,
}

/// Wire-format order record on the user channel
#[derive(Debug, Deserialize)]
struct OrderRecord {
    order_id: String,
    product_id: ProductId,
    order_side: Side,
    order_type: OrderKind,
    #[serde(default, deserialize_with = "deserialize_optional_decimal")]
    limit_price: Option<Decimal>,
    #[serde(deserialize_with = "deserialize_decimal_flexible")]
    leaves_quantity: Decimal,
    status: OrderStatus,
    creation_time: DateTime<Utc>,
}

impl From<OrderRecord> for Order {
    fn from(record: OrderRecord) -> Self {
        Order {
            id: record.order_id,
            product: record.product_id,
            side: record.order_side,
            kind: record.order_type,
            limit_price: record.limit_price,
            remaining_quantity: record.leaves_quantity,
            status: record.status,
            created_at: record.creation_time,
        }
    }
}

/// Helper function to deserialize decimal from either string or number
fn deserialize_decimal_flexible<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{Error, Visitor};
    use std::fmt;

    struct DecimalVisitor;

    impl<'de> Visitor<'de> for DecimalVisitor {
        type Value = Decimal;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a decimal number as string or number")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: Error,
        {
            value
                .parse::<Decimal>()
                .map_err(|_| E::custom(format!("Invalid decimal string: {}", value)))
        }

        fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
        where
            E: Error,
        {
            Decimal::try_from(value)
                .map_err(|_| E::custom(format!("Invalid decimal number: {}", value)))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: Error,
        {
            Ok(Decimal::from(value))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: Error,
        {
            Ok(Decimal::from(value))
        }
    }

    deserializer.deserialize_any(DecimalVisitor)
}

/// Helper for price fields the exchange leaves empty on non-limit orders:
/// absent, `null` and `""` all mean "no price"
fn deserialize_optional_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) if s.is_empty() => Ok(None),
        Some(serde_json::Value::String(s)) => s
            .parse::<Decimal>()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("Invalid decimal string: {}", s))),
        Some(serde_json::Value::Number(n)) => {
            let s = n.to_string();
            s.parse::<Decimal>()
                .map(Some)
                .map_err(|_| D::Error::custom(format!("Invalid decimal number: {}", s)))
        }
        Some(other) => Err(D::Error::custom(format!(
            "Invalid price value: {}",
            other
        ))),
    }
}

/// Parse a raw WebSocket message into a batch of order records.
///
/// Administrative channels (`subscriptions`, `heartbeats`) parse to an empty
/// batch; an unknown channel is an error the caller can choose to ignore.
pub fn parse_message(msg: &WsMessage) -> Result<OrderEventBatch, EventError> {
    match msg.channel.as_str() {
        "user" => {
            let mut batch = OrderEventBatch::default();

            for event in &msg.events {
                let event: UserEvent = serde_json::from_value(event.clone()).map_err(|e| {
                    warn!(error = %e, "Failed to parse user channel event");
                    EventError::InvalidFormat(e.to_string())
                })?;

                for raw in event.orders {
                    match serde_json::from_value::<OrderRecord>(raw.clone()) {
                        Ok(record) => batch.orders.push(record.into()),
                        Err(e) => {
                            warn!(
                                error = %e,
                                raw = %raw,
                                "Skipping malformed order record"
                            );
                            batch.malformed += 1;
                        }
                    }
                }
            }

            debug!(
                orders = batch.orders.len(),
                malformed = batch.malformed,
                "Parsed user channel message"
            );
            Ok(batch)
        }
        "subscriptions" | "heartbeats" => {
            debug!(channel = %msg.channel, "Administrative message");
            Ok(OrderEventBatch::default())
        }
        other => Err(EventError::UnknownChannel(other.to_string())),
    }
}
