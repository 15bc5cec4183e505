//! Keyed order cache fed by user-channel events

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::errors::CoreError;
use crate::types::{Order, OrderKind, OrderStatus};
use rust_decimal::Decimal;

/// In-memory cache of order records, keyed by order id.
///
/// The latest ingested event for an id fully replaces the prior record; no
/// ordering guarantee is assumed from the transport. Records whose status has
/// left `Open` are retained for history but excluded from the open view.
#[derive(Debug, Default, Clone)]
pub struct OrderStore {
    orders: HashMap<String, Order>,
}

impl OrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record keyed by `order.id`.
    ///
    /// Validation is structural only: a garbled record (empty id, negative
    /// remaining quantity, limit order without a price) is rejected and
    /// reported, never inserted.
    pub fn upsert(&mut self, order: Order) -> Result<(), CoreError> {
        if order.id.is_empty() {
            warn!("Rejecting order event with empty id");
            return Err(CoreError::MalformedEvent("empty order id".to_string()));
        }
        if order.remaining_quantity < Decimal::ZERO {
            warn!(order_id = %order.id, "Rejecting order event with negative remaining quantity");
            return Err(CoreError::MalformedEvent(format!(
                "negative remaining quantity on order {}",
                order.id
            )));
        }
        match (order.kind, order.limit_price) {
            (OrderKind::Limit, None) => {
                warn!(order_id = %order.id, "Rejecting limit order without a price");
                return Err(CoreError::MalformedEvent(format!(
                    "limit order {} has no price",
                    order.id
                )));
            }
            (_, Some(price)) if price < Decimal::ZERO => {
                warn!(order_id = %order.id, "Rejecting order with negative price");
                return Err(CoreError::MalformedEvent(format!(
                    "negative price on order {}",
                    order.id
                )));
            }
            _ => {}
        }

        debug!(order_id = %order.id, status = %order.status, "Upserting order");
        self.orders.insert(order.id.clone(), order);
        Ok(())
    }

    /// Clear all records.
    ///
    /// Used when the transport reconnects and an authoritative replay is
    /// about to begin, so stale entries cannot linger.
    pub fn reset(&mut self) {
        self.orders.clear();
    }

    /// All records currently in `Open` status. Iteration order is
    /// unspecified; callers must not rely on it.
    pub fn open_orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values().filter(|o| o.is_open())
    }

    /// Number of records held, open or not
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Order> {
        self.orders.get(id)
    }
}
