//! Potential-account-value computation
//!
//! The valuation answers one question per currency: what would the position
//! be worth if every open sell order filled and every remaining coin were
//! sold at the best resting sell price. It is a pure function of the two
//! stores — every call starts from a clean accumulator, so recomputing
//! without intervening mutation yields an identical snapshot.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::core::balances::BalanceStore;
use crate::core::orders::OrderStore;
use crate::errors::CoreError;
use crate::types::{Order, OrderKind, Side};

/// One row of the valuation, per currency
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrencyValuation {
    pub currency: String,
    /// `(free + held) × last_price`, zero when the currency is untradeable
    pub current_value: Decimal,
    /// Resting sell notional plus balance value at the highest resting sell
    pub potential_gain: Decimal,
    /// Open orders whose base currency matches
    pub open_orders: usize,
}

/// Valuation of the whole account at one instant.
///
/// Rows are sorted by `potential_gain` descending, ties broken by currency
/// code ascending.
#[derive(Debug, Clone, Serialize)]
pub struct PotentialValueSnapshot {
    pub rows: Vec<CurrencyValuation>,
    pub total: Decimal,
    pub computed_at: DateTime<Utc>,
}

impl PartialEq for PotentialValueSnapshot {
    // computed_at is bookkeeping, not part of the value identity
    fn eq(&self, other: &Self) -> bool {
        self.rows == other.rows && self.total == other.total
    }
}

/// Compute the potential-account-value snapshot from a consistent view of
/// the stores. Never mutates either store; never divides.
pub fn compute_snapshot(
    orders: &OrderStore,
    balances: &BalanceStore,
) -> Result<PotentialValueSnapshot, CoreError> {
    let open_orders: Vec<&Order> = orders.open_orders().collect();
    check_invariants(&open_orders, balances)?;

    // Highest resting sell price per currency, one pass over the open book
    let mut highest_sell: HashMap<&str, Decimal> = HashMap::new();
    for order in &open_orders {
        if order.kind == OrderKind::Limit
            && order.side == Side::Sell
            && order.product.quote == "USD"
        {
            if let Some(price) = order.limit_price {
                let entry = highest_sell.entry(order.product.base.as_str()).or_default();
                if price > *entry {
                    *entry = price;
                }
            }
        }
    }

    // Clean accumulator every call; a currency starts at zero gain the
    // moment it is touched
    let mut gains: BTreeMap<String, Decimal> = BTreeMap::new();

    // Resting sell notional: filled sell orders convert base into quote
    for order in &open_orders {
        if order.kind != OrderKind::Limit {
            continue;
        }
        let gain = gains.entry(order.product.base.clone()).or_default();
        if order.side == Side::Sell {
            if let Some(price) = order.limit_price {
                *gain += price * order.remaining_quantity;
            }
        }
        // A buy order converts quote into base; that is not a quote-currency
        // gain in this model
    }

    // Balance valuation: remaining coins priced at the highest resting sell.
    // A currency with no resting sell order has no potential distinct from
    // its current value and contributes nothing here.
    for balance in balances.iter() {
        if balance.total_quantity() <= Decimal::ZERO {
            continue;
        }
        let gain = gains.entry(balance.currency.clone()).or_default();
        if let Some(&price) = highest_sell.get(balance.currency.as_str()) {
            if price > Decimal::ZERO {
                *gain += balance.total_quantity() * price;
            }
        }
    }

    let mut open_counts: HashMap<&str, usize> = HashMap::new();
    for order in &open_orders {
        *open_counts.entry(order.product.base.as_str()).or_default() += 1;
    }

    let mut total = Decimal::ZERO;
    let mut rows = Vec::with_capacity(gains.len());
    for (currency, potential_gain) in gains {
        let current_value = balances
            .get(&currency)
            .map(|b| {
                b.total_quantity() * b.last_price.unwrap_or(Decimal::ZERO)
            })
            .unwrap_or(Decimal::ZERO);
        let open_orders = open_counts.get(currency.as_str()).copied().unwrap_or(0);

        total += potential_gain;
        rows.push(CurrencyValuation {
            currency,
            current_value,
            potential_gain,
            open_orders,
        });
    }

    rows.sort_by(|a, b| {
        b.potential_gain
            .cmp(&a.potential_gain)
            .then_with(|| a.currency.cmp(&b.currency))
    });

    debug!(currencies = rows.len(), total = %total, "Computed valuation snapshot");
    Ok(PotentialValueSnapshot {
        rows,
        total,
        computed_at: Utc::now(),
    })
}

/// Structural invariants the stores should have enforced already; a
/// violation here is fatal to the cycle and never clamped away
fn check_invariants(open_orders: &[&Order], balances: &BalanceStore) -> Result<(), CoreError> {
    for order in open_orders {
        if order.remaining_quantity < Decimal::ZERO {
            return Err(CoreError::ComputationInvariant(format!(
                "order {} has negative remaining quantity",
                order.id
            )));
        }
        if matches!(order.limit_price, Some(p) if p < Decimal::ZERO) {
            return Err(CoreError::ComputationInvariant(format!(
                "order {} has negative price",
                order.id
            )));
        }
    }
    for balance in balances.iter() {
        if balance.free < Decimal::ZERO || balance.held < Decimal::ZERO {
            return Err(CoreError::ComputationInvariant(format!(
                "balance for {} has negative quantity",
                balance.currency
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Balance, Order, OrderStatus, ProductId};
    use rust_decimal_macros::dec;

    fn sell_limit(id: &str, base: &str, price: Decimal, qty: Decimal) -> Order {
        Order {
            id: id.to_string(),
            product: ProductId::usd(base),
            side: Side::Sell,
            kind: OrderKind::Limit,
            limit_price: Some(price),
            remaining_quantity: qty,
            status: OrderStatus::Open,
            created_at: Utc::now(),
        }
    }

    fn balance(currency: &str, free: Decimal, held: Decimal, last: Option<Decimal>) -> Balance {
        Balance {
            currency: currency.to_string(),
            free,
            held,
            last_price: last,
        }
    }

    #[test]
    fn test_btc_scenario() {
        let mut orders = OrderStore::new();
        orders
            .upsert(sell_limit("1", "BTC", dec!(50000), dec!(0.1)))
            .unwrap();
        let mut balances = BalanceStore::new();
        balances.replace_all(vec![balance("BTC", dec!(0.05), dec!(0), Some(dec!(48000)))]);

        let snapshot = compute_snapshot(&orders, &balances).unwrap();
        assert_eq!(snapshot.rows.len(), 1);

        let btc = &snapshot.rows[0];
        // 50000 * 0.1 resting notional + 0.05 * 50000 balance at best sell
        assert_eq!(btc.potential_gain, dec!(7500));
        assert_eq!(btc.current_value, dec!(2400));
        assert_eq!(btc.open_orders, 1);
        assert_eq!(snapshot.total, btc.potential_gain);
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let mut orders = OrderStore::new();
        orders
            .upsert(sell_limit("1", "BTC", dec!(50000), dec!(0.1)))
            .unwrap();
        orders
            .upsert(sell_limit("2", "ETH", dec!(2000), dec!(3)))
            .unwrap();
        let mut balances = BalanceStore::new();
        balances.replace_all(vec![
            balance("BTC", dec!(0.05), dec!(0), Some(dec!(48000))),
            balance("ETH", dec!(1), dec!(2), Some(dec!(1900))),
        ]);

        let first = compute_snapshot(&orders, &balances).unwrap();
        let second = compute_snapshot(&orders, &balances).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_total_is_exact_sum_of_rows() {
        let mut orders = OrderStore::new();
        orders
            .upsert(sell_limit("1", "BTC", dec!(50000.01), dec!(0.123)))
            .unwrap();
        orders
            .upsert(sell_limit("2", "ETH", dec!(1850.55), dec!(2.7)))
            .unwrap();
        orders
            .upsert(sell_limit("3", "DOGE", dec!(0.072), dec!(10000)))
            .unwrap();
        let balances = BalanceStore::new();

        let snapshot = compute_snapshot(&orders, &balances).unwrap();
        let sum: Decimal = snapshot.rows.iter().map(|r| r.potential_gain).sum();
        assert_eq!(snapshot.total, sum);
    }

    #[test]
    fn test_balance_without_resting_sell_contributes_nothing() {
        let orders = OrderStore::new();
        let mut balances = BalanceStore::new();
        balances.replace_all(vec![balance("ADA", dec!(100), dec!(0), Some(dec!(0.45)))]);

        let snapshot = compute_snapshot(&orders, &balances).unwrap();
        assert_eq!(snapshot.rows.len(), 1);
        assert_eq!(snapshot.rows[0].potential_gain, dec!(0));
        assert_eq!(snapshot.rows[0].current_value, dec!(45.00));
        assert_eq!(snapshot.total, dec!(0));
    }

    #[test]
    fn test_filled_order_contributes_nothing() {
        let mut orders = OrderStore::new();
        let mut filled = sell_limit("1", "BTC", dec!(50000), dec!(0));
        filled.status = OrderStatus::Filled;
        orders.upsert(filled).unwrap();
        let balances = BalanceStore::new();

        let snapshot = compute_snapshot(&orders, &balances).unwrap();
        assert!(snapshot.rows.is_empty());
        assert_eq!(snapshot.total, dec!(0));
    }

    #[test]
    fn test_buy_order_adds_no_gain_but_is_counted() {
        let mut orders = OrderStore::new();
        let mut buy = sell_limit("1", "BTC", dec!(40000), dec!(0.1));
        buy.side = Side::Buy;
        orders.upsert(buy).unwrap();
        let balances = BalanceStore::new();

        let snapshot = compute_snapshot(&orders, &balances).unwrap();
        assert_eq!(snapshot.rows.len(), 1);
        assert_eq!(snapshot.rows[0].potential_gain, dec!(0));
        assert_eq!(snapshot.rows[0].open_orders, 1);
    }

    #[test]
    fn test_missing_last_price_means_zero_current_value() {
        let mut orders = OrderStore::new();
        orders
            .upsert(sell_limit("1", "XYZ", dec!(2), dec!(10)))
            .unwrap();
        let mut balances = BalanceStore::new();
        balances.replace_all(vec![balance("XYZ", dec!(5), dec!(0), None)]);

        let snapshot = compute_snapshot(&orders, &balances).unwrap();
        assert_eq!(snapshot.rows[0].current_value, dec!(0));
        // 2 * 10 resting + 5 * 2 balance at best sell
        assert_eq!(snapshot.rows[0].potential_gain, dec!(30));
    }

    #[test]
    fn test_balances_value_at_highest_resting_sell() {
        let mut orders = OrderStore::new();
        orders
            .upsert(sell_limit("1", "ETH", dec!(1900), dec!(1)))
            .unwrap();
        orders
            .upsert(sell_limit("2", "ETH", dec!(2100), dec!(1)))
            .unwrap();
        let mut balances = BalanceStore::new();
        balances.replace_all(vec![balance("ETH", dec!(2), dec!(1), Some(dec!(1800)))]);

        let snapshot = compute_snapshot(&orders, &balances).unwrap();
        // 1900 + 2100 resting notional, plus (2 + 1) * 2100
        assert_eq!(snapshot.rows[0].potential_gain, dec!(10300));
    }

    #[test]
    fn test_ties_sort_alphabetically() {
        let mut orders = OrderStore::new();
        orders
            .upsert(sell_limit("1", "ZEC", dec!(10), dec!(1)))
            .unwrap();
        orders
            .upsert(sell_limit("2", "ADA", dec!(5), dec!(2)))
            .unwrap();
        orders
            .upsert(sell_limit("3", "BTC", dec!(20), dec!(5)))
            .unwrap();
        let balances = BalanceStore::new();

        let snapshot = compute_snapshot(&orders, &balances).unwrap();
        let order_of_rows: Vec<&str> =
            snapshot.rows.iter().map(|r| r.currency.as_str()).collect();
        // BTC leads on gain (100); ADA and ZEC tie at 10 and sort by code
        assert_eq!(order_of_rows, vec!["BTC", "ADA", "ZEC"]);
    }

    #[test]
    fn test_empty_stores_yield_empty_snapshot() {
        let mut orders = OrderStore::new();
        orders
            .upsert(sell_limit("1", "BTC", dec!(50000), dec!(0.1)))
            .unwrap();
        orders.reset();
        let balances = BalanceStore::new();

        let snapshot = compute_snapshot(&orders, &balances).unwrap();
        assert!(snapshot.rows.is_empty());
        assert_eq!(snapshot.total, dec!(0));
    }

    #[test]
    fn test_negative_balance_is_an_invariant_error() {
        let orders = OrderStore::new();
        let mut balances = BalanceStore::new();
        balances.replace_all(vec![balance("BTC", dec!(-1), dec!(0), None)]);

        let result = compute_snapshot(&orders, &balances);
        assert!(matches!(result, Err(CoreError::ComputationInvariant(_))));
    }
}
