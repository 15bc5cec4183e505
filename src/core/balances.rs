//! Per-currency balance table, replaced wholesale per snapshot

use std::collections::HashMap;

use crate::types::Balance;

/// Cache of per-currency balances.
///
/// Balance data has no delta stream in this system, only periodic full
/// snapshots, so the table is swapped atomically and never patched: a reader
/// can never observe a mix of old and new currencies, and a currency absent
/// from the newest snapshot is gone.
#[derive(Debug, Default, Clone)]
pub struct BalanceStore {
    balances: HashMap<String, Balance>,
}

impl BalanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap the entire table for a new snapshot
    pub fn replace_all(&mut self, balances: Vec<Balance>) {
        self.balances = balances
            .into_iter()
            .map(|b| (b.currency.clone(), b))
            .collect();
    }

    pub fn get(&self, currency: &str) -> Option<&Balance> {
        self.balances.get(currency)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Balance> {
        self.balances.values()
    }

    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn balance(currency: &str, free: rust_decimal::Decimal) -> Balance {
        Balance {
            currency: currency.to_string(),
            free,
            held: dec!(0),
            last_price: None,
        }
    }

    #[test]
    fn test_replace_all_swaps_wholesale() {
        let mut store = BalanceStore::new();
        store.replace_all(vec![balance("BTC", dec!(1)), balance("ETH", dec!(2))]);
        assert_eq!(store.len(), 2);

        // ETH is absent from the newer snapshot and must be removed
        store.replace_all(vec![balance("BTC", dec!(3))]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("BTC").unwrap().free, dec!(3));
        assert!(store.get("ETH").is_none());
    }

    #[test]
    fn test_one_balance_per_currency() {
        let mut store = BalanceStore::new();
        store.replace_all(vec![balance("BTC", dec!(1)), balance("BTC", dec!(2))]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("BTC").unwrap().free, dec!(2));
    }
}
