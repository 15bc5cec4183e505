//! Refresh-cycle state machine
//!
//! One refresh: open the transport, subscribe to the user channel, let the
//! replay and any live updates settle for a bounded window, tear the
//! transport down, fetch the balance snapshot, then compute and publish.
//! The transport gives no completion marker for the replay, so the settling
//! window is a heuristic bound, not a guarantee.
//!
//! A cycle ingests into scratch stores and commits them only after every
//! fallible step has succeeded; a failed or cancelled cycle leaves the
//! committed stores and the last published snapshot untouched.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::balances::BalanceStore;
use crate::core::orders::OrderStore;
use crate::core::traits::{AccountDataProvider, OrderFeed};
use crate::core::valuation::{compute_snapshot, PotentialValueSnapshot};
use crate::errors::CoreError;
use crate::types::{Balance, Order};
use crate::ws::events::OrderEventBatch;

/// Phase of the refresh state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Ingesting,
    Settling,
    Computing,
    Published,
    Failed,
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Ingesting => "ingesting",
            CyclePhase::Settling => "settling",
            CyclePhase::Computing => "computing",
            CyclePhase::Published => "published",
            CyclePhase::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Channel that replays and updates the user's orders
    pub channel: String,
    /// Settling window after subscribing, in seconds
    pub settle_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            channel: "user".to_string(),
            settle_secs: 5,
        }
    }
}

/// Counters for the most recently completed cycle
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleStats {
    /// Event batches received during the settling window
    pub batches: u64,
    /// Order events ingested
    pub events: u64,
    /// Events dropped as malformed (wire-level or store-level)
    pub malformed: u64,
}

/// Handle for cancelling an in-flight refresh cycle
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Abort the current cycle at its next suspension point. Only the
    /// Ingesting and Settling phases are cancellable; a cycle that has begun
    /// computing runs to completion.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Drives the refresh state machine and owns both stores.
///
/// All store mutation happens on the single task that calls [`refresh`];
/// the transport pushes events into a channel the coordinator drains, so
/// concurrent upserts cannot occur. Consumers only ever see published
/// snapshots, which are values, never references into the stores.
///
/// [`refresh`]: RefreshCoordinator::refresh
pub struct RefreshCoordinator {
    feed: Box<dyn OrderFeed>,
    provider: Arc<dyn AccountDataProvider>,
    config: RefreshConfig,
    orders: OrderStore,
    balances: BalanceStore,
    phase: CyclePhase,
    stats: CycleStats,
    snapshot_tx: watch::Sender<Option<PotentialValueSnapshot>>,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

impl RefreshCoordinator {
    pub fn new(
        feed: Box<dyn OrderFeed>,
        provider: Arc<dyn AccountDataProvider>,
        config: RefreshConfig,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(None);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            feed,
            provider,
            config,
            orders: OrderStore::new(),
            balances: BalanceStore::new(),
            phase: CyclePhase::Idle,
            stats: CycleStats::default(),
            snapshot_tx,
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
        }
    }

    /// Run one full refresh cycle and publish the resulting snapshot.
    ///
    /// On any error the committed stores and the last published snapshot are
    /// exactly as they were before the call; the coordinator returns to
    /// `Idle` and is safe to retry.
    pub async fn refresh(&mut self) -> Result<PotentialValueSnapshot, CoreError> {
        // Arm a fresh cancellation latch for this cycle
        self.cancel_tx.send_replace(false);

        let result = self.run_cycle().await;
        match &result {
            Ok(snapshot) => {
                self.set_phase(CyclePhase::Published);
                self.snapshot_tx.send_replace(Some(snapshot.clone()));
                info!(
                    currencies = snapshot.rows.len(),
                    total = %snapshot.total,
                    events = self.stats.events,
                    malformed = self.stats.malformed,
                    "Refresh cycle published"
                );
                self.set_phase(CyclePhase::Idle);
            }
            Err(e) => {
                self.set_phase(CyclePhase::Failed);
                warn!(error = %e, "Refresh cycle failed; stores unchanged");
                self.set_phase(CyclePhase::Idle);
            }
        }
        result
    }

    async fn run_cycle(&mut self) -> Result<PotentialValueSnapshot, CoreError> {
        // Every subscribe is an authoritative replay of the open orders, so
        // the cycle starts from a reset scratch store
        let mut scratch_orders = OrderStore::new();
        let mut stats = CycleStats::default();

        self.set_phase(CyclePhase::Ingesting);

        // Take the receiver before subscribing so the replay is not missed
        let mut events = self.feed.events();
        self.feed.open().await?;
        if let Err(e) = self.feed.subscribe(&self.config.channel).await {
            let _ = self.feed.close().await;
            return Err(e);
        }

        self.set_phase(CyclePhase::Settling);
        if let Err(e) = self
            .settle(&mut events, &mut scratch_orders, &mut stats)
            .await
        {
            let _ = self.feed.unsubscribe(&self.config.channel).await;
            let _ = self.feed.close().await;
            return Err(e);
        }

        // Ingestion must have fully stopped before anything is computed
        self.feed.unsubscribe(&self.config.channel).await?;
        self.feed.close().await?;

        self.set_phase(CyclePhase::Computing);
        let records = self.provider.list_balances().await?;
        let currencies: Vec<String> = records.iter().map(|r| r.currency.clone()).collect();
        let prices = self.provider.list_prices(&currencies).await?;

        let mut scratch_balances = BalanceStore::new();
        scratch_balances.replace_all(
            records
                .into_iter()
                .map(|r| Balance {
                    last_price: prices.get(&r.currency).copied(),
                    currency: r.currency,
                    free: r.free,
                    held: r.held,
                })
                .collect(),
        );

        // Compute from the scratch stores first: an invariant failure must
        // not leave half of the cycle committed
        let snapshot = compute_snapshot(&scratch_orders, &scratch_balances)?;

        self.orders = scratch_orders;
        self.balances = scratch_balances;
        self.stats = stats;
        Ok(snapshot)
    }

    /// Drain inbound batches until the settling window elapses
    async fn settle(
        &mut self,
        events: &mut broadcast::Receiver<OrderEventBatch>,
        scratch: &mut OrderStore,
        stats: &mut CycleStats,
    ) -> Result<(), CoreError> {
        let deadline = Instant::now() + Duration::from_secs(self.config.settle_secs);
        let mut cancel_rx = self.cancel_rx.clone();

        loop {
            tokio::select! {
                batch = events.recv() => match batch {
                    Ok(batch) => {
                        stats.batches += 1;
                        stats.malformed += batch.malformed as u64;
                        for order in batch.orders {
                            stats.events += 1;
                            if let Err(e) = scratch.upsert(order) {
                                stats.malformed += 1;
                                debug!(error = %e, "Dropped event at store");
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Event receiver lagged; some events were dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(CoreError::Transport(
                            "event stream closed during settling".to_string(),
                        ));
                    }
                },
                _ = tokio::time::sleep_until(deadline) => break,
                changed = cancel_rx.changed() => {
                    if changed.is_ok() && *cancel_rx.borrow() {
                        info!("Refresh cycle cancelled during settling");
                        return Err(CoreError::Cancelled);
                    }
                }
            }
        }
        Ok(())
    }

    fn set_phase(&mut self, phase: CyclePhase) {
        debug!(from = %self.phase, to = %phase, "Cycle phase transition");
        self.phase = phase;
    }

    /// Current phase of the state machine
    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// Counters for the most recently completed cycle
    pub fn stats(&self) -> CycleStats {
        self.stats
    }

    /// Handle for cancelling an in-flight cycle from another task
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: self.cancel_tx.clone(),
        }
    }

    /// The last published snapshot, if any cycle has completed
    pub fn last_snapshot(&self) -> Option<PotentialValueSnapshot> {
        self.snapshot_tx.borrow().clone()
    }

    /// Watch-channel subscription for published snapshots
    pub fn subscribe_snapshots(&self) -> watch::Receiver<Option<PotentialValueSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    /// Open orders from the committed store, as owned values
    pub fn open_orders(&self) -> Vec<Order> {
        self.orders.open_orders().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::BalanceRecord;
    use crate::types::{OrderKind, OrderStatus, ProductId, Side};
    use crate::ws::events::OrderEventBatch;
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

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

    /// Feed that replays one canned batch list per subscribe call
    struct MockFeed {
        tx: broadcast::Sender<OrderEventBatch>,
        replays: Vec<Vec<OrderEventBatch>>,
        subscribes: Arc<AtomicUsize>,
        fail_subscribe: bool,
    }

    impl MockFeed {
        fn new(replays: Vec<Vec<OrderEventBatch>>) -> Self {
            let (tx, _) = broadcast::channel(64);
            Self {
                tx,
                replays,
                subscribes: Arc::new(AtomicUsize::new(0)),
                fail_subscribe: false,
            }
        }
    }

    #[async_trait]
    impl OrderFeed for MockFeed {
        async fn open(&mut self) -> Result<(), CoreError> {
            Ok(())
        }

        async fn subscribe(&mut self, _channel: &str) -> Result<(), CoreError> {
            if self.fail_subscribe {
                return Err(CoreError::Transport("subscribe refused".to_string()));
            }
            let call = self.subscribes.fetch_add(1, Ordering::SeqCst);
            if let Some(batches) = self.replays.get(call) {
                for batch in batches {
                    let _ = self.tx.send(batch.clone());
                }
            }
            Ok(())
        }

        async fn unsubscribe(&mut self, _channel: &str) -> Result<(), CoreError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), CoreError> {
            Ok(())
        }

        fn events(&self) -> broadcast::Receiver<OrderEventBatch> {
            self.tx.subscribe()
        }
    }

    struct MockProvider {
        balances: Vec<BalanceRecord>,
        prices: HashMap<String, Decimal>,
        fail: bool,
    }

    #[async_trait]
    impl AccountDataProvider for MockProvider {
        async fn list_balances(&self) -> Result<Vec<BalanceRecord>, CoreError> {
            if self.fail {
                return Err(CoreError::DataProvider("balances unavailable".to_string()));
            }
            Ok(self.balances.clone())
        }

        async fn list_prices(
            &self,
            _currencies: &[String],
        ) -> Result<HashMap<String, Decimal>, CoreError> {
            Ok(self.prices.clone())
        }
    }

    fn btc_provider(fail: bool) -> Arc<MockProvider> {
        Arc::new(MockProvider {
            balances: vec![BalanceRecord {
                currency: "BTC".to_string(),
                free: dec!(0.05),
                held: dec!(0),
            }],
            prices: HashMap::from([("BTC".to_string(), dec!(48000))]),
            fail,
        })
    }

    fn fast_config() -> RefreshConfig {
        RefreshConfig {
            channel: "user".to_string(),
            settle_secs: 1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_cycle_publishes_snapshot() {
        let mut filled = sell_limit("2", "ETH", dec!(2000), dec!(0));
        filled.status = OrderStatus::Filled;
        let feed = MockFeed::new(vec![vec![OrderEventBatch {
            orders: vec![sell_limit("1", "BTC", dec!(50000), dec!(0.1)), filled],
            malformed: 0,
        }]]);

        let mut coordinator =
            RefreshCoordinator::new(Box::new(feed), btc_provider(false), fast_config());
        let snapshot = coordinator.refresh().await.unwrap();

        assert_eq!(snapshot.rows.len(), 1);
        assert_eq!(snapshot.rows[0].currency, "BTC");
        assert_eq!(snapshot.rows[0].potential_gain, dec!(7500));
        assert_eq!(snapshot.rows[0].current_value, dec!(2400));

        assert_eq!(coordinator.phase(), CyclePhase::Idle);
        assert_eq!(coordinator.stats().events, 2);
        assert_eq!(coordinator.last_snapshot().unwrap(), snapshot);
        assert_eq!(coordinator.open_orders().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_failure_leaves_stores_untouched() {
        let batch = OrderEventBatch {
            orders: vec![sell_limit("1", "BTC", dec!(50000), dec!(0.1))],
            malformed: 0,
        };
        let feed = MockFeed::new(vec![vec![batch.clone()], vec![batch]]);

        let mut coordinator =
            RefreshCoordinator::new(Box::new(feed), btc_provider(false), fast_config());
        let first = coordinator.refresh().await.unwrap();

        // Swap in a failing provider for the second cycle
        coordinator.provider = btc_provider(true);
        let err = coordinator.refresh().await.unwrap_err();
        assert!(matches!(err, CoreError::DataProvider(_)));

        assert_eq!(coordinator.phase(), CyclePhase::Idle);
        assert_eq!(coordinator.last_snapshot().unwrap(), first);
        assert_eq!(coordinator.open_orders().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_failure_surfaces_transport_error() {
        let mut feed = MockFeed::new(vec![]);
        feed.fail_subscribe = true;

        let mut coordinator =
            RefreshCoordinator::new(Box::new(feed), btc_provider(false), fast_config());
        let err = coordinator.refresh().await.unwrap_err();
        assert!(matches!(err, CoreError::Transport(_)));
        assert!(coordinator.last_snapshot().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_events_are_counted_not_fatal() {
        let mut bad = sell_limit("bad", "BTC", dec!(50000), dec!(0.1));
        bad.limit_price = None; // structurally malformed limit order
        let feed = MockFeed::new(vec![vec![OrderEventBatch {
            orders: vec![bad, sell_limit("1", "BTC", dec!(50000), dec!(0.1))],
            malformed: 1, // one record already dropped at the wire
        }]]);

        let mut coordinator =
            RefreshCoordinator::new(Box::new(feed), btc_provider(false), fast_config());
        let snapshot = coordinator.refresh().await.unwrap();

        assert_eq!(coordinator.stats().malformed, 2);
        assert_eq!(snapshot.rows[0].potential_gain, dec!(7500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_discards_partial_results() {
        let batch = OrderEventBatch {
            orders: vec![sell_limit("1", "BTC", dec!(50000), dec!(0.1))],
            malformed: 0,
        };
        let feed = MockFeed::new(vec![vec![batch.clone()], vec![batch]]);

        let mut coordinator =
            RefreshCoordinator::new(Box::new(feed), btc_provider(false), fast_config());
        let first = coordinator.refresh().await.unwrap();

        let handle = coordinator.cancel_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.cancel();
        });

        let err = coordinator.refresh().await.unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));
        assert_eq!(coordinator.last_snapshot().unwrap(), first);
        assert_eq!(coordinator.open_orders().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_cycle_replaces_the_previous_replay() {
        let feed = MockFeed::new(vec![
            vec![OrderEventBatch {
                orders: vec![sell_limit("a", "BTC", dec!(50000), dec!(0.1))],
                malformed: 0,
            }],
            vec![OrderEventBatch {
                orders: vec![sell_limit("b", "ETH", dec!(2000), dec!(1))],
                malformed: 0,
            }],
        ]);

        let mut coordinator =
            RefreshCoordinator::new(Box::new(feed), btc_provider(false), fast_config());
        coordinator.refresh().await.unwrap();
        assert_eq!(coordinator.open_orders()[0].id, "a");

        coordinator.refresh().await.unwrap();
        let open = coordinator.open_orders();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_ids_within_a_cycle_keep_the_latest() {
        let feed = MockFeed::new(vec![vec![
            OrderEventBatch {
                orders: vec![sell_limit("1", "BTC", dec!(50000), dec!(0.5))],
                malformed: 0,
            },
            OrderEventBatch {
                orders: vec![sell_limit("1", "BTC", dec!(50000), dec!(0.2))],
                malformed: 0,
            },
        ]]);

        let mut coordinator =
            RefreshCoordinator::new(Box::new(feed), btc_provider(false), fast_config());
        coordinator.refresh().await.unwrap();

        let open = coordinator.open_orders();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].remaining_quantity, dec!(0.2));
    }
}
