use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{
    Order, OrderId, OrderStatus, PaymentEvent, Reservation, ReservationId, Result, StockKey,
    StockUnit, StoreError, TransitionLogEntry, TransitionLogQuery, Version,
    store::{Store, Transaction, constraints},
};

/// Lock wait used when none is configured.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LockKey {
    Order(OrderId),
    Stock(StockKey),
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockKey::Order(id) => write!(f, "order {id}"),
            LockKey::Stock(key) => write!(f, "stock {key}"),
        }
    }
}

#[derive(Default)]
struct Tables {
    orders: HashMap<OrderId, Order>,
    order_numbers: HashMap<String, OrderId>,
    stock: BTreeMap<StockKey, StockUnit>,
    reservations: HashMap<ReservationId, Reservation>,
    payment_events: HashMap<String, PaymentEvent>,
    transitions: Vec<TransitionLogEntry>,
    sequences: HashSet<(OrderId, Version)>,
}

impl Tables {
    fn has_active_reservation(&self, order_id: OrderId, key: &StockKey) -> bool {
        self.reservations
            .values()
            .any(|r| r.order_id == order_id && &r.key == key && r.status.is_active())
    }
}

struct Shared {
    tables: RwLock<Tables>,
    locks: Mutex<HashMap<LockKey, Arc<Mutex<()>>>>,
    lock_timeout: Duration,
}

impl Shared {
    async fn acquire(&self, key: &LockKey) -> Result<OwnedMutexGuard<()>> {
        let mutex = {
            let mut locks = self.locks.lock().await;
            locks.entry(key.clone()).or_default().clone()
        };

        match tokio::time::timeout(self.lock_timeout, mutex.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                metrics::counter!("store_lock_timeouts_total").increment(1);
                tracing::debug!(resource = %key, "Lock wait timed out");
                Err(StoreError::LockTimeout {
                    resource: key.to_string(),
                })
            }
        }
    }
}

/// In-memory store for tests and local runs.
///
/// Row locks are per-key async mutexes held by the transaction until it
/// commits or is dropped. Writes are staged in the transaction and applied
/// atomically at commit, so other readers never see a partial change.
#[derive(Clone)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store whose lock waits give up after `lock_timeout`.
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                locks: Mutex::new(HashMap::new()),
                lock_timeout,
            }),
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        self.shared.lock_timeout
    }

    /// Returns the number of transition log entries.
    pub async fn transition_count(&self) -> usize {
        self.shared.tables.read().await.transitions.len()
    }

    /// Removes all rows.
    pub async fn clear(&self) {
        *self.shared.tables.write().await = Tables::default();
    }
}

#[async_trait]
impl Store for InMemoryStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(InMemoryTransaction {
            shared: Arc::clone(&self.shared),
            guards: HashMap::new(),
            staged: Staged::default(),
        })
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.shared.tables.read().await.orders.get(&id).cloned())
    }

    async fn get_order_by_number(&self, order_number: &str) -> Result<Option<Order>> {
        let tables = self.shared.tables.read().await;
        Ok(tables
            .order_numbers
            .get(order_number)
            .and_then(|id| tables.orders.get(id))
            .cloned())
    }

    async fn get_stock(&self, key: &StockKey) -> Result<Option<StockUnit>> {
        Ok(self.shared.tables.read().await.stock.get(key).cloned())
    }

    async fn list_stock(&self) -> Result<Vec<StockUnit>> {
        Ok(self
            .shared
            .tables
            .read()
            .await
            .stock
            .values()
            .cloned()
            .collect())
    }

    async fn held_quantity(&self, key: &StockKey) -> Result<u32> {
        let tables = self.shared.tables.read().await;
        Ok(tables
            .reservations
            .values()
            .filter(|r| r.is_pending() && &r.key == key)
            .fold(0u32, |acc, r| acc.saturating_add(r.quantity)))
    }

    async fn reservations_for_order(&self, order_id: OrderId) -> Result<Vec<Reservation>> {
        let tables = self.shared.tables.read().await;
        let mut reservations: Vec<_> = tables
            .reservations
            .values()
            .filter(|r| r.order_id == order_id)
            .cloned()
            .collect();
        sort_reservations(&mut reservations);
        Ok(reservations)
    }

    async fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reservation>> {
        let tables = self.shared.tables.read().await;
        let mut expired: Vec<_> = tables
            .reservations
            .values()
            .filter(|r| r.is_expired(now))
            .cloned()
            .collect();
        expired.sort_by_key(|r| r.expires_at);
        expired.truncate(limit);
        Ok(expired)
    }

    async fn orders_past_payment_deadline(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OrderId>> {
        let tables = self.shared.tables.read().await;
        let mut overdue: Vec<_> = tables
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::WaitingPayment)
            .filter_map(|o| {
                o.payment_expires_at
                    .filter(|deadline| *deadline <= now)
                    .map(|deadline| (deadline, o.id))
            })
            .collect();
        overdue.sort();
        Ok(overdue.into_iter().take(limit).map(|(_, id)| id).collect())
    }

    async fn get_payment_event(
        &self,
        gateway_transaction_id: &str,
    ) -> Result<Option<PaymentEvent>> {
        Ok(self
            .shared
            .tables
            .read()
            .await
            .payment_events
            .get(gateway_transaction_id)
            .cloned())
    }

    async fn payment_events_for_order(&self, order_id: OrderId) -> Result<Vec<PaymentEvent>> {
        let tables = self.shared.tables.read().await;
        let mut events: Vec<_> = tables
            .payment_events
            .values()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.received_at.cmp(&b.received_at));
        Ok(events)
    }

    async fn query_transitions(
        &self,
        query: TransitionLogQuery,
    ) -> Result<Vec<TransitionLogEntry>> {
        let tables = self.shared.tables.read().await;
        let mut entries: Vec<_> = tables
            .transitions
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();

        // Sort by timestamp then sequence
        entries.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then(a.sequence.cmp(&b.sequence))
        });

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(entries.into_iter().skip(offset).take(limit).collect())
    }
}

fn sort_reservations(reservations: &mut [Reservation]) {
    reservations.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.key.cmp(&b.key))
    });
}

#[derive(Default)]
struct Staged {
    orders: HashMap<OrderId, Order>,
    inserted_orders: HashSet<OrderId>,
    /// Committed version of each updated order when it was first staged.
    base_versions: HashMap<OrderId, Version>,
    stock: BTreeMap<StockKey, StockUnit>,
    reservations: HashMap<ReservationId, Reservation>,
    inserted_reservations: HashSet<ReservationId>,
    payment_events: Vec<PaymentEvent>,
    transitions: Vec<TransitionLogEntry>,
}

/// Transaction on an [`InMemoryStore`].
pub struct InMemoryTransaction {
    shared: Arc<Shared>,
    guards: HashMap<LockKey, OwnedMutexGuard<()>>,
    staged: Staged,
}

impl InMemoryTransaction {
    async fn lock(&mut self, key: LockKey) -> Result<()> {
        if self.guards.contains_key(&key) {
            return Ok(());
        }
        let guard = self.shared.acquire(&key).await?;
        self.guards.insert(key, guard);
        Ok(())
    }

    async fn current_order(&self, id: OrderId) -> Option<Order> {
        if let Some(order) = self.staged.orders.get(&id) {
            return Some(order.clone());
        }
        self.shared.tables.read().await.orders.get(&id).cloned()
    }

    /// Committed reservations overlaid with this transaction's writes.
    async fn merged_reservations<F>(&self, filter: F) -> Vec<Reservation>
    where
        F: Fn(&Reservation) -> bool,
    {
        let tables = self.shared.tables.read().await;
        let mut merged: Vec<_> = tables
            .reservations
            .values()
            .filter(|r| !self.staged.reservations.contains_key(&r.id))
            .filter(|r| filter(r))
            .cloned()
            .collect();
        merged.extend(
            self.staged
                .reservations
                .values()
                .filter(|r| filter(r))
                .cloned(),
        );
        merged
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>> {
        self.lock(LockKey::Order(id)).await?;
        Ok(self.current_order(id).await)
    }

    async fn find_order_id_by_number(&mut self, order_number: &str) -> Result<Option<OrderId>> {
        if let Some(order) = self
            .staged
            .orders
            .values()
            .find(|o| o.order_number == order_number)
        {
            return Ok(Some(order.id));
        }
        Ok(self
            .shared
            .tables
            .read()
            .await
            .order_numbers
            .get(order_number)
            .copied())
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        if self.current_order(order.id).await.is_some() {
            return Err(StoreError::UniqueViolation {
                constraint: "orders_pkey".to_string(),
            });
        }
        if self.find_order_id_by_number(&order.order_number).await?.is_some() {
            return Err(StoreError::UniqueViolation {
                constraint: constraints::ORDER_NUMBER.to_string(),
            });
        }

        self.lock(LockKey::Order(order.id)).await?;
        self.staged.orders.insert(order.id, order.clone());
        self.staged.inserted_orders.insert(order.id);
        Ok(())
    }

    async fn update_order(&mut self, order: &Order) -> Result<()> {
        self.lock(LockKey::Order(order.id)).await?;

        let current = self
            .current_order(order.id)
            .await
            .ok_or_else(|| StoreError::NotFound {
                entity: "order",
                key: order.id.to_string(),
            })?;

        let expected = order.version.previous();
        if current.version != expected {
            return Err(StoreError::ConcurrencyConflict {
                order_id: order.id,
                expected,
                actual: current.version,
            });
        }

        if !self.staged.inserted_orders.contains(&order.id) {
            self.staged
                .base_versions
                .entry(order.id)
                .or_insert(current.version);
        }
        self.staged.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn lock_stock(&mut self, key: &StockKey) -> Result<Option<StockUnit>> {
        self.lock(LockKey::Stock(key.clone())).await?;
        if let Some(unit) = self.staged.stock.get(key) {
            return Ok(Some(unit.clone()));
        }
        Ok(self.shared.tables.read().await.stock.get(key).cloned())
    }

    async fn save_stock(&mut self, unit: &StockUnit) -> Result<()> {
        self.lock(LockKey::Stock(unit.key.clone())).await?;
        self.staged.stock.insert(unit.key.clone(), unit.clone());
        Ok(())
    }

    async fn held_quantity(&mut self, key: &StockKey) -> Result<u32> {
        Ok(self
            .merged_reservations(|r| r.is_pending() && &r.key == key)
            .await
            .iter()
            .fold(0u32, |acc, r| acc.saturating_add(r.quantity)))
    }

    async fn reservations_for_order(&mut self, order_id: OrderId) -> Result<Vec<Reservation>> {
        let mut reservations = self
            .merged_reservations(|r| r.order_id == order_id)
            .await;
        sort_reservations(&mut reservations);
        Ok(reservations)
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        let duplicate = !self
            .merged_reservations(|r| {
                r.order_id == reservation.order_id
                    && r.key == reservation.key
                    && r.status.is_active()
            })
            .await
            .is_empty();
        if duplicate {
            return Err(StoreError::UniqueViolation {
                constraint: constraints::ACTIVE_RESERVATION.to_string(),
            });
        }

        self.staged
            .reservations
            .insert(reservation.id, reservation.clone());
        self.staged.inserted_reservations.insert(reservation.id);
        Ok(())
    }

    async fn update_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        let exists = self.staged.reservations.contains_key(&reservation.id)
            || self
                .shared
                .tables
                .read()
                .await
                .reservations
                .contains_key(&reservation.id);
        if !exists {
            return Err(StoreError::NotFound {
                entity: "reservation",
                key: reservation.id.to_string(),
            });
        }

        self.staged
            .reservations
            .insert(reservation.id, reservation.clone());
        Ok(())
    }

    async fn find_payment_event(
        &mut self,
        gateway_transaction_id: &str,
    ) -> Result<Option<PaymentEvent>> {
        if let Some(event) = self
            .staged
            .payment_events
            .iter()
            .find(|e| e.gateway_transaction_id == gateway_transaction_id)
        {
            return Ok(Some(event.clone()));
        }
        Ok(self
            .shared
            .tables
            .read()
            .await
            .payment_events
            .get(gateway_transaction_id)
            .cloned())
    }

    async fn insert_payment_event(&mut self, event: &PaymentEvent) -> Result<()> {
        if self
            .find_payment_event(&event.gateway_transaction_id)
            .await?
            .is_some()
        {
            return Err(StoreError::UniqueViolation {
                constraint: constraints::PAYMENT_EVENT_ID.to_string(),
            });
        }
        self.staged.payment_events.push(event.clone());
        Ok(())
    }

    async fn append_transition(&mut self, entry: &TransitionLogEntry) -> Result<()> {
        let key = (entry.order_id, entry.sequence);
        let duplicate = self
            .staged
            .transitions
            .iter()
            .any(|e| (e.order_id, e.sequence) == key)
            || self.shared.tables.read().await.sequences.contains(&key);
        if duplicate {
            return Err(StoreError::UniqueViolation {
                constraint: constraints::ORDER_SEQUENCE.to_string(),
            });
        }
        self.staged.transitions.push(entry.clone());
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        let InMemoryTransaction {
            shared,
            guards,
            staged,
        } = self;

        let mut tables = shared.tables.write().await;

        // Re-check constraints against rows committed since they were staged.
        for id in &staged.inserted_orders {
            if tables.orders.contains_key(id) {
                return Err(StoreError::UniqueViolation {
                    constraint: "orders_pkey".to_string(),
                });
            }
            if let Some(order) = staged.orders.get(id)
                && tables.order_numbers.contains_key(&order.order_number)
            {
                return Err(StoreError::UniqueViolation {
                    constraint: constraints::ORDER_NUMBER.to_string(),
                });
            }
        }
        for (id, base) in &staged.base_versions {
            let actual = tables
                .orders
                .get(id)
                .map(|o| o.version)
                .unwrap_or_default();
            if actual != *base {
                return Err(StoreError::ConcurrencyConflict {
                    order_id: *id,
                    expected: *base,
                    actual,
                });
            }
        }
        for event in &staged.payment_events {
            if tables
                .payment_events
                .contains_key(&event.gateway_transaction_id)
            {
                return Err(StoreError::UniqueViolation {
                    constraint: constraints::PAYMENT_EVENT_ID.to_string(),
                });
            }
        }
        for entry in &staged.transitions {
            if tables.sequences.contains(&(entry.order_id, entry.sequence)) {
                return Err(StoreError::UniqueViolation {
                    constraint: constraints::ORDER_SEQUENCE.to_string(),
                });
            }
        }
        for id in &staged.inserted_reservations {
            if let Some(r) = staged.reservations.get(id)
                && r.status.is_active()
                && tables.reservations.values().any(|existing| {
                    existing.order_id == r.order_id
                        && existing.key == r.key
                        && existing.status.is_active()
                        && staged
                            .reservations
                            .get(&existing.id)
                            .is_none_or(|s| s.status.is_active())
                })
            {
                return Err(StoreError::UniqueViolation {
                    constraint: constraints::ACTIVE_RESERVATION.to_string(),
                });
            }
        }

        for (id, order) in staged.orders {
            tables.order_numbers.insert(order.order_number.clone(), id);
            tables.orders.insert(id, order);
        }
        tables.stock.extend(staged.stock);
        tables.reservations.extend(staged.reservations);
        for event in staged.payment_events {
            tables
                .payment_events
                .insert(event.gateway_transaction_id.clone(), event);
        }
        for entry in staged.transitions {
            tables.sequences.insert((entry.order_id, entry.sequence));
            tables.transitions.push(entry);
        }

        drop(tables);
        drop(guards);
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        drop(self);
        Ok(())
    }
}
