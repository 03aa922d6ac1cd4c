use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Order, OrderId, PaymentEvent, Reservation, Result, StockKey, StockUnit, TransitionLogEntry,
    TransitionLogQuery,
};

/// Names of the uniqueness constraints both backends enforce.
///
/// Callers match on these via [`crate::StoreError::violated_constraint`].
pub mod constraints {
    /// One row per gateway transaction id.
    pub const PAYMENT_EVENT_ID: &str = "payment_events_pkey";

    /// One log entry per (order, sequence).
    pub const ORDER_SEQUENCE: &str = "unique_order_sequence";

    /// At most one PENDING or CONFIRMED reservation per (order, stock row).
    pub const ACTIVE_RESERVATION: &str = "unique_active_reservation";

    /// Order numbers are unique.
    pub const ORDER_NUMBER: &str = "orders_order_number_key";
}

/// A backend that hands out transactions and answers read-only queries.
///
/// Reads outside a transaction see committed data only and take no locks.
#[async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    type Tx: Transaction;

    /// Starts a transaction.
    async fn begin(&self) -> Result<Self::Tx>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    async fn get_order_by_number(&self, order_number: &str) -> Result<Option<Order>>;

    async fn get_stock(&self, key: &StockKey) -> Result<Option<StockUnit>>;

    /// Lists every stock row in lock order.
    async fn list_stock(&self) -> Result<Vec<StockUnit>>;

    /// Sum of PENDING reservation quantities against one stock row.
    async fn held_quantity(&self, key: &StockKey) -> Result<u32>;

    async fn reservations_for_order(&self, order_id: OrderId) -> Result<Vec<Reservation>>;

    /// PENDING reservations whose deadline is at or before `now`, oldest first.
    async fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reservation>>;

    /// WAITING_PAYMENT orders whose payment deadline is at or before `now`.
    async fn orders_past_payment_deadline(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OrderId>>;

    async fn get_payment_event(&self, gateway_transaction_id: &str)
    -> Result<Option<PaymentEvent>>;

    /// Payment events for one order, in arrival order.
    async fn payment_events_for_order(&self, order_id: OrderId) -> Result<Vec<PaymentEvent>>;

    /// Reads the transition log.
    async fn query_transitions(&self, query: TransitionLogQuery)
    -> Result<Vec<TransitionLogEntry>>;
}

/// A unit of work. Dropping it without calling [`Transaction::commit`]
/// discards every write and releases every lock.
#[async_trait]
pub trait Transaction: Send + Sized {
    /// Locks the order row and returns it. Blocks while another transaction
    /// holds it, up to the backend's lock timeout.
    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>>;

    /// Resolves an order number to an id without locking.
    async fn find_order_id_by_number(&mut self, order_number: &str) -> Result<Option<OrderId>>;

    /// Inserts a new order and holds its lock until the transaction ends.
    async fn insert_order(&mut self, order: &Order) -> Result<()>;

    /// Writes `order`. The stored row must be at `order.version.previous()`,
    /// otherwise this fails with `ConcurrencyConflict`.
    async fn update_order(&mut self, order: &Order) -> Result<()>;

    /// Locks the stock row and returns it.
    async fn lock_stock(&mut self, key: &StockKey) -> Result<Option<StockUnit>>;

    /// Inserts or replaces a stock row. The caller must hold its lock.
    async fn save_stock(&mut self, unit: &StockUnit) -> Result<()>;

    /// Sum of PENDING reservation quantities against one stock row, including
    /// this transaction's own writes.
    async fn held_quantity(&mut self, key: &StockKey) -> Result<u32>;

    async fn reservations_for_order(&mut self, order_id: OrderId) -> Result<Vec<Reservation>>;

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<()>;

    /// Writes a reservation. The caller must hold its order's lock.
    async fn update_reservation(&mut self, reservation: &Reservation) -> Result<()>;

    async fn find_payment_event(
        &mut self,
        gateway_transaction_id: &str,
    ) -> Result<Option<PaymentEvent>>;

    /// Records a payment event; a second event with the same gateway
    /// transaction id fails with `UniqueViolation`.
    async fn insert_payment_event(&mut self, event: &PaymentEvent) -> Result<()>;

    async fn append_transition(&mut self, entry: &TransitionLogEntry) -> Result<()>;

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}
