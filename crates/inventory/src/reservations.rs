//! Reservation manager: short-lived holds against the stock ledger.
//!
//! Every `*_in` method runs inside a caller-owned transaction and expects the
//! caller to hold the order's lock already. The other methods open their own
//! transaction, lock the order, and commit.
//!
//! Expired holds are swept by the order-level expiry sweeper, which moves an
//! order still awaiting payment to CANCELLED in the same transaction that
//! releases its holds.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Duration, Utc};
use common::{OrderId, StockKey};
use serde::{Deserialize, Serialize};
use store::{Order, Reservation, Store, Transaction, constraints};

use crate::error::{InventoryError, Result};
use crate::ledger::decrement_in;

/// Default hold window, in seconds.
pub const DEFAULT_RESERVATION_TTL_SECS: i64 = 15 * 60;

/// One stock row and the quantity an order wants from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(flatten)]
    pub key: StockKey,
    pub quantity: u32,
}

impl LineItem {
    pub fn new(key: StockKey, quantity: u32) -> Self {
        Self { key, quantity }
    }
}

/// The permanent stock decrement performed by confirming one reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockDecrement {
    #[serde(flatten)]
    pub key: StockKey,
    pub quantity: u32,
    pub remaining: u32,
}

#[derive(Clone)]
pub struct ReservationManager<S: Store> {
    store: S,
    ttl: Duration,
}

impl<S: Store> ReservationManager<S> {
    pub fn new(store: S) -> Self {
        Self::with_ttl(store, Duration::seconds(DEFAULT_RESERVATION_TTL_SECS))
    }

    pub fn with_ttl(store: S, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Places holds for every line item of an existing order, all or nothing.
    #[tracing::instrument(skip(self, items), fields(items = items.len()))]
    pub async fn reserve(&self, order_id: OrderId, items: &[LineItem]) -> Result<Vec<Reservation>> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        lock_existing_order(&mut tx, order_id).await?;
        let reservations = self.reserve_in(&mut tx, order_id, items, now).await?;
        tx.commit().await?;

        metrics::counter!("reservations_created_total").increment(reservations.len() as u64);
        Ok(reservations)
    }

    /// Places holds inside `tx`.
    ///
    /// Stock rows are locked in ascending key order and availability is
    /// checked under those locks: on-hand units minus every PENDING hold.
    pub async fn reserve_in(
        &self,
        tx: &mut S::Tx,
        order_id: OrderId,
        items: &[LineItem],
        now: DateTime<Utc>,
    ) -> Result<Vec<Reservation>> {
        validate_line_items(items)?;

        let mut sorted: Vec<&LineItem> = items.iter().collect();
        sorted.sort_by(|a, b| a.key.cmp(&b.key));

        let existing: HashSet<StockKey> = tx
            .reservations_for_order(order_id)
            .await?
            .into_iter()
            .filter(|r| r.status.is_active())
            .map(|r| r.key)
            .collect();

        let mut reservations = Vec::with_capacity(sorted.len());
        for item in sorted {
            if existing.contains(&item.key) {
                return Err(InventoryError::DuplicateReservation {
                    order_id,
                    key: item.key.clone(),
                });
            }

            let on_hand = tx
                .lock_stock(&item.key)
                .await?
                .map(|unit| unit.available_quantity)
                .unwrap_or(0);
            let held = tx.held_quantity(&item.key).await?;
            let available = on_hand.saturating_sub(held);

            if item.quantity > available {
                metrics::counter!("reservations_rejected_total").increment(1);
                tracing::info!(
                    %order_id,
                    stock = %item.key,
                    requested = item.quantity,
                    available,
                    "Reservation rejected"
                );
                return Err(InventoryError::InsufficientStock {
                    key: item.key.clone(),
                    requested: item.quantity,
                    available,
                });
            }

            let reservation =
                Reservation::pending(order_id, item.key.clone(), item.quantity, now, now + self.ttl);
            tx.insert_reservation(&reservation)
                .await
                .map_err(|err| match err.violated_constraint() {
                    Some(constraints::ACTIVE_RESERVATION) => InventoryError::DuplicateReservation {
                        order_id,
                        key: item.key.clone(),
                    },
                    _ => InventoryError::Store(err),
                })?;
            reservations.push(reservation);
        }

        Ok(reservations)
    }

    /// Confirms every PENDING hold of the order. Idempotent once confirmed.
    #[tracing::instrument(skip(self))]
    pub async fn confirm(&self, order_id: OrderId) -> Result<Vec<StockDecrement>> {
        let mut tx = self.store.begin().await?;
        let order = lock_existing_order(&mut tx, order_id).await?;
        let decrements = self.confirm_in(&mut tx, &order, Utc::now()).await?;
        tx.commit().await?;
        Ok(decrements)
    }

    /// Permanently decrements stock for each PENDING hold of the order and
    /// marks the holds CONFIRMED.
    ///
    /// Fails with `HoldReleased`, writing nothing, unless every order line
    /// still has a PENDING or CONFIRMED hold. Holds past their deadline that
    /// the sweeper has not reached yet are still confirmed.
    pub async fn confirm_in(
        &self,
        tx: &mut S::Tx,
        order: &Order,
        now: DateTime<Utc>,
    ) -> Result<Vec<StockDecrement>> {
        let order_id = order.id;
        let reservations = tx.reservations_for_order(order_id).await?;
        if let Some(key) = first_uncovered(order, &reservations) {
            return Err(InventoryError::HoldReleased { order_id, key });
        }

        let mut pending: Vec<Reservation> = reservations
            .into_iter()
            .filter(Reservation::is_pending)
            .collect();
        pending.sort_by(|a, b| a.key.cmp(&b.key));

        let mut decrements = Vec::with_capacity(pending.len());
        for mut reservation in pending {
            let unit = decrement_in(tx, &reservation.key, reservation.quantity, now).await?;
            reservation.confirm(now);
            tx.update_reservation(&reservation).await?;

            decrements.push(StockDecrement {
                key: reservation.key,
                quantity: reservation.quantity,
                remaining: unit.available_quantity,
            });
        }

        if !decrements.is_empty() {
            tracing::debug!(%order_id, confirmed = decrements.len(), "Reservations confirmed");
        }
        Ok(decrements)
    }

    /// Order lines with no PENDING or CONFIRMED hold, in lock order.
    pub async fn uncovered_in(&self, tx: &mut S::Tx, order: &Order) -> Result<Vec<StockKey>> {
        let reservations = tx.reservations_for_order(order.id).await?;
        let mut keys: Vec<StockKey> = order
            .lines
            .iter()
            .map(|line| line.key())
            .filter(|key| !is_covered(key, &reservations))
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Releases every PENDING hold of the order. Idempotent.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, order_id: OrderId, reason: &str) -> Result<Vec<Reservation>> {
        let mut tx = self.store.begin().await?;
        lock_existing_order(&mut tx, order_id).await?;
        let released = self.release_in(&mut tx, order_id, reason, Utc::now()).await?;
        tx.commit().await?;
        Ok(released)
    }

    /// Marks the order's PENDING holds RELEASED. Stock rows are not touched.
    pub async fn release_in(
        &self,
        tx: &mut S::Tx,
        order_id: OrderId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reservation>> {
        self.release_matching(tx, order_id, reason, now, |_| true)
            .await
    }

    /// Releases only the order's holds that are past their deadline.
    pub async fn release_expired_in(
        &self,
        tx: &mut S::Tx,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reservation>> {
        self.release_matching(tx, order_id, "expired", now, |r| r.expires_at <= now)
            .await
    }

    async fn release_matching<F>(
        &self,
        tx: &mut S::Tx,
        order_id: OrderId,
        reason: &str,
        now: DateTime<Utc>,
        filter: F,
    ) -> Result<Vec<Reservation>>
    where
        F: Fn(&Reservation) -> bool + Send,
    {
        let pending: Vec<Reservation> = tx
            .reservations_for_order(order_id)
            .await?
            .into_iter()
            .filter(|r| r.is_pending() && filter(r))
            .collect();

        let mut released = Vec::with_capacity(pending.len());
        for mut reservation in pending {
            reservation.release(reason, now);
            tx.update_reservation(&reservation).await?;
            released.push(reservation);
        }

        if !released.is_empty() {
            tracing::debug!(%order_id, released = released.len(), reason, "Reservations released");
        }
        Ok(released)
    }

    /// Moves the deadline of the order's PENDING holds to `expires_at`.
    pub async fn extend_in(
        &self,
        tx: &mut S::Tx,
        order_id: OrderId,
        expires_at: DateTime<Utc>,
    ) -> Result<usize> {
        let pending: Vec<Reservation> = tx
            .reservations_for_order(order_id)
            .await?
            .into_iter()
            .filter(Reservation::is_pending)
            .collect();

        let count = pending.len();
        for mut reservation in pending {
            reservation.expires_at = expires_at;
            tx.update_reservation(&reservation).await?;
        }
        Ok(count)
    }

    /// Orders holding at least one PENDING reservation past its deadline.
    pub async fn expired_orders(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OrderId>> {
        let expired = self.store.expired_reservations(now, limit).await?;
        let mut seen = BTreeSet::new();
        Ok(expired
            .into_iter()
            .map(|r| r.order_id)
            .filter(|id| seen.insert(*id))
            .collect())
    }
}

async fn lock_existing_order<T: Transaction>(tx: &mut T, order_id: OrderId) -> Result<Order> {
    tx.lock_order(order_id)
        .await?
        .ok_or(InventoryError::OrderNotFound(order_id))
}

fn is_covered(key: &StockKey, reservations: &[Reservation]) -> bool {
    reservations
        .iter()
        .any(|r| r.status.is_active() && &r.key == key)
}

fn first_uncovered(order: &Order, reservations: &[Reservation]) -> Option<StockKey> {
    order
        .lines
        .iter()
        .map(|line| line.key())
        .filter(|key| !is_covered(key, reservations))
        .min()
}

fn validate_line_items(items: &[LineItem]) -> Result<()> {
    if items.is_empty() {
        return Err(InventoryError::Validation(
            "at least one line item is required".to_string(),
        ));
    }

    let mut keys = HashSet::with_capacity(items.len());
    for item in items {
        if item.quantity == 0 {
            return Err(InventoryError::Validation(format!(
                "quantity for {} must be positive",
                item.key
            )));
        }
        if !keys.insert(&item.key) {
            return Err(InventoryError::Validation(format!(
                "{} appears more than once",
                item.key
            )));
        }
    }
    Ok(())
}
