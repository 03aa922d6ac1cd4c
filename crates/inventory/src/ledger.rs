//! Stock ledger: the authoritative on-hand count per stock row.

use chrono::{DateTime, Utc};
use common::StockKey;
use serde::Serialize;
use store::{StockUnit, Store, Transaction};

use crate::error::{InventoryError, Result};

/// A stock row together with the quantity currently held by PENDING
/// reservations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockLevel {
    #[serde(flatten)]
    pub unit: StockUnit,
    pub held_quantity: u32,
    /// Units a new reservation could take right now.
    pub reservable_quantity: u32,
}

impl StockLevel {
    fn new(unit: StockUnit, held_quantity: u32) -> Self {
        Self {
            reservable_quantity: unit.available_quantity.saturating_sub(held_quantity),
            unit,
            held_quantity,
        }
    }
}

/// Administrative and read access to stock rows.
#[derive(Clone)]
pub struct StockLedger<S: Store> {
    store: S,
}

impl<S: Store> StockLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Sets the on-hand count of a row, creating it if needed.
    ///
    /// The count may not drop below the units held by PENDING reservations.
    #[tracing::instrument(skip(self), fields(stock = %key))]
    pub async fn set_stock(&self, key: StockKey, quantity: u32) -> Result<StockLevel> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        tx.lock_stock(&key).await?;
        let held = tx.held_quantity(&key).await?;
        check_covers_held(&key, quantity, held)?;

        let unit = StockUnit::new(key, quantity, now);
        tx.save_stock(&unit).await?;
        tx.commit().await?;

        tracing::info!(quantity, "Stock set");
        Ok(StockLevel::new(unit, held))
    }

    /// Adds `delta` (which may be negative) to the on-hand count.
    #[tracing::instrument(skip(self), fields(stock = %key))]
    pub async fn adjust_stock(&self, key: StockKey, delta: i64) -> Result<StockLevel> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let mut unit = tx
            .lock_stock(&key)
            .await?
            .ok_or_else(|| InventoryError::StockNotFound(key.clone()))?;

        let adjusted = i64::from(unit.available_quantity) + delta;
        unit.available_quantity = u32::try_from(adjusted).map_err(|_| {
            InventoryError::Validation(format!(
                "adjusting {key} by {delta} would leave {adjusted} units"
            ))
        })?;
        unit.updated_at = now;

        let held = tx.held_quantity(&key).await?;
        check_covers_held(&key, unit.available_quantity, held)?;
        tx.save_stock(&unit).await?;
        tx.commit().await?;

        tracing::info!(delta, quantity = unit.available_quantity, "Stock adjusted");
        Ok(StockLevel::new(unit, held))
    }

    pub async fn get(&self, key: &StockKey) -> Result<Option<StockLevel>> {
        let Some(unit) = self.store.get_stock(key).await? else {
            return Ok(None);
        };
        let held = self.store.held_quantity(key).await?;
        Ok(Some(StockLevel::new(unit, held)))
    }

    /// Lists every row in lock order.
    pub async fn list(&self) -> Result<Vec<StockLevel>> {
        let units = self.store.list_stock().await?;
        let mut levels = Vec::with_capacity(units.len());
        for unit in units {
            let held = self.store.held_quantity(&unit.key).await?;
            levels.push(StockLevel::new(unit, held));
        }
        Ok(levels)
    }
}

fn check_covers_held(key: &StockKey, quantity: u32, held: u32) -> Result<()> {
    if quantity < held {
        tracing::warn!(quantity, held, "Refused to lower stock below held units");
        return Err(InventoryError::Validation(format!(
            "{key} has {held} units held by pending reservations, cannot set {quantity}"
        )));
    }
    Ok(())
}

/// Atomic check-and-decrement of one row inside `tx`.
///
/// Locks the row, fails with `InsufficientStock` if fewer than `quantity`
/// units are on hand, otherwise writes the decremented row.
pub async fn decrement_in<T: Transaction>(
    tx: &mut T,
    key: &StockKey,
    quantity: u32,
    now: DateTime<Utc>,
) -> Result<StockUnit> {
    let mut unit = tx
        .lock_stock(key)
        .await?
        .ok_or_else(|| InventoryError::StockNotFound(key.clone()))?;

    if !unit.decrement(quantity, now) {
        return Err(InventoryError::InsufficientStock {
            key: key.clone(),
            requested: quantity,
            available: unit.available_quantity,
        });
    }

    tx.save_stock(&unit).await?;
    Ok(unit)
}
