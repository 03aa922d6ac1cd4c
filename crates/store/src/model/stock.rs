use chrono::{DateTime, Utc};
use common::StockKey;
use serde::{Deserialize, Serialize};

/// Sellable units of one product (or product variant).
///
/// `available_quantity` is the on-hand count; PENDING reservations are holds
/// against it and are only subtracted when confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockUnit {
    #[serde(flatten)]
    pub key: StockKey,
    pub available_quantity: u32,
    pub updated_at: DateTime<Utc>,
}

impl StockUnit {
    pub fn new(key: StockKey, available_quantity: u32, now: DateTime<Utc>) -> Self {
        Self {
            key,
            available_quantity,
            updated_at: now,
        }
    }

    /// Removes `quantity` units. Returns false, leaving the unit untouched,
    /// when that would make the count negative.
    pub fn decrement(&mut self, quantity: u32, now: DateTime<Utc>) -> bool {
        match self.available_quantity.checked_sub(quantity) {
            Some(remaining) => {
                self.available_quantity = remaining;
                self.updated_at = now;
                true
            }
            None => false,
        }
    }
}
