use common::{OrderId, StockKey};
use store::StoreError;
use thiserror::Error;

/// Errors from the stock ledger and reservation manager.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Not enough unheld units to satisfy a line item.
    #[error("Insufficient stock for {key}: requested {requested}, available {available}")]
    InsufficientStock {
        key: StockKey,
        requested: u32,
        available: u32,
    },

    /// The request itself is malformed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The order already holds an active reservation for this stock row.
    #[error("Order {order_id} already has an active reservation for {key}")]
    DuplicateReservation { order_id: OrderId, key: StockKey },

    /// A line of the order no longer has a PENDING or CONFIRMED hold.
    #[error("Order {order_id} no longer holds stock for {key}")]
    HoldReleased { order_id: OrderId, key: StockKey },

    #[error("Stock row not found: {0}")]
    StockNotFound(StockKey),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl InventoryError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            InventoryError::InsufficientStock { .. } => "insufficient_stock",
            InventoryError::Validation(_) | InventoryError::DuplicateReservation { .. } => {
                "validation_error"
            }
            InventoryError::HoldReleased { .. } => "hold_released",
            InventoryError::StockNotFound(_) | InventoryError::OrderNotFound(_) => "not_found",
            InventoryError::Store(err) if err.is_transient() => "transient_storage_error",
            InventoryError::Store(_) => "internal_error",
        }
    }

    /// Returns true when retrying may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, InventoryError::Store(err) if err.is_transient())
    }
}

/// Result type for inventory operations.
pub type Result<T> = std::result::Result<T, InventoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes() {
        let err = InventoryError::InsufficientStock {
            key: StockKey::product("SKU-1"),
            requested: 2,
            available: 1,
        };
        assert_eq!(err.code(), "insufficient_stock");
        assert_eq!(
            err.to_string(),
            "Insufficient stock for SKU-1: requested 2, available 1"
        );

        let timeout = InventoryError::Store(StoreError::LockTimeout {
            resource: "stock SKU-1".into(),
        });
        assert_eq!(timeout.code(), "transient_storage_error");
        assert!(timeout.is_transient());

        let released = InventoryError::HoldReleased {
            order_id: OrderId::new(),
            key: StockKey::product("SKU-1"),
        };
        assert_eq!(released.code(), "hold_released");
        assert!(!released.is_transient());
    }
}
