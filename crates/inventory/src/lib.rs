//! Stock ledger and reservation manager.
//!
//! Availability for a new hold is the row's on-hand count minus every
//! PENDING hold against it. Holds only touch the on-hand count when they are
//! confirmed.

pub mod error;
pub mod ledger;
pub mod reservations;

pub use error::{InventoryError, Result};
pub use ledger::{StockLedger, StockLevel, decrement_in};
pub use reservations::{
    DEFAULT_RESERVATION_TTL_SECS, LineItem, ReservationManager, StockDecrement,
};
