//! Shared identifiers and value types used across the checkout core.

mod ids;
mod money;

pub use ids::{OrderId, ProductId, ReservationId, StockKey, VariantId};
pub use money::Money;
