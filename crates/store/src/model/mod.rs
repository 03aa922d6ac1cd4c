//! Durable records.

mod audit;
mod order;
mod payment;
mod reservation;
mod stock;

pub use audit::{Actor, ActorKind, LogEntryId, TransitionLogEntry, TransitionLogEntryBuilder};
pub use order::{Order, OrderLine, OrderStatus, OrderTimestamps};
pub use payment::PaymentEvent;
pub use reservation::{Reservation, ReservationStatus};
pub use stock::StockUnit;

/// Error returned when a stored enum value is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}
