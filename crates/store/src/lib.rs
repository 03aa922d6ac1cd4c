//! Transactional persistence for the checkout core.
//!
//! Every multi-row change (order status, stock, reservations, payment events
//! and the transition log) goes through one [`Transaction`]. Row locks taken
//! inside a transaction follow a single global order: the order row first,
//! then stock rows ascending by [`StockKey`].

pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod query;
pub mod store;
pub mod version;

pub use common::{OrderId, ReservationId, StockKey};
pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use model::{
    Actor, ActorKind, LogEntryId, Order, OrderLine, OrderStatus, OrderTimestamps, PaymentEvent,
    Reservation, ReservationStatus, StockUnit, TransitionLogEntry, TransitionLogEntryBuilder,
    UnknownVariant,
};
pub use postgres::PostgresStore;
pub use query::TransitionLogQuery;
pub use store::{Store, Transaction, constraints};
pub use version::Version;
