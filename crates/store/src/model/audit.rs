use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{OrderStatus, UnknownVariant};
use crate::Version;

/// Unique identifier for a transition log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogEntryId(Uuid);

impl LogEntryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for LogEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LogEntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who asked for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    Buyer,
    Seller,
    Admin,
    /// Background jobs such as the expiry sweeper.
    System,
    /// The webhook gateway acting on a verified payment callback.
    PaymentGateway,
}

impl ActorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorKind::Buyer => "buyer",
            ActorKind::Seller => "seller",
            ActorKind::Admin => "admin",
            ActorKind::System => "system",
            ActorKind::PaymentGateway => "payment_gateway",
        }
    }
}

impl std::fmt::Display for ActorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ActorKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buyer" => Ok(ActorKind::Buyer),
            "seller" => Ok(ActorKind::Seller),
            "admin" => Ok(ActorKind::Admin),
            "system" => Ok(ActorKind::System),
            "payment_gateway" => Ok(ActorKind::PaymentGateway),
            other => Err(UnknownVariant {
                kind: "actor kind",
                value: other.to_string(),
            }),
        }
    }
}

/// An actor kind plus an optional identity (user id, job name, transaction id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub kind: ActorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Actor {
    pub fn new(kind: ActorKind, id: Option<String>) -> Self {
        Self { kind, id }
    }

    pub fn buyer(id: impl Into<String>) -> Self {
        Self::new(ActorKind::Buyer, Some(id.into()))
    }

    pub fn seller(id: impl Into<String>) -> Self {
        Self::new(ActorKind::Seller, Some(id.into()))
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self::new(ActorKind::Admin, Some(id.into()))
    }

    pub fn system(job: impl Into<String>) -> Self {
        Self::new(ActorKind::System, Some(job.into()))
    }

    pub fn payment_gateway(transaction_id: impl Into<String>) -> Self {
        Self::new(ActorKind::PaymentGateway, Some(transaction_id.into()))
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}:{}", self.kind, id),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// One executed transition, written in the same transaction as the status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionLogEntry {
    pub id: LogEntryId,
    pub order_id: OrderId,

    /// The order's version after this transition.
    pub sequence: Version,

    /// Transition name, e.g. `confirmPayment`; `place_order` for the entry
    /// written at checkout.
    pub transition: String,

    /// `None` only for the checkout entry.
    pub from_status: Option<OrderStatus>,
    pub to_status: OrderStatus,
    pub reason: Option<String>,
    pub actor: Actor,
    pub timestamp: DateTime<Utc>,

    /// Reservation and stock operations the transition triggered, plus the
    /// payment event that drove it, if any.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TransitionLogEntry {
    /// Starts a builder with the fields every entry needs.
    pub fn builder(
        order_id: OrderId,
        sequence: Version,
        transition: impl Into<String>,
        to_status: OrderStatus,
        actor: Actor,
    ) -> TransitionLogEntryBuilder {
        TransitionLogEntryBuilder {
            entry: TransitionLogEntry {
                id: LogEntryId::new(),
                order_id,
                sequence,
                transition: transition.into(),
                from_status: None,
                to_status,
                reason: None,
                actor,
                timestamp: Utc::now(),
                metadata: HashMap::new(),
            },
        }
    }
}

/// Builder for transition log entries.
#[derive(Debug)]
pub struct TransitionLogEntryBuilder {
    entry: TransitionLogEntry,
}

impl TransitionLogEntryBuilder {
    pub fn from_status(mut self, status: OrderStatus) -> Self {
        self.entry.from_status = Some(status);
        self
    }

    pub fn reason(mut self, reason: Option<String>) -> Self {
        self.entry.reason = reason;
        self
    }

    /// Sets the timestamp. If not set, the current time is used.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.entry.timestamp = timestamp;
        self
    }

    /// Adds a metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.entry.metadata.insert(key.into(), value);
        self
    }

    /// Merges caller-supplied metadata; keys already set by the builder win.
    pub fn extend_metadata(mut self, extra: HashMap<String, serde_json::Value>) -> Self {
        for (key, value) in extra {
            self.entry.metadata.entry(key).or_insert(value);
        }
        self
    }

    pub fn build(self) -> TransitionLogEntry {
        self.entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_all_fields() {
        let order_id = OrderId::new();
        let entry = TransitionLogEntry::builder(
            order_id,
            Version::new(3),
            "confirmPayment",
            OrderStatus::Paid,
            Actor::payment_gateway("tx-1"),
        )
        .from_status(OrderStatus::WaitingPayment)
        .reason(Some("settlement".to_string()))
        .metadata("reservations_confirmed", serde_json::json!(2))
        .build();

        assert_eq!(entry.order_id, order_id);
        assert_eq!(entry.sequence, Version::new(3));
        assert_eq!(entry.from_status, Some(OrderStatus::WaitingPayment));
        assert_eq!(entry.to_status, OrderStatus::Paid);
        assert_eq!(entry.actor.to_string(), "payment_gateway:tx-1");
        assert_eq!(
            entry.metadata.get("reservations_confirmed"),
            Some(&serde_json::json!(2))
        );
    }

    #[test]
    fn extend_metadata_keeps_builder_keys() {
        let extra = HashMap::from([
            ("note".to_string(), serde_json::json!("from admin")),
            ("reservations_released".to_string(), serde_json::json!(99)),
        ]);
        let entry = TransitionLogEntry::builder(
            OrderId::new(),
            Version::new(2),
            "cancelBySeller",
            OrderStatus::Cancelled,
            Actor::seller("s-1"),
        )
        .metadata("reservations_released", serde_json::json!(1))
        .extend_metadata(extra)
        .build();

        assert_eq!(entry.metadata["reservations_released"], serde_json::json!(1));
        assert_eq!(entry.metadata["note"], serde_json::json!("from admin"));
    }

    #[test]
    fn actor_kind_round_trips_through_str() {
        for kind in [
            ActorKind::Buyer,
            ActorKind::Seller,
            ActorKind::Admin,
            ActorKind::System,
            ActorKind::PaymentGateway,
        ] {
            assert_eq!(kind.as_str().parse::<ActorKind>(), Ok(kind));
        }
    }
}
