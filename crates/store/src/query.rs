use chrono::{DateTime, Utc};
use common::OrderId;

use crate::{ActorKind, OrderStatus, TransitionLogEntry};

/// Builder for querying the transition log.
///
/// Results are ordered by timestamp, then per-order sequence.
#[derive(Debug, Clone, Default)]
pub struct TransitionLogQuery {
    /// Filter by order.
    pub order_id: Option<OrderId>,

    /// Filter by transition names (any of these).
    pub transitions: Option<Vec<String>>,

    /// Filter by resulting status.
    pub to_status: Option<OrderStatus>,

    /// Filter by the kind of actor that requested the transition.
    pub actor_kind: Option<ActorKind>,

    /// Entries at or after this timestamp.
    pub from_timestamp: Option<DateTime<Utc>>,

    /// Entries at or before this timestamp.
    pub to_timestamp: Option<DateTime<Utc>>,

    /// Maximum number of entries to return.
    pub limit: Option<usize>,

    /// Number of entries to skip.
    pub offset: Option<usize>,
}

impl TransitionLogQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for the full trail of one order.
    pub fn for_order(order_id: OrderId) -> Self {
        Self {
            order_id: Some(order_id),
            ..Default::default()
        }
    }

    pub fn order_id(mut self, order_id: OrderId) -> Self {
        self.order_id = Some(order_id);
        self
    }

    pub fn transition(mut self, name: impl Into<String>) -> Self {
        self.transitions = Some(vec![name.into()]);
        self
    }

    pub fn transitions(mut self, names: Vec<String>) -> Self {
        self.transitions = Some(names);
        self
    }

    pub fn to_status(mut self, status: OrderStatus) -> Self {
        self.to_status = Some(status);
        self
    }

    pub fn actor_kind(mut self, kind: ActorKind) -> Self {
        self.actor_kind = Some(kind);
        self
    }

    pub fn from_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.from_timestamp = Some(timestamp);
        self
    }

    pub fn to_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.to_timestamp = Some(timestamp);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns true if `entry` passes every filter (limit/offset excluded).
    pub fn matches(&self, entry: &TransitionLogEntry) -> bool {
        if let Some(id) = self.order_id
            && entry.order_id != id
        {
            return false;
        }
        if let Some(ref names) = self.transitions
            && !names.contains(&entry.transition)
        {
            return false;
        }
        if let Some(status) = self.to_status
            && entry.to_status != status
        {
            return false;
        }
        if let Some(kind) = self.actor_kind
            && entry.actor.kind != kind
        {
            return false;
        }
        if let Some(from) = self.from_timestamp
            && entry.timestamp < from
        {
            return false;
        }
        if let Some(to) = self.to_timestamp
            && entry.timestamp > to
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Actor, Version};

    fn entry(order_id: OrderId, transition: &str, to: OrderStatus) -> TransitionLogEntry {
        TransitionLogEntry::builder(
            order_id,
            Version::new(2),
            transition,
            to,
            Actor::system("test"),
        )
        .build()
    }

    #[test]
    fn query_builder_chain() {
        let id = OrderId::new();
        let query = TransitionLogQuery::new()
            .order_id(id)
            .transition("confirmPayment")
            .to_status(OrderStatus::Paid)
            .limit(10)
            .offset(5);

        assert_eq!(query.order_id, Some(id));
        assert_eq!(query.transitions, Some(vec!["confirmPayment".to_string()]));
        assert_eq!(query.limit, Some(10));
        assert_eq!(query.offset, Some(5));
    }

    #[test]
    fn matches_applies_every_filter() {
        let id = OrderId::new();
        let paid = entry(id, "confirmPayment", OrderStatus::Paid);

        assert!(TransitionLogQuery::for_order(id).matches(&paid));
        assert!(!TransitionLogQuery::for_order(OrderId::new()).matches(&paid));
        assert!(
            !TransitionLogQuery::new()
                .transition("ship")
                .matches(&paid)
        );
        assert!(
            !TransitionLogQuery::new()
                .actor_kind(ActorKind::Admin)
                .matches(&paid)
        );
        assert!(
            TransitionLogQuery::new()
                .to_status(OrderStatus::Paid)
                .actor_kind(ActorKind::System)
                .matches(&paid)
        );
    }
}
