//! Checkout: create an order and hold its stock in one atomic unit.

use chrono::{DateTime, Utc};
use common::{Money, StockKey};
use inventory::{LineItem, ReservationManager};
use serde::{Deserialize, Serialize};
use serde_json::json;
use store::{
    Actor, Order, OrderLine, OrderStatus, Reservation, Store, Transaction, TransitionLogEntry,
    constraints,
};

use crate::effects::{EffectDispatcher, Notification, SideEffect};
use crate::error::DomainError;
use crate::policy::OrderPolicy;

/// Transition name recorded for the entry that creates an order.
pub const PLACE_ORDER: &str = "place_order";

/// One line of a checkout request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutLine {
    #[serde(flatten)]
    pub key: StockKey,
    pub quantity: u32,
    pub unit_price: Money,
}

/// A checkout request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    #[serde(default)]
    pub buyer_id: Option<String>,
    pub lines: Vec<CheckoutLine>,
    #[serde(default = "Money::zero")]
    pub shipping_fee: Money,
}

/// The created order and the holds placed for it.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutReceipt {
    pub order: Order,
    pub reservations: Vec<Reservation>,
}

#[derive(Clone)]
pub struct CheckoutService<S: Store> {
    store: S,
    reservations: ReservationManager<S>,
    effects: EffectDispatcher,
}

impl<S: Store> CheckoutService<S> {
    pub fn new(store: S, policy: &OrderPolicy) -> Self {
        Self {
            reservations: ReservationManager::with_ttl(store.clone(), policy.reservation_ttl),
            store,
            effects: EffectDispatcher::new(),
        }
    }

    pub fn with_effects(mut self, effects: EffectDispatcher) -> Self {
        self.effects = effects;
        self
    }

    /// Creates a PENDING_PAYMENT order and reserves every line, all or
    /// nothing.
    #[tracing::instrument(skip(self, request), fields(lines = request.lines.len(), actor = %actor))]
    pub async fn place_order(
        &self,
        request: PlaceOrder,
        actor: Actor,
    ) -> Result<CheckoutReceipt, DomainError> {
        validate(&request)?;
        let now = Utc::now();

        let items: Vec<LineItem> = request
            .lines
            .iter()
            .map(|line| LineItem::new(line.key.clone(), line.quantity))
            .collect();
        let lines = request
            .lines
            .into_iter()
            .map(|line| OrderLine::new(line.key, line.quantity, line.unit_price))
            .collect();
        let order = Order::new(
            order_number(now),
            request.buyer_id,
            lines,
            request.shipping_fee,
            now,
        );

        let mut tx = self.store.begin().await?;
        tx.insert_order(&order).await.map_err(|err| {
            match err.violated_constraint() {
                Some(constraints::ORDER_NUMBER) => {
                    DomainError::Validation(format!("order number {} is taken", order.order_number))
                }
                _ => DomainError::Store(err),
            }
        })?;

        let reservations = self.reservations.reserve_in(&mut tx, order.id, &items, now).await?;

        let entry = TransitionLogEntry::builder(
            order.id,
            order.version,
            PLACE_ORDER,
            OrderStatus::PendingPayment,
            actor,
        )
        .timestamp(now)
        .metadata("reservations_created", json!(reservations.len()))
        .metadata("order_number", json!(order.order_number))
        .build();
        tx.append_transition(&entry).await?;
        tx.commit().await?;

        metrics::counter!("reservations_created_total").increment(reservations.len() as u64);
        tracing::info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = %order.total,
            "Order placed"
        );

        self.effects
            .dispatch(&[
                SideEffect::RecordTransition {
                    entry: Box::new(entry),
                },
                SideEffect::NotifyBuyer {
                    order_id: order.id,
                    buyer_id: order.buyer_id.clone(),
                    notification: Notification::OrderPlaced,
                },
            ])
            .await;

        Ok(CheckoutReceipt {
            order,
            reservations,
        })
    }
}

fn validate(request: &PlaceOrder) -> Result<(), DomainError> {
    if request.shipping_fee.is_negative() {
        return Err(DomainError::Validation(
            "shipping fee cannot be negative".to_string(),
        ));
    }
    if let Some(line) = request.lines.iter().find(|line| line.unit_price.is_negative()) {
        return Err(DomainError::Validation(format!(
            "unit price for {} cannot be negative",
            line.key
        )));
    }

    let total = request.lines.iter().try_fold(request.shipping_fee, |total, line| {
        line.unit_price
            .checked_multiply(line.quantity)
            .and_then(|price| total.checked_add(price))
    });
    if total.is_none() {
        return Err(DomainError::Validation(
            "order total is out of range".to_string(),
        ));
    }
    Ok(())
}

/// `ORD-YYYYMMDD-XXXXXXXX`, the suffix taken from a random uuid.
fn order_number(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "ORD-{}-{}",
        now.format("%Y%m%d"),
        suffix[..8].to_ascii_uppercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_number_format() {
        let now = "2026-03-14T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let number = order_number(now);

        assert!(number.starts_with("ORD-20260314-"), "{number}");
        let suffix = &number["ORD-20260314-".len()..];
        assert_eq!(suffix.len(), 8);
        assert!(
            suffix
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
        );
    }

    #[test]
    fn negative_prices_are_rejected() {
        let request = PlaceOrder {
            buyer_id: None,
            lines: vec![CheckoutLine {
                key: StockKey::product("SKU-1"),
                quantity: 1,
                unit_price: Money::from_cents(-1),
            }],
            shipping_fee: Money::zero(),
        };
        assert!(matches!(validate(&request), Err(DomainError::Validation(_))));
    }

    #[test]
    fn overflowing_totals_are_rejected() {
        let line = |quantity| CheckoutLine {
            key: StockKey::product("SKU-1"),
            quantity,
            unit_price: Money::from_cents(i64::MAX / 2 + 1),
        };

        let request = PlaceOrder {
            buyer_id: None,
            lines: vec![line(2)],
            shipping_fee: Money::zero(),
        };
        assert!(matches!(validate(&request), Err(DomainError::Validation(_))));

        let request = PlaceOrder {
            buyer_id: None,
            lines: vec![line(1)],
            shipping_fee: Money::from_cents(i64::MAX / 2 + 1),
        };
        assert!(matches!(validate(&request), Err(DomainError::Validation(_))));

        let request = PlaceOrder {
            buyer_id: None,
            lines: vec![line(1)],
            shipping_fee: Money::zero(),
        };
        assert!(validate(&request).is_ok());
    }
}
