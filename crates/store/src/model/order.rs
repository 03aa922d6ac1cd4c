use chrono::{DateTime, Utc};
use common::{Money, OrderId, ProductId, StockKey, VariantId};
use serde::{Deserialize, Serialize};

use super::UnknownVariant;
use crate::Version;

/// The state of an order in its lifecycle.
///
/// ```text
/// PendingPayment ──► WaitingPayment ──► Paid ──► Processing ──► Shipped ──► Delivered ──► Completed
///       │                  │             │           │
///       ├──────────────────┴─────────────┴───────────┴──► Cancelled
///       └──────────────────┴──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Stock is held, no payment method chosen yet.
    #[default]
    PendingPayment,

    /// Buyer chose a payment method; waiting for the gateway.
    WaitingPayment,

    /// Gateway confirmed the payment.
    Paid,

    /// Seller is preparing the shipment.
    Processing,

    /// Handed to the carrier.
    Shipped,

    /// Carrier reported delivery.
    Delivered,

    /// Escrow released to the seller (terminal state).
    Completed,

    /// Cancelled by buyer, seller or payment expiry (terminal state).
    Cancelled,

    /// Gateway reported the payment as failed (terminal state).
    Failed,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 9] = [
        OrderStatus::PendingPayment,
        OrderStatus::WaitingPayment,
        OrderStatus::Paid,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
        OrderStatus::Failed,
    ];

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Failed
        )
    }

    /// Returns true for states only the payment gateway may move an order into.
    pub fn is_gateway_only(&self) -> bool {
        matches!(self, OrderStatus::Paid | OrderStatus::Failed)
    }

    /// Returns true while the order is still waiting for money.
    pub fn is_awaiting_payment(&self) -> bool {
        matches!(
            self,
            OrderStatus::PendingPayment | OrderStatus::WaitingPayment
        )
    }

    /// Returns the state name as stored and exposed over the API.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingPayment => "PENDING_PAYMENT",
            OrderStatus::WaitingPayment => "WAITING_PAYMENT",
            OrderStatus::Paid => "PAID",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                kind: "order status",
                value: s.to_string(),
            })
    }
}

/// One purchased line: a stock row, a quantity and the unit price at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<VariantId>,
    pub quantity: u32,
    pub unit_price: Money,
}

impl OrderLine {
    pub fn new(key: StockKey, quantity: u32, unit_price: Money) -> Self {
        Self {
            product_id: key.product_id,
            variant_id: key.variant_id,
            quantity,
            unit_price,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey {
            product_id: self.product_id.clone(),
            variant_id: self.variant_id.clone(),
        }
    }

    /// Returns quantity * unit price.
    pub fn total_price(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// When the order entered each state. Unset until the state is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTimestamps {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub payment_selected_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl OrderTimestamps {
    pub fn created(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            updated_at: now,
            payment_selected_at: None,
            paid_at: None,
            processed_at: None,
            shipped_at: None,
            delivered_at: None,
            completed_at: None,
            cancelled_at: None,
            failed_at: None,
        }
    }
}

/// Order row.
///
/// Fields are public for the store backends; the domain crate is the only
/// writer and changes status exclusively through its transition executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub order_number: String,
    pub buyer_id: Option<String>,
    pub status: OrderStatus,
    pub version: Version,
    pub lines: Vec<OrderLine>,
    pub subtotal: Money,
    pub shipping_fee: Money,
    pub total: Money,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
    pub payment_expires_at: Option<DateTime<Utc>>,
    pub tracking_number: Option<String>,
    pub cancellation_reason: Option<String>,
    pub return_window_ends_at: Option<DateTime<Utc>>,
    pub auto_complete_at: Option<DateTime<Utc>>,
    pub timestamps: OrderTimestamps,
}

impl Order {
    /// Creates a PENDING_PAYMENT order at version 1 with totals computed
    /// from `lines` plus `shipping_fee`.
    pub fn new(
        order_number: impl Into<String>,
        buyer_id: Option<String>,
        lines: Vec<OrderLine>,
        shipping_fee: Money,
        now: DateTime<Utc>,
    ) -> Self {
        let subtotal: Money = lines.iter().map(OrderLine::total_price).sum();
        Self {
            id: OrderId::new(),
            order_number: order_number.into(),
            buyer_id,
            status: OrderStatus::PendingPayment,
            version: Version::first(),
            subtotal,
            shipping_fee,
            total: subtotal + shipping_fee,
            lines,
            payment_method: None,
            payment_reference: None,
            payment_expires_at: None,
            tracking_number: None,
            cancellation_reason: None,
            return_window_ends_at: None,
            auto_complete_at: None,
            timestamps: OrderTimestamps::created(now),
        }
    }

    /// Returns the total quantity over all lines.
    pub fn total_quantity(&self) -> u32 {
        self.lines.iter().map(|line| line.quantity).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in OrderStatus::ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>(), Ok(status));
        }
        assert!("SHIPPING".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn status_serializes_in_screaming_snake_case() {
        let json = serde_json::to_string(&OrderStatus::WaitingPayment).unwrap();
        assert_eq!(json, "\"WAITING_PAYMENT\"");
    }

    #[test]
    fn terminal_and_gateway_only_states() {
        let terminal: Vec<_> = OrderStatus::ALL
            .into_iter()
            .filter(OrderStatus::is_terminal)
            .collect();
        assert_eq!(
            terminal,
            vec![
                OrderStatus::Completed,
                OrderStatus::Cancelled,
                OrderStatus::Failed
            ]
        );

        assert!(OrderStatus::Paid.is_gateway_only());
        assert!(OrderStatus::Failed.is_gateway_only());
        assert!(!OrderStatus::Cancelled.is_gateway_only());
    }

    #[test]
    fn new_order_computes_totals() {
        let lines = vec![
            OrderLine::new(StockKey::product("SKU-1"), 2, Money::from_cents(1500)),
            OrderLine::new(StockKey::variant("SKU-2", "XL"), 1, Money::from_cents(999)),
        ];
        let order = Order::new("ORD-1", None, lines, Money::from_cents(500), Utc::now());

        assert_eq!(order.status, OrderStatus::PendingPayment);
        assert_eq!(order.version, Version::first());
        assert_eq!(order.subtotal.cents(), 3999);
        assert_eq!(order.total.cents(), 4499);
        assert_eq!(order.total_quantity(), 3);
    }

    #[test]
    fn line_total_and_key() {
        let line = OrderLine::new(StockKey::variant("SKU-1", "M"), 3, Money::from_cents(1000));
        assert_eq!(line.total_price().cents(), 3000);
        assert_eq!(line.key(), StockKey::variant("SKU-1", "M"));
    }
}
