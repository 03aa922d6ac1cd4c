use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};

/// One distinct payment-gateway callback.
///
/// `gateway_transaction_id` is the idempotency key: storage rejects a second
/// row with the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub gateway_transaction_id: String,
    pub order_id: OrderId,
    pub order_number: String,
    pub external_status: String,
    pub fraud_status: Option<String>,
    pub payment_type: Option<String>,
    pub gross_amount: String,
    /// What the callback did to the order, e.g. `applied:confirmPayment` or
    /// `ignored:stale`.
    pub outcome: String,
    pub raw_payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}
