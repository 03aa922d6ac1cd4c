//! Webhook idempotency gateway.
//!
//! Callbacks are at-least-once. The gateway transaction id is the
//! idempotency key: the first delivery records a [`PaymentEvent`] and drives
//! the order in the same transaction, every later delivery is answered as a
//! duplicate without touching state.

use chrono::Utc;
use common::{Money, OrderId};
use domain::{DomainError, OrderStateMachine, Transition, TransitionContext};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use store::{Actor, Order, OrderStatus, PaymentEvent, Store, StoreError, Transaction, constraints};

use crate::error::WebhookError;
use crate::mapping::{GatewayCommand, map_status};
use crate::signature;

/// The callback body as the gateway posts it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentNotification {
    /// The merchant-side order number.
    pub order_id: String,
    pub transaction_id: String,
    pub transaction_status: String,
    #[serde(default)]
    pub fraud_status: Option<String>,
    #[serde(default)]
    pub payment_type: Option<String>,
    pub gross_amount: String,
    pub signature_key: String,
    pub status_code: String,
}

impl PaymentNotification {
    fn validate(&self) -> Result<(), WebhookError> {
        for (field, value) in [
            ("order_id", &self.order_id),
            ("transaction_id", &self.transaction_id),
            ("transaction_status", &self.transaction_status),
            ("signature_key", &self.signature_key),
        ] {
            if value.trim().is_empty() {
                return Err(WebhookError::Validation(format!("{field} is required")));
            }
        }
        Ok(())
    }
}

/// How a callback was handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookReceipt {
    pub transaction_id: String,
    /// True when this transaction id had already been processed.
    pub duplicate: bool,
    /// `applied:<transition>`, `ignored:<reason>` or `recorded`.
    pub outcome: String,
    pub order_id: OrderId,
    pub order_status: OrderStatus,
}

#[derive(Clone)]
pub struct PaymentGateway<S: Store> {
    machine: OrderStateMachine<S>,
    server_key: String,
}

impl<S: Store> PaymentGateway<S> {
    pub fn new(machine: OrderStateMachine<S>, server_key: impl Into<String>) -> Self {
        Self {
            machine,
            server_key: server_key.into(),
        }
    }

    /// Verifies the callback's signature.
    pub fn verify_signature(&self, notification: &PaymentNotification) -> Result<(), WebhookError> {
        if signature::verify(
            &notification.signature_key,
            &notification.order_id,
            &notification.status_code,
            &notification.gross_amount,
            &self.server_key,
        ) {
            Ok(())
        } else {
            metrics::counter!("webhook_events_total", "outcome" => "invalid_signature")
                .increment(1);
            tracing::warn!(
                transaction_id = %notification.transaction_id,
                order_number = %notification.order_id,
                "Rejected payment callback with invalid signature"
            );
            Err(WebhookError::InvalidSignature {
                transaction_id: notification.transaction_id.clone(),
            })
        }
    }

    /// Processes one callback body.
    ///
    /// Signature and shape are checked before any state is read. A replayed
    /// transaction id returns `duplicate: true`. Commands that no longer fit
    /// the order's status are recorded as `ignored:stale` and succeed, as is
    /// a settlement for an order whose holds were already released
    /// (`ignored:holds_released`).
    #[tracing::instrument(skip(self, payload), fields(transaction_id = tracing::field::Empty))]
    pub async fn process_event(&self, payload: Value) -> Result<WebhookReceipt, WebhookError> {
        let notification: PaymentNotification = serde_json::from_value(payload.clone())
            .map_err(|err| WebhookError::Validation(err.to_string()))?;
        notification.validate()?;
        self.verify_signature(&notification)?;

        let transaction_id = notification.transaction_id.clone();
        tracing::Span::current().record("transaction_id", transaction_id.as_str());

        if let Some(existing) = self.machine.store().get_payment_event(&transaction_id).await? {
            return self.duplicate(existing).await;
        }

        let order_id = self.resolve_order(&notification.order_id).await?;
        let now = Utc::now();

        let mut tx = self.machine.store().begin().await?;
        let order = tx
            .lock_order(order_id)
            .await?
            .ok_or_else(|| WebhookError::OrderNotFound(notification.order_id.clone()))?;

        // A concurrent delivery may have committed while we waited for the lock.
        if let Some(existing) = tx.find_payment_event(&transaction_id).await? {
            drop(tx);
            return self.duplicate(existing).await;
        }

        let command = map_status(
            &notification.transaction_status,
            notification.fraud_status.as_deref(),
        );
        let mut decision = decide(command, &order, &notification);
        if decision == Decision::Apply(Transition::ConfirmPayment) {
            let uncovered = self
                .machine
                .reservations()
                .uncovered_in(&mut tx, &order)
                .await
                .map_err(DomainError::from)?;
            if !uncovered.is_empty() {
                tracing::warn!(
                    %order_id,
                    transaction_id = %transaction_id,
                    released = ?uncovered,
                    "Payment settled after the order's holds were released"
                );
                decision = Decision::Ignore("holds_released");
            }
        }

        let event = PaymentEvent {
            gateway_transaction_id: transaction_id.clone(),
            order_id,
            order_number: order.order_number.clone(),
            external_status: notification.transaction_status.clone(),
            fraud_status: notification.fraud_status.clone(),
            payment_type: notification.payment_type.clone(),
            gross_amount: notification.gross_amount.clone(),
            outcome: decision.outcome(),
            raw_payload: payload,
            received_at: now,
        };
        match tx.insert_payment_event(&event).await {
            Err(err) if is_duplicate_event(&err) => {
                drop(tx);
                return self.duplicate_of(&transaction_id).await;
            }
            other => other?,
        }

        let outcome = match decision {
            Decision::Apply(transition) => Some(
                self.machine
                    .apply_in(
                        &mut tx,
                        &order,
                        transition,
                        &gateway_context(&notification),
                        Some(&event),
                        now,
                    )
                    .await?,
            ),
            Decision::Ignore(_) | Decision::Record => None,
        };

        match tx.commit().await {
            Err(err) if is_duplicate_event(&err) => return self.duplicate_of(&transaction_id).await,
            other => other?,
        }

        metrics::counter!("webhook_events_total", "outcome" => decision.kind()).increment(1);
        tracing::info!(
            %order_id,
            transaction_id = %transaction_id,
            status = %notification.transaction_status,
            outcome = %event.outcome,
            "Payment callback processed"
        );

        let order_status = match &outcome {
            Some(outcome) => outcome.order.status,
            None => order.status,
        };
        if let Some(outcome) = &outcome {
            self.machine.after_commit(outcome).await;
        }

        Ok(WebhookReceipt {
            transaction_id,
            duplicate: false,
            outcome: event.outcome,
            order_id,
            order_status,
        })
    }

    /// Accepts either an order number or an order id.
    async fn resolve_order(&self, reference: &str) -> Result<OrderId, WebhookError> {
        let store = self.machine.store();
        if let Some(order) = store.get_order_by_number(reference).await? {
            return Ok(order.id);
        }
        if let Ok(uuid) = reference.parse::<uuid::Uuid>()
            && let Some(order) = store.get_order(OrderId::from_uuid(uuid)).await?
        {
            return Ok(order.id);
        }
        Err(WebhookError::OrderNotFound(reference.to_string()))
    }

    async fn duplicate_of(&self, transaction_id: &str) -> Result<WebhookReceipt, WebhookError> {
        match self.machine.store().get_payment_event(transaction_id).await? {
            Some(existing) => self.duplicate(existing).await,
            None => Err(WebhookError::Store(StoreError::UniqueViolation {
                constraint: constraints::PAYMENT_EVENT_ID.to_string(),
            })),
        }
    }

    async fn duplicate(&self, existing: PaymentEvent) -> Result<WebhookReceipt, WebhookError> {
        metrics::counter!("webhook_duplicates_total").increment(1);
        tracing::info!(
            transaction_id = %existing.gateway_transaction_id,
            order_id = %existing.order_id,
            "Duplicate payment callback"
        );

        let order = self
            .machine
            .store()
            .get_order(existing.order_id)
            .await?
            .ok_or_else(|| WebhookError::OrderNotFound(existing.order_number.clone()))?;

        Ok(WebhookReceipt {
            transaction_id: existing.gateway_transaction_id,
            duplicate: true,
            outcome: existing.outcome,
            order_id: existing.order_id,
            order_status: order.status,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Apply(Transition),
    Ignore(&'static str),
    Record,
}

impl Decision {
    fn outcome(&self) -> String {
        match self {
            Decision::Apply(transition) => format!("applied:{transition}"),
            Decision::Ignore(reason) => format!("ignored:{reason}"),
            Decision::Record => "recorded".to_string(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Decision::Apply(_) => "applied",
            Decision::Ignore(_) => "ignored",
            Decision::Record => "recorded",
        }
    }
}

fn decide(command: GatewayCommand, order: &Order, notification: &PaymentNotification) -> Decision {
    let transition = match command {
        GatewayCommand::NoOp => return Decision::Record,
        GatewayCommand::Apply(transition) => transition,
    };

    if !transition.rule().allows_from(order.status) {
        return Decision::Ignore("stale");
    }
    if transition == Transition::ConfirmPayment
        && Money::parse_decimal(&notification.gross_amount) != Some(order.total)
    {
        tracing::warn!(
            order_id = %order.id,
            expected = %order.total,
            received = %notification.gross_amount,
            "Payment amount does not match order total"
        );
        return Decision::Ignore("amount_mismatch");
    }
    Decision::Apply(transition)
}

fn gateway_context(notification: &PaymentNotification) -> TransitionContext {
    let mut ctx = TransitionContext::new(Actor::payment_gateway(
        notification.transaction_id.clone(),
    ))
    .payment_reference(notification.transaction_id.clone())
    .reason(format!("gateway status {}", notification.transaction_status));

    if let Some(payment_type) = &notification.payment_type {
        ctx = ctx
            .payment_method(payment_type.clone())
            .metadata("payment_type", json!(payment_type));
    }
    ctx
}

fn is_duplicate_event(err: &StoreError) -> bool {
    err.violated_constraint() == Some(constraints::PAYMENT_EVENT_ID)
}

/// Builds a signed callback body, as the gateway would send it.
pub fn signed_notification(
    order_number: &str,
    transaction_id: &str,
    transaction_status: &str,
    fraud_status: Option<&str>,
    gross_amount: &str,
    server_key: &str,
) -> Value {
    let status_code = match transaction_status {
        "capture" | "settlement" => "200",
        "pending" => "201",
        _ => "202",
    };
    json!({
        "order_id": order_number,
        "transaction_id": transaction_id,
        "transaction_status": transaction_status,
        "fraud_status": fraud_status,
        "payment_type": "bank_transfer",
        "gross_amount": gross_amount,
        "status_code": status_code,
        "signature_key": signature::sign(order_number, status_code, gross_amount, server_key),
    })
}
