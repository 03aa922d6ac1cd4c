//! Generic executor for the transition table.
//!
//! A transition runs as one atomic unit: lock the order, evaluate the rule,
//! run its reservation action, write the order and its log entry, commit.
//! Side effects are dispatched only after the commit succeeds.

use std::time::Instant;

use chrono::{DateTime, Utc};
use common::OrderId;
use inventory::{InventoryError, ReservationManager};
use serde_json::json;
use store::{
    Actor, Order, OrderStatus, PaymentEvent, Reservation, Store, Transaction, TransitionLogEntry,
    TransitionLogQuery,
};

use crate::effects::{EffectDispatcher, SideEffect};
use crate::error::DomainError;
use crate::policy::OrderPolicy;
use crate::transitions::{
    Authority, ReservationAction, Transition, TransitionContext, available_transitions, plan,
};

/// Result of a committed transition.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub order: Order,
    pub transition: Transition,
    pub from: OrderStatus,
    pub log_entry: TransitionLogEntry,
    /// Effects to dispatch once the enclosing transaction has committed.
    pub effects: Vec<SideEffect>,
}

/// The sole writer of order status.
#[derive(Clone)]
pub struct OrderStateMachine<S: Store> {
    store: S,
    reservations: ReservationManager<S>,
    policy: OrderPolicy,
    effects: EffectDispatcher,
}

impl<S: Store> OrderStateMachine<S> {
    pub fn new(store: S, policy: OrderPolicy) -> Self {
        Self {
            reservations: ReservationManager::with_ttl(store.clone(), policy.reservation_ttl),
            store,
            policy,
            effects: EffectDispatcher::new(),
        }
    }

    pub fn with_effects(mut self, effects: EffectDispatcher) -> Self {
        self.effects = effects;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn reservations(&self) -> &ReservationManager<S> {
        &self.reservations
    }

    pub fn policy(&self) -> &OrderPolicy {
        &self.policy
    }

    pub fn effects(&self) -> &EffectDispatcher {
        &self.effects
    }

    /// Runs a manual transition (buyer, seller, admin or background job).
    ///
    /// Transitions into PAID or FAILED fail with
    /// [`DomainError::ForbiddenManualTransition`]; those go through the
    /// payment gateway.
    #[tracing::instrument(skip(self, ctx), fields(actor = %ctx.actor))]
    pub async fn transition(
        &self,
        order_id: OrderId,
        transition: Transition,
        ctx: TransitionContext,
    ) -> Result<TransitionOutcome, DomainError> {
        let started = Instant::now();
        let now = Utc::now();

        let mut tx = self.store.begin().await?;
        let order = tx
            .lock_order(order_id)
            .await?
            .ok_or_else(|| DomainError::OrderNotFound(order_id.to_string()))?;

        let outcome = match self
            .apply_in(&mut tx, &order, transition, &ctx, None, now)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                metrics::counter!(
                    "order_transitions_total",
                    "transition" => transition.as_str(),
                    "result" => "rejected"
                )
                .increment(1);
                return Err(err);
            }
        };
        tx.commit().await?;

        metrics::histogram!("transition_duration_seconds", "transition" => transition.as_str())
            .record(started.elapsed().as_secs_f64());
        self.after_commit(&outcome).await;
        Ok(outcome)
    }

    /// Applies a transition inside a caller-owned transaction.
    ///
    /// The caller must already hold `order`'s lock. Passing `payment_event`
    /// runs the transition with gateway authority and records the event's
    /// transaction id as the actor. Nothing is dispatched; call
    /// [`Self::after_commit`] once `tx` has committed.
    pub async fn apply_in(
        &self,
        tx: &mut S::Tx,
        order: &Order,
        transition: Transition,
        ctx: &TransitionContext,
        payment_event: Option<&PaymentEvent>,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, DomainError> {
        let authority = match payment_event {
            Some(_) => Authority::Gateway,
            None => Authority::Manual,
        };
        let plan = plan(order, transition, ctx, &self.policy, authority, now)?;

        let actor = match payment_event {
            Some(event) => Actor::payment_gateway(event.gateway_transaction_id.clone()),
            None => ctx.actor.clone(),
        };
        let reason = ctx
            .reason
            .clone()
            .or_else(|| match plan.rule.to {
                OrderStatus::Cancelled | OrderStatus::Failed => {
                    plan.order.cancellation_reason.clone()
                }
                _ => None,
            });

        let mut entry = TransitionLogEntry::builder(
            order.id,
            plan.order.version,
            transition.as_str(),
            plan.rule.to,
            actor,
        )
        .from_status(plan.from)
        .reason(reason.clone())
        .timestamp(now);

        match plan.rule.reservations {
            ReservationAction::None => {}
            ReservationAction::Confirm => {
                let decrements = self
                    .reservations
                    .confirm_in(tx, order, now)
                    .await
                    .map_err(|err| match err {
                        InventoryError::HoldReleased { key, .. } => DomainError::GuardFailed {
                            transition,
                            reason: format!("the hold on {key} was released"),
                        },
                        other => other.into(),
                    })?;
                entry = entry
                    .metadata("reservations_confirmed", json!(decrements.len()))
                    .metadata("stock_decrements", serde_json::to_value(&decrements)?);
            }
            ReservationAction::Release => {
                let release_reason = reason.as_deref().unwrap_or(transition.as_str());
                let released = self
                    .reservations
                    .release_in(tx, order.id, release_reason, now)
                    .await?;
                entry = entry.metadata("reservations_released", json!(released.len()));
            }
            ReservationAction::ExtendToPaymentDeadline => {
                if let Some(deadline) = plan.order.payment_expires_at {
                    let extended = self.reservations.extend_in(tx, order.id, deadline).await?;
                    entry = entry.metadata("reservations_extended", json!(extended));
                }
            }
        }

        if let Some(event) = payment_event {
            entry = entry
                .metadata("gateway_transaction_id", json!(event.gateway_transaction_id))
                .metadata("gateway_status", json!(event.external_status))
                .metadata("gross_amount", json!(event.gross_amount));
            if let Some(fraud_status) = &event.fraud_status {
                entry = entry.metadata("fraud_status", json!(fraud_status));
            }
        }

        tx.update_order(&plan.order).await?;
        let log_entry = entry.extend_metadata(ctx.metadata.clone()).build();
        tx.append_transition(&log_entry).await?;

        let mut effects = Vec::with_capacity(plan.effects.len() + 1);
        effects.push(SideEffect::RecordTransition {
            entry: Box::new(log_entry.clone()),
        });
        effects.extend(plan.effects);

        Ok(TransitionOutcome {
            order: plan.order,
            transition,
            from: plan.from,
            log_entry,
            effects,
        })
    }

    /// Records metrics and dispatches the outcome's effects.
    pub async fn after_commit(&self, outcome: &TransitionOutcome) {
        metrics::counter!(
            "order_transitions_total",
            "transition" => outcome.transition.as_str(),
            "result" => "applied"
        )
        .increment(1);
        tracing::info!(
            order_id = %outcome.order.id,
            transition = %outcome.transition,
            from = %outcome.from,
            to = %outcome.order.status,
            actor = %outcome.log_entry.actor,
            "Order transitioned"
        );
        self.effects.dispatch(&outcome.effects).await;
    }

    pub async fn order(&self, order_id: OrderId) -> Result<Order, DomainError> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or_else(|| DomainError::OrderNotFound(order_id.to_string()))
    }

    pub async fn order_by_number(&self, order_number: &str) -> Result<Order, DomainError> {
        self.store
            .get_order_by_number(order_number)
            .await?
            .ok_or_else(|| DomainError::OrderNotFound(order_number.to_string()))
    }

    pub async fn reservations_for(&self, order_id: OrderId) -> Result<Vec<Reservation>, DomainError> {
        Ok(self.store.reservations_for_order(order_id).await?)
    }

    /// The order's audit trail, oldest first.
    pub async fn history(&self, order_id: OrderId) -> Result<Vec<TransitionLogEntry>, DomainError> {
        Ok(self
            .store
            .query_transitions(TransitionLogQuery::for_order(order_id))
            .await?)
    }

    pub async fn payment_events(&self, order_id: OrderId) -> Result<Vec<PaymentEvent>, DomainError> {
        Ok(self.store.payment_events_for_order(order_id).await?)
    }

    /// Manual transitions currently possible for the order.
    pub async fn available(&self, order_id: OrderId) -> Result<Vec<Transition>, DomainError> {
        let order = self.order(order_id).await?;
        Ok(available_transitions(order.status, Authority::Manual))
    }
}
