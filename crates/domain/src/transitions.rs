//! Order transition table.
//!
//! Each [`TransitionRule`] names its source statuses, target status, guard,
//! reservation action, field updates and side effects. [`plan`] evaluates a
//! rule against an order without touching storage; the executor in
//! [`crate::machine`] persists the result.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use store::{Actor, Order, OrderStatus};

use crate::effects::{Notification, SideEffect};
use crate::error::DomainError;
use crate::policy::OrderPolicy;

/// Named transitions of the order lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Transition {
    SelectPayment,
    ConfirmPayment,
    StartProcessing,
    Ship,
    MarkDelivered,
    Complete,
    CancelByBuyer,
    CancelBySeller,
    ExpirePayment,
    MarkFailed,
}

impl Transition {
    pub const ALL: [Transition; 10] = [
        Transition::SelectPayment,
        Transition::ConfirmPayment,
        Transition::StartProcessing,
        Transition::Ship,
        Transition::MarkDelivered,
        Transition::Complete,
        Transition::CancelByBuyer,
        Transition::CancelBySeller,
        Transition::ExpirePayment,
        Transition::MarkFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::SelectPayment => "selectPayment",
            Transition::ConfirmPayment => "confirmPayment",
            Transition::StartProcessing => "startProcessing",
            Transition::Ship => "ship",
            Transition::MarkDelivered => "markDelivered",
            Transition::Complete => "complete",
            Transition::CancelByBuyer => "cancelByBuyer",
            Transition::CancelBySeller => "cancelBySeller",
            Transition::ExpirePayment => "expirePayment",
            Transition::MarkFailed => "markFailed",
        }
    }

    fn snake_case(&self) -> &'static str {
        match self {
            Transition::SelectPayment => "select_payment",
            Transition::ConfirmPayment => "confirm_payment",
            Transition::StartProcessing => "start_processing",
            Transition::Ship => "ship",
            Transition::MarkDelivered => "mark_delivered",
            Transition::Complete => "complete",
            Transition::CancelByBuyer => "cancel_by_buyer",
            Transition::CancelBySeller => "cancel_by_seller",
            Transition::ExpirePayment => "expire_payment",
            Transition::MarkFailed => "mark_failed",
        }
    }

    /// Returns this transition's rule.
    pub fn rule(&self) -> &'static TransitionRule {
        // The table is indexed in `ALL` order; see `table_is_indexed_by_transition`.
        &TRANSITION_TABLE[*self as usize]
    }
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Transition {
    type Err = DomainError;

    /// Accepts `selectPayment` as well as `select_payment`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Transition::ALL
            .into_iter()
            .find(|t| t.as_str() == s || t.snake_case() == s)
            .ok_or_else(|| DomainError::UnknownTransition(s.to_string()))
    }
}

/// What happens to the order's reservations when a transition commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationAction {
    None,
    /// Permanently decrement stock for PENDING holds.
    Confirm,
    /// Release PENDING holds without touching stock.
    Release,
    /// Move PENDING holds' deadline to the order's payment deadline.
    ExtendToPaymentDeadline,
}

/// Inputs supplied by whoever requests a transition.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionContext {
    pub actor: Actor,
    pub reason: Option<String>,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
    pub tracking_number: Option<String>,
    /// Copied into the log entry's metadata.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TransitionContext {
    pub fn new(actor: Actor) -> Self {
        Self {
            actor,
            reason: None,
            payment_method: None,
            payment_reference: None,
            tracking_number: None,
            metadata: HashMap::new(),
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn payment_method(mut self, method: impl Into<String>) -> Self {
        self.payment_method = Some(method.into());
        self
    }

    pub fn payment_reference(mut self, reference: impl Into<String>) -> Self {
        self.payment_reference = Some(reference.into());
        self
    }

    pub fn tracking_number(mut self, tracking_number: impl Into<String>) -> Self {
        self.tracking_number = Some(tracking_number.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

type Guard = fn(&Order, &TransitionContext, &OrderPolicy, DateTime<Utc>) -> Result<(), String>;
type Apply = fn(&mut Order, &TransitionContext, &OrderPolicy, DateTime<Utc>);
type Effects = fn(&Order, OrderStatus) -> Vec<SideEffect>;

/// One row of the transition table.
pub struct TransitionRule {
    pub transition: Transition,
    pub from: &'static [OrderStatus],
    pub to: OrderStatus,
    /// Returns a validation message when the context misses a required input.
    pub requires: Guard,
    /// Returns a reason when the order is not ready for this transition yet.
    pub guard: Guard,
    pub reservations: ReservationAction,
    pub apply: Apply,
    /// Effects to dispatch after commit, given the updated order and its
    /// previous status.
    pub effects: Effects,
}

impl std::fmt::Debug for TransitionRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionRule")
            .field("transition", &self.transition)
            .field("from", &self.from)
            .field("to", &self.to)
            .field("reservations", &self.reservations)
            .finish_non_exhaustive()
    }
}

impl TransitionRule {
    pub fn allows_from(&self, status: OrderStatus) -> bool {
        self.from.contains(&status)
    }

    /// True when only the payment gateway may execute this rule.
    pub fn is_gateway_only(&self) -> bool {
        self.to.is_gateway_only()
    }
}

use OrderStatus::*;

pub static TRANSITION_TABLE: [TransitionRule; 10] = [
    TransitionRule {
        transition: Transition::SelectPayment,
        from: &[PendingPayment],
        to: WaitingPayment,
        requires: no_check,
        guard: no_check,
        reservations: ReservationAction::ExtendToPaymentDeadline,
        apply: |order, ctx, policy, now| {
            order.payment_method = ctx.payment_method.clone();
            order.payment_expires_at = Some(now + policy.payment_window);
            order.timestamps.payment_selected_at = Some(now);
        },
        effects: |order, _| vec![notify(order, Notification::PaymentInstructions)],
    },
    TransitionRule {
        transition: Transition::ConfirmPayment,
        from: &[WaitingPayment, PendingPayment],
        to: Paid,
        requires: |_, ctx, _, _| {
            require(&ctx.payment_reference, "a proof-of-payment reference is required")
        },
        guard: no_check,
        reservations: ReservationAction::Confirm,
        apply: |order, ctx, policy, now| {
            order.payment_reference = ctx.payment_reference.clone();
            order.timestamps.paid_at = Some(now);
            order.auto_complete_at = Some(now + policy.auto_complete_after);
        },
        effects: |order, _| {
            let mut effects = vec![
                notify(order, Notification::PaymentReceived),
                SideEffect::CreditEscrow {
                    order_id: order.id,
                    amount: order.total,
                },
            ];
            if let Some(at) = order.auto_complete_at {
                effects.push(SideEffect::ScheduleAutoComplete {
                    order_id: order.id,
                    at,
                });
            }
            effects
        },
    },
    TransitionRule {
        transition: Transition::StartProcessing,
        from: &[Paid],
        to: Processing,
        requires: no_check,
        guard: no_check,
        reservations: ReservationAction::None,
        apply: |order, _, _, now| order.timestamps.processed_at = Some(now),
        effects: |_, _| Vec::new(),
    },
    TransitionRule {
        transition: Transition::Ship,
        from: &[Processing],
        to: Shipped,
        requires: |_, ctx, _, _| require(&ctx.tracking_number, "a tracking number is required"),
        guard: no_check,
        reservations: ReservationAction::None,
        apply: |order, ctx, _, now| {
            order.tracking_number = ctx.tracking_number.clone();
            order.timestamps.shipped_at = Some(now);
        },
        effects: |order, _| vec![notify(order, Notification::OrderShipped)],
    },
    TransitionRule {
        transition: Transition::MarkDelivered,
        from: &[Shipped],
        to: Delivered,
        requires: no_check,
        guard: no_check,
        reservations: ReservationAction::None,
        apply: |order, _, policy, now| {
            order.timestamps.delivered_at = Some(now);
            order.return_window_ends_at = Some(now + policy.return_window);
        },
        effects: |order, _| vec![notify(order, Notification::OrderDelivered)],
    },
    TransitionRule {
        transition: Transition::Complete,
        from: &[Delivered],
        to: Completed,
        requires: no_check,
        guard: |order, _, policy, now| match order.timestamps.delivered_at {
            Some(delivered_at) if now - delivered_at >= policy.min_time_since_delivery => Ok(()),
            Some(delivered_at) => Err(format!(
                "delivered at {delivered_at}, completion allowed after {}",
                delivered_at + policy.min_time_since_delivery
            )),
            None => Err("delivery time is unknown".to_string()),
        },
        reservations: ReservationAction::None,
        apply: |order, _, _, now| order.timestamps.completed_at = Some(now),
        effects: |order, _| {
            vec![
                SideEffect::ReleaseEscrow {
                    order_id: order.id,
                    amount: order.total,
                },
                notify(order, Notification::OrderCompleted),
            ]
        },
    },
    TransitionRule {
        transition: Transition::CancelByBuyer,
        from: &[PendingPayment, WaitingPayment, Paid],
        to: Cancelled,
        requires: no_check,
        guard: no_check,
        reservations: ReservationAction::Release,
        apply: |order, ctx, _, now| cancel(order, ctx, "cancelled by buyer", now),
        effects: |order, from| {
            let mut effects = vec![notify(order, Notification::OrderCancelled)];
            if from == Paid {
                effects.push(refund(order));
            }
            effects
        },
    },
    TransitionRule {
        transition: Transition::CancelBySeller,
        from: &[Paid, Processing],
        to: Cancelled,
        requires: no_check,
        guard: no_check,
        reservations: ReservationAction::Release,
        apply: |order, ctx, _, now| cancel(order, ctx, "cancelled by seller", now),
        effects: |order, _| vec![notify(order, Notification::OrderCancelled), refund(order)],
    },
    TransitionRule {
        transition: Transition::ExpirePayment,
        from: &[WaitingPayment, PendingPayment],
        to: Cancelled,
        requires: no_check,
        guard: no_check,
        reservations: ReservationAction::Release,
        apply: |order, ctx, _, now| cancel(order, ctx, "payment expired", now),
        effects: |order, _| vec![notify(order, Notification::PaymentExpired)],
    },
    TransitionRule {
        transition: Transition::MarkFailed,
        from: &[PendingPayment, WaitingPayment],
        to: Failed,
        requires: no_check,
        guard: no_check,
        reservations: ReservationAction::Release,
        apply: |order, ctx, _, now| {
            order.cancellation_reason = ctx.reason.clone();
            order.timestamps.failed_at = Some(now);
        },
        effects: |order, _| vec![notify(order, Notification::PaymentFailed)],
    },
];

fn no_check(_: &Order, _: &TransitionContext, _: &OrderPolicy, _: DateTime<Utc>) -> Result<(), String> {
    Ok(())
}

fn require(value: &Option<String>, message: &str) -> Result<(), String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(()),
        _ => Err(message.to_string()),
    }
}

fn cancel(order: &mut Order, ctx: &TransitionContext, default_reason: &str, now: DateTime<Utc>) {
    order.cancellation_reason = Some(
        ctx.reason
            .clone()
            .unwrap_or_else(|| default_reason.to_string()),
    );
    order.timestamps.cancelled_at = Some(now);
}

fn notify(order: &Order, notification: Notification) -> SideEffect {
    SideEffect::NotifyBuyer {
        order_id: order.id,
        buyer_id: order.buyer_id.clone(),
        notification,
    }
}

fn refund(order: &Order) -> SideEffect {
    SideEffect::RefundPayment {
        order_id: order.id,
        amount: order.total,
    }
}

/// Who is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    /// Buyers, sellers, admins and background jobs.
    Manual,
    /// The webhook gateway, acting on a verified payment event.
    Gateway,
}

/// The validated result of applying a rule to an order, not yet persisted.
#[derive(Debug, Clone)]
pub struct TransitionPlan {
    pub rule: &'static TransitionRule,
    pub from: OrderStatus,
    /// The order after the transition, version bumped.
    pub order: Order,
    pub effects: Vec<SideEffect>,
}

/// Checks a transition against the table and computes the updated order.
pub fn plan(
    order: &Order,
    transition: Transition,
    ctx: &TransitionContext,
    policy: &OrderPolicy,
    authority: Authority,
    now: DateTime<Utc>,
) -> Result<TransitionPlan, DomainError> {
    let rule = transition.rule();

    if rule.is_gateway_only() && authority != Authority::Gateway {
        return Err(DomainError::ForbiddenManualTransition {
            transition,
            target: rule.to,
        });
    }
    if !rule.allows_from(order.status) {
        return Err(DomainError::TransitionRejected {
            transition,
            status: order.status,
        });
    }
    (rule.requires)(order, ctx, policy, now).map_err(DomainError::Validation)?;
    (rule.guard)(order, ctx, policy, now)
        .map_err(|reason| DomainError::GuardFailed { transition, reason })?;

    let mut next = order.clone();
    next.status = rule.to;
    next.version = order.version.next();
    next.timestamps.updated_at = now;
    (rule.apply)(&mut next, ctx, policy, now);
    let effects = (rule.effects)(&next, order.status);

    Ok(TransitionPlan {
        rule,
        from: order.status,
        order: next,
        effects,
    })
}

/// Transitions a caller with `authority` could run from `status`.
pub fn available_transitions(status: OrderStatus, authority: Authority) -> Vec<Transition> {
    TRANSITION_TABLE
        .iter()
        .filter(|rule| rule.allows_from(status))
        .filter(|rule| authority == Authority::Gateway || !rule.is_gateway_only())
        .map(|rule| rule.transition)
        .collect()
}

/// Returns true if some rule moves an order from `from` to `to`.
pub fn is_listed(from: OrderStatus, to: OrderStatus) -> bool {
    TRANSITION_TABLE
        .iter()
        .any(|rule| rule.to == to && rule.allows_from(from))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use common::{Money, StockKey};
    use store::OrderLine;

    use super::*;

    fn order_in(status: OrderStatus) -> Order {
        let mut order = Order::new(
            "ORD-1",
            Some("buyer-1".to_string()),
            vec![OrderLine::new(
                StockKey::product("SKU-1"),
                1,
                Money::from_cents(1000),
            )],
            Money::zero(),
            Utc::now(),
        );
        order.status = status;
        order
    }

    fn ctx() -> TransitionContext {
        TransitionContext::new(Actor::admin("admin-1"))
    }

    #[test]
    fn table_is_indexed_by_transition() {
        for transition in Transition::ALL {
            assert_eq!(transition.rule().transition, transition);
        }
    }

    #[test]
    fn names_parse_in_both_cases() {
        for transition in Transition::ALL {
            assert_eq!(transition.as_str().parse::<Transition>().unwrap(), transition);
            assert_eq!(
                transition.snake_case().parse::<Transition>().unwrap(),
                transition
            );
        }
        assert!(matches!(
            "refund".parse::<Transition>(),
            Err(DomainError::UnknownTransition(_))
        ));
    }

    #[test]
    fn terminal_states_have_no_way_out() {
        for status in OrderStatus::ALL.into_iter().filter(OrderStatus::is_terminal) {
            assert!(available_transitions(status, Authority::Gateway).is_empty());
        }
    }

    #[test]
    fn only_gateway_reaches_paid_and_failed() {
        for rule in &TRANSITION_TABLE {
            let gateway_only = matches!(
                rule.transition,
                Transition::ConfirmPayment | Transition::MarkFailed
            );
            assert_eq!(rule.is_gateway_only(), gateway_only, "{}", rule.transition);
        }
    }

    #[test]
    fn manual_confirm_payment_is_forbidden() {
        let order = order_in(WaitingPayment);
        let result = plan(
            &order,
            Transition::ConfirmPayment,
            &ctx().payment_reference("ref-1"),
            &OrderPolicy::default(),
            Authority::Manual,
            Utc::now(),
        );
        assert!(matches!(
            result,
            Err(DomainError::ForbiddenManualTransition { target: Paid, .. })
        ));
    }

    #[test]
    fn select_payment_sets_deadline() {
        let order = order_in(PendingPayment);
        let now = Utc::now();
        let plan = plan(
            &order,
            Transition::SelectPayment,
            &ctx().payment_method("bank_transfer"),
            &OrderPolicy::default(),
            Authority::Manual,
            now,
        )
        .unwrap();

        assert_eq!(plan.order.status, WaitingPayment);
        assert_eq!(plan.order.version, order.version.next());
        assert_eq!(plan.order.payment_expires_at, Some(now + Duration::hours(24)));
        assert_eq!(plan.order.payment_method.as_deref(), Some("bank_transfer"));
        assert_eq!(plan.rule.reservations, ReservationAction::ExtendToPaymentDeadline);
    }

    #[test]
    fn confirm_payment_requires_reference() {
        let order = order_in(WaitingPayment);
        let result = plan(
            &order,
            Transition::ConfirmPayment,
            &ctx(),
            &OrderPolicy::default(),
            Authority::Gateway,
            Utc::now(),
        );
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn ship_requires_tracking_number() {
        let order = order_in(Processing);
        let result = plan(
            &order,
            Transition::Ship,
            &ctx().tracking_number("  "),
            &OrderPolicy::default(),
            Authority::Manual,
            Utc::now(),
        );
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn complete_waits_a_day_after_delivery() {
        let now = Utc::now();
        let mut order = order_in(Delivered);
        order.timestamps.delivered_at = Some(now - Duration::hours(2));

        let policy = OrderPolicy::default();
        let result = plan(&order, Transition::Complete, &ctx(), &policy, Authority::Manual, now);
        assert!(matches!(result, Err(DomainError::GuardFailed { .. })));

        order.timestamps.delivered_at = Some(now - Duration::days(1));
        let plan = plan(&order, Transition::Complete, &ctx(), &policy, Authority::Manual, now)
            .unwrap();
        assert_eq!(plan.order.status, Completed);
        assert!(
            plan.effects
                .iter()
                .any(|e| matches!(e, SideEffect::ReleaseEscrow { .. }))
        );
    }

    #[test]
    fn cancel_by_buyer_refunds_only_paid_orders() {
        let policy = OrderPolicy::default();
        let refunds = |status| {
            plan(
                &order_in(status),
                Transition::CancelByBuyer,
                &ctx(),
                &policy,
                Authority::Manual,
                Utc::now(),
            )
            .unwrap()
            .effects
            .iter()
            .filter(|e| matches!(e, SideEffect::RefundPayment { .. }))
            .count()
        };
        assert_eq!(refunds(PendingPayment), 0);
        assert_eq!(refunds(WaitingPayment), 0);
        assert_eq!(refunds(Paid), 1);
    }

    #[test]
    fn stale_transition_is_rejected() {
        let result = plan(
            &order_in(Shipped),
            Transition::CancelByBuyer,
            &ctx(),
            &OrderPolicy::default(),
            Authority::Manual,
            Utc::now(),
        );
        assert!(matches!(
            result,
            Err(DomainError::TransitionRejected { status: Shipped, .. })
        ));
    }

    #[test]
    fn listed_pairs_match_table() {
        assert!(is_listed(PendingPayment, WaitingPayment));
        assert!(is_listed(WaitingPayment, Paid));
        assert!(!is_listed(Paid, WaitingPayment));
        assert!(!is_listed(Shipped, Cancelled));
    }
}
