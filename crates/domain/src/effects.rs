//! Post-commit side effects.
//!
//! Transitions produce [`SideEffect`] values; after the transaction commits,
//! the [`EffectDispatcher`] hands each one to every registered handler.
//! Handler failures are logged and counted, never returned.

use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Money, OrderId};
use serde::Serialize;
use store::TransitionLogEntry;
use thiserror::Error;

/// Buyer-facing notification kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Notification {
    OrderPlaced,
    PaymentInstructions,
    PaymentReceived,
    OrderShipped,
    OrderDelivered,
    OrderCompleted,
    OrderCancelled,
    PaymentExpired,
    PaymentFailed,
}

/// Work for external collaborators, produced by a committed transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SideEffect {
    /// Forward the log entry to the audit sink.
    RecordTransition { entry: Box<TransitionLogEntry> },
    NotifyBuyer {
        order_id: OrderId,
        buyer_id: Option<String>,
        notification: Notification,
    },
    CreditEscrow { order_id: OrderId, amount: Money },
    ReleaseEscrow { order_id: OrderId, amount: Money },
    RefundPayment { order_id: OrderId, amount: Money },
    ScheduleAutoComplete { order_id: OrderId, at: DateTime<Utc> },
}

impl SideEffect {
    /// Short name for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SideEffect::RecordTransition { .. } => "record_transition",
            SideEffect::NotifyBuyer { .. } => "notify_buyer",
            SideEffect::CreditEscrow { .. } => "credit_escrow",
            SideEffect::ReleaseEscrow { .. } => "release_escrow",
            SideEffect::RefundPayment { .. } => "refund_payment",
            SideEffect::ScheduleAutoComplete { .. } => "schedule_auto_complete",
        }
    }

    pub fn order_id(&self) -> OrderId {
        match self {
            SideEffect::RecordTransition { entry } => entry.order_id,
            SideEffect::NotifyBuyer { order_id, .. }
            | SideEffect::CreditEscrow { order_id, .. }
            | SideEffect::ReleaseEscrow { order_id, .. }
            | SideEffect::RefundPayment { order_id, .. }
            | SideEffect::ScheduleAutoComplete { order_id, .. } => *order_id,
        }
    }
}

/// Error reported by an effect handler.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct EffectError(pub String);

/// A side-effect collaborator (notifications, escrow ledger, audit sink).
#[async_trait]
pub trait EffectHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, effect: &SideEffect) -> Result<(), EffectError>;
}

/// Fans effects out to every handler, best effort.
#[derive(Clone, Default)]
pub struct EffectDispatcher {
    handlers: Vec<Arc<dyn EffectHandler>>,
}

impl EffectDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(mut self, handler: impl EffectHandler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn register(&mut self, handler: Arc<dyn EffectHandler>) {
        self.handlers.push(handler);
    }

    /// Runs every handler for every effect. Returns the number of failures.
    pub async fn dispatch(&self, effects: &[SideEffect]) -> usize {
        let mut failures = 0;
        for effect in effects {
            for handler in &self.handlers {
                if let Err(err) = handler.handle(effect).await {
                    failures += 1;
                    metrics::counter!("side_effect_failures_total", "effect" => effect.kind())
                        .increment(1);
                    tracing::warn!(
                        handler = handler.name(),
                        effect = effect.kind(),
                        order_id = %effect.order_id(),
                        error = %err,
                        "Side effect failed"
                    );
                }
            }
        }
        failures
    }
}

/// Logs every effect at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEffectHandler;

#[async_trait]
impl EffectHandler for LoggingEffectHandler {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn handle(&self, effect: &SideEffect) -> Result<(), EffectError> {
        match effect {
            SideEffect::RecordTransition { entry } => tracing::info!(
                order_id = %entry.order_id,
                transition = %entry.transition,
                to = %entry.to_status,
                actor = %entry.actor,
                "Order transition recorded"
            ),
            other => tracing::info!(
                effect = other.kind(),
                order_id = %other.order_id(),
                "Side effect dispatched"
            ),
        }
        Ok(())
    }
}

/// Keeps every effect in memory; can be told to fail.
#[derive(Debug, Clone, Default)]
pub struct RecordingEffectHandler {
    effects: Arc<Mutex<Vec<SideEffect>>>,
    fail: Arc<AtomicBool>,
}

impl RecordingEffectHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `handle` calls fail (after recording the effect).
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn effects(&self) -> Vec<SideEffect> {
        self.effects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns recorded effects of one kind.
    pub fn effects_of_kind(&self, kind: &str) -> Vec<SideEffect> {
        self.effects()
            .into_iter()
            .filter(|e| e.kind() == kind)
            .collect()
    }

    pub fn clear(&self) {
        self.effects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl EffectHandler for RecordingEffectHandler {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn handle(&self, effect: &SideEffect) -> Result<(), EffectError> {
        self.effects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(effect.clone());

        if self.fail.load(Ordering::SeqCst) {
            return Err(EffectError(format!("{} rejected", effect.kind())));
        }
        Ok(())
    }
}
