//! Background release of expired holds and unpaid orders.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::OrderId;
use store::{Actor, Store, Transaction};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::DomainError;
use crate::machine::OrderStateMachine;
use crate::transitions::{Transition, TransitionContext};

/// Orders examined per pass.
pub const DEFAULT_SWEEP_BATCH: usize = 500;

/// Actor id recorded on transitions the sweeper performs.
pub const SWEEPER_ACTOR: &str = "expiry_sweeper";

/// Counts from one sweeper pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Orders cancelled through `expirePayment`.
    pub expired_orders: usize,
    /// Holds released, including those released by `expirePayment`.
    pub released: usize,
    /// Orders skipped because their lock could not be taken in time.
    pub contended: usize,
}

impl SweepSummary {
    pub fn is_empty(&self) -> bool {
        *self == SweepSummary::default()
    }
}

enum Swept {
    Expired { released: usize },
    Released(usize),
    Gone,
}

/// Releases PENDING holds past their deadline and cancels orders whose
/// payment window has closed.
///
/// Each order is handled in its own transaction under its lock, so a
/// concurrent `confirmPayment` either commits first (the holds are already
/// CONFIRMED and are left alone) or finds the order CANCELLED.
#[derive(Clone)]
pub struct ExpirySweeper<S: Store> {
    machine: OrderStateMachine<S>,
    batch_size: usize,
}

impl<S: Store> ExpirySweeper<S> {
    pub fn new(machine: OrderStateMachine<S>) -> Self {
        Self {
            machine,
            batch_size: DEFAULT_SWEEP_BATCH,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// One pass over everything due at `now`.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<SweepSummary, DomainError> {
        let mut due: BTreeSet<OrderId> = self
            .machine
            .reservations()
            .expired_orders(now, self.batch_size)
            .await?
            .into_iter()
            .collect();
        due.extend(
            self.machine
                .store()
                .orders_past_payment_deadline(now, self.batch_size)
                .await?,
        );

        let mut summary = SweepSummary::default();
        for order_id in due {
            match self.sweep_order(order_id, now).await {
                Ok(Swept::Expired { released }) => {
                    summary.expired_orders += 1;
                    summary.released += released;
                }
                Ok(Swept::Released(released)) => summary.released += released,
                Ok(Swept::Gone) => {}
                Err(err) if err.is_transient() => {
                    tracing::warn!(%order_id, error = %err, "Skipping contended order");
                    summary.contended += 1;
                }
                Err(err) => {
                    tracing::error!(%order_id, error = %err, "Failed to sweep order");
                }
            }
        }

        metrics::counter!("reservations_swept_total").increment(summary.released as u64);
        Ok(summary)
    }

    async fn sweep_order(&self, order_id: OrderId, now: DateTime<Utc>) -> Result<Swept, DomainError> {
        let mut tx = self.machine.store().begin().await?;
        let Some(order) = tx.lock_order(order_id).await? else {
            return Ok(Swept::Gone);
        };

        let has_expired_holds = tx
            .reservations_for_order(order_id)
            .await?
            .iter()
            .any(|r| r.is_expired(now));
        let deadline_passed = order.payment_expires_at.is_some_and(|at| at <= now);

        if order.status.is_awaiting_payment() && (has_expired_holds || deadline_passed) {
            let ctx = TransitionContext::new(Actor::system(SWEEPER_ACTOR)).reason("payment expired");
            let outcome = self
                .machine
                .apply_in(&mut tx, &order, Transition::ExpirePayment, &ctx, None, now)
                .await?;
            tx.commit().await?;

            let released = outcome
                .log_entry
                .metadata
                .get("reservations_released")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(0) as usize;
            self.machine.after_commit(&outcome).await;
            return Ok(Swept::Expired { released });
        }

        let released = self
            .machine
            .reservations()
            .release_expired_in(&mut tx, order_id, now)
            .await?;
        tx.commit().await?;
        Ok(Swept::Released(released.len()))
    }

    /// Runs [`Self::run_once`] every `interval` until `shutdown` flips to
    /// true or its sender is dropped.
    pub fn spawn(self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(interval_secs = interval.as_secs(), "Expiry sweeper started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.run_once(Utc::now()).await {
                            Ok(summary) if !summary.is_empty() => tracing::info!(
                                expired_orders = summary.expired_orders,
                                released = summary.released,
                                contended = summary.contended,
                                "Sweep finished"
                            ),
                            Ok(_) => {}
                            Err(err) => tracing::error!(error = %err, "Sweep failed"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Expiry sweeper stopped");
        })
    }
}
