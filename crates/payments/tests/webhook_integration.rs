//! Integration tests for the webhook gateway against the in-memory store.

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{Money, StockKey};
use domain::{
    CheckoutLine, CheckoutService, ExpirySweeper, OrderPolicy, OrderStateMachine, PlaceOrder,
    Transition, TransitionContext,
};
use inventory::StockLedger;
use payments::{PaymentGateway, WebhookError, signed_notification};
use serde_json::json;
use store::{
    Actor, InMemoryStore, Order, OrderStatus, ReservationStatus, Store, Transaction,
    TransitionLogQuery,
};

const SERVER_KEY: &str = "test-server-key";

struct Harness {
    store: InMemoryStore,
    ledger: StockLedger<InMemoryStore>,
    checkout: CheckoutService<InMemoryStore>,
    machine: OrderStateMachine<InMemoryStore>,
    gateway: PaymentGateway<InMemoryStore>,
}

fn harness() -> Harness {
    let store = InMemoryStore::new();
    let policy = OrderPolicy::default();
    let machine = OrderStateMachine::new(store.clone(), policy);
    Harness {
        ledger: StockLedger::new(store.clone()),
        checkout: CheckoutService::new(store.clone(), &policy),
        gateway: PaymentGateway::new(machine.clone(), SERVER_KEY),
        machine,
        store,
    }
}

impl Harness {
    /// Places an order for one unit at 100.00 plus 5.00 shipping.
    async fn order(&self) -> Order {
        let key = StockKey::product("SKU-1");
        if self.ledger.get(&key).await.unwrap().is_none() {
            self.ledger.set_stock(key.clone(), 10).await.unwrap();
        }
        self.order_of(&[key]).await
    }

    /// Places an order for one unit of each key at 100.00 apiece plus 5.00
    /// shipping.
    async fn order_of(&self, keys: &[StockKey]) -> Order {
        let lines = keys
            .iter()
            .map(|key| CheckoutLine {
                key: key.clone(),
                quantity: 1,
                unit_price: Money::from_cents(10_000),
            })
            .collect();
        self.checkout
            .place_order(
                PlaceOrder {
                    buyer_id: Some("buyer-1".to_string()),
                    lines,
                    shipping_fee: Money::from_cents(500),
                },
                Actor::buyer("buyer-1"),
            )
            .await
            .unwrap()
            .order
    }

    async fn available(&self, key: &StockKey) -> (u32, u32) {
        let level = self.ledger.get(key).await.unwrap().unwrap();
        (level.unit.available_quantity, level.held_quantity)
    }

    async fn transitions(&self, order: &Order) -> Vec<String> {
        self.store
            .query_transitions(TransitionLogQuery::for_order(order.id))
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.transition)
            .collect()
    }
}

fn callback(order: &Order, transaction_id: &str, status: &str) -> serde_json::Value {
    signed_notification(
        &order.order_number,
        transaction_id,
        status,
        None,
        "105.00",
        SERVER_KEY,
    )
}

/// A settlement for the order's full total.
fn settlement(order: &Order, transaction_id: &str) -> serde_json::Value {
    signed_notification(
        &order.order_number,
        transaction_id,
        "settlement",
        None,
        &order.total.to_string(),
        SERVER_KEY,
    )
}

mod settlement {
    use super::*;

    #[tokio::test]
    async fn settlement_confirms_payment() {
        let h = harness();
        let order = h.order().await;
        h.machine
            .transition(
                order.id,
                Transition::SelectPayment,
                TransitionContext::new(Actor::buyer("buyer-1")),
            )
            .await
            .unwrap();

        let receipt = h
            .gateway
            .process_event(callback(&order, "tx-1", "settlement"))
            .await
            .unwrap();

        assert!(!receipt.duplicate);
        assert_eq!(receipt.outcome, "applied:confirmPayment");
        assert_eq!(receipt.order_status, OrderStatus::Paid);

        let stored = h.machine.order(order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);
        assert_eq!(stored.payment_reference.as_deref(), Some("tx-1"));

        let level = h.ledger.get(&StockKey::product("SKU-1")).await.unwrap().unwrap();
        assert_eq!(level.unit.available_quantity, 9);
        assert_eq!(level.held_quantity, 0);

        let history = h.machine.history(order.id).await.unwrap();
        let last = history.last().unwrap();
        assert_eq!(last.actor, Actor::payment_gateway("tx-1"));
        assert_eq!(last.metadata["gateway_transaction_id"], json!("tx-1"));
    }

    #[tokio::test]
    async fn capture_with_accept_confirms_from_pending_payment() {
        let h = harness();
        let order = h.order().await;

        let payload = signed_notification(
            &order.order_number,
            "tx-cap",
            "capture",
            Some("accept"),
            "105.00",
            SERVER_KEY,
        );
        let receipt = h.gateway.process_event(payload).await.unwrap();
        assert_eq!(receipt.order_status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn capture_challenge_is_recorded_only() {
        let h = harness();
        let order = h.order().await;

        let payload = signed_notification(
            &order.order_number,
            "tx-chl",
            "capture",
            Some("challenge"),
            "105.00",
            SERVER_KEY,
        );
        let receipt = h.gateway.process_event(payload).await.unwrap();

        assert_eq!(receipt.outcome, "recorded");
        assert_eq!(receipt.order_status, OrderStatus::PendingPayment);
        assert_eq!(h.machine.payment_events(order.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deny_fails_the_order() {
        let h = harness();
        let order = h.order().await;

        let receipt = h
            .gateway
            .process_event(callback(&order, "tx-deny", "deny"))
            .await
            .unwrap();

        assert_eq!(receipt.order_status, OrderStatus::Failed);
        assert_eq!(
            h.store.held_quantity(&StockKey::product("SKU-1")).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn gateway_expiry_cancels() {
        let h = harness();
        let order = h.order().await;

        let receipt = h
            .gateway
            .process_event(callback(&order, "tx-exp", "expire"))
            .await
            .unwrap();
        assert_eq!(receipt.outcome, "applied:expirePayment");
        assert_eq!(receipt.order_status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn amount_mismatch_is_not_applied() {
        let h = harness();
        let order = h.order().await;

        let payload = signed_notification(
            &order.order_number,
            "tx-short",
            "settlement",
            None,
            "1.00",
            SERVER_KEY,
        );
        let receipt = h.gateway.process_event(payload).await.unwrap();

        assert_eq!(receipt.outcome, "ignored:amount_mismatch");
        assert_eq!(receipt.order_status, OrderStatus::PendingPayment);
    }
}

mod idempotency {
    use super::*;

    #[tokio::test]
    async fn replay_is_a_duplicate() {
        let h = harness();
        let order = h.order().await;
        let payload = callback(&order, "tx-dup", "settlement");

        let first = h.gateway.process_event(payload.clone()).await.unwrap();
        let second = h.gateway.process_event(payload.clone()).await.unwrap();
        let third = h.gateway.process_event(payload).await.unwrap();

        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert!(third.duplicate);
        assert_eq!(second.outcome, first.outcome);
        assert_eq!(second.order_status, OrderStatus::Paid);

        assert_eq!(h.machine.payment_events(order.id).await.unwrap().len(), 1);
        assert_eq!(
            h.transitions(&order).await,
            vec!["place_order".to_string(), "confirmPayment".to_string()]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_redeliveries_apply_once() {
        let h = Arc::new(harness());
        let order = h.order().await;
        let payload = callback(&order, "tx-race", "settlement");

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let h = h.clone();
                let payload = payload.clone();
                tokio::spawn(async move { h.gateway.process_event(payload).await })
            })
            .collect();

        let mut applied = 0;
        for handle in handles {
            let receipt = handle.await.unwrap().unwrap();
            if !receipt.duplicate {
                applied += 1;
            }
        }

        assert_eq!(applied, 1);
        assert_eq!(h.machine.payment_events(order.id).await.unwrap().len(), 1);
        assert_eq!(h.transitions(&order).await.len(), 2);
        assert_eq!(
            h.ledger
                .get(&StockKey::product("SKU-1"))
                .await
                .unwrap()
                .unwrap()
                .unit
                .available_quantity,
            9
        );
    }

    #[tokio::test]
    async fn late_expiry_after_payment_is_stale() {
        let h = harness();
        let order = h.order().await;
        h.gateway
            .process_event(callback(&order, "tx-pay", "settlement"))
            .await
            .unwrap();

        let receipt = h
            .gateway
            .process_event(callback(&order, "tx-late", "expire"))
            .await
            .unwrap();

        assert!(!receipt.duplicate);
        assert_eq!(receipt.outcome, "ignored:stale");
        assert_eq!(receipt.order_status, OrderStatus::Paid);
        assert_eq!(h.machine.payment_events(order.id).await.unwrap().len(), 2);
        assert_eq!(h.transitions(&order).await.len(), 2);
    }
}

mod expiry {
    use super::*;

    fn sixteen_minutes_on() -> chrono::DateTime<Utc> {
        Utc::now() + Duration::minutes(16)
    }

    #[tokio::test]
    async fn resold_unit_is_paid_for_once() {
        let h = harness();
        let key = StockKey::product("LAST-ONE");
        h.ledger.set_stock(key.clone(), 1).await.unwrap();
        let abandoned = h.order_of(&[key.clone()]).await;

        let summary = ExpirySweeper::new(h.machine.clone())
            .run_once(sixteen_minutes_on())
            .await
            .unwrap();
        assert_eq!(summary.expired_orders, 1);

        let resold = h.order_of(&[key.clone()]).await;

        let late = h
            .gateway
            .process_event(settlement(&abandoned, "tx-late"))
            .await
            .unwrap();
        assert_eq!(late.outcome, "ignored:stale");
        assert_eq!(late.order_status, OrderStatus::Cancelled);

        let paid = h
            .gateway
            .process_event(settlement(&resold, "tx-paid"))
            .await
            .unwrap();
        assert_eq!(paid.order_status, OrderStatus::Paid);

        assert_eq!(h.available(&key).await, (0, 0));
    }

    #[tokio::test]
    async fn settlement_after_hold_release_is_ignored() {
        let h = harness();
        let key = StockKey::product("LAST-ONE");
        h.ledger.set_stock(key.clone(), 1).await.unwrap();
        let first = h.order_of(&[key.clone()]).await;

        // Release the hold without moving the order.
        let mut tx = h.store.begin().await.unwrap();
        tx.lock_order(first.id).await.unwrap();
        let released = h
            .machine
            .reservations()
            .release_expired_in(&mut tx, first.id, sixteen_minutes_on())
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(released.len(), 1);

        let second = h.order_of(&[key.clone()]).await;

        let payload = settlement(&first, "tx-first");
        let receipt = h.gateway.process_event(payload.clone()).await.unwrap();
        assert_eq!(receipt.outcome, "ignored:holds_released");
        assert_eq!(receipt.order_status, OrderStatus::PendingPayment);

        let redelivered = h.gateway.process_event(payload).await.unwrap();
        assert!(redelivered.duplicate);
        assert_eq!(redelivered.outcome, "ignored:holds_released");

        let receipt = h
            .gateway
            .process_event(settlement(&second, "tx-second"))
            .await
            .unwrap();
        assert_eq!(receipt.order_status, OrderStatus::Paid);

        assert_eq!(h.available(&key).await, (0, 0));
        assert_eq!(h.transitions(&first).await, vec!["place_order".to_string()]);
        let holds = h.store.reservations_for_order(first.id).await.unwrap();
        assert_eq!(holds[0].status, ReservationStatus::Released);
    }

    /// The sweeper and a settlement race for the same order: exactly one of
    /// them wins and stock moves for every line or for none.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn sweeper_and_settlement_have_one_winner() {
        let shirt = StockKey::variant("SKU-SHIRT", "M");
        let hat = StockKey::product("SKU-HAT");

        for round in 0..25 {
            let h = Arc::new(harness());
            h.ledger.set_stock(shirt.clone(), 3).await.unwrap();
            h.ledger.set_stock(hat.clone(), 3).await.unwrap();
            let order = h.order_of(&[shirt.clone(), hat.clone()]).await;

            let sweeper = ExpirySweeper::new(h.machine.clone());
            let sweep = tokio::spawn(async move { sweeper.run_once(sixteen_minutes_on()).await });
            let pay = {
                let h = h.clone();
                let payload = settlement(&order, &format!("tx-race-{round}"));
                tokio::spawn(async move { h.gateway.process_event(payload).await })
            };

            let summary = sweep.await.unwrap().unwrap();
            let receipt = pay.await.unwrap().unwrap();
            let stored = h.machine.order(order.id).await.unwrap();
            let holds = h.store.reservations_for_order(order.id).await.unwrap();
            assert_eq!(holds.len(), 2);

            match stored.status {
                OrderStatus::Paid => {
                    assert_eq!(receipt.outcome, "applied:confirmPayment");
                    assert_eq!(summary.expired_orders, 0);
                    assert!(holds.iter().all(|r| r.status == ReservationStatus::Confirmed));
                    assert_eq!(h.available(&shirt).await, (2, 0));
                    assert_eq!(h.available(&hat).await, (2, 0));
                }
                OrderStatus::Cancelled => {
                    assert_eq!(receipt.outcome, "ignored:stale");
                    assert_eq!(summary.expired_orders, 1);
                    assert!(holds.iter().all(|r| r.status == ReservationStatus::Released));
                    assert_eq!(h.available(&shirt).await, (3, 0));
                    assert_eq!(h.available(&hat).await, (3, 0));
                }
                other => panic!("round {round}: unexpected status {other:?}"),
            }
            assert_eq!(receipt.order_status, stored.status);
        }
    }
}

mod rejection {
    use super::*;

    #[tokio::test]
    async fn bad_signature_touches_nothing() {
        let h = harness();
        let order = h.order().await;
        let mut payload = callback(&order, "tx-forged", "settlement");
        payload["gross_amount"] = json!("1.00");

        let err = h.gateway.process_event(payload).await.unwrap_err();

        assert!(matches!(err, WebhookError::InvalidSignature { .. }));
        assert_eq!(err.code(), "authentication_error");
        assert!(h.store.get_payment_event("tx-forged").await.unwrap().is_none());
        assert_eq!(
            h.machine.order(order.id).await.unwrap().status,
            OrderStatus::PendingPayment
        );
    }

    #[tokio::test]
    async fn malformed_payload() {
        let h = harness();
        let err = h
            .gateway
            .process_event(json!({ "transaction_id": "tx-1" }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[tokio::test]
    async fn unknown_order() {
        let h = harness();
        let payload = signed_notification(
            "ORD-19700101-NOPE0000",
            "tx-1",
            "settlement",
            None,
            "1.00",
            SERVER_KEY,
        );
        let err = h.gateway.process_event(payload).await.unwrap_err();
        assert!(matches!(err, WebhookError::OrderNotFound(_)));
        assert!(h.store.get_payment_event("tx-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn received_at_is_recorded() {
        let h = harness();
        let order = h.order().await;
        let before = Utc::now();
        h.gateway
            .process_event(callback(&order, "tx-ts", "pending"))
            .await
            .unwrap();

        let event = h.store.get_payment_event("tx-ts").await.unwrap().unwrap();
        assert!(event.received_at >= before);
        assert_eq!(event.outcome, "recorded");
        assert_eq!(event.raw_payload["transaction_status"], json!("pending"));
    }
}
