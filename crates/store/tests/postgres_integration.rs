//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container and need a Docker daemon.
//! Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use common::{Money, OrderId, StockKey};
use serial_test::serial;
use sqlx::PgPool;
use store::{
    Actor, ActorKind, Order, OrderLine, OrderStatus, OrderTimestamps, PaymentEvent,
    PostgresStore, Reservation, ReservationStatus, StockUnit, Store, StoreError, Transaction,
    TransitionLogEntry, TransitionLogQuery, Version, constraints,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_checkout_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE transition_log, payment_events, reservations, orders, stock_units",
    )
    .execute(&pool)
    .await
    .unwrap();

    PostgresStore::new(pool).with_lock_timeout(Duration::from_millis(200))
}

fn create_order(number: &str, key: StockKey, quantity: u32) -> Order {
    let line = OrderLine::new(key, quantity, Money::from_cents(2500));
    Order {
        id: OrderId::new(),
        order_number: number.to_string(),
        buyer_id: Some("buyer-1".to_string()),
        status: OrderStatus::PendingPayment,
        version: Version::first(),
        subtotal: line.total_price(),
        shipping_fee: Money::from_cents(500),
        total: line.total_price() + Money::from_cents(500),
        lines: vec![line],
        payment_method: None,
        payment_reference: None,
        payment_expires_at: None,
        tracking_number: None,
        cancellation_reason: None,
        return_window_ends_at: None,
        auto_complete_at: None,
        timestamps: OrderTimestamps::created(Utc::now()),
    }
}

async fn seed_order(store: &PostgresStore, order: &Order) {
    let mut tx = store.begin().await.unwrap();
    tx.insert_order(order).await.unwrap();
    tx.commit().await.unwrap();
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn order_round_trips_with_lines_and_timestamps() {
    let store = get_test_store().await;
    let order = create_order("ORD-20260101-AAAA0001", StockKey::variant("SKU-1", "M"), 2);
    seed_order(&store, &order).await;

    let loaded = store.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(loaded.order_number, order.order_number);
    assert_eq!(loaded.lines, order.lines);
    assert_eq!(loaded.total, Money::from_cents(5500));
    assert_eq!(loaded.status, OrderStatus::PendingPayment);

    let by_number = store
        .get_order_by_number("ORD-20260101-AAAA0001")
        .await
        .unwrap();
    assert_eq!(by_number.map(|o| o.id), Some(order.id));
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn update_order_detects_stale_version() {
    let store = get_test_store().await;
    let mut order = create_order("ORD-20260101-AAAA0002", StockKey::product("SKU-1"), 1);
    seed_order(&store, &order).await;

    let mut tx = store.begin().await.unwrap();
    order.version = Version::new(5);
    let result = tx.update_order(&order).await;
    assert!(matches!(
        result,
        Err(StoreError::ConcurrencyConflict { actual, .. }) if actual == Version::first()
    ));
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn row_lock_wait_times_out() {
    let store = get_test_store().await;
    let key = StockKey::product("SKU-LOCK");

    let mut tx = store.begin().await.unwrap();
    tx.save_stock(&StockUnit::new(key.clone(), 3, Utc::now()))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let mut holder = store.begin().await.unwrap();
    holder.lock_stock(&key).await.unwrap();

    let mut waiter = store.begin().await.unwrap();
    let result = waiter.lock_stock(&key).await;
    assert!(matches!(result, Err(StoreError::LockTimeout { .. })));
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn reservations_and_held_quantity() {
    let store = get_test_store().await;
    let key = StockKey::variant("SKU-2", "L");
    let order = create_order("ORD-20260101-AAAA0003", key.clone(), 2);
    seed_order(&store, &order).await;

    let now = Utc::now();
    let mut reservation = Reservation::pending(
        order.id,
        key.clone(),
        2,
        now,
        now - ChronoDuration::seconds(1),
    );

    let mut tx = store.begin().await.unwrap();
    tx.insert_reservation(&reservation).await.unwrap();
    assert_eq!(tx.held_quantity(&key).await.unwrap(), 2);

    let duplicate = Reservation::pending(order.id, key.clone(), 1, now, now);
    let err = tx.insert_reservation(&duplicate).await.unwrap_err();
    assert_eq!(err.violated_constraint(), Some(constraints::ACTIVE_RESERVATION));
    // A failed statement aborts the Postgres transaction.
    drop(tx);

    let mut tx = store.begin().await.unwrap();
    tx.insert_reservation(&reservation).await.unwrap();
    tx.commit().await.unwrap();

    let expired = store.expired_reservations(Utc::now(), 10).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].key, key);

    let mut tx = store.begin().await.unwrap();
    reservation.release("expired", Utc::now());
    tx.update_reservation(&reservation).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(store.held_quantity(&key).await.unwrap(), 0);
    let stored = store.reservations_for_order(order.id).await.unwrap();
    assert_eq!(stored[0].status, ReservationStatus::Released);
    assert_eq!(stored[0].release_reason.as_deref(), Some("expired"));
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn payment_event_id_is_unique() {
    let store = get_test_store().await;
    let order = create_order("ORD-20260101-AAAA0004", StockKey::product("SKU-3"), 1);
    seed_order(&store, &order).await;

    let event = PaymentEvent {
        gateway_transaction_id: "tx-123".to_string(),
        order_id: order.id,
        order_number: order.order_number.clone(),
        external_status: "settlement".to_string(),
        fraud_status: None,
        payment_type: Some("qris".to_string()),
        gross_amount: "55.00".to_string(),
        outcome: "applied:confirmPayment".to_string(),
        raw_payload: serde_json::json!({"transaction_id": "tx-123"}),
        received_at: Utc::now(),
    };

    let mut tx = store.begin().await.unwrap();
    tx.insert_payment_event(&event).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let err = tx.insert_payment_event(&event).await.unwrap_err();
    assert_eq!(err.violated_constraint(), Some(constraints::PAYMENT_EVENT_ID));

    let events = store.payment_events_for_order(order.id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].raw_payload["transaction_id"], "tx-123");
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn transition_log_query_filters() {
    let store = get_test_store().await;
    let order = create_order("ORD-20260101-AAAA0005", StockKey::product("SKU-4"), 1);
    seed_order(&store, &order).await;

    let placed = TransitionLogEntry::builder(
        order.id,
        Version::first(),
        "place_order",
        OrderStatus::PendingPayment,
        Actor::buyer("buyer-1"),
    )
    .build();
    let selected = TransitionLogEntry::builder(
        order.id,
        Version::new(2),
        "selectPayment",
        OrderStatus::WaitingPayment,
        Actor::buyer("buyer-1"),
    )
    .from_status(OrderStatus::PendingPayment)
    .metadata("payment_method", serde_json::json!("qris"))
    .build();

    let mut tx = store.begin().await.unwrap();
    tx.append_transition(&placed).await.unwrap();
    tx.append_transition(&selected).await.unwrap();
    tx.commit().await.unwrap();

    let trail = store
        .query_transitions(TransitionLogQuery::for_order(order.id))
        .await
        .unwrap();
    assert_eq!(trail.len(), 2);
    assert_eq!(trail[0].from_status, None);
    assert_eq!(trail[1].metadata["payment_method"], "qris");

    let by_name = store
        .query_transitions(
            TransitionLogQuery::new()
                .transition("selectPayment")
                .actor_kind(ActorKind::Buyer),
        )
        .await
        .unwrap();
    assert_eq!(by_name.len(), 1);
    assert_eq!(by_name[0].sequence, Version::new(2));

    let mut tx = store.begin().await.unwrap();
    let err = tx.append_transition(&selected).await.unwrap_err();
    assert!(matches!(err, StoreError::UniqueViolation { .. }));
}
