use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Money, ProductId, VariantId};
use sqlx::{PgPool, Postgres, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Actor, ActorKind, LogEntryId, Order, OrderId, OrderLine, OrderStatus, OrderTimestamps,
    PaymentEvent, Reservation, ReservationId, ReservationStatus, Result, StockKey, StockUnit,
    StoreError, TransitionLogEntry, TransitionLogQuery, Version,
    memory::DEFAULT_LOCK_TIMEOUT,
    store::{Store, Transaction},
};

const ORDER_COLUMNS: &str = "id, order_number, buyer_id, status, version, lines, \
    subtotal_cents, shipping_fee_cents, total_cents, payment_method, payment_reference, \
    payment_expires_at, tracking_number, cancellation_reason, return_window_ends_at, \
    auto_complete_at, created_at, updated_at, payment_selected_at, paid_at, processed_at, \
    shipped_at, delivered_at, completed_at, cancelled_at, failed_at";

const RESERVATION_COLUMNS: &str = "id, order_id, product_id, variant_id, quantity, status, \
    created_at, expires_at, resolved_at, release_reason";

const PAYMENT_EVENT_COLUMNS: &str = "gateway_transaction_id, order_id, order_number, \
    external_status, fraud_status, payment_type, gross_amount, outcome, raw_payload, received_at";

const TRANSITION_COLUMNS: &str = "id, order_id, sequence, transition, from_status, to_status, \
    reason, actor_kind, actor_id, timestamp, metadata";

/// PostgreSQL-backed store.
///
/// Row locks are `SELECT ... FOR UPDATE` and every transaction sets a local
/// `lock_timeout`, so a blocked lock surfaces as [`StoreError::LockTimeout`].
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Sets how long a transaction waits for a row lock.
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }
}

fn corrupt(err: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(err.to_string())
}

fn variant_column(key: &StockKey) -> &str {
    key.variant_id.as_ref().map(VariantId::as_str).unwrap_or("")
}

fn stock_key_from_row(row: &PgRow) -> Result<StockKey> {
    let product_id: String = row.try_get("product_id")?;
    let variant_id: String = row.try_get("variant_id")?;
    Ok(StockKey {
        product_id: ProductId::new(product_id),
        variant_id: (!variant_id.is_empty()).then(|| VariantId::new(variant_id)),
    })
}

fn to_db_quantity(quantity: u32) -> Result<i32> {
    i32::try_from(quantity).map_err(|_| corrupt(format!("quantity {quantity} out of range")))
}

fn from_db_quantity(quantity: i32) -> Result<u32> {
    u32::try_from(quantity).map_err(|_| corrupt(format!("negative quantity {quantity}")))
}

fn row_to_order(row: PgRow) -> Result<Order> {
    let status: String = row.try_get("status")?;
    let lines: Vec<OrderLine> = serde_json::from_value(row.try_get("lines")?)?;

    Ok(Order {
        id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
        order_number: row.try_get("order_number")?,
        buyer_id: row.try_get("buyer_id")?,
        status: status.parse::<OrderStatus>().map_err(corrupt)?,
        version: Version::new(row.try_get("version")?),
        lines,
        subtotal: Money::from_cents(row.try_get("subtotal_cents")?),
        shipping_fee: Money::from_cents(row.try_get("shipping_fee_cents")?),
        total: Money::from_cents(row.try_get("total_cents")?),
        payment_method: row.try_get("payment_method")?,
        payment_reference: row.try_get("payment_reference")?,
        payment_expires_at: row.try_get("payment_expires_at")?,
        tracking_number: row.try_get("tracking_number")?,
        cancellation_reason: row.try_get("cancellation_reason")?,
        return_window_ends_at: row.try_get("return_window_ends_at")?,
        auto_complete_at: row.try_get("auto_complete_at")?,
        timestamps: OrderTimestamps {
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            payment_selected_at: row.try_get("payment_selected_at")?,
            paid_at: row.try_get("paid_at")?,
            processed_at: row.try_get("processed_at")?,
            shipped_at: row.try_get("shipped_at")?,
            delivered_at: row.try_get("delivered_at")?,
            completed_at: row.try_get("completed_at")?,
            cancelled_at: row.try_get("cancelled_at")?,
            failed_at: row.try_get("failed_at")?,
        },
    })
}

fn row_to_stock(row: PgRow) -> Result<StockUnit> {
    Ok(StockUnit {
        key: stock_key_from_row(&row)?,
        available_quantity: from_db_quantity(row.try_get("available_quantity")?)?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_reservation(row: PgRow) -> Result<Reservation> {
    let status: String = row.try_get("status")?;
    Ok(Reservation {
        id: ReservationId::from_uuid(row.try_get::<Uuid, _>("id")?),
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        key: stock_key_from_row(&row)?,
        quantity: from_db_quantity(row.try_get("quantity")?)?,
        status: status.parse::<ReservationStatus>().map_err(corrupt)?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        resolved_at: row.try_get("resolved_at")?,
        release_reason: row.try_get("release_reason")?,
    })
}

fn row_to_payment_event(row: PgRow) -> Result<PaymentEvent> {
    Ok(PaymentEvent {
        gateway_transaction_id: row.try_get("gateway_transaction_id")?,
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        order_number: row.try_get("order_number")?,
        external_status: row.try_get("external_status")?,
        fraud_status: row.try_get("fraud_status")?,
        payment_type: row.try_get("payment_type")?,
        gross_amount: row.try_get("gross_amount")?,
        outcome: row.try_get("outcome")?,
        raw_payload: row.try_get("raw_payload")?,
        received_at: row.try_get("received_at")?,
    })
}

fn row_to_transition(row: PgRow) -> Result<TransitionLogEntry> {
    let metadata_json: serde_json::Value = row.try_get("metadata")?;
    let metadata: HashMap<String, serde_json::Value> = serde_json::from_value(metadata_json)?;
    let from_status: Option<String> = row.try_get("from_status")?;
    let to_status: String = row.try_get("to_status")?;
    let actor_kind: String = row.try_get("actor_kind")?;

    Ok(TransitionLogEntry {
        id: LogEntryId::from_uuid(row.try_get::<Uuid, _>("id")?),
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        sequence: Version::new(row.try_get("sequence")?),
        transition: row.try_get("transition")?,
        from_status: from_status
            .map(|s| s.parse::<OrderStatus>())
            .transpose()
            .map_err(corrupt)?,
        to_status: to_status.parse::<OrderStatus>().map_err(corrupt)?,
        reason: row.try_get("reason")?,
        actor: Actor::new(
            actor_kind.parse::<ActorKind>().map_err(corrupt)?,
            row.try_get("actor_id")?,
        ),
        timestamp: row.try_get("timestamp")?,
        metadata,
    })
}

#[async_trait]
impl Store for PostgresStore {
    type Tx = PostgresTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        let mut tx = self.pool.begin().await?;

        // SET does not take bind parameters.
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await?;

        Ok(PostgresTransaction { tx })
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_order).transpose()
    }

    async fn get_order_by_number(&self, order_number: &str) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_number = $1"
        ))
        .bind(order_number)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_order).transpose()
    }

    async fn get_stock(&self, key: &StockKey) -> Result<Option<StockUnit>> {
        let row = sqlx::query(
            r#"
            SELECT product_id, variant_id, available_quantity, updated_at
            FROM stock_units
            WHERE product_id = $1 AND variant_id = $2
            "#,
        )
        .bind(key.product_id.as_str())
        .bind(variant_column(key))
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_stock).transpose()
    }

    async fn list_stock(&self) -> Result<Vec<StockUnit>> {
        let rows = sqlx::query(
            r#"
            SELECT product_id, variant_id, available_quantity, updated_at
            FROM stock_units
            ORDER BY product_id ASC, variant_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_stock).collect()
    }

    async fn held_quantity(&self, key: &StockKey) -> Result<u32> {
        let held: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(quantity), 0)::BIGINT
            FROM reservations
            WHERE product_id = $1 AND variant_id = $2 AND status = 'PENDING'
            "#,
        )
        .bind(key.product_id.as_str())
        .bind(variant_column(key))
        .fetch_one(&self.pool)
        .await?;
        u32::try_from(held).map_err(corrupt)
    }

    async fn reservations_for_order(&self, order_id: OrderId) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE order_id = $1 \
             ORDER BY created_at ASC, product_id ASC, variant_id ASC"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_reservation).collect()
    }

    async fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE status = 'PENDING' AND expires_at <= $1 \
             ORDER BY expires_at ASC LIMIT $2"
        ))
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_reservation).collect()
    }

    async fn orders_past_payment_deadline(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OrderId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM orders
            WHERE status = 'WAITING_PAYMENT' AND payment_expires_at <= $1
            ORDER BY payment_expires_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(OrderId::from_uuid).collect())
    }

    async fn get_payment_event(
        &self,
        gateway_transaction_id: &str,
    ) -> Result<Option<PaymentEvent>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_EVENT_COLUMNS} FROM payment_events WHERE gateway_transaction_id = $1"
        ))
        .bind(gateway_transaction_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_payment_event).transpose()
    }

    async fn payment_events_for_order(&self, order_id: OrderId) -> Result<Vec<PaymentEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {PAYMENT_EVENT_COLUMNS} FROM payment_events WHERE order_id = $1 \
             ORDER BY received_at ASC"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_payment_event).collect()
    }

    async fn query_transitions(
        &self,
        query: TransitionLogQuery,
    ) -> Result<Vec<TransitionLogEntry>> {
        let mut sql = format!("SELECT {TRANSITION_COLUMNS} FROM transition_log WHERE 1=1");
        let mut param_count = 0;

        // Build dynamic query
        if query.order_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND order_id = ${param_count}"));
        }
        if query.transitions.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND transition = ANY(${param_count})"));
        }
        if query.to_status.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND to_status = ${param_count}"));
        }
        if query.actor_kind.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND actor_kind = ${param_count}"));
        }
        if query.from_timestamp.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND timestamp >= ${param_count}"));
        }
        if query.to_timestamp.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND timestamp <= ${param_count}"));
        }

        sql.push_str(" ORDER BY timestamp ASC, sequence ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(id) = query.order_id {
            sqlx_query = sqlx_query.bind(id.as_uuid());
        }
        if let Some(transitions) = query.transitions {
            sqlx_query = sqlx_query.bind(transitions);
        }
        if let Some(status) = query.to_status {
            sqlx_query = sqlx_query.bind(status.as_str());
        }
        if let Some(kind) = query.actor_kind {
            sqlx_query = sqlx_query.bind(kind.as_str());
        }
        if let Some(from_ts) = query.from_timestamp {
            sqlx_query = sqlx_query.bind(from_ts);
        }
        if let Some(to_ts) = query.to_timestamp {
            sqlx_query = sqlx_query.bind(to_ts);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(offset as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_transition).collect()
    }
}

/// Transaction on a [`PostgresStore`]. Dropping it rolls back.
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(row_to_order).transpose()
    }

    async fn find_order_id_by_number(&mut self, order_number: &str) -> Result<Option<OrderId>> {
        let id: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM orders WHERE order_number = $1")
                .bind(order_number)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(id.map(OrderId::from_uuid))
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        let lines = serde_json::to_value(&order.lines)?;
        let ts = &order.timestamps;

        sqlx::query(&format!(
            "INSERT INTO orders ({ORDER_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, \
              $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26)"
        ))
        .bind(order.id.as_uuid())
        .bind(&order.order_number)
        .bind(&order.buyer_id)
        .bind(order.status.as_str())
        .bind(order.version.as_i64())
        .bind(lines)
        .bind(order.subtotal.cents())
        .bind(order.shipping_fee.cents())
        .bind(order.total.cents())
        .bind(&order.payment_method)
        .bind(&order.payment_reference)
        .bind(order.payment_expires_at)
        .bind(&order.tracking_number)
        .bind(&order.cancellation_reason)
        .bind(order.return_window_ends_at)
        .bind(order.auto_complete_at)
        .bind(ts.created_at)
        .bind(ts.updated_at)
        .bind(ts.payment_selected_at)
        .bind(ts.paid_at)
        .bind(ts.processed_at)
        .bind(ts.shipped_at)
        .bind(ts.delivered_at)
        .bind(ts.completed_at)
        .bind(ts.cancelled_at)
        .bind(ts.failed_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn update_order(&mut self, order: &Order) -> Result<()> {
        let expected = order.version.previous();
        let ts = &order.timestamps;

        let result = sqlx::query(
            r#"
            UPDATE orders SET
                status = $3, version = $4, payment_method = $5, payment_reference = $6,
                payment_expires_at = $7, tracking_number = $8, cancellation_reason = $9,
                return_window_ends_at = $10, auto_complete_at = $11, updated_at = $12,
                payment_selected_at = $13, paid_at = $14, processed_at = $15, shipped_at = $16,
                delivered_at = $17, completed_at = $18, cancelled_at = $19, failed_at = $20
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(expected.as_i64())
        .bind(order.status.as_str())
        .bind(order.version.as_i64())
        .bind(&order.payment_method)
        .bind(&order.payment_reference)
        .bind(order.payment_expires_at)
        .bind(&order.tracking_number)
        .bind(&order.cancellation_reason)
        .bind(order.return_window_ends_at)
        .bind(order.auto_complete_at)
        .bind(ts.updated_at)
        .bind(ts.payment_selected_at)
        .bind(ts.paid_at)
        .bind(ts.processed_at)
        .bind(ts.shipped_at)
        .bind(ts.delivered_at)
        .bind(ts.completed_at)
        .bind(ts.cancelled_at)
        .bind(ts.failed_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let actual: Option<i64> = sqlx::query_scalar("SELECT version FROM orders WHERE id = $1")
            .bind(order.id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;

        match actual {
            Some(actual) => Err(StoreError::ConcurrencyConflict {
                order_id: order.id,
                expected,
                actual: Version::new(actual),
            }),
            None => Err(StoreError::NotFound {
                entity: "order",
                key: order.id.to_string(),
            }),
        }
    }

    async fn lock_stock(&mut self, key: &StockKey) -> Result<Option<StockUnit>> {
        let row = sqlx::query(
            r#"
            SELECT product_id, variant_id, available_quantity, updated_at
            FROM stock_units
            WHERE product_id = $1 AND variant_id = $2
            FOR UPDATE
            "#,
        )
        .bind(key.product_id.as_str())
        .bind(variant_column(key))
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(row_to_stock).transpose()
    }

    async fn save_stock(&mut self, unit: &StockUnit) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_units (product_id, variant_id, available_quantity, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (product_id, variant_id) DO UPDATE SET
                available_quantity = EXCLUDED.available_quantity,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(unit.key.product_id.as_str())
        .bind(variant_column(&unit.key))
        .bind(to_db_quantity(unit.available_quantity)?)
        .bind(unit.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn held_quantity(&mut self, key: &StockKey) -> Result<u32> {
        let held: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(quantity), 0)::BIGINT
            FROM reservations
            WHERE product_id = $1 AND variant_id = $2 AND status = 'PENDING'
            "#,
        )
        .bind(key.product_id.as_str())
        .bind(variant_column(key))
        .fetch_one(&mut *self.tx)
        .await?;
        u32::try_from(held).map_err(corrupt)
    }

    async fn reservations_for_order(&mut self, order_id: OrderId) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE order_id = $1 \
             ORDER BY created_at ASC, product_id ASC, variant_id ASC"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(row_to_reservation).collect()
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO reservations ({RESERVATION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(reservation.id.as_uuid())
        .bind(reservation.order_id.as_uuid())
        .bind(reservation.key.product_id.as_str())
        .bind(variant_column(&reservation.key))
        .bind(to_db_quantity(reservation.quantity)?)
        .bind(reservation.status.as_str())
        .bind(reservation.created_at)
        .bind(reservation.expires_at)
        .bind(reservation.resolved_at)
        .bind(&reservation.release_reason)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE reservations SET
                status = $2, expires_at = $3, resolved_at = $4, release_reason = $5
            WHERE id = $1
            "#,
        )
        .bind(reservation.id.as_uuid())
        .bind(reservation.status.as_str())
        .bind(reservation.expires_at)
        .bind(reservation.resolved_at)
        .bind(&reservation.release_reason)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "reservation",
                key: reservation.id.to_string(),
            });
        }
        Ok(())
    }

    async fn find_payment_event(
        &mut self,
        gateway_transaction_id: &str,
    ) -> Result<Option<PaymentEvent>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_EVENT_COLUMNS} FROM payment_events WHERE gateway_transaction_id = $1"
        ))
        .bind(gateway_transaction_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(row_to_payment_event).transpose()
    }

    async fn insert_payment_event(&mut self, event: &PaymentEvent) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO payment_events ({PAYMENT_EVENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(&event.gateway_transaction_id)
        .bind(event.order_id.as_uuid())
        .bind(&event.order_number)
        .bind(&event.external_status)
        .bind(&event.fraud_status)
        .bind(&event.payment_type)
        .bind(&event.gross_amount)
        .bind(&event.outcome)
        .bind(&event.raw_payload)
        .bind(event.received_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn append_transition(&mut self, entry: &TransitionLogEntry) -> Result<()> {
        let metadata_json = serde_json::to_value(&entry.metadata)?;

        sqlx::query(&format!(
            "INSERT INTO transition_log ({TRANSITION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(entry.id.as_uuid())
        .bind(entry.order_id.as_uuid())
        .bind(entry.sequence.as_i64())
        .bind(&entry.transition)
        .bind(entry.from_status.map(|s| s.as_str()))
        .bind(entry.to_status.as_str())
        .bind(&entry.reason)
        .bind(entry.actor.kind.as_str())
        .bind(&entry.actor.id)
        .bind(entry.timestamp)
        .bind(metadata_json)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
