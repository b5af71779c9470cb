//! `SqliteDatabase` is a concrete implementation of a settlement engine backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements all the traits defined in the [`crate::traits`]
//! module.
//!
//! Multi-write flows run inside `BEGIN IMMEDIATE` transactions. Taking the write lock up front means
//! concurrent settlements queue behind each other instead of hitting `SQLITE_BUSY` when a deferred
//! transaction tries to upgrade from a read lock. Together with the row-state guards on every
//! `UPDATE`, the database itself serializes racing writers; nothing depends on in-process locks.
use std::fmt::Debug;

use cardshop_common::Cents;
use chrono::{Duration, Utc};
use log::*;
use sqlx::{pool::PoolConnection, Sqlite, SqliteConnection, SqlitePool};

use super::db::{db_url, deliveries, inventory, new_pool, orders, products, settlements};
use crate::{
    db_types::{
        DeliveryMode,
        DeliveryRecord,
        InventoryUnit,
        NewOrder,
        Order,
        OrderNo,
        OrderStatus,
        Product,
        SettlementRecord,
        SettlementStatus,
    },
    helpers::{generate_order_no, generate_settlement_id},
    sc_api::order_objects::OrderQueryFilter,
    traits::{
        DeliveryOutcome,
        ImportResult,
        InventoryManagement,
        OrderManagement,
        SettlementDatabase,
        SettlementError,
    },
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object using the URL from `CSE_DATABASE_URL`.
    pub async fn from_env(max_connections: u32) -> Result<Self, SettlementError> {
        let url = db_url();
        Self::new(url.as_str(), max_connections).await
    }

    pub async fn new(url: &str, max_connections: u32) -> Result<Self, SettlementError> {
        let pool = new_pool(url, max_connections).await?;
        Ok(Self { url: url.to_string(), pool })
    }

    pub async fn run_migrations(&self) -> Result<(), SettlementError> {
        sqlx::migrate!("./src/sqlite/migrations")
            .run(&self.pool)
            .await
            .map_err(|e| SettlementError::DatabaseError(e.to_string()))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn begin_immediate(&self) -> Result<PoolConnection<Sqlite>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(conn)
    }
}

/// Commits the open transaction when the flow succeeded, rolls it back otherwise, and passes the
/// result through.
async fn finish_tx<T>(
    mut conn: PoolConnection<Sqlite>,
    result: Result<T, SettlementError>,
) -> Result<T, SettlementError> {
    match result {
        Ok(value) => {
            sqlx::query("COMMIT").execute(&mut *conn).await?;
            Ok(value)
        },
        Err(e) => {
            if let Err(rb) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                warn!("🗃️ Could not roll back transaction: {rb}");
            }
            Err(e)
        },
    }
}

/// Internal result of the settlement transaction. `Mismatch` commits the `Failed` mark before being
/// surfaced to the caller as an error.
enum SettleOutcome {
    Delivery(DeliveryOutcome),
    Mismatch { settlement_id: String, expected: Cents, actual: Cents },
}

impl SettlementDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn create_order(&self, order: NewOrder, grace: Duration) -> Result<Order, SettlementError> {
        let mut conn = self.begin_immediate().await?;
        let result = create_order_inner(order, grace, &mut conn).await;
        finish_tx(conn, result).await
    }

    async fn initiate_payment(&self, order_no: &OrderNo) -> Result<SettlementRecord, SettlementError> {
        let mut conn = self.begin_immediate().await?;
        let result = initiate_payment_inner(order_no, &mut conn).await;
        finish_tx(conn, result).await
    }

    async fn record_notification(&self, settlement_id: &str) -> Result<SettlementRecord, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        settlements::incr_notify_count(settlement_id, &mut conn).await
    }

    async fn settle_order(
        &self,
        settlement_id: &str,
        confirmed_amount: Cents,
        provider_ref: &str,
    ) -> Result<DeliveryOutcome, SettlementError> {
        let mut conn = self.begin_immediate().await?;
        let result = settle_order_inner(settlement_id, confirmed_amount, provider_ref, &mut conn).await;
        match finish_tx(conn, result).await? {
            SettleOutcome::Delivery(outcome) => Ok(outcome),
            SettleOutcome::Mismatch { settlement_id, expected, actual } => {
                warn!("💰️ Settlement {settlement_id} confirmed {actual} against an order total of {expected}");
                Err(SettlementError::AmountMismatch { settlement_id, expected, actual })
            },
        }
    }

    async fn mark_settlement_failed(
        &self,
        settlement_id: &str,
        reason: &str,
    ) -> Result<SettlementRecord, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        settlements::mark_failed(settlement_id, reason, &mut conn).await
    }

    async fn manual_deliver(&self, order_id: i64, operator: &str) -> Result<DeliveryOutcome, SettlementError> {
        let mut conn = self.begin_immediate().await?;
        let result = manual_deliver_inner(order_id, operator, &mut conn).await;
        finish_tx(conn, result).await
    }

    async fn cancel_order(&self, order_id: i64, reason: &str) -> Result<Order, SettlementError> {
        let mut conn = self.begin_immediate().await?;
        let result = cancel_order_inner(order_id, reason, &mut conn).await;
        finish_tx(conn, result).await
    }

    async fn mark_refunded(&self, order_id: i64, reason: &str) -> Result<Order, SettlementError> {
        let mut conn = self.begin_immediate().await?;
        let result = mark_refunded_inner(order_id, reason, &mut conn).await;
        finish_tx(conn, result).await
    }

    async fn sweep_expired(&self) -> Result<Vec<Order>, SettlementError> {
        let mut conn = self.begin_immediate().await?;
        let result = orders::expire_open_orders(&mut conn).await;
        let expired = finish_tx(conn, result).await?;
        if !expired.is_empty() {
            info!("⏲️ Expired {} overdue order(s)", expired.len());
        }
        Ok(expired)
    }

    async fn close(&mut self) -> Result<(), SettlementError> {
        self.pool.close().await;
        Ok(())
    }
}

async fn create_order_inner(
    order: NewOrder,
    grace: Duration,
    conn: &mut SqliteConnection,
) -> Result<Order, SettlementError> {
    let product = products::fetch_product_by_id(order.product_id, conn)
        .await?
        .ok_or(SettlementError::ProductNotFound(order.product_id))?;
    let unit_price = product.price;
    let total_amount = unit_price * order.quantity;
    let order_no = generate_order_no();
    let expires_at = Utc::now() + grace;
    let order = orders::insert_order(
        &order_no,
        &order,
        unit_price,
        total_amount,
        cardshop_common::DEFAULT_CURRENCY_CODE,
        expires_at,
        conn,
    )
    .await?;
    debug!("📝️ Order {order_no} created for product {} (total {total_amount})", product.id);
    Ok(order)
}

async fn initiate_payment_inner(
    order_no: &OrderNo,
    conn: &mut SqliteConnection,
) -> Result<SettlementRecord, SettlementError> {
    let order = orders::fetch_order_by_order_no(order_no, conn)
        .await?
        .ok_or_else(|| SettlementError::OrderNotFound(order_no.clone()))?;
    if !order.status.is_open() {
        return Err(SettlementError::InvalidTransition { from: order.status, to: OrderStatus::Paying });
    }
    if order.expires_at <= Utc::now() {
        return Err(SettlementError::OrderExpired(order_no.clone()));
    }
    if order.status == OrderStatus::Pending {
        orders::transition(order.id, OrderStatus::Pending, OrderStatus::Paying, conn).await?;
    }
    let settlement_id = generate_settlement_id();
    settlements::insert_settlement(&settlement_id, order.id, order.total_amount, conn).await
}

async fn settle_order_inner(
    settlement_id: &str,
    confirmed_amount: Cents,
    provider_ref: &str,
    conn: &mut SqliteConnection,
) -> Result<SettleOutcome, SettlementError> {
    let record = settlements::fetch_settlement(settlement_id, conn)
        .await?
        .ok_or_else(|| SettlementError::SettlementNotFound(settlement_id.to_string()))?;
    let order = orders::fetch_order_by_id(record.order_id, conn).await?.ok_or_else(|| {
        SettlementError::IntegrityViolation(format!(
            "settlement {settlement_id} references order id {} which does not exist",
            record.order_id
        ))
    })?;
    // The durable idempotency check. The ephemeral hold only thins the herd; this decides.
    if record.status == SettlementStatus::Settled {
        let delivered = deliveries::delivered_cards_for_order(order.id, conn).await?;
        debug!("💰️ Settlement {settlement_id} replayed; returning the original outcome");
        return Ok(SettleOutcome::Delivery(DeliveryOutcome::AlreadySettled { order, delivered }));
    }
    if order.status.is_settled() {
        // A different settlement record already paid this order. Record that this one lost.
        settlements::mark_failed(settlement_id, "order was settled by another payment", conn).await?;
        let delivered = deliveries::delivered_cards_for_order(order.id, conn).await?;
        return Ok(SettleOutcome::Delivery(DeliveryOutcome::AlreadySettled { order, delivered }));
    }
    // The amount check comes before everything else that could settle the record. A record only ever
    // reaches `Settled` with the confirmed amount equal to the order total, cancelled orders included.
    if confirmed_amount != order.total_amount {
        settlements::mark_failed(
            settlement_id,
            &format!("amount mismatch: confirmed {confirmed_amount}, expected {}", order.total_amount),
            conn,
        )
        .await?;
        return Ok(SettleOutcome::Mismatch {
            settlement_id: settlement_id.to_string(),
            expected: order.total_amount,
            actual: confirmed_amount,
        });
    }
    if order.status == OrderStatus::Cancelled {
        // A cancelled order keeps its status when money arrives, so the order row cannot carry the
        // at-most-one-Settled guarantee here. Check the settlement rows directly.
        if settlements::settled_record_for_order(order.id, &mut *conn).await?.is_some() {
            settlements::mark_failed(settlement_id, "order was settled by another payment", conn).await?;
            let delivered = deliveries::delivered_cards_for_order(order.id, conn).await?;
            return Ok(SettleOutcome::Delivery(DeliveryOutcome::AlreadySettled { order, delivered }));
        }
        let remark = "payment received for a cancelled order; manual refund required";
        settlements::mark_settled(settlement_id, confirmed_amount, provider_ref, Some(remark), conn).await?;
        warn!("💰️ Settlement {settlement_id} arrived for cancelled order {}. Flagged for refund.", order.order_no);
        return Ok(SettleOutcome::Delivery(DeliveryOutcome::CancelledWithPayment { order }));
    }
    match inventory::claim_units(order.product_id, order.id, order.quantity, conn).await {
        Ok(units) => {
            for unit in &units {
                deliveries::insert_delivery(order.id, unit.id, DeliveryMode::Automatic, None, conn).await?;
            }
            settlements::mark_settled(settlement_id, confirmed_amount, provider_ref, None, conn).await?;
            let order =
                orders::record_settlement_outcome(order.id, OrderStatus::Completed, confirmed_amount, None, conn)
                    .await?;
            products::incr_sold_count(order.product_id, order.quantity, conn).await?;
            let delivered = deliveries::delivered_cards_for_order(order.id, conn).await?;
            info!("💰️ Order {} settled and {} unit(s) delivered", order.order_no, delivered.len());
            Ok(SettleOutcome::Delivery(DeliveryOutcome::Completed { order, delivered }))
        },
        Err(SettlementError::InsufficientStock { product_id, requested, available }) => {
            // The money is real. Record it, park the order, and let an operator sort out the stock.
            let reason = format!("insufficient stock: requested {requested}, available {available}");
            settlements::mark_settled(settlement_id, confirmed_amount, provider_ref, Some(&reason), conn).await?;
            let order = orders::record_settlement_outcome(
                order.id,
                OrderStatus::ManualReview,
                confirmed_amount,
                Some(&reason),
                conn,
            )
            .await?;
            warn!("💰️ Order {} paid but product {product_id} is out of stock. Parked for review.", order.order_no);
            Ok(SettleOutcome::Delivery(DeliveryOutcome::ManualReview { order, reason }))
        },
        Err(e) => Err(e),
    }
}

async fn manual_deliver_inner(
    order_id: i64,
    operator: &str,
    conn: &mut SqliteConnection,
) -> Result<DeliveryOutcome, SettlementError> {
    let order = orders::fetch_order_by_id(order_id, conn).await?.ok_or(SettlementError::OrderIdNotFound(order_id))?;
    if !matches!(order.status, OrderStatus::ManualReview | OrderStatus::Paid) {
        return Err(SettlementError::InvalidTransition { from: order.status, to: OrderStatus::Completed });
    }
    if deliveries::count_for_order(order_id, conn).await? > 0 {
        return Err(SettlementError::AlreadyDelivered(order_id));
    }
    let units = inventory::claim_units(order.product_id, order.id, order.quantity, conn).await?;
    for unit in &units {
        deliveries::insert_delivery(order.id, unit.id, DeliveryMode::Manual, Some(operator), conn).await?;
    }
    let order = orders::record_manual_delivery(order.id, conn).await?;
    products::incr_sold_count(order.product_id, order.quantity, conn).await?;
    let delivered = deliveries::delivered_cards_for_order(order.id, conn).await?;
    info!("📦️ Order {} delivered manually by {operator} ({} unit(s))", order.order_no, delivered.len());
    Ok(DeliveryOutcome::Completed { order, delivered })
}

async fn cancel_order_inner(
    order_id: i64,
    reason: &str,
    conn: &mut SqliteConnection,
) -> Result<Order, SettlementError> {
    match orders::mark_cancelled_if_open(order_id, reason, conn).await? {
        Some(order) => {
            info!("📝️ Order {} cancelled: {reason}", order.order_no);
            Ok(order)
        },
        None => match orders::fetch_order_by_id(order_id, conn).await? {
            Some(order) => Err(SettlementError::InvalidTransition { from: order.status, to: OrderStatus::Cancelled }),
            None => Err(SettlementError::OrderIdNotFound(order_id)),
        },
    }
}

async fn mark_refunded_inner(
    order_id: i64,
    reason: &str,
    conn: &mut SqliteConnection,
) -> Result<Order, SettlementError> {
    let order = orders::fetch_order_by_id(order_id, conn).await?.ok_or(SettlementError::OrderIdNotFound(order_id))?;
    let order = orders::transition(order.id, order.status, OrderStatus::Refunded, conn).await?;
    let order: Order =
        sqlx::query_as("UPDATE orders SET remark = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 RETURNING *")
            .bind(reason)
            .bind(order.id)
            .fetch_one(conn)
            .await?;
    info!("💰️ Order {} marked as refunded: {reason}", order.order_no);
    Ok(order)
}

impl OrderManagement for SqliteDatabase {
    async fn fetch_order_by_order_no(&self, order_no: &OrderNo) -> Result<Option<Order>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::fetch_order_by_order_no(order_no, &mut conn).await?)
    }

    async fn fetch_order_by_id(&self, order_id: i64) -> Result<Option<Order>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::fetch_order_by_id(order_id, &mut conn).await?)
    }

    async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::search_orders(query, &mut conn).await?)
    }

    async fn fetch_settlement(&self, settlement_id: &str) -> Result<Option<SettlementRecord>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(settlements::fetch_settlement(settlement_id, &mut conn).await?)
    }

    async fn fetch_settlements_for_order(&self, order_id: i64) -> Result<Vec<SettlementRecord>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(settlements::fetch_settlements_for_order(order_id, &mut conn).await?)
    }

    async fn fetch_deliveries_for_order(&self, order_id: i64) -> Result<Vec<DeliveryRecord>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(deliveries::fetch_deliveries_for_order(order_id, &mut conn).await?)
    }

    async fn fetch_product(&self, product_id: i64) -> Result<Option<Product>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(products::fetch_product_by_id(product_id, &mut conn).await?)
    }
}

impl InventoryManagement for SqliteDatabase {
    async fn create_product(&self, name: &str, price: Cents) -> Result<Product, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        products::insert_product(name, price, &mut conn).await
    }

    async fn update_product_price(&self, product_id: i64, price: Cents) -> Result<Product, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        products::update_price(product_id, price, &mut conn).await
    }

    async fn import_units(&self, product_id: i64, payloads: &[String]) -> Result<ImportResult, SettlementError> {
        let mut conn = self.begin_immediate().await?;
        let result = import_units_inner(product_id, payloads, &mut conn).await;
        finish_tx(conn, result).await
    }

    async fn available_stock(&self, product_id: i64) -> Result<i64, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(inventory::count_available(product_id, &mut conn).await?)
    }

    async fn void_unit(&self, unit_id: i64, reason: &str) -> Result<InventoryUnit, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        inventory::void_unit(unit_id, reason, &mut conn).await
    }

    async fn release_units_for_order(&self, order_id: i64) -> Result<Vec<InventoryUnit>, SettlementError> {
        let mut conn = self.begin_immediate().await?;
        let result = release_units_inner(order_id, &mut conn).await;
        finish_tx(conn, result).await
    }
}

async fn import_units_inner(
    product_id: i64,
    payloads: &[String],
    conn: &mut SqliteConnection,
) -> Result<ImportResult, SettlementError> {
    products::fetch_product_by_id(product_id, conn).await?.ok_or(SettlementError::ProductNotFound(product_id))?;
    inventory::insert_units(product_id, payloads, conn).await
}

async fn release_units_inner(order_id: i64, conn: &mut SqliteConnection) -> Result<Vec<InventoryUnit>, SettlementError> {
    let order = orders::fetch_order_by_id(order_id, conn).await?.ok_or(SettlementError::OrderIdNotFound(order_id))?;
    if !matches!(order.status, OrderStatus::Cancelled | OrderStatus::ManualReview) {
        return Err(SettlementError::ReleaseForbidden(order_id));
    }
    inventory::release_units_for_order(order_id, conn).await
}
