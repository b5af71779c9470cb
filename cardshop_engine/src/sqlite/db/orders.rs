use cardshop_common::Cents;
use chrono::{DateTime, Utc};
use log::{debug, trace};
use sqlx::{QueryBuilder, SqliteConnection};

use crate::{
    db_types::{NewOrder, Order, OrderNo, OrderStatus},
    sc_api::order_objects::OrderQueryFilter,
    traits::SettlementError,
};

/// Inserts a new order into the database using the given connection. This is not atomic. You can embed this call
/// inside a transaction if you need to ensure atomicity, and pass `&mut *tx` as the connection argument.
///
/// The price fields are the caller's snapshot of the catalog price; they are frozen here and never
/// touched again.
pub async fn insert_order(
    order_no: &OrderNo,
    order: &NewOrder,
    unit_price: Cents,
    total_amount: Cents,
    currency: &str,
    expires_at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Order, SettlementError> {
    let order = sqlx::query_as(
        r#"
            INSERT INTO orders (
                order_no,
                product_id,
                quantity,
                unit_price,
                total_amount,
                currency,
                buyer_contact,
                expires_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *;
        "#,
    )
    .bind(order_no.as_str())
    .bind(order.product_id)
    .bind(order.quantity)
    .bind(unit_price)
    .bind(total_amount)
    .bind(currency)
    .bind(order.buyer_contact.as_deref())
    .bind(expires_at)
    .fetch_one(conn)
    .await?;
    Ok(order)
}

pub async fn fetch_order_by_order_no(
    order_no: &OrderNo,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order =
        sqlx::query_as("SELECT * FROM orders WHERE order_no = $1").bind(order_no.as_str()).fetch_optional(conn).await?;
    Ok(order)
}

pub async fn fetch_order_by_id(id: i64, conn: &mut SqliteConnection) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as("SELECT * FROM orders WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(order)
}

/// Fetches orders according to criteria specified in the `OrderQueryFilter`.
///
/// Resulting orders are ordered by `created_at` in descending order
pub async fn search_orders(query: OrderQueryFilter, conn: &mut SqliteConnection) -> Result<Vec<Order>, sqlx::Error> {
    let mut builder = QueryBuilder::new(
        r#"
    SELECT * FROM orders
    "#,
    );
    if !query.is_empty() {
        builder.push("WHERE ");
    }
    let mut where_clause = builder.separated(" AND ");
    if let Some(order_no) = query.order_no {
        where_clause.push("order_no = ");
        where_clause.push_bind_unseparated(order_no.0);
    }
    if let Some(product_id) = query.product_id {
        where_clause.push("product_id = ");
        where_clause.push_bind_unseparated(product_id);
    }
    if let Some(contact) = query.buyer_contact {
        where_clause.push("buyer_contact LIKE ");
        where_clause.push_bind_unseparated(format!("%{contact}%"));
    }
    if query.status.as_ref().map(|s| !s.is_empty()).unwrap_or(false) {
        let mut statuses = vec![];
        query.status.as_ref().unwrap().iter().for_each(|s| {
            statuses.push(format!("'{s}'"));
        });
        let status_clause = statuses.join(",");
        where_clause.push(format!("status IN ({status_clause})"));
    }
    if let Some(since) = query.since {
        where_clause.push("created_at >= ");
        where_clause.push_bind_unseparated(since);
    }
    if let Some(until) = query.until {
        where_clause.push("created_at <= ");
        where_clause.push_bind_unseparated(until);
    }
    builder.push(" ORDER BY created_at DESC");

    trace!("📝️ Executing query: {}", builder.sql());
    let query = builder.build_query_as::<Order>();
    let orders = query.fetch_all(conn).await?;
    trace!("Result of search_orders: {:?}", orders.len());
    Ok(orders)
}

/// Moves an order along the state machine. The legal-edge check happens up front and the `UPDATE` is
/// guarded on the expected current status, so a concurrent writer that got there first makes this
/// call fail with `InvalidTransition` rather than clobbering its work.
pub(crate) async fn transition(
    id: i64,
    from: OrderStatus,
    to: OrderStatus,
    conn: &mut SqliteConnection,
) -> Result<Order, SettlementError> {
    if !from.can_transition(to) {
        return Err(SettlementError::InvalidTransition { from, to });
    }
    let result: Option<Order> = sqlx::query_as(
        "UPDATE orders SET status = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 AND status = $3 RETURNING *",
    )
    .bind(to)
    .bind(id)
    .bind(from)
    .fetch_optional(&mut *conn)
    .await?;
    match result {
        Some(order) => {
            debug!("📝️ Order {} moved from {from} to {to}", order.order_no);
            Ok(order)
        },
        None => match fetch_order_by_id(id, conn).await? {
            Some(current) => Err(SettlementError::InvalidTransition { from: current.status, to }),
            None => Err(SettlementError::OrderIdNotFound(id)),
        },
    }
}

/// Settles the order's money and delivery fields in one statement: the paid amount and timestamp are
/// recorded, and the status moves to `to` (either `Completed` with a delivery timestamp, or
/// `ManualReview` with the reason in the remark).
pub(crate) async fn record_settlement_outcome(
    id: i64,
    to: OrderStatus,
    paid_amount: Cents,
    remark: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<Order, SettlementError> {
    let delivered = matches!(to, OrderStatus::Completed);
    let result: Option<Order> = sqlx::query_as(
        r#"
        UPDATE orders SET
            status = $1,
            paid_amount = $2,
            paid_at = CURRENT_TIMESTAMP,
            delivered_at = CASE WHEN $3 THEN CURRENT_TIMESTAMP ELSE delivered_at END,
            remark = COALESCE($4, remark),
            updated_at = CURRENT_TIMESTAMP
        WHERE id = $5
        RETURNING *;
    "#,
    )
    .bind(to)
    .bind(paid_amount)
    .bind(delivered)
    .bind(remark)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    result.ok_or(SettlementError::OrderIdNotFound(id))
}

/// Marks a manually delivered order as `Completed` and stamps the delivery time.
pub(crate) async fn record_manual_delivery(id: i64, conn: &mut SqliteConnection) -> Result<Order, SettlementError> {
    let result: Option<Order> = sqlx::query_as(
        "UPDATE orders SET status = 'Completed', delivered_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP \
         WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;
    result.ok_or(SettlementError::OrderIdNotFound(id))
}

/// Cancels the order if it is still open. Returns `None` when the order exists but has moved past
/// the open states, so a settlement that won the race is left alone.
pub(crate) async fn mark_cancelled_if_open(
    id: i64,
    reason: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, SettlementError> {
    let result: Option<Order> = sqlx::query_as(
        "UPDATE orders SET status = 'Cancelled', remark = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 AND status \
         IN ('Pending', 'Paying') RETURNING *",
    )
    .bind(reason)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(result)
}

/// Cancels every open order whose expiry deadline has passed. The filter and the write are one
/// statement, so an order a concurrent settlement already advanced is skipped.
pub(crate) async fn expire_open_orders(conn: &mut SqliteConnection) -> Result<Vec<Order>, SettlementError> {
    let rows = sqlx::query_as(
        "UPDATE orders SET status = 'Cancelled', remark = 'expired', updated_at = CURRENT_TIMESTAMP WHERE status IN \
         ('Pending', 'Paying') AND unixepoch(expires_at) <= unixepoch(CURRENT_TIMESTAMP) RETURNING *;",
    )
    .fetch_all(conn)
    .await?;
    Ok(rows)
}
