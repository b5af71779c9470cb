use cardshop_common::Secret;
use sqlx::{FromRow, SqliteConnection};

use crate::{
    db_types::{DeliveredCard, DeliveryMode, DeliveryRecord},
    traits::SettlementError,
};

pub(crate) async fn insert_delivery(
    order_id: i64,
    unit_id: i64,
    mode: DeliveryMode,
    operator: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<DeliveryRecord, SettlementError> {
    let record =
        sqlx::query_as("INSERT INTO deliveries (order_id, unit_id, mode, operator) VALUES ($1, $2, $3, $4) RETURNING *")
            .bind(order_id)
            .bind(unit_id)
            .bind(mode)
            .bind(operator)
            .fetch_one(conn)
            .await?;
    Ok(record)
}

pub async fn fetch_deliveries_for_order(
    order_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<DeliveryRecord>, sqlx::Error> {
    let records = sqlx::query_as("SELECT * FROM deliveries WHERE order_id = $1 ORDER BY id ASC")
        .bind(order_id)
        .fetch_all(conn)
        .await?;
    Ok(records)
}

pub async fn count_for_order(order_id: i64, conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM deliveries WHERE order_id = $1")
        .bind(order_id)
        .fetch_one(conn)
        .await?;
    Ok(count)
}

#[derive(FromRow)]
struct DeliveredRow {
    unit_id: i64,
    payload: String,
    mode: DeliveryMode,
    created_at: chrono::DateTime<chrono::Utc>,
}

/// Joins the order's delivery records with the unit payloads, producing the cards as handed to the
/// buyer. Used both for fresh deliveries and for replaying a prior delivery to a retried
/// notification.
pub(crate) async fn delivered_cards_for_order(
    order_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<DeliveredCard>, SettlementError> {
    let rows: Vec<DeliveredRow> = sqlx::query_as(
        r#"
        SELECT
            deliveries.unit_id as unit_id,
            inventory_units.payload as payload,
            deliveries.mode as mode,
            deliveries.created_at as created_at
        FROM deliveries JOIN inventory_units ON deliveries.unit_id = inventory_units.id
        WHERE deliveries.order_id = $1
        ORDER BY deliveries.id ASC"#,
    )
    .bind(order_id)
    .fetch_all(conn)
    .await?;
    let cards = rows
        .into_iter()
        .map(|r| DeliveredCard {
            unit_id: r.unit_id,
            payload: Secret::new(r.payload),
            mode: r.mode,
            delivered_at: r.created_at,
        })
        .collect();
    Ok(cards)
}
