use cardshop_common::Cents;
use log::debug;
use sqlx::SqliteConnection;

use crate::{db_types::SettlementRecord, traits::SettlementError};

pub(crate) async fn insert_settlement(
    settlement_id: &str,
    order_id: i64,
    requested_amount: Cents,
    conn: &mut SqliteConnection,
) -> Result<SettlementRecord, SettlementError> {
    let record = sqlx::query_as(
        "INSERT INTO settlements (settlement_id, order_id, requested_amount) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(settlement_id)
    .bind(order_id)
    .bind(requested_amount)
    .fetch_one(conn)
    .await?;
    debug!("💰️ Settlement {settlement_id} created for order id {order_id}");
    Ok(record)
}

pub async fn fetch_settlement(
    settlement_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<SettlementRecord>, sqlx::Error> {
    let record = sqlx::query_as("SELECT * FROM settlements WHERE settlement_id = $1")
        .bind(settlement_id)
        .fetch_optional(conn)
        .await?;
    Ok(record)
}

pub async fn fetch_settlements_for_order(
    order_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<SettlementRecord>, sqlx::Error> {
    let records = sqlx::query_as("SELECT * FROM settlements WHERE order_id = $1 ORDER BY id ASC")
        .bind(order_id)
        .fetch_all(conn)
        .await?;
    Ok(records)
}

/// Fetches the order's `Settled` settlement record, if one exists. At most one record per order can
/// be settled, so a single row answers the question.
pub(crate) async fn settled_record_for_order(
    order_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<SettlementRecord>, sqlx::Error> {
    let record = sqlx::query_as("SELECT * FROM settlements WHERE order_id = $1 AND status = 'Settled' LIMIT 1")
        .bind(order_id)
        .fetch_optional(conn)
        .await?;
    Ok(record)
}

/// Bumps the notification replay counter for the settlement and returns the current record.
pub(crate) async fn incr_notify_count(
    settlement_id: &str,
    conn: &mut SqliteConnection,
) -> Result<SettlementRecord, SettlementError> {
    let result: Option<SettlementRecord> = sqlx::query_as(
        "UPDATE settlements SET notify_count = notify_count + 1, updated_at = CURRENT_TIMESTAMP WHERE settlement_id = \
         $1 RETURNING *",
    )
    .bind(settlement_id)
    .fetch_optional(conn)
    .await?;
    result.ok_or_else(|| SettlementError::SettlementNotFound(settlement_id.to_string()))
}

/// Marks the settlement as `Settled`, recording what the provider confirmed. The `UPDATE` is guarded
/// on the record not being settled already, so a settled record is never rewritten.
pub(crate) async fn mark_settled(
    settlement_id: &str,
    confirmed_amount: Cents,
    provider_ref: &str,
    remark: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<SettlementRecord, SettlementError> {
    let result: Option<SettlementRecord> = sqlx::query_as(
        r#"
        UPDATE settlements SET
            status = 'Settled',
            confirmed_amount = $1,
            provider_ref = $2,
            remark = COALESCE($3, remark),
            updated_at = CURRENT_TIMESTAMP
        WHERE settlement_id = $4 AND status <> 'Settled'
        RETURNING *;
    "#,
    )
    .bind(confirmed_amount)
    .bind(provider_ref)
    .bind(remark)
    .bind(settlement_id)
    .fetch_optional(&mut *conn)
    .await?;
    match result {
        Some(record) => Ok(record),
        None => match fetch_settlement(settlement_id, conn).await? {
            Some(_) => Err(SettlementError::AlreadySettled(settlement_id.to_string())),
            None => Err(SettlementError::SettlementNotFound(settlement_id.to_string())),
        },
    }
}

/// Marks the settlement as `Failed` with the reason. Settled records are immutable and refuse the
/// update.
pub(crate) async fn mark_failed(
    settlement_id: &str,
    reason: &str,
    conn: &mut SqliteConnection,
) -> Result<SettlementRecord, SettlementError> {
    let result: Option<SettlementRecord> = sqlx::query_as(
        "UPDATE settlements SET status = 'Failed', remark = $1, updated_at = CURRENT_TIMESTAMP WHERE settlement_id = \
         $2 AND status <> 'Settled' RETURNING *",
    )
    .bind(reason)
    .bind(settlement_id)
    .fetch_optional(&mut *conn)
    .await?;
    match result {
        Some(record) => Ok(record),
        None => match fetch_settlement(settlement_id, conn).await? {
            Some(_) => Err(SettlementError::AlreadySettled(settlement_id.to_string())),
            None => Err(SettlementError::SettlementNotFound(settlement_id.to_string())),
        },
    }
}
