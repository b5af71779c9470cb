use log::debug;
use sqlx::SqliteConnection;

use crate::{
    db_types::{InventoryUnit, UnitStatus},
    traits::{ImportResult, SettlementError},
};

/// Imports a batch of card payloads for a product. Payloads already present in the pool (or repeated
/// within the batch) are skipped and counted, so a re-run of the same import file is harmless.
pub async fn insert_units(
    product_id: i64,
    payloads: &[String],
    conn: &mut SqliteConnection,
) -> Result<ImportResult, SettlementError> {
    let mut result = ImportResult::default();
    for payload in payloads {
        let res = sqlx::query("INSERT OR IGNORE INTO inventory_units (product_id, payload) VALUES ($1, $2)")
            .bind(product_id)
            .bind(payload)
            .execute(&mut *conn)
            .await?;
        match res.rows_affected() {
            0 => result.skipped_duplicates += 1,
            _ => result.imported += 1,
        }
    }
    debug!(
        "🗂️ Imported {} unit(s) for product {product_id} ({} duplicate(s) skipped)",
        result.imported, result.skipped_duplicates
    );
    Ok(result)
}

pub async fn count_available(product_id: i64, conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM inventory_units WHERE product_id = $1 AND status = 'Available'")
            .bind(product_id)
            .fetch_one(conn)
            .await?;
    Ok(count)
}

/// Claims `quantity` units for an order, oldest first. All-or-nothing: if the pool holds fewer than
/// `quantity` available units, no unit is touched and `InsufficientStock` is returned.
///
/// Callers must run this inside a write transaction. The selection and the guarded `UPDATE` are only
/// race-free when the surrounding transaction holds the database write lock.
pub(crate) async fn claim_units(
    product_id: i64,
    order_id: i64,
    quantity: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<InventoryUnit>, SettlementError> {
    let candidates: Vec<(i64,)> = sqlx::query_as(
        "SELECT id FROM inventory_units WHERE product_id = $1 AND status = 'Available' ORDER BY id ASC LIMIT $2",
    )
    .bind(product_id)
    .bind(quantity)
    .fetch_all(&mut *conn)
    .await?;
    if (candidates.len() as i64) < quantity {
        let available = count_available(product_id, conn).await?;
        return Err(SettlementError::InsufficientStock { product_id, requested: quantity, available });
    }
    let ids = candidates.iter().map(|(id,)| id.to_string()).collect::<Vec<_>>().join(",");
    let units: Vec<InventoryUnit> = sqlx::query_as(
        format!(
            "UPDATE inventory_units SET status = 'Allocated', order_id = $1, allocated_at = CURRENT_TIMESTAMP WHERE \
             id IN ({ids}) AND status = 'Available' RETURNING *;"
        )
        .as_str(),
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;
    if (units.len() as i64) != quantity {
        return Err(SettlementError::IntegrityViolation(format!(
            "claimed {} unit(s) for order {order_id} but {quantity} were selected",
            units.len()
        )));
    }
    debug!("🗂️ Claimed {quantity} unit(s) of product {product_id} for order {order_id}");
    Ok(units)
}

/// Returns an order's allocated units to the pool.
pub(crate) async fn release_units_for_order(
    order_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<InventoryUnit>, SettlementError> {
    let units: Vec<InventoryUnit> = sqlx::query_as(
        "UPDATE inventory_units SET status = 'Available', order_id = NULL, allocated_at = NULL WHERE order_id = $1 \
         AND status = 'Allocated' RETURNING *;",
    )
    .bind(order_id)
    .fetch_all(conn)
    .await?;
    debug!("🗂️ Released {} unit(s) from order {order_id} back into the pool", units.len());
    Ok(units)
}

/// Voids an available unit so it can never be claimed. Voiding an already voided unit is a no-op
/// that keeps the original reason; allocated units cannot be voided.
pub(crate) async fn void_unit(
    unit_id: i64,
    reason: &str,
    conn: &mut SqliteConnection,
) -> Result<InventoryUnit, SettlementError> {
    let result: Option<InventoryUnit> = sqlx::query_as(
        "UPDATE inventory_units SET status = 'Void', void_reason = $1 WHERE id = $2 AND status = 'Available' \
         RETURNING *",
    )
    .bind(reason)
    .bind(unit_id)
    .fetch_optional(&mut *conn)
    .await?;
    match result {
        Some(unit) => Ok(unit),
        None => {
            let existing: Option<InventoryUnit> =
                sqlx::query_as("SELECT * FROM inventory_units WHERE id = $1").bind(unit_id).fetch_optional(conn).await?;
            match existing {
                Some(unit) if unit.status == UnitStatus::Void => Ok(unit),
                Some(_) => Err(SettlementError::UnitAllocated(unit_id)),
                None => Err(SettlementError::UnitNotFound(unit_id)),
            }
        },
    }
}
