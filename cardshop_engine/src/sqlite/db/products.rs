use cardshop_common::Cents;
use sqlx::SqliteConnection;

use crate::{db_types::Product, traits::SettlementError};

pub async fn insert_product(name: &str, price: Cents, conn: &mut SqliteConnection) -> Result<Product, SettlementError> {
    let product = sqlx::query_as("INSERT INTO products (name, price) VALUES ($1, $2) RETURNING *")
        .bind(name)
        .bind(price)
        .fetch_one(conn)
        .await?;
    Ok(product)
}

pub async fn fetch_product_by_id(product_id: i64, conn: &mut SqliteConnection) -> Result<Option<Product>, sqlx::Error> {
    let product = sqlx::query_as("SELECT * FROM products WHERE id = $1").bind(product_id).fetch_optional(conn).await?;
    Ok(product)
}

pub async fn update_price(
    product_id: i64,
    price: Cents,
    conn: &mut SqliteConnection,
) -> Result<Product, SettlementError> {
    let result: Option<Product> =
        sqlx::query_as("UPDATE products SET price = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 RETURNING *")
            .bind(price)
            .bind(product_id)
            .fetch_optional(conn)
            .await?;
    result.ok_or(SettlementError::ProductNotFound(product_id))
}

/// Adds `count` to the product's cumulative sold counter.
pub(crate) async fn incr_sold_count(
    product_id: i64,
    count: i64,
    conn: &mut SqliteConnection,
) -> Result<(), SettlementError> {
    let res = sqlx::query("UPDATE products SET sold_count = sold_count + $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2")
        .bind(count)
        .bind(product_id)
        .execute(conn)
        .await?;
    if res.rows_affected() == 0 {
        return Err(SettlementError::ProductNotFound(product_id));
    }
    Ok(())
}
