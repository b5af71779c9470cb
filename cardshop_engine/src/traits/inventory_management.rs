use cardshop_common::Cents;

use crate::{
    db_types::{InventoryUnit, Product},
    traits::{data_objects::ImportResult, SettlementError},
};

/// The `InventoryManagement` trait covers administration of the card pool: products, stock import
/// and the unit lifecycle outside the settlement path.
#[allow(async_fn_in_trait)]
pub trait InventoryManagement {
    /// Creates a new product with the given name and unit price.
    async fn create_product(&self, name: &str, price: Cents) -> Result<Product, SettlementError>;

    /// Updates the price of a product. Existing orders keep their frozen snapshot; only new orders
    /// see the updated price.
    async fn update_product_price(&self, product_id: i64, price: Cents) -> Result<Product, SettlementError>;

    /// Imports a batch of card payloads into the pool for a product. Duplicate payloads are skipped
    /// and counted in the result rather than failing the import.
    async fn import_units(&self, product_id: i64, payloads: &[String]) -> Result<ImportResult, SettlementError>;

    /// Counts the available (claimable) units for a product.
    async fn available_stock(&self, product_id: i64) -> Result<i64, SettlementError>;

    /// Voids an available unit so it can never be claimed, recording the reason. Refuses to void a
    /// unit that is allocated to an order.
    async fn void_unit(&self, unit_id: i64, reason: &str) -> Result<InventoryUnit, SettlementError>;

    /// Returns the units allocated to a cancelled or manually-reviewed order back to the pool.
    /// Refused for completed or refunded orders, where the allocation is the customer's purchase.
    async fn release_units_for_order(&self, order_id: i64) -> Result<Vec<InventoryUnit>, SettlementError>;
}
