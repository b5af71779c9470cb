use crate::{
    db_types::{DeliveryRecord, Order, OrderNo, Product, SettlementRecord},
    sc_api::order_objects::OrderQueryFilter,
    traits::SettlementError,
};

/// The `OrderManagement` trait is the read-only query surface over orders, settlements and
/// deliveries. Nothing here mutates state.
#[allow(async_fn_in_trait)]
pub trait OrderManagement {
    /// Fetches the order with the given public order number, if any.
    async fn fetch_order_by_order_no(&self, order_no: &OrderNo) -> Result<Option<Order>, SettlementError>;

    /// Fetches the order with the given internal id, if any.
    async fn fetch_order_by_id(&self, order_id: i64) -> Result<Option<Order>, SettlementError>;

    /// Searches orders against the given filter, newest first.
    async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, SettlementError>;

    /// Fetches the settlement record with the given public settlement id, if any.
    async fn fetch_settlement(&self, settlement_id: &str) -> Result<Option<SettlementRecord>, SettlementError>;

    /// Fetches every settlement record attached to the order, oldest first.
    async fn fetch_settlements_for_order(&self, order_id: i64) -> Result<Vec<SettlementRecord>, SettlementError>;

    /// Fetches the delivery records for the order, oldest first.
    async fn fetch_deliveries_for_order(&self, order_id: i64) -> Result<Vec<DeliveryRecord>, SettlementError>;

    /// Fetches a product by id, if any.
    async fn fetch_product(&self, product_id: i64) -> Result<Option<Product>, SettlementError>;
}
