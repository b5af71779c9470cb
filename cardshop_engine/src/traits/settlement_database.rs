use cardshop_common::Cents;
use chrono::Duration;
use thiserror::Error;

use crate::{
    db_types::{NewOrder, Order, OrderNo, OrderStatus, SettlementRecord},
    traits::{data_objects::DeliveryOutcome, InventoryManagement, OrderManagement},
};

/// This trait defines the highest level of behaviour for backends supporting the settlement engine.
///
/// Every method is a complete transaction boundary. The backend must guarantee that concurrent calls
/// against the same order or the same product's inventory serialize on row state rather than
/// in-process locks, so that a mid-way failure rolls back entirely and never leaves a claimed unit
/// without a delivery record, or vice versa.
#[allow(async_fn_in_trait)]
pub trait SettlementDatabase: Clone + OrderManagement + InventoryManagement {
    /// The URL of the database
    fn url(&self) -> &str;

    /// Creates a new order in `Pending` state with a frozen price snapshot and an expiry deadline of
    /// now + `grace`. The product must exist; its current price is captured as the order's
    /// `unit_price` and `total_amount = unit_price * quantity`.
    async fn create_order(&self, order: NewOrder, grace: Duration) -> Result<Order, SettlementError>;

    /// Creates a `Pending` settlement record for the order and moves the order to `Paying` (a no-op
    /// if it is already `Paying`, so a buyer can restart an abandoned checkout).
    ///
    /// Fails if the order is not open, or if its expiry deadline has already passed.
    async fn initiate_payment(&self, order_no: &OrderNo) -> Result<SettlementRecord, SettlementError>;

    /// Records that a notification for this settlement id arrived, bumping the replay counter, and
    /// returns the current state of the record. This happens for every delivery, including replays
    /// that will be short-circuited.
    async fn record_notification(&self, settlement_id: &str) -> Result<SettlementRecord, SettlementError>;

    /// The settlement transaction. All steps run inside one database transaction:
    ///
    /// 1. Re-load the settlement record and its order. If the record is already `Settled`, or the
    ///    order's state is at or past `Paid`, return the prior outcome without side effects. This
    ///    re-check inside the transaction is the binding idempotency guarantee.
    /// 2. If `confirmed_amount` differs from the order total, mark the settlement `Failed` and fail
    ///    with [`SettlementError::AmountMismatch`]; the order never advances past `Paying` and no
    ///    inventory moves. A record can only reach `Settled` with the confirmed amount equal to the
    ///    order total.
    /// 3. If the order is `Cancelled` and no other settlement for it is already `Settled`, mark the
    ///    settlement `Settled` with a flagged remark (the money is real and must surface for a
    ///    manual refund) and allocate nothing.
    /// 4. Claim `quantity` units from the pool. On success, write one delivery record per unit, mark
    ///    the settlement `Settled`, advance the order to `Completed` and bump the product's sold
    ///    counter.
    /// 5. On insufficient stock, still mark the settlement `Settled` but park the order in
    ///    `ManualReview` with the recorded reason. A stockout must never look like "payment didn't
    ///    happen".
    async fn settle_order(
        &self,
        settlement_id: &str,
        confirmed_amount: Cents,
        provider_ref: &str,
    ) -> Result<DeliveryOutcome, SettlementError>;

    /// Marks a settlement record as `Failed` with the given reason. Refused once the record is
    /// `Settled` (settled records are immutable).
    async fn mark_settlement_failed(&self, settlement_id: &str, reason: &str) -> Result<SettlementRecord, SettlementError>;

    /// Delivers inventory for an order sitting in `ManualReview`, or in `Paid` without any delivery
    /// records. Refuses to double-dispense: if the order already has delivery records the call fails
    /// with `AlreadyDelivered`. On success the order moves to `Completed`; settlement records are
    /// not touched (the money was already accounted for).
    async fn manual_deliver(&self, order_id: i64, operator: &str) -> Result<DeliveryOutcome, SettlementError>;

    /// Administratively cancels a still-open (`Pending` or `Paying`) order. The open check happens
    /// inside the transaction, so a settlement that completed concurrently wins and the cancel fails
    /// with `InvalidTransition`.
    async fn cancel_order(&self, order_id: i64, reason: &str) -> Result<Order, SettlementError>;

    /// Moves a `Completed` order to `Refunded`. Allocated units stay allocated; refunding the goods
    /// back into the pool is a deliberate, separate administrative action.
    async fn mark_refunded(&self, order_id: i64, reason: &str) -> Result<Order, SettlementError>;

    /// Cancels every open order whose expiry deadline has passed. The status re-check and the write
    /// are one atomic statement, so an order that a concurrent settlement has already advanced is
    /// silently skipped. Returns the cancelled orders.
    async fn sweep_expired(&self) -> Result<Vec<Order>, SettlementError>;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), SettlementError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum SettlementError {
    #[error("Internal database error: {0}")]
    DatabaseError(String),
    #[error("Product {0} does not exist")]
    ProductNotFound(i64),
    #[error("Quantity {0} is outside the allowed range 1..={1}")]
    InvalidQuantity(i64, i64),
    #[error("The requested order {0} does not exist")]
    OrderNotFound(OrderNo),
    #[error("The requested order (internal id {0}) does not exist")]
    OrderIdNotFound(i64),
    #[error("No settlement record exists for id {0}")]
    SettlementNotFound(String),
    #[error("Settlement {0} is already settled and immutable")]
    AlreadySettled(String),
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock { product_id: i64, requested: i64, available: i64 },
    #[error("Order {0} has expired and can no longer be paid")]
    OrderExpired(OrderNo),
    #[error("Settlement {settlement_id} confirmed {actual} but the order total is {expected}")]
    AmountMismatch { settlement_id: String, expected: Cents, actual: Cents },
    #[error("Order status may not change from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error("Order (internal id {0}) already has delivery records")]
    AlreadyDelivered(i64),
    #[error("Inventory unit {0} is allocated to an order and cannot be voided")]
    UnitAllocated(i64),
    #[error("The requested inventory unit {0} does not exist")]
    UnitNotFound(i64),
    #[error("Inventory for order (internal id {0}) is locked in by a completed or refunded order")]
    ReleaseForbidden(i64),
    #[error("Data integrity violation: {0}. Halt and investigate; do not auto-heal.")]
    IntegrityViolation(String),
}

impl From<sqlx::Error> for SettlementError {
    fn from(e: sqlx::Error) -> Self {
        SettlementError::DatabaseError(e.to_string())
    }
}
