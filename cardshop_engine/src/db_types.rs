//! Row types and status enums for the settlement engine.
//!
//! Every status is a closed set of named variants stored as TEXT. There are no free-form integer
//! status writes anywhere in the engine; the only way to move an order between states is through
//! [`OrderStatus::can_transition`], which the storage layer enforces on every status update.
use std::{fmt::Display, str::FromStr};

use cardshop_common::{Cents, Secret};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

//--------------------------------------      OrderNo        ---------------------------------------------------------
/// The externally visible order number. Orders also carry an internal integer id, but everything a
/// buyer or payment provider sees uses the order number.
#[derive(Debug, Clone, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct OrderNo(pub String);

impl FromStr for OrderNo {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for OrderNo {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Display for OrderNo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl OrderNo {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Error)]
#[error("Invalid status value: {0}")]
pub struct ConversionError(String);

//--------------------------------------    OrderStatus      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum OrderStatus {
    /// The order has been created and no payment has been initiated.
    Pending,
    /// A settlement record exists and the buyer has been sent to the payment provider.
    Paying,
    /// Payment has been captured but goods have not been handed over yet.
    Paid,
    /// Payment captured and all inventory units delivered. Terminal, except for the refund path.
    Completed,
    /// Payment captured but automatic fulfilment failed. An operator must source stock or refund.
    ManualReview,
    /// The order was abandoned or administratively cancelled before payment completed.
    Cancelled,
    /// The captured payment was returned to the buyer.
    Refunded,
}

impl OrderStatus {
    /// The one transition validator. Every status write in the storage layer goes through this
    /// table; anything not listed here is rejected with an `InvalidTransition` error.
    ///
    /// | From \ To    | Paying | Paid | Completed | ManualReview | Cancelled | Refunded |
    /// |--------------|--------|------|-----------|--------------|-----------|----------|
    /// | Pending      | yes    |      |           |              | yes       |          |
    /// | Paying       |        | yes  | yes       | yes          | yes       |          |
    /// | Paid         |        |      | yes       | yes          |           |          |
    /// | ManualReview |        |      | yes       |              |           |          |
    /// | Completed    |        |      |           |              |           | yes      |
    ///
    /// The automated settlement flow moves `Paying` straight to `Completed` because payment capture
    /// and delivery commit in a single transaction; `Paid` is a resting state for externally
    /// confirmed payments awaiting manual delivery.
    pub fn can_transition(self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, to),
            (Pending, Paying)
                | (Pending, Cancelled)
                | (Paying, Paid)
                | (Paying, Completed)
                | (Paying, ManualReview)
                | (Paying, Cancelled)
                | (Paid, Completed)
                | (Paid, ManualReview)
                | (ManualReview, Completed)
                | (Completed, Refunded)
        )
    }

    /// True for states at or past `Paid`, i.e. money has been captured for this order.
    pub fn is_settled(self) -> bool {
        use OrderStatus::*;
        matches!(self, Paid | Completed | ManualReview | Refunded)
    }

    /// True for states the expiry reaper and admin cancel are allowed to close.
    pub fn is_open(self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Paying)
    }
}

impl Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Paying => "Paying",
            OrderStatus::Paid => "Paid",
            OrderStatus::Completed => "Completed",
            OrderStatus::ManualReview => "ManualReview",
            OrderStatus::Cancelled => "Cancelled",
            OrderStatus::Refunded => "Refunded",
        };
        write!(f, "{s}")
    }
}

impl FromStr for OrderStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Paying" => Ok(Self::Paying),
            "Paid" => Ok(Self::Paid),
            "Completed" => Ok(Self::Completed),
            "ManualReview" => Ok(Self::ManualReview),
            "Cancelled" => Ok(Self::Cancelled),
            "Refunded" => Ok(Self::Refunded),
            s => Err(ConversionError(format!("Invalid order status: {s}"))),
        }
    }
}

//--------------------------------------     UnitStatus      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum UnitStatus {
    /// The unit is in the pool and may be claimed.
    Available,
    /// The unit is reserved for exactly one order.
    Allocated,
    /// The unit has been administratively withdrawn and is permanently excluded from claims.
    Void,
}

impl Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UnitStatus::Available => "Available",
            UnitStatus::Allocated => "Allocated",
            UnitStatus::Void => "Void",
        };
        write!(f, "{s}")
    }
}

//--------------------------------------  SettlementStatus   ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum SettlementStatus {
    /// Created when payment was initiated; no verified notification has been processed yet.
    Pending,
    /// A notification was verified and processed. The record is immutable from here on.
    Settled,
    /// The notification was definitively rejected (bad amount, provider-reported failure).
    Failed,
}

impl Display for SettlementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SettlementStatus::Pending => "Pending",
            SettlementStatus::Settled => "Settled",
            SettlementStatus::Failed => "Failed",
        };
        write!(f, "{s}")
    }
}

//--------------------------------------    DeliveryMode     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum DeliveryMode {
    /// Delivered by the settlement flow at payment time.
    Automatic,
    /// Delivered by an operator via the manual delivery path.
    Manual,
}

impl Display for DeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryMode::Automatic => write!(f, "Automatic"),
            DeliveryMode::Manual => write!(f, "Manual"),
        }
    }
}

//--------------------------------------      Product        ---------------------------------------------------------
/// The slice of the catalog the engine needs: a price source for order snapshots and the cumulative
/// sold counter bumped at settlement time. Catalog management lives elsewhere.
#[derive(Debug, Clone, FromRow)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: Cents,
    pub sold_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------       Order         ---------------------------------------------------------
#[derive(Debug, Clone, FromRow)]
pub struct Order {
    pub id: i64,
    pub order_no: OrderNo,
    pub product_id: i64,
    pub quantity: i64,
    /// Price snapshot taken at creation time. Later catalog price changes never affect this order.
    pub unit_price: Cents,
    /// Always `unit_price * quantity`, frozen at creation.
    pub total_amount: Cents,
    pub currency: String,
    pub status: OrderStatus,
    pub buyer_contact: Option<String>,
    pub paid_amount: Option<Cents>,
    pub paid_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------      NewOrder       ---------------------------------------------------------
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub product_id: i64,
    pub quantity: i64,
    /// Email or phone the buyer can be reached at for manual follow-up.
    pub buyer_contact: Option<String>,
}

impl NewOrder {
    pub fn new(product_id: i64, quantity: i64) -> Self {
        Self { product_id, quantity, buyer_contact: None }
    }

    pub fn with_contact<S: Into<String>>(mut self, contact: S) -> Self {
        self.buyer_contact = Some(contact.into());
        self
    }
}

//--------------------------------------   InventoryUnit     ---------------------------------------------------------
/// One sellable, single-use card code. The payload column holds the secret content; row structs keep
/// it as a plain string for storage, but anything leaving the storage layer wraps it in
/// [`Secret`] so it cannot leak into logs.
#[derive(Debug, Clone, FromRow)]
pub struct InventoryUnit {
    pub id: i64,
    pub product_id: i64,
    pub payload: String,
    pub status: UnitStatus,
    pub order_id: Option<i64>,
    pub allocated_at: Option<DateTime<Utc>>,
    pub void_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

//-------------------------------------- SettlementRecord    ---------------------------------------------------------
/// One row per initiated payment attempt. The `status` column is the durable idempotency truth: at
/// most one record per order ever reaches `Settled`, and a `Settled` record is never mutated again.
#[derive(Debug, Clone, FromRow)]
pub struct SettlementRecord {
    pub id: i64,
    pub settlement_id: String,
    pub order_id: i64,
    pub requested_amount: Cents,
    pub confirmed_amount: Option<Cents>,
    pub provider_ref: Option<String>,
    pub status: SettlementStatus,
    /// How many times the provider has delivered a notification for this settlement.
    pub notify_count: i64,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------  DeliveryRecord     ---------------------------------------------------------
/// Created exactly once per allocated unit at settlement time; never mutated.
#[derive(Debug, Clone, FromRow)]
pub struct DeliveryRecord {
    pub id: i64,
    pub order_id: i64,
    pub unit_id: i64,
    pub mode: DeliveryMode,
    pub operator: Option<String>,
    pub created_at: DateTime<Utc>,
}

//-------------------------------------- PaymentNotification -------------------------------------------------------
/// The provider-agnostic shape of an inbound payment notification. Provider adapters are responsible
/// for signature verification and translating their wire format into this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentNotification {
    /// The settlement id this engine assigned when payment was initiated.
    pub settlement_id: String,
    /// The provider's own transaction reference.
    pub provider_transaction_id: String,
    /// "success", "failure", or a provider-specific status we treat as failure.
    pub status: String,
    pub confirmed_amount: Cents,
    pub payer_reference: Option<String>,
    /// The raw provider payload, retained for audit by the caller.
    pub raw_payload: serde_json::Value,
}

impl PaymentNotification {
    pub fn success(settlement_id: &str, provider_transaction_id: &str, confirmed_amount: Cents) -> Self {
        Self {
            settlement_id: settlement_id.to_string(),
            provider_transaction_id: provider_transaction_id.to_string(),
            status: "success".to_string(),
            confirmed_amount,
            payer_reference: None,
            raw_payload: serde_json::Value::Null,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

//--------------------------------------   DeliveredCard     ---------------------------------------------------------
/// A delivered unit as handed to the buyer. The payload is redacted from `Debug` and `Display`.
#[derive(Debug, Clone)]
pub struct DeliveredCard {
    pub unit_id: i64,
    pub payload: Secret<String>,
    pub mode: DeliveryMode,
    pub delivered_at: DateTime<Utc>,
}
