use serde::{Deserialize, Serialize};

use crate::db_types::{DeliveredCard, Order};

/// The result of pushing a settlement through [`settle_order`](crate::SettlementDatabase::settle_order)
/// or of a manual delivery.
///
/// Exactly one variant is returned per call, and replays of the same settlement id converge on
/// [`DeliveryOutcome::AlreadySettled`] with the original delivery attached.
#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    /// The settlement went through and inventory was handed out. `delivered` holds one entry per
    /// purchased unit.
    Completed { order: Order, delivered: Vec<DeliveredCard> },
    /// A replay of a settlement that was already processed. `delivered` replays the original
    /// delivery, so a provider retry gets the same answer as the first call.
    AlreadySettled { order: Order, delivered: Vec<DeliveredCard> },
    /// Another notification for the same settlement currently holds the processing lock. The caller
    /// should retry shortly; no state was touched.
    InFlight,
    /// The money is accounted for but the order could not be fulfilled automatically and is parked
    /// for an operator.
    ManualReview { order: Order, reason: String },
    /// The payment arrived for an order that was already cancelled. The settlement is recorded and
    /// flagged for a manual refund; no inventory moved.
    CancelledWithPayment { order: Order },
    /// The provider reported the payment as failed. The settlement record was marked `Failed`; no
    /// inventory moved.
    Rejected { settlement_id: String, reason: String },
}

/// The outcome of a bulk inventory import. Duplicate payloads within the batch or already present in
/// the pool are skipped rather than failing the whole import.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportResult {
    pub imported: i64,
    pub skipped_duplicates: i64,
}
