use crate::db_types::{DeliveredCard, Order};

/// Fired when a settlement completes and the order's inventory has been handed out. `delivered`
/// carries the payloads, so handlers can forward the cards to the buyer.
#[derive(Debug, Clone)]
pub struct OrderCompletedEvent {
    pub order: Order,
    pub delivered: Vec<DeliveredCard>,
}

impl OrderCompletedEvent {
    pub fn new(order: Order, delivered: Vec<DeliveredCard>) -> Self {
        Self { order, delivered }
    }
}

/// Fired when a paid order could not be fulfilled automatically and was parked for an operator.
#[derive(Debug, Clone)]
pub struct OrderManualReviewEvent {
    pub order: Order,
    pub reason: String,
}

impl OrderManualReviewEvent {
    pub fn new(order: Order, reason: impl Into<String>) -> Self {
        Self { order, reason: reason.into() }
    }
}
