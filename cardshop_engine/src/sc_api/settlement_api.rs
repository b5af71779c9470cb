use std::fmt::Debug;

use cardshop_common::Cents;
use log::*;

use crate::{
    config::EngineConfig,
    db_types::{
        DeliveredCard,
        DeliveryRecord,
        InventoryUnit,
        NewOrder,
        Order,
        OrderNo,
        PaymentNotification,
        Product,
        SettlementRecord,
    },
    events::{EventProducers, OrderCompletedEvent, OrderManualReviewEvent},
    sc_api::order_objects::OrderQueryFilter,
    traits::{DeliveryOutcome, ImportResult, LockProvider, SettlementDatabase, SettlementError},
};

/// `SettlementApi` is the primary API for driving order and payment flows in response to buyer
/// actions and payment provider notifications.
///
/// It front-ends a [`SettlementDatabase`] backend with input validation, the ephemeral notification
/// hold, and event dispatch. All correctness-critical decisions live in the backend's transactions;
/// this layer can be bypassed by duplicate processes without risking a double delivery.
pub struct SettlementApi<B, L> {
    db: B,
    locks: L,
    config: EngineConfig,
    producers: EventProducers,
}

impl<B, L> Debug for SettlementApi<B, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SettlementApi")
    }
}

impl<B, L> SettlementApi<B, L> {
    pub fn new(db: B, locks: L, config: EngineConfig, producers: EventProducers) -> Self {
        Self { db, locks, config, producers }
    }
}

impl<B, L> SettlementApi<B, L>
where
    B: SettlementDatabase,
    L: LockProvider,
{
    /// Creates a new order for the given product. The quantity is validated against the configured
    /// per-order maximum, the catalog price is frozen into the order, and the expiry clock starts
    /// ticking.
    pub async fn create_order(&self, order: NewOrder) -> Result<Order, SettlementError> {
        if order.quantity < 1 || order.quantity > self.config.max_quantity_per_order {
            return Err(SettlementError::InvalidQuantity(order.quantity, self.config.max_quantity_per_order));
        }
        let order = self.db.create_order(order, self.config.order_expiry).await?;
        debug!("🔄️📦️ Order {} created. It expires at {}", order.order_no, order.expires_at);
        Ok(order)
    }

    /// Starts a payment attempt for the order, returning the settlement record whose id the provider
    /// must echo back in its notification.
    pub async fn initiate_payment(&self, order_no: &OrderNo) -> Result<SettlementRecord, SettlementError> {
        let record = self.db.initiate_payment(order_no).await?;
        debug!("🔄️💰️ Settlement {} initiated for order {order_no}", record.settlement_id);
        Ok(record)
    }

    /// Handles a verified payment provider notification. The caller is responsible for signature
    /// verification; everything after that happens here:
    ///
    /// * the notification is recorded against the settlement (replays included),
    /// * failure notifications mark the settlement `Failed` and stop,
    /// * an ephemeral hold sheds concurrent duplicates ([`DeliveryOutcome::InFlight`]),
    /// * the settlement transaction runs and its outcome is returned,
    /// * completion and manual-review events are dispatched to subscribers.
    ///
    /// Calling this twice with the same settlement id is safe: the second call converges on
    /// [`DeliveryOutcome::AlreadySettled`] with the original delivery.
    pub async fn handle_notification(
        &self,
        notification: &PaymentNotification,
    ) -> Result<DeliveryOutcome, SettlementError> {
        let settlement_id = notification.settlement_id.as_str();
        let record = self.db.record_notification(settlement_id).await?;
        if record.notify_count > 1 {
            debug!("🔄️💰️ Settlement {settlement_id} notification #{} received", record.notify_count);
        }
        if !notification.is_success() {
            let reason = format!("provider reported status '{}'", notification.status);
            match self.db.mark_settlement_failed(settlement_id, &reason).await {
                Ok(_) => {},
                // A failure replay after a successful settlement changes nothing.
                Err(SettlementError::AlreadySettled(_)) => {
                    debug!("🔄️💰️ Ignoring failure notification for settled settlement {settlement_id}");
                },
                Err(e) => return Err(e),
            }
            return Ok(DeliveryOutcome::Rejected { settlement_id: settlement_id.to_string(), reason });
        }
        if !self.locks.acquire(settlement_id, self.config.settlement_hold).await {
            debug!("🔄️💰️ Settlement {settlement_id} is already being processed; shedding duplicate");
            return Ok(DeliveryOutcome::InFlight);
        }
        let result = self
            .db
            .settle_order(settlement_id, notification.confirmed_amount, &notification.provider_transaction_id)
            .await;
        self.locks.release(settlement_id).await;
        let outcome = result?;
        match &outcome {
            DeliveryOutcome::Completed { order, delivered } => {
                self.call_order_completed_hook(order, delivered).await;
            },
            DeliveryOutcome::ManualReview { order, reason } => {
                self.call_manual_review_hook(order, reason).await;
            },
            _ => {},
        }
        Ok(outcome)
    }

    /// Hands out inventory for a parked order by operator action.
    pub async fn manual_deliver(&self, order_id: i64, operator: &str) -> Result<DeliveryOutcome, SettlementError> {
        let outcome = self.db.manual_deliver(order_id, operator).await?;
        if let DeliveryOutcome::Completed { order, delivered } = &outcome {
            self.call_order_completed_hook(order, delivered).await;
        }
        Ok(outcome)
    }

    /// Cancels a still-open order. A settlement that completes concurrently wins the race and this
    /// call returns an `InvalidTransition` error.
    pub async fn cancel_order(&self, order_id: i64, reason: &str) -> Result<Order, SettlementError> {
        self.db.cancel_order(order_id, reason).await
    }

    /// Records that the money for a completed order was returned to the buyer.
    pub async fn mark_refunded(&self, order_id: i64, reason: &str) -> Result<Order, SettlementError> {
        self.db.mark_refunded(order_id, reason).await
    }

    /// Cancels all overdue open orders. Usually called by the background worker rather than
    /// directly.
    pub async fn sweep_expired(&self) -> Result<Vec<Order>, SettlementError> {
        self.db.sweep_expired().await
    }

    async fn call_order_completed_hook(&self, order: &Order, delivered: &[DeliveredCard]) {
        for emitter in &self.producers.order_completed_producer {
            debug!("🔄️📦️ Notifying order completed hook subscribers");
            let event = OrderCompletedEvent::new(order.clone(), delivered.to_vec());
            emitter.publish_event(event).await;
        }
    }

    async fn call_manual_review_hook(&self, order: &Order, reason: &str) {
        for emitter in &self.producers.manual_review_producer {
            debug!("🔄️📦️ Notifying manual review hook subscribers");
            let event = OrderManualReviewEvent::new(order.clone(), reason);
            emitter.publish_event(event).await;
        }
    }

    // ----------------------------------   Queries   ----------------------------------------------

    pub async fn fetch_order_by_order_no(&self, order_no: &OrderNo) -> Result<Option<Order>, SettlementError> {
        self.db.fetch_order_by_order_no(order_no).await
    }

    pub async fn fetch_order_by_id(&self, order_id: i64) -> Result<Option<Order>, SettlementError> {
        self.db.fetch_order_by_id(order_id).await
    }

    pub async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, SettlementError> {
        self.db.search_orders(query).await
    }

    pub async fn fetch_settlement(&self, settlement_id: &str) -> Result<Option<SettlementRecord>, SettlementError> {
        self.db.fetch_settlement(settlement_id).await
    }

    pub async fn fetch_settlements_for_order(&self, order_id: i64) -> Result<Vec<SettlementRecord>, SettlementError> {
        self.db.fetch_settlements_for_order(order_id).await
    }

    pub async fn fetch_deliveries_for_order(&self, order_id: i64) -> Result<Vec<DeliveryRecord>, SettlementError> {
        self.db.fetch_deliveries_for_order(order_id).await
    }

    pub async fn fetch_product(&self, product_id: i64) -> Result<Option<Product>, SettlementError> {
        self.db.fetch_product(product_id).await
    }

    // ----------------------------------   Inventory  ---------------------------------------------

    pub async fn create_product(&self, name: &str, price: Cents) -> Result<Product, SettlementError> {
        self.db.create_product(name, price).await
    }

    pub async fn update_product_price(&self, product_id: i64, price: Cents) -> Result<Product, SettlementError> {
        self.db.update_product_price(product_id, price).await
    }

    pub async fn import_units(&self, product_id: i64, payloads: &[String]) -> Result<ImportResult, SettlementError> {
        self.db.import_units(product_id, payloads).await
    }

    pub async fn available_stock(&self, product_id: i64) -> Result<i64, SettlementError> {
        self.db.available_stock(product_id).await
    }

    pub async fn void_unit(&self, unit_id: i64, reason: &str) -> Result<InventoryUnit, SettlementError> {
        self.db.void_unit(unit_id, reason).await
    }

    pub async fn release_units_for_order(&self, order_id: i64) -> Result<Vec<InventoryUnit>, SettlementError> {
        self.db.release_units_for_order(order_id).await
    }
}
