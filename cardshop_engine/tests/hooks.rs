mod support;

use std::time::Duration;

use cardshop_common::Cents;
use cardshop_engine::{
    config::EngineConfig,
    db_types::{NewOrder, OrderStatus, PaymentNotification},
    events::{EventHandlers, EventHooks},
    MemoryLockProvider,
    SettlementApi,
};
use support::{prepare_test_env, seed_product};
use tokio::sync::mpsc;

#[tokio::test]
async fn settlement_outcomes_fire_the_matching_hooks() {
    let db = prepare_test_env().await;
    let product_id = seed_product(&db, Cents::from_whole(10), 1).await;

    let (completed_tx, mut completed_rx) = mpsc::channel(8);
    let (review_tx, mut review_rx) = mpsc::channel(8);
    let mut hooks = EventHooks::default();
    hooks.on_order_completed(move |ev| {
        let tx = completed_tx.clone();
        Box::pin(async move {
            let _ = tx.send(ev).await;
        })
    });
    hooks.on_manual_review(move |ev| {
        let tx = review_tx.clone();
        Box::pin(async move {
            let _ = tx.send(ev).await;
        })
    });
    let handlers = EventHandlers::new(8, hooks);
    let producers = handlers.producers();
    handlers.start_handlers().await;

    let api = SettlementApi::new(db, MemoryLockProvider::new(), EngineConfig::default(), producers);

    // First order takes the only unit; second one gets parked.
    let order = api.create_order(NewOrder::new(product_id, 1)).await.unwrap();
    let record = api.initiate_payment(&order.order_no).await.unwrap();
    let notification = PaymentNotification::success(&record.settlement_id, "wx-tx-301", order.total_amount);
    api.handle_notification(&notification).await.unwrap();

    let parked = api.create_order(NewOrder::new(product_id, 1)).await.unwrap();
    let record = api.initiate_payment(&parked.order_no).await.unwrap();
    let notification = PaymentNotification::success(&record.settlement_id, "wx-tx-302", parked.total_amount);
    api.handle_notification(&notification).await.unwrap();

    let completed = tokio::time::timeout(Duration::from_secs(5), completed_rx.recv())
        .await
        .expect("Timed out waiting for completion event")
        .expect("Completion channel closed");
    assert_eq!(completed.order.id, order.id);
    assert_eq!(completed.order.status, OrderStatus::Completed);
    assert_eq!(completed.delivered.len(), 1);

    let review = tokio::time::timeout(Duration::from_secs(5), review_rx.recv())
        .await
        .expect("Timed out waiting for review event")
        .expect("Review channel closed");
    assert_eq!(review.order.id, parked.id);
    assert_eq!(review.order.status, OrderStatus::ManualReview);
    assert!(review.reason.contains("insufficient stock"));
}
