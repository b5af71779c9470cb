mod support;

use std::sync::Arc;

use cardshop_common::Cents;
use cardshop_engine::{
    config::EngineConfig,
    db_types::{NewOrder, OrderStatus, PaymentNotification, SettlementStatus},
    events::EventProducers,
    DeliveryOutcome,
    NoopLockProvider,
    SettlementApi,
    SettlementError,
    SqliteDatabase,
};
use support::{new_api, prepare_test_env, seed_product};

fn noop_api(db: SqliteDatabase) -> SettlementApi<SqliteDatabase, NoopLockProvider> {
    SettlementApi::new(db, NoopLockProvider, EngineConfig::default(), EventProducers::default())
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_notifications_deliver_exactly_once_without_the_hold() {
    let db = prepare_test_env().await;
    let product_id = seed_product(&db, Cents::from_whole(10), 10).await;
    // No ephemeral hold at all: every duplicate reaches the database, and the durable settlement
    // status alone must keep this to a single delivery.
    let api = Arc::new(noop_api(db.clone()));

    let order = api.create_order(NewOrder::new(product_id, 2)).await.unwrap();
    let record = api.initiate_payment(&order.order_no).await.unwrap();
    let notification = PaymentNotification::success(&record.settlement_id, "wx-tx-201", order.total_amount);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let api = Arc::clone(&api);
        let notification = notification.clone();
        handles.push(tokio::spawn(async move { api.handle_notification(&notification).await }));
    }
    let mut completed = 0;
    let mut replayed = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            DeliveryOutcome::Completed { .. } => completed += 1,
            DeliveryOutcome::AlreadySettled { delivered, .. } => {
                assert_eq!(delivered.len(), 2);
                replayed += 1;
            },
            other => panic!("Unexpected outcome: {other:?}"),
        }
    }
    assert_eq!(completed, 1);
    assert_eq!(replayed, 7);
    assert_eq!(api.available_stock(product_id).await.unwrap(), 8);
    assert_eq!(api.fetch_deliveries_for_order(order.id).await.unwrap().len(), 2);
    let record = api.fetch_settlement(&record.settlement_id).await.unwrap().unwrap();
    assert_eq!(record.notify_count, 8);
}

#[tokio::test(flavor = "multi_thread")]
async fn the_hold_sheds_concurrent_duplicates() {
    let db = prepare_test_env().await;
    let product_id = seed_product(&db, Cents::from_whole(10), 10).await;
    let api = Arc::new(new_api(db.clone()));

    let order = api.create_order(NewOrder::new(product_id, 1)).await.unwrap();
    let record = api.initiate_payment(&order.order_no).await.unwrap();
    let notification = PaymentNotification::success(&record.settlement_id, "wx-tx-202", order.total_amount);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let api = Arc::clone(&api);
        let notification = notification.clone();
        handles.push(tokio::spawn(async move { api.handle_notification(&notification).await }));
    }
    let mut completed = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            DeliveryOutcome::Completed { .. } => completed += 1,
            DeliveryOutcome::AlreadySettled { .. } | DeliveryOutcome::InFlight => {},
            other => panic!("Unexpected outcome: {other:?}"),
        }
    }
    // However the race shakes out, exactly one call performs the delivery.
    assert_eq!(completed, 1);
    assert_eq!(api.fetch_deliveries_for_order(order.id).await.unwrap().len(), 1);
    assert_eq!(api.available_stock(product_id).await.unwrap(), 9);
}

#[tokio::test(flavor = "multi_thread")]
async fn three_units_two_orders_of_two_never_oversell() {
    let db = prepare_test_env().await;
    let product_id = seed_product(&db, Cents::from_whole(10), 3).await;
    let api = Arc::new(noop_api(db.clone()));

    let order_a = api.create_order(NewOrder::new(product_id, 2)).await.unwrap();
    let order_b = api.create_order(NewOrder::new(product_id, 2)).await.unwrap();
    let record_a = api.initiate_payment(&order_a.order_no).await.unwrap();
    let record_b = api.initiate_payment(&order_b.order_no).await.unwrap();
    let notify_a = PaymentNotification::success(&record_a.settlement_id, "wx-tx-203", order_a.total_amount);
    let notify_b = PaymentNotification::success(&record_b.settlement_id, "wx-tx-204", order_b.total_amount);

    let api_a = Arc::clone(&api);
    let api_b = Arc::clone(&api);
    let (res_a, res_b) = tokio::join!(
        tokio::spawn(async move { api_a.handle_notification(&notify_a).await }),
        tokio::spawn(async move { api_b.handle_notification(&notify_b).await }),
    );
    let outcomes = [res_a.unwrap().unwrap(), res_b.unwrap().unwrap()];
    let winners = outcomes.iter().filter(|o| matches!(o, DeliveryOutcome::Completed { .. })).count();
    let parked = outcomes.iter().filter(|o| matches!(o, DeliveryOutcome::ManualReview { .. })).count();
    // One order gets its two units, the other gets none: never a partial claim of the odd unit out.
    assert_eq!(winners, 1);
    assert_eq!(parked, 1);
    assert_eq!(api.available_stock(product_id).await.unwrap(), 1);
    let delivered_a = api.fetch_deliveries_for_order(order_a.id).await.unwrap().len();
    let delivered_b = api.fetch_deliveries_for_order(order_b.id).await.unwrap().len();
    assert_eq!(delivered_a + delivered_b, 2);
    assert!(delivered_a == 0 || delivered_b == 0);

    // Both payments are accounted for, whoever got the card.
    for id in [&record_a.settlement_id, &record_b.settlement_id] {
        let record = api.fetch_settlement(id).await.unwrap().unwrap();
        assert_eq!(record.status, SettlementStatus::Settled);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_races_settle_consistently() {
    let db = prepare_test_env().await;
    let product_id = seed_product(&db, Cents::from_whole(10), 5).await;
    let api = Arc::new(noop_api(db.clone()));

    let order = api.create_order(NewOrder::new(product_id, 1)).await.unwrap();
    let record = api.initiate_payment(&order.order_no).await.unwrap();
    let notification = PaymentNotification::success(&record.settlement_id, "wx-tx-205", order.total_amount);

    let api_settle = Arc::clone(&api);
    let api_cancel = Arc::clone(&api);
    let order_id = order.id;
    let (settle, cancel) = tokio::join!(
        tokio::spawn(async move { api_settle.handle_notification(&notification).await }),
        tokio::spawn(async move { api_cancel.cancel_order(order_id, "admin cancel").await }),
    );
    let settle = settle.unwrap().unwrap();
    let cancel = cancel.unwrap();

    let order = api.fetch_order_by_id(order.id).await.unwrap().unwrap();
    match (&settle, &cancel) {
        // The settlement won: the cancel must have been refused.
        (DeliveryOutcome::Completed { .. }, Err(SettlementError::InvalidTransition { .. })) => {
            assert_eq!(order.status, OrderStatus::Completed);
            assert_eq!(api.fetch_deliveries_for_order(order.id).await.unwrap().len(), 1);
        },
        // The cancel won: the payment is flagged for refund and nothing was delivered.
        (DeliveryOutcome::CancelledWithPayment { .. }, Ok(_)) => {
            assert_eq!(order.status, OrderStatus::Cancelled);
            assert!(api.fetch_deliveries_for_order(order.id).await.unwrap().is_empty());
            assert_eq!(api.available_stock(product_id).await.unwrap(), 5);
        },
        (s, c) => panic!("Inconsistent race outcome: settle={s:?}, cancel={c:?}"),
    }
}
