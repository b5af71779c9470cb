mod support;

use cardshop_common::Cents;
use cardshop_engine::{
    config::EngineConfig,
    db_types::{NewOrder, OrderStatus, PaymentNotification},
    DeliveryOutcome,
    SettlementError,
};
use chrono::Duration;
use support::{new_api, new_api_with_config, prepare_test_env, seed_product};

#[tokio::test]
async fn expired_orders_are_swept_and_cannot_be_paid() {
    let db = prepare_test_env().await;
    let product_id = seed_product(&db, Cents::from_whole(10), 5).await;
    let config = EngineConfig { order_expiry: Duration::seconds(-1), ..EngineConfig::default() };
    let api = new_api_with_config(db, config);

    let order = api.create_order(NewOrder::new(product_id, 1)).await.unwrap();
    // The deadline has already passed, so payment initiation is refused even before the sweep runs.
    let err = api.initiate_payment(&order.order_no).await.unwrap_err();
    assert!(matches!(err, SettlementError::OrderExpired(_)));

    let expired = api.sweep_expired().await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, order.id);
    assert_eq!(expired[0].status, OrderStatus::Cancelled);
    assert_eq!(expired[0].remark.as_deref(), Some("expired"));

    // The sweep is idempotent.
    assert!(api.sweep_expired().await.unwrap().is_empty());
}

#[tokio::test]
async fn the_sweep_leaves_settled_orders_alone() {
    let db = prepare_test_env().await;
    let product_id = seed_product(&db, Cents::from_whole(3), 5).await;
    let api = new_api(db.clone());
    let expired_config = EngineConfig { order_expiry: Duration::seconds(-1), ..EngineConfig::default() };
    let expired_api = new_api_with_config(db, expired_config);

    // One order settles in time, one is overdue.
    let settled = api.create_order(NewOrder::new(product_id, 1)).await.unwrap();
    let record = api.initiate_payment(&settled.order_no).await.unwrap();
    let notification = PaymentNotification::success(&record.settlement_id, "wx-tx-100", settled.total_amount);
    api.handle_notification(&notification).await.unwrap();
    let overdue = expired_api.create_order(NewOrder::new(product_id, 1)).await.unwrap();

    let expired = api.sweep_expired().await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, overdue.id);
    let settled = api.fetch_order_by_id(settled.id).await.unwrap().unwrap();
    assert_eq!(settled.status, OrderStatus::Completed);
}

#[tokio::test]
async fn cancel_refund_and_release_follow_the_state_machine() {
    let db = prepare_test_env().await;
    let product_id = seed_product(&db, Cents::from_whole(20), 4).await;
    let api = new_api(db.clone());

    // A pending order can be cancelled.
    let order = api.create_order(NewOrder::new(product_id, 1)).await.unwrap();
    let cancelled = api.cancel_order(order.id, "out of season").await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.remark.as_deref(), Some("out of season"));

    // A completed order cannot be cancelled, only refunded.
    let order = api.create_order(NewOrder::new(product_id, 2)).await.unwrap();
    let record = api.initiate_payment(&order.order_no).await.unwrap();
    let notification = PaymentNotification::success(&record.settlement_id, "wx-tx-101", order.total_amount);
    let outcome = api.handle_notification(&notification).await.unwrap();
    assert!(matches!(outcome, DeliveryOutcome::Completed { .. }));

    let err = api.cancel_order(order.id, "too late").await.unwrap_err();
    assert!(matches!(
        err,
        SettlementError::InvalidTransition { from: OrderStatus::Completed, to: OrderStatus::Cancelled }
    ));

    // The allocation is the customer's purchase, so it cannot be clawed back into the pool.
    let err = api.release_units_for_order(order.id).await.unwrap_err();
    assert!(matches!(err, SettlementError::ReleaseForbidden(_)));

    let refunded = api.mark_refunded(order.id, "goodwill refund").await.unwrap();
    assert_eq!(refunded.status, OrderStatus::Refunded);
    // Refunding the money does not release the goods either.
    let err = api.release_units_for_order(order.id).await.unwrap_err();
    assert!(matches!(err, SettlementError::ReleaseForbidden(_)));
    assert_eq!(api.available_stock(product_id).await.unwrap(), 2);

    // Refunding twice is rejected.
    let err = api.mark_refunded(order.id, "again").await.unwrap_err();
    assert!(matches!(err, SettlementError::InvalidTransition { .. }));
}

#[tokio::test]
async fn price_changes_never_touch_existing_orders() {
    let db = prepare_test_env().await;
    let product_id = seed_product(&db, Cents::from_whole(10), 5).await;
    let api = new_api(db);

    let order = api.create_order(NewOrder::new(product_id, 2)).await.unwrap();
    assert_eq!(order.total_amount, Cents::from_whole(20));

    api.update_product_price(product_id, Cents::from_whole(99)).await.unwrap();

    // The old order keeps its snapshot and still settles at the frozen total.
    let record = api.initiate_payment(&order.order_no).await.unwrap();
    assert_eq!(record.requested_amount, Cents::from_whole(20));
    let notification = PaymentNotification::success(&record.settlement_id, "wx-tx-102", Cents::from_whole(20));
    let outcome = api.handle_notification(&notification).await.unwrap();
    assert!(matches!(outcome, DeliveryOutcome::Completed { .. }));

    // New orders see the new price.
    let order = api.create_order(NewOrder::new(product_id, 1)).await.unwrap();
    assert_eq!(order.total_amount, Cents::from_whole(99));
}

#[tokio::test]
async fn quantity_limits_are_enforced() {
    let db = prepare_test_env().await;
    let product_id = seed_product(&db, Cents::from_whole(1), 1).await;
    let config = EngineConfig { max_quantity_per_order: 10, ..EngineConfig::default() };
    let api = new_api_with_config(db, config);

    let err = api.create_order(NewOrder::new(product_id, 0)).await.unwrap_err();
    assert!(matches!(err, SettlementError::InvalidQuantity(0, 10)));
    let err = api.create_order(NewOrder::new(product_id, 11)).await.unwrap_err();
    assert!(matches!(err, SettlementError::InvalidQuantity(11, 10)));
    assert!(api.create_order(NewOrder::new(product_id, 10)).await.is_ok());

    let err = api.create_order(NewOrder::new(9999, 1)).await.unwrap_err();
    assert!(matches!(err, SettlementError::ProductNotFound(9999)));
}

#[tokio::test]
async fn duplicate_imports_are_skipped_not_fatal() {
    let db = prepare_test_env().await;
    let product_id = seed_product(&db, Cents::from_whole(2), 3).await;
    let api = new_api(db);

    // Re-importing the same payloads plus one new card only adds the new one.
    let payloads = vec![
        format!("CARD-0000-{product_id}"),
        format!("CARD-0001-{product_id}"),
        "BRAND-NEW-CARD".to_string(),
    ];
    let result = api.import_units(product_id, &payloads).await.unwrap();
    assert_eq!(result.imported, 1);
    assert_eq!(result.skipped_duplicates, 2);
    assert_eq!(api.available_stock(product_id).await.unwrap(), 4);
}
