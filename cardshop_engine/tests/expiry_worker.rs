mod support;

use std::time::Duration;

use cardshop_common::Cents;
use cardshop_engine::{
    config::EngineConfig,
    db_types::{NewOrder, OrderStatus},
    expiry_worker::start_expiry_worker,
};
use support::{new_api_with_config, prepare_test_env, seed_product};

#[tokio::test]
async fn the_worker_cancels_overdue_orders_in_the_background() {
    let db = prepare_test_env().await;
    let product_id = seed_product(&db, Cents::from_whole(10), 5).await;
    let config = EngineConfig { order_expiry: chrono::Duration::seconds(-1), ..EngineConfig::default() };
    let api = new_api_with_config(db.clone(), config);

    let order = api.create_order(NewOrder::new(product_id, 1)).await.unwrap();
    let worker = start_expiry_worker(db, Duration::from_millis(50));

    let mut status = OrderStatus::Pending;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        status = api.fetch_order_by_id(order.id).await.unwrap().unwrap().status;
        if status == OrderStatus::Cancelled {
            break;
        }
    }
    worker.abort();
    assert_eq!(status, OrderStatus::Cancelled);
}
