use log::*;
use tokio::task::JoinHandle;

use crate::{db_types::Order, traits::SettlementDatabase, SqliteDatabase};

/// Starts the expiry worker. Do not await the returned JoinHandle, as it will run indefinitely.
///
/// The worker only issues the atomic sweep statement; an order that a concurrent settlement advances
/// between ticks is skipped by the sweep itself, so the worker never needs to coordinate with the
/// settlement path.
pub fn start_expiry_worker(db: SqliteDatabase, sweep_interval: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(sweep_interval);
        info!("🕰️ Order expiry worker started");
        loop {
            timer.tick().await;
            trace!("🕰️ Running order expiry sweep");
            match db.sweep_expired().await {
                Ok(expired) => {
                    if !expired.is_empty() {
                        info!("🕰️ {} orders expired: {}", expired.len(), order_list(&expired));
                    }
                },
                Err(e) => {
                    error!("🕰️ Error running order expiry sweep: {e}");
                },
            }
        }
    })
}

fn order_list(orders: &[Order]) -> String {
    orders.iter().map(|o| format!("[{}] {}", o.id, o.order_no)).collect::<Vec<String>>().join(", ")
}
