use std::env;

use chrono::Duration;
use log::*;

const DEFAULT_ORDER_EXPIRY: Duration = Duration::minutes(15);
const DEFAULT_SETTLEMENT_HOLD_SECS: u64 = 60;
const DEFAULT_MAX_QUANTITY_PER_ORDER: i64 = 100;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Runtime configuration for the settlement engine. Loaded from `CSE_*` environment variables, with
/// sane defaults for everything except the database URL.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub database_url: String,
    /// How long a new order stays payable before the expiry sweep cancels it.
    pub order_expiry: Duration,
    /// The TTL on the idempotency hold taken while a payment notification is processed.
    pub settlement_hold: std::time::Duration,
    /// The largest quantity a single order may request.
    pub max_quantity_per_order: i64,
    /// How often the background worker sweeps for expired orders.
    pub sweep_interval: std::time::Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: String::default(),
            order_expiry: DEFAULT_ORDER_EXPIRY,
            settlement_hold: std::time::Duration::from_secs(DEFAULT_SETTLEMENT_HOLD_SECS),
            max_quantity_per_order: DEFAULT_MAX_QUANTITY_PER_ORDER,
            sweep_interval: std::time::Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }
}

impl EngineConfig {
    pub fn from_env_or_default() -> Self {
        let database_url = env::var("CSE_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ CSE_DATABASE_URL is not set. Please set it to the URL for the settlement database.");
            String::default()
        });
        let order_expiry = env::var("CSE_ORDER_EXPIRY_MINUTES")
            .map(|s| {
                s.parse::<i64>().map(Duration::minutes).unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid number of minutes for CSE_ORDER_EXPIRY_MINUTES. {e} Using the \
                         default, {} minutes, instead.",
                        DEFAULT_ORDER_EXPIRY.num_minutes()
                    );
                    DEFAULT_ORDER_EXPIRY
                })
            })
            .ok()
            .unwrap_or(DEFAULT_ORDER_EXPIRY);
        let settlement_hold = env::var("CSE_SETTLEMENT_HOLD_SECONDS")
            .map(|s| {
                s.parse::<u64>().unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid number of seconds for CSE_SETTLEMENT_HOLD_SECONDS. {e} Using the \
                         default, {DEFAULT_SETTLEMENT_HOLD_SECS}s, instead."
                    );
                    DEFAULT_SETTLEMENT_HOLD_SECS
                })
            })
            .ok()
            .map(std::time::Duration::from_secs)
            .unwrap_or_else(|| std::time::Duration::from_secs(DEFAULT_SETTLEMENT_HOLD_SECS));
        let max_quantity_per_order = env::var("CSE_MAX_QUANTITY_PER_ORDER")
            .map(|s| {
                s.parse::<i64>().unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid quantity for CSE_MAX_QUANTITY_PER_ORDER. {e} Using the default, \
                         {DEFAULT_MAX_QUANTITY_PER_ORDER}, instead."
                    );
                    DEFAULT_MAX_QUANTITY_PER_ORDER
                })
            })
            .ok()
            .unwrap_or(DEFAULT_MAX_QUANTITY_PER_ORDER);
        let sweep_interval = env::var("CSE_SWEEP_INTERVAL_SECONDS")
            .map(|s| {
                s.parse::<u64>().unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid number of seconds for CSE_SWEEP_INTERVAL_SECONDS. {e} Using the \
                         default, {DEFAULT_SWEEP_INTERVAL_SECS}s, instead."
                    );
                    DEFAULT_SWEEP_INTERVAL_SECS
                })
            })
            .ok()
            .map(std::time::Duration::from_secs)
            .unwrap_or_else(|| std::time::Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS));
        Self { database_url, order_expiry, settlement_hold, max_quantity_per_order, sweep_interval }
    }
}
