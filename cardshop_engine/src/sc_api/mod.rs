pub mod order_objects;

mod settlement_api;

pub use settlement_api::SettlementApi;
