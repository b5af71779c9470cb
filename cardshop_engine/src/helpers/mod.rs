mod id_generation;

pub use id_generation::{generate_order_no, generate_settlement_id};
