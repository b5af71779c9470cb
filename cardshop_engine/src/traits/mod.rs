//! Backend contracts for the settlement engine.
//!
//! The module defines the behavior a storage backend must expose in order to drive the engine.
//!
//! * [`SettlementDatabase`] defines the orchestration flows: order creation, payment initiation, the
//!   single-transaction settlement, manual delivery, cancellation and the expiry sweep. Each method
//!   is a complete transaction boundary; a mid-way failure rolls back entirely.
//! * [`OrderManagement`] provides the read-only query surface for orders, settlements and deliveries.
//! * [`InventoryManagement`] covers the inventory pool: import, release, void and stock counts.
//! * [`LockProvider`] is the ephemeral idempotency hold. It is a pure optimization: the engine stays
//!   correct with [`NoopLockProvider`], because the durable settlement status is re-checked inside
//!   every settlement transaction.
mod data_objects;
mod inventory_management;
mod lock_provider;
mod order_management;
mod settlement_database;

pub use data_objects::{DeliveryOutcome, ImportResult};
pub use inventory_management::InventoryManagement;
pub use lock_provider::{LockProvider, MemoryLockProvider, NoopLockProvider};
pub use order_management::OrderManagement;
pub use settlement_database::{SettlementDatabase, SettlementError};
