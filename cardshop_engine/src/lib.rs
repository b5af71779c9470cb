//! Cardshop Settlement Engine
//!
//! The settlement engine is the core of a shop that sells single-use digital card codes against paid
//! orders. Its job is to hand out a finite pool of inventory units **exactly once** per paying customer,
//! under concurrent requests and duplicate payment notifications, while keeping each order's visible
//! state consistent with what actually happened to the money and the inventory.
//!
//! The library is divided into three main sections:
//! 1. Database management and control ([`mod@sqlite`]). SQLite is the supported backend. You should never
//!    need to access the database directly. Instead, use the public API provided by the engine. The
//!    exception is the data types used in the database, which are defined in [`mod@db_types`] and public.
//! 2. The backend contracts ([`SettlementDatabase`] and friends). A backend implements these traits to
//!    act as the authoritative serialization point for the engine. Correctness never depends on
//!    in-process state; the database transaction is the source of truth.
//! 3. The engine public API ([`SettlementApi`]). This provides order creation, payment initiation, the
//!    idempotent settlement flow for provider notifications, manual delivery, cancellation and the
//!    expiry sweep.
//!
//! The engine also emits events when orders complete or get parked for manual review. A simple handler
//! framework ([`mod@events`]) lets you hook into these and perform custom actions.
pub mod config;
pub mod db_types;
pub mod events;
#[cfg(feature = "sqlite")]
pub mod expiry_worker;
pub mod helpers;

mod sc_api;
mod traits;

#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use sc_api::{order_objects, SettlementApi};
pub use traits::{
    DeliveryOutcome,
    ImportResult,
    InventoryManagement,
    LockProvider,
    MemoryLockProvider,
    NoopLockProvider,
    OrderManagement,
    SettlementDatabase,
    SettlementError,
};
