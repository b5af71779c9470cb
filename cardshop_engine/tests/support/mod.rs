#![allow(dead_code)]
use cardshop_common::Cents;
use cardshop_engine::{
    config::EngineConfig,
    events::EventProducers,
    InventoryManagement,
    MemoryLockProvider,
    SettlementApi,
    SqliteDatabase,
};
use log::*;

pub fn random_db_url() -> String {
    format!("sqlite://{}/cardshop_test_{}.db", std::env::temp_dir().display(), rand::random::<u64>())
}

/// Creates a fresh, migrated database at a random temp path and returns a handle to it.
pub async fn prepare_test_env() -> SqliteDatabase {
    dotenvy::from_filename(".env.test").ok();
    let _ = env_logger::try_init();
    debug!("🚀️ Logging initialised");
    let url = random_db_url();
    let db = SqliteDatabase::new(&url, 5).await.expect("Error creating connection to database");
    db.run_migrations().await.expect("Error running DB migrations");
    info!("🚀️ Migrations complete for {url}");
    db
}

pub fn test_config() -> EngineConfig {
    EngineConfig::default()
}

pub fn new_api(db: SqliteDatabase) -> SettlementApi<SqliteDatabase, MemoryLockProvider> {
    new_api_with_config(db, test_config())
}

pub fn new_api_with_config(
    db: SqliteDatabase,
    config: EngineConfig,
) -> SettlementApi<SqliteDatabase, MemoryLockProvider> {
    SettlementApi::new(db, MemoryLockProvider::new(), config, EventProducers::default())
}

/// Creates a product with the given price and seeds `stock` card payloads for it. Returns the
/// product id.
pub async fn seed_product(db: &SqliteDatabase, price: Cents, stock: usize) -> i64 {
    let product = db.create_product("Test gift card", price).await.expect("Error creating product");
    let payloads = (0..stock).map(|i| format!("CARD-{:04}-{}", i, product.id)).collect::<Vec<_>>();
    let result = db.import_units(product.id, &payloads).await.expect("Error importing units");
    assert_eq!(result.imported as usize, stock);
    product.id
}
