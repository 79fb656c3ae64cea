//! Shared fixtures for the coordinator integration tests.

#![allow(dead_code)]

use std::path::PathBuf;

use chrono::Utc;
use keystock_core::{Product, ProductAttrs, Unit, UnitAttrs};
use keystock_coord::{Coordinator, CoordinatorConfig};
use keystock_db::repository::generate_id;
use keystock_db::Database;

/// A database file removed when dropped.
pub struct TempDb {
    pub path: PathBuf,
}

impl TempDb {
    pub fn new() -> Self {
        let path = std::env::temp_dir().join(format!("keystock-test-{}.db", uuid::Uuid::new_v4()));
        TempDb { path }
    }

    pub fn config(&self) -> CoordinatorConfig {
        let mut config = CoordinatorConfig::default();
        config.database.path = self.path.display().to_string();
        config.database.max_connections = 4;
        config.operations.default_timeout_ms = 30_000;
        config
    }

    /// A coordinator on this file. Two of them model the two write paths.
    pub async fn coordinator(&self) -> Coordinator {
        Coordinator::connect(&self.config()).await.unwrap()
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut path = self.path.clone().into_os_string();
            path.push(suffix);
            let _ = std::fs::remove_file(path);
        }
    }
}

/// An in-memory coordinator for single-path tests.
pub async fn memory_coordinator() -> Coordinator {
    let mut config = CoordinatorConfig::default();
    config.database.path = ":memory:".to_string();
    Coordinator::connect(&config).await.unwrap()
}

/// Inserts a product directly, bypassing the coordinator.
pub async fn raw_product(db: &Database, model: &str, attrs: &ProductAttrs) -> Product {
    let product = Product::from_attrs(generate_id(), "Acme", model, attrs, Utc::now());
    db.products().insert(&product).await.unwrap();
    product
}

/// Inserts a unit directly, bypassing the coordinator.
pub async fn raw_unit(db: &Database, product_id: &str, serial: &str) -> Unit {
    let unit = Unit::from_attrs(generate_id(), product_id, serial, &UnitAttrs::default(), Utc::now());
    db.units().insert(&unit).await.unwrap();
    unit
}

/// Stored stock and current available-unit count for a product.
pub async fn stock_and_available(db: &Database, product_id: &str) -> (i64, i64) {
    let product = db.products().get_by_id(product_id).await.unwrap().unwrap();
    let available = db.units().count_available(product_id).await.unwrap();
    (product.stock, available)
}
