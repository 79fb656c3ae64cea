//! # keystock-db: Database Layer for keystock
//!
//! SQLite persistence for products, units and the barcode registry, using
//! sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        keystock Data Flow                               │
//! │                                                                         │
//! │  Coordinator (resolve_product, allocate, scan, ...)                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  keystock-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ ProductRepo   │    │ 001_initial  │  │   │
//! │  │   │ SqlitePool    │◄───│ UnitRepo      │    │   _schema    │  │   │
//! │  │   │               │    │ BarcodeRepo   │    │              │  │   │
//! │  │   │               │    │ JournalRepo   │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │   SQLite: UNIQUE(brand, model) • UNIQUE(product_id, serial)     │   │
//! │  │           UNIQUE(barcode) • FK units.product_id                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Repositories never retry and never swallow constraint failures: they
//! classify them ([`DbError::UniqueViolation`], [`DbError::ForeignKeyViolation`])
//! and let the coordinator decide what a conflict means.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use keystock_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("keystock.db")).await?;
//! let product = db.products().find_by_natural_key("Acme", "X1").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::barcode::BarcodeRepository;
pub use repository::journal::{ChangeJournalRepository, JournalEntry};
pub use repository::product::{ProductRepository, ProductUnitStats};
pub use repository::unit::{DuplicateSerialGroup, OrphanedUnitRow, UnitRepository};
