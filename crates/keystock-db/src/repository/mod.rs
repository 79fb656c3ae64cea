//! # Repository Module
//!
//! Database repository implementations for keystock.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repositories and their constraints                   │
//! │                                                                         │
//! │  Coordinator                                                           │
//! │       │                                                                 │
//! │       │  db.products().insert(&product)                                │
//! │       ▼                                                                 │
//! │  ProductRepository ── UNIQUE(brand, model)                             │
//! │  UnitRepository ───── UNIQUE(product_id, serial_number), FK product    │
//! │  BarcodeRepository ── PK barcode, UNIQUE(entity_type, entity_id)       │
//! │  ChangeJournalRepository ── trigger-written change sequence            │
//! │       │                                                                 │
//! │       │  SQL Query                                                      │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! │  Inserts never check-then-write: they write and let the constraint     │
//! │  answer. Callers classify the resulting DbError.                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`ProductRepository`](product::ProductRepository) - Products, natural-key lookup, stock recomputation
//! - [`UnitRepository`](unit::UnitRepository) - Units, status compare-and-set, drift queries
//! - [`BarcodeRepository`](barcode::BarcodeRepository) - Global barcode registry
//! - [`ChangeJournalRepository`](journal::ChangeJournalRepository) - Change sequence for the audit scheduler

pub mod barcode;
pub mod journal;
pub mod product;
pub mod unit;

use uuid::Uuid;

/// Generates a new entity id (UUID v4).
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}
