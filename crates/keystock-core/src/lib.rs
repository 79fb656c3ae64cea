//! # keystock-core: Pure Domain Logic for the Product/Unit Coordinator
//!
//! This crate holds the canonical "product + serialized units" model and every
//! rule that can be checked without touching storage.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        keystock Architecture                            │
//! │                                                                         │
//! │   Supplier acquisition path          Inventory management path          │
//! │              │                                   │                      │
//! │              └───────────────┬───────────────────┘                      │
//! │                              ▼                                          │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 keystock-coord (Coordinator)                     │   │
//! │  │   Resolver • Barcode Registry • Stock • Notifier • Auditor       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ keystock-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   money   │  │ symbology │  │ integrity │  │   │
//! │  │   │  Product  │  │   Money   │  │  EAN-13   │  │  Finding  │  │   │
//! │  │   │   Unit    │  │  Pricing  │  │ encoder   │  │  Report   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                keystock-db (Database Layer)                     │   │
//! │  │        SQLite, unique-constrained inserts, migrations           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Product, Unit, unit status state machine, barcode entries
//! - [`money`] - Integer money and the price/min/max pricing triple
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation run before any write
//! - [`symbology`] - Pluggable barcode encoders
//! - [`integrity`] - Findings and reports produced by the auditor
//!
//! ## Example Usage
//!
//! ```rust
//! use keystock_core::{Authority, UnitStatus};
//!
//! // Units start available and may be sold directly
//! assert!(UnitStatus::Available.can_transition_to(UnitStatus::Sold, Authority::Operational));
//!
//! // Sold is terminal
//! assert!(!UnitStatus::Sold.can_transition_to(UnitStatus::Available, Authority::Administrative));
//!
//! // Only available units count toward stock
//! assert!(UnitStatus::Available.counts_toward_stock());
//! assert!(!UnitStatus::Reserved.counts_toward_stock());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod integrity;
pub mod money;
pub mod symbology;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, ValidationError};
pub use integrity::{Finding, FindingKind, IntegrityReport, RepairFailure, RepairSummary};
pub use money::{Money, Pricing};
pub use symbology::{Ean13Symbology, Symbology};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum units accepted in a single intake submission.
///
/// ## Business Reason
/// Supplier deliveries are entered per shipment; a batch larger than this is
/// almost always a malformed import rather than a real delivery.
pub const MAX_BATCH_UNITS: usize = 500;

/// Upper bound for a unit's battery level (percent).
pub const MAX_BATTERY_LEVEL: i32 = 100;

/// Metadata keys that may be persisted on products and registry entries.
///
/// Anything outside this list is rejected instead of stored blindly.
pub const METADATA_KEYS: &[&str] = &[
    "condition",
    "warranty",
    "origin",
    "notes",
    "import_batch",
    "allocated_by",
];
