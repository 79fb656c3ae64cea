//! # keystock-coord: Product/Unit Consistency Coordinator
//!
//! Keeps the canonical "product + serialized units" model correct while two
//! independent write paths (supplier acquisition and inventory management)
//! create, change and delete the same entities concurrently.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Coordinator (facade)                             │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │  EntityResolver                                                  │  │
//! │  │  resolve_product / resolve_unit / intake                         │  │
//! │  │  insert-first, UNIQUE violation = lost race, re-read the winner  │  │
//! │  └──────────────┬──────────────────────────────┬────────────────────┘  │
//! │                 ▼                              ▼                        │
//! │  ┌────────────────────────┐      ┌──────────────────────────────────┐  │
//! │  │  BarcodeRegistry       │      │  StockMaintainer                 │  │
//! │  │  allocate / lookup /   │      │  reconcile_stock (recompute)     │  │
//! │  │  release               │      │  transition_unit (CAS) /         │  │
//! │  │  one value, one entity │      │  set_stock / delete_*            │  │
//! │  └───────────┬────────────┘      └────────────────┬─────────────────┘  │
//! │              └──────────────┬─────────────────────┘                    │
//! │                             ▼                                           │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │  ChangeNotifier: in-process, synchronous, at-most-once           │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! │  ┌──────────────────────────────┐  ┌──────────────────────────────┐    │
//! │  │  IntegrityAuditor            │  │  AuditScheduler              │    │
//! │  │  scan / repair               │◄─│  interval + change journal   │    │
//! │  └──────────────────────────────┘  └──────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`coordinator`] - `Coordinator` facade, the only entry point callers use
//! - [`resolver`] - Idempotent product/unit creation and batch intake
//! - [`stock`] - Derived stock, unit status transitions, deletion
//! - [`registry`] - Globally unique barcode allocation
//! - [`events`] - Change notifier and event types
//! - [`audit`] - Integrity scan and repair
//! - [`scheduler`] - Periodic audit task
//! - [`context`] - Per-call source and deadline
//! - [`config`] - Coordinator configuration (TOML + environment)
//! - [`error`] - Coordinator error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use keystock_coord::{Coordinator, CoordinatorConfig};
//! use keystock_core::{ProductAttrs, Source, UnitAttrs};
//!
//! let config = CoordinatorConfig::load_or_default(None);
//! let coordinator = Coordinator::connect(&config).await?;
//!
//! let ctx = coordinator.context(Source::Supplier);
//! let (product, _) = coordinator
//!     .resolve_product(&ctx, "Acme", "X1", &ProductAttrs::serialized())
//!     .await?;
//! coordinator
//!     .resolve_unit(&ctx, &product.id, "SN-0001", &UnitAttrs::default())
//!     .await?;
//!
//! let report = coordinator.scan(&ctx).await?;
//! println!("Findings: {}", report.findings.len());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod audit;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod registry;
pub mod resolver;
pub mod scheduler;
pub mod stock;

// =============================================================================
// Re-exports
// =============================================================================

pub use audit::IntegrityAuditor;
pub use config::CoordinatorConfig;
pub use context::OpContext;
pub use coordinator::Coordinator;
pub use error::{CoordError, CoordResult};
pub use events::{
    ChangeEvent, ChangeHandler, ChangeKind, ChangeNotifier, DeliveryReport, EventMetadata,
    HandlerError, Subscription,
};
pub use registry::BarcodeRegistry;
pub use resolver::{EntityResolver, IntakeReport, ProductSubmission, UnitFailure, UnitSubmission};
pub use scheduler::{AuditRun, AuditScheduler, AuditSchedulerHandle};
pub use stock::{DeletionSummary, StockMaintainer};
