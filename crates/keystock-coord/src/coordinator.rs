//! # Coordinator
//!
//! The single entry point both write paths call. Wires the components to
//! one database and one notifier, and runs every operation under its
//! caller's deadline.
//!
//! ## Component Wiring
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            Coordinator                                  │
//! │                                                                         │
//! │   supplier path ─┐                                                      │
//! │                  ├──► ctx.run(deadline) ──► EntityResolver              │
//! │  inventory path ─┘                              │      │                │
//! │                                                 ▼      ▼                │
//! │                                  BarcodeRegistry   StockMaintainer      │
//! │                                          │              │               │
//! │   scheduler / CLI ──► IntegrityAuditor ──┤              │               │
//! │                                          ▼              ▼               │
//! │                                  ChangeNotifier ──► subscribers         │
//! │                                          │                              │
//! │                                      Database (SQLite, shared pool)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! let coordinator = Coordinator::connect(&CoordinatorConfig::load_or_default(None)).await?;
//! let ctx = coordinator.context(Source::Supplier);
//!
//! let (product, _) = coordinator
//!     .resolve_product(&ctx, "Acme", "X1", &ProductAttrs::serialized())
//!     .await?;
//! let (unit, created) = coordinator
//!     .resolve_unit(&ctx, &product.id, "SN-0001", &UnitAttrs::default())
//!     .await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use keystock_core::{
    Authority, BarcodeEntry, Ean13Symbology, EntityType, IntegrityReport, Product, ProductAttrs,
    RepairSummary, Source, Unit, UnitAttrs, UnitStatus,
};
use keystock_db::Database;

use crate::audit::IntegrityAuditor;
use crate::config::CoordinatorConfig;
use crate::context::OpContext;
use crate::error::CoordResult;
use crate::events::{ChangeHandler, ChangeNotifier, Subscription};
use crate::registry::BarcodeRegistry;
use crate::resolver::{EntityResolver, IntakeReport, ProductSubmission};
use crate::stock::{DeletionSummary, StockMaintainer};

#[derive(Clone)]
pub struct Coordinator {
    db: Database,
    default_timeout: Duration,
    notifier: ChangeNotifier,
    registry: BarcodeRegistry,
    stock: StockMaintainer,
    resolver: EntityResolver,
    auditor: IntegrityAuditor,
}

impl Coordinator {
    /// Builds a coordinator over an open database.
    pub fn new(db: Database, config: &CoordinatorConfig) -> Self {
        let notifier = ChangeNotifier::new();
        let registry = BarcodeRegistry::new(
            db.clone(),
            Arc::new(Ean13Symbology::new(config.barcode.prefix)),
            config.barcode.max_attempts,
            notifier.clone(),
        );
        let stock = StockMaintainer::new(db.clone(), registry.clone(), notifier.clone());
        let resolver = EntityResolver::new(db.clone(), registry.clone(), stock.clone(), notifier.clone());
        let auditor = IntegrityAuditor::new(db.clone(), registry.clone(), notifier.clone());

        Coordinator {
            db,
            default_timeout: config.operations.default_timeout(),
            notifier,
            registry,
            stock,
            resolver,
            auditor,
        }
    }

    /// Validates `config`, opens its database and builds a coordinator.
    pub async fn connect(config: &CoordinatorConfig) -> CoordResult<Self> {
        config.validate()?;
        let db = Database::new(config.db_config()).await?;
        info!(path = %config.database.path, "Coordinator connected");
        Ok(Self::new(db, config))
    }

    /// A context for `source` with the configured default deadline.
    pub fn context(&self, source: Source) -> OpContext {
        OpContext::new(source, self.default_timeout)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    // =========================================================================
    // Entity Resolution
    // =========================================================================

    pub async fn resolve_product(
        &self,
        ctx: &OpContext,
        brand: &str,
        model: &str,
        attrs: &ProductAttrs,
    ) -> CoordResult<(Product, bool)> {
        ctx.run(self.resolver.resolve_product(ctx, brand, model, attrs)).await
    }

    pub async fn resolve_product_untyped(
        &self,
        ctx: &OpContext,
        brand: &str,
        model: &str,
        attrs: serde_json::Value,
    ) -> CoordResult<(Product, bool)> {
        ctx.run(self.resolver.resolve_product_untyped(ctx, brand, model, attrs))
            .await
    }

    pub async fn resolve_unit(
        &self,
        ctx: &OpContext,
        product_id: &str,
        serial_number: &str,
        attrs: &UnitAttrs,
    ) -> CoordResult<(Unit, bool)> {
        ctx.run(self.resolver.resolve_unit(ctx, product_id, serial_number, attrs))
            .await
    }

    pub async fn intake(&self, ctx: &OpContext, submission: &ProductSubmission) -> CoordResult<IntakeReport> {
        ctx.run(self.resolver.intake(ctx, submission)).await
    }

    // =========================================================================
    // Stock and Status
    // =========================================================================

    pub async fn reconcile_stock(&self, ctx: &OpContext, product_id: &str) -> CoordResult<i64> {
        ctx.run(self.stock.reconcile_stock(ctx, product_id)).await
    }

    pub async fn transition_unit(
        &self,
        ctx: &OpContext,
        unit_id: &str,
        to: UnitStatus,
        authority: Authority,
    ) -> CoordResult<Unit> {
        ctx.run(self.stock.transition_unit(ctx, unit_id, to, authority))
            .await
    }

    pub async fn set_stock(&self, ctx: &OpContext, product_id: &str, stock: i64) -> CoordResult<Product> {
        ctx.run(self.stock.set_stock(ctx, product_id, stock)).await
    }

    pub async fn delete_unit(&self, ctx: &OpContext, unit_id: &str) -> CoordResult<()> {
        ctx.run(self.stock.delete_unit(ctx, unit_id)).await
    }

    pub async fn delete_product(&self, ctx: &OpContext, product_id: &str) -> CoordResult<DeletionSummary> {
        ctx.run(self.stock.delete_product(ctx, product_id)).await
    }

    // =========================================================================
    // Barcodes
    // =========================================================================

    pub async fn allocate(
        &self,
        ctx: &OpContext,
        entity_type: EntityType,
        entity_id: &str,
        candidate: Option<&str>,
    ) -> CoordResult<String> {
        ctx.run(self.registry.allocate(ctx, entity_type, entity_id, candidate))
            .await
    }

    pub async fn lookup(&self, ctx: &OpContext, barcode: &str) -> CoordResult<Option<BarcodeEntry>> {
        ctx.run(self.registry.lookup(barcode)).await
    }

    // =========================================================================
    // Events
    // =========================================================================

    pub fn subscribe<H>(&self, handler: H) -> Subscription
    where
        H: ChangeHandler + 'static,
    {
        self.notifier.subscribe(handler)
    }

    // =========================================================================
    // Integrity
    // =========================================================================

    pub async fn scan(&self, ctx: &OpContext) -> CoordResult<IntegrityReport> {
        ctx.run(self.auditor.scan(ctx)).await
    }

    pub async fn repair(&self, ctx: &OpContext, report: &IntegrityReport) -> CoordResult<RepairSummary> {
        ctx.run(self.auditor.repair(ctx, report)).await
    }

    /// Stops event delivery and closes the pool.
    pub async fn shutdown(&self) {
        self.notifier.shutdown();
        self.db.close().await;
        info!("Coordinator shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoordError;
    use crate::events::{ChangeEvent, ChangeKind, HandlerError};
    use std::sync::Mutex;

    async fn coordinator() -> Coordinator {
        let mut config = CoordinatorConfig::default();
        config.database.path = ":memory:".to_string();
        Coordinator::connect(&config).await.unwrap()
    }

    #[tokio::test]
    async fn test_events_follow_creation_order() {
        let coordinator = coordinator().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _subscription = coordinator.subscribe(move |event: &ChangeEvent| -> Result<(), HandlerError> {
            sink.lock().unwrap().push((event.kind, event.source));
            Ok(())
        });

        let ctx = coordinator.context(Source::Supplier);
        let (product, _) = coordinator
            .resolve_product(&ctx, "Acme", "X1", &ProductAttrs::serialized())
            .await
            .unwrap();
        coordinator
            .resolve_unit(&ctx, &product.id, "SN1", &UnitAttrs::default())
            .await
            .unwrap();

        let kinds: Vec<ChangeKind> = seen.lock().unwrap().iter().map(|(kind, _)| *kind).collect();
        assert_eq!(
            kinds,
            vec![
                ChangeKind::ProductCreated,
                ChangeKind::UnitCreated,
                ChangeKind::BarcodeAllocated,
                ChangeKind::StockUpdated,
            ]
        );
        assert!(seen.lock().unwrap().iter().all(|(_, source)| *source == Source::Supplier));
    }

    #[tokio::test]
    async fn test_expired_context_fails_fast() {
        let coordinator = coordinator().await;
        let ctx = OpContext::new(Source::Inventory, Duration::ZERO);

        let err = coordinator
            .resolve_product(&ctx, "Acme", "X1", &ProductAttrs::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CoordError::DeadlineExceeded(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_lookup_after_allocate() {
        let coordinator = coordinator().await;
        let ctx = coordinator.context(Source::Inventory);
        let (product, _) = coordinator
            .resolve_product(&ctx, "Acme", "Cable", &ProductAttrs::default())
            .await
            .unwrap();

        let barcode = coordinator
            .allocate(&ctx, EntityType::Product, &product.id, None)
            .await
            .unwrap();
        assert_eq!(Some(&barcode), product.barcode.as_ref());

        let entry = coordinator.lookup(&ctx, &barcode).await.unwrap().unwrap();
        assert_eq!(entry.entity_type, EntityType::Product);
        assert_eq!(entry.entity_id, product.id);
        assert!(coordinator.lookup(&ctx, "0000000000000").await.unwrap().is_none());
    }
}
