//! # Stock Invariant Maintainer
//!
//! Keeps `product.stock == count(units, status = available)` for serialized
//! products, and owns every write that can change that count: status
//! transitions and administrative deletions.
//!
//! ## Recompute, Never Increment
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  UPDATE products                                                        │
//! │  SET stock = (SELECT COUNT(*) FROM units                                │
//! │               WHERE product_id = ? AND status = 'available')            │
//! │  WHERE id = ? AND has_serialized_units = 1 AND stock != <same count>    │
//! │                                                                         │
//! │  • one statement: no read-modify-write window                          │
//! │  • idempotent: safe to call redundantly, after partial failures,       │
//! │    or from the auditor                                                  │
//! │  • non-serialized products: no-op, the write path owns the number      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use keystock_core::validation::validate_stock;
use keystock_core::{Authority, CoreError, EntityType, Product, Unit, UnitStatus};
use keystock_db::{Database, DbError};

use crate::context::OpContext;
use crate::error::{CoordError, CoordResult};
use crate::events::{ChangeEvent, ChangeKind, ChangeNotifier};
use crate::registry::BarcodeRegistry;

/// What an administrative product deletion removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionSummary {
    pub units_deleted: u64,
    pub barcodes_released: u64,
}

struct UnitRemoval {
    deleted: bool,
    barcode_released: bool,
}

#[derive(Clone)]
pub struct StockMaintainer {
    db: Database,
    registry: BarcodeRegistry,
    notifier: ChangeNotifier,
}

impl StockMaintainer {
    pub fn new(db: Database, registry: BarcodeRegistry, notifier: ChangeNotifier) -> Self {
        StockMaintainer {
            db,
            registry,
            notifier,
        }
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Recomputes a serialized product's stock and returns the stored value.
    ///
    /// Publishes `stock_updated` only when the stored figure changed.
    pub async fn reconcile_stock(&self, ctx: &OpContext, product_id: &str) -> CoordResult<i64> {
        let product = self.require_product(product_id).await?;
        if !product.has_serialized_units {
            debug!(product_id, stock = product.stock, "Direct stock, nothing to reconcile");
            return Ok(product.stock);
        }

        match self.db.products().recompute_stock(product_id).await? {
            Some(stock) => {
                info!(product_id, from = product.stock, to = stock, source = %ctx.source, "Stock reconciled");
                self.notifier.publish(
                    &ChangeEvent::new(ChangeKind::StockUpdated, ctx.source, product_id).stock(stock),
                );
                Ok(stock)
            }
            None => {
                // Unchanged, or the flag flipped underneath us
                let current = self.require_product(product_id).await?;
                Ok(current.stock)
            }
        }
    }

    // =========================================================================
    // Status Transitions
    // =========================================================================

    /// Moves a unit to `to`, then reconciles its product's stock.
    ///
    /// The write is a compare-and-set on the status the unit was read in. If
    /// another caller moved it first, the unit is re-read once and the
    /// transition re-checked from its new state.
    ///
    /// ## Errors
    /// * `InvalidTransition` - edge missing, or needs administrative authority
    /// * `ConcurrentModification` - the unit moved again during the retry
    pub async fn transition_unit(
        &self,
        ctx: &OpContext,
        unit_id: &str,
        to: UnitStatus,
        authority: Authority,
    ) -> CoordResult<Unit> {
        let mut unit = self.require_unit(unit_id).await?;

        let mut attempt = 0;
        let from = loop {
            let from = unit.status;
            from.check_transition(to, authority)?;

            if self.db.units().compare_and_set_status(unit_id, from, to).await? {
                break from;
            }

            unit = self.require_unit(unit_id).await?;
            attempt += 1;
            if attempt > 1 {
                return Err(CoordError::ConcurrentModification {
                    unit_id: unit_id.to_string(),
                    observed: unit.status,
                });
            }
            debug!(unit_id, expected = %from, observed = %unit.status, "Status changed concurrently, retrying");
        };

        unit.status = to;
        info!(unit_id, %from, %to, source = %ctx.source, "Unit status changed");
        self.notifier.publish(
            &ChangeEvent::new(ChangeKind::UnitStatusChanged, ctx.source, unit_id)
                .product(&unit.product_id)
                .transition(from, to),
        );

        match self.reconcile_stock(ctx, &unit.product_id).await {
            // Orphaned unit: nothing to reconcile
            Ok(_) | Err(CoordError::NotFound { .. }) => Ok(unit),
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Direct Stock
    // =========================================================================

    /// Writes a caller-supplied stock level on a non-serialized product.
    pub async fn set_stock(&self, ctx: &OpContext, product_id: &str, stock: i64) -> CoordResult<Product> {
        validate_stock(stock)?;

        let mut product = self.require_product(product_id).await?;
        if product.has_serialized_units {
            return Err(CoreError::DerivedStock {
                product_id: product_id.to_string(),
            }
            .into());
        }

        if !self.db.products().set_direct_stock(product_id, stock).await? {
            // Deleted or flipped to serialized since the read
            let current = self.require_product(product_id).await?;
            if current.has_serialized_units {
                return Err(CoreError::DerivedStock {
                    product_id: product_id.to_string(),
                }
                .into());
            }
            return Err(CoordError::Fatal(format!(
                "stock write on product {} matched no row",
                product_id
            )));
        }

        info!(product_id, from = product.stock, to = stock, source = %ctx.source, "Direct stock set");
        product.stock = stock;
        self.notifier.publish(
            &ChangeEvent::new(ChangeKind::StockUpdated, ctx.source, product_id).stock(stock),
        );
        Ok(product)
    }

    // =========================================================================
    // Administrative Deletion
    // =========================================================================

    /// Deletes a unit, releases its barcode and reconciles its product.
    pub async fn delete_unit(&self, ctx: &OpContext, unit_id: &str) -> CoordResult<()> {
        let unit = self.require_unit(unit_id).await?;
        self.remove_unit(ctx, &unit).await?;

        match self.reconcile_stock(ctx, &unit.product_id).await {
            Ok(_) | Err(CoordError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Deletes a product and everything it owns: units first, then the
    /// product, releasing every barcode on the way.
    ///
    /// A unit created concurrently makes the product delete fail the foreign
    /// key check; the unit sweep is repeated once before giving up.
    pub async fn delete_product(&self, ctx: &OpContext, product_id: &str) -> CoordResult<DeletionSummary> {
        self.require_product(product_id).await?;
        let mut summary = DeletionSummary::default();

        let mut retried = false;
        loop {
            for unit in self.db.units().list_for_product(product_id).await? {
                let removal = self.remove_unit(ctx, &unit).await?;
                if removal.deleted {
                    summary.units_deleted += 1;
                }
                if removal.barcode_released {
                    summary.barcodes_released += 1;
                }
            }

            match self.db.products().delete(product_id).await {
                Ok(()) => break,
                Err(e) if e.is_foreign_key_violation() && !retried => {
                    warn!(product_id, "Units appeared during deletion, sweeping again");
                    retried = true;
                }
                Err(e) => return Err(e.into()),
            }
        }

        if self
            .registry
            .release(ctx, EntityType::Product, product_id)
            .await?
            .is_some()
        {
            summary.barcodes_released += 1;
        }

        info!(
            product_id,
            units = summary.units_deleted,
            barcodes = summary.barcodes_released,
            source = %ctx.source,
            "Product deleted"
        );
        self.notifier
            .publish(&ChangeEvent::new(ChangeKind::ProductDeleted, ctx.source, product_id));
        Ok(summary)
    }

    /// Deletes one unit row and its registry entry.
    ///
    /// A row that is already gone still has its registry entry released, but
    /// no `unit_deleted` event is published for it.
    async fn remove_unit(&self, ctx: &OpContext, unit: &Unit) -> CoordResult<UnitRemoval> {
        let deleted = match self.db.units().delete(&unit.id).await {
            Ok(()) => true,
            Err(DbError::NotFound { .. }) => {
                debug!(unit_id = %unit.id, "Unit already deleted, releasing leftovers");
                false
            }
            Err(e) => return Err(e.into()),
        };

        let released = self.registry.release(ctx, EntityType::Unit, &unit.id).await?;

        if deleted {
            info!(unit_id = %unit.id, product_id = %unit.product_id, source = %ctx.source, "Unit deleted");
            self.notifier.publish(
                &ChangeEvent::new(ChangeKind::UnitDeleted, ctx.source, &unit.id).product(&unit.product_id),
            );
        }
        Ok(UnitRemoval {
            deleted,
            barcode_released: released.is_some(),
        })
    }

    async fn require_product(&self, product_id: &str) -> CoordResult<Product> {
        self.db
            .products()
            .get_by_id(product_id)
            .await?
            .ok_or_else(|| CoordError::not_found("Product", product_id))
    }

    async fn require_unit(&self, unit_id: &str) -> CoordResult<Unit> {
        self.db
            .units()
            .get_by_id(unit_id)
            .await?
            .ok_or_else(|| CoordError::not_found("Unit", unit_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use keystock_core::{Ean13Symbology, ProductAttrs, Source, UnitAttrs};
    use keystock_db::repository::generate_id;
    use keystock_db::DbConfig;
    use crate::events::HandlerError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn ctx() -> OpContext {
        OpContext::new(Source::Inventory, Duration::from_secs(5))
    }

    async fn setup() -> (Database, StockMaintainer) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let notifier = ChangeNotifier::new();
        let registry = BarcodeRegistry::new(
            db.clone(),
            Arc::new(Ean13Symbology::default()),
            8,
            notifier.clone(),
        );
        let stock = StockMaintainer::new(db.clone(), registry, notifier);
        (db, stock)
    }

    async fn serialized_with_units(db: &Database, count: usize) -> (Product, Vec<Unit>) {
        let product = Product::from_attrs(generate_id(), "Acme", "X1", &ProductAttrs::serialized(), Utc::now());
        db.products().insert(&product).await.unwrap();

        let mut units = Vec::new();
        for i in 0..count {
            let unit = Unit::from_attrs(
                generate_id(),
                &product.id,
                &format!("SN{}", i),
                &UnitAttrs::default(),
                Utc::now(),
            );
            db.units().insert(&unit).await.unwrap();
            units.push(unit);
        }
        (product, units)
    }

    #[tokio::test]
    async fn test_reconcile_counts_available_units() {
        let (db, stock) = setup().await;
        let (product, units) = serialized_with_units(&db, 3).await;

        assert_eq!(stock.reconcile_stock(&ctx(), &product.id).await.unwrap(), 3);
        // Idempotent
        assert_eq!(stock.reconcile_stock(&ctx(), &product.id).await.unwrap(), 3);

        stock
            .transition_unit(&ctx(), &units[0].id, UnitStatus::Reserved, Authority::Operational)
            .await
            .unwrap();
        let stored = db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(stored.stock, 2);
    }

    #[tokio::test]
    async fn test_reconcile_leaves_direct_stock_alone() {
        let (db, stock) = setup().await;
        let attrs = ProductAttrs {
            stock: 40,
            ..ProductAttrs::default()
        };
        let product = Product::from_attrs(generate_id(), "Acme", "Cable", &attrs, Utc::now());
        db.products().insert(&product).await.unwrap();

        assert_eq!(stock.reconcile_stock(&ctx(), &product.id).await.unwrap(), 40);
    }

    #[tokio::test]
    async fn test_transition_rules() {
        let (db, stock) = setup().await;
        let (product, units) = serialized_with_units(&db, 1).await;
        let unit_id = &units[0].id;

        let unit = stock
            .transition_unit(&ctx(), unit_id, UnitStatus::Damaged, Authority::Operational)
            .await
            .unwrap();
        assert_eq!(unit.status, UnitStatus::Damaged);

        // Repair needs administrative authority
        let err = stock
            .transition_unit(&ctx(), unit_id, UnitStatus::Available, Authority::Operational)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordError::InvalidTransition(CoreError::AdministrativeOnly { .. })));

        stock
            .transition_unit(&ctx(), unit_id, UnitStatus::Available, Authority::Administrative)
            .await
            .unwrap();
        stock
            .transition_unit(&ctx(), unit_id, UnitStatus::Sold, Authority::Operational)
            .await
            .unwrap();

        // Sold is terminal
        let err = stock
            .transition_unit(&ctx(), unit_id, UnitStatus::Available, Authority::Administrative)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordError::InvalidTransition(CoreError::InvalidTransition { .. })));

        let stored = db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(stored.stock, 0);
    }

    #[tokio::test]
    async fn test_set_stock_rejected_for_serialized() {
        let (db, stock) = setup().await;
        let (product, _) = serialized_with_units(&db, 2).await;

        let err = stock.set_stock(&ctx(), &product.id, 10).await.unwrap_err();
        assert!(matches!(err, CoordError::ValidationFailed(_)));

        let err = stock.set_stock(&ctx(), &product.id, -1).await.unwrap_err();
        assert!(matches!(err, CoordError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn test_delete_product_cascades_units_first() {
        let (db, stock) = setup().await;
        let (product, units) = serialized_with_units(&db, 2).await;
        for unit in &units {
            stock
                .registry
                .allocate(&ctx(), EntityType::Unit, &unit.id, None)
                .await
                .unwrap();
        }

        let summary = stock.delete_product(&ctx(), &product.id).await.unwrap();
        assert_eq!(summary.units_deleted, 2);
        assert_eq!(summary.barcodes_released, 2);

        assert!(db.products().get_by_id(&product.id).await.unwrap().is_none());
        assert_eq!(db.units().count().await.unwrap(), 0);
        assert_eq!(db.barcodes().count().await.unwrap(), 0);
        assert!(db.units().orphans().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_unit_reconciles() {
        let (db, stock) = setup().await;
        let (product, units) = serialized_with_units(&db, 2).await;
        stock.reconcile_stock(&ctx(), &product.id).await.unwrap();

        stock.delete_unit(&ctx(), &units[0].id).await.unwrap();
        let stored = db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(stored.stock, 1);

        let err = stock.delete_unit(&ctx(), &units[0].id).await.unwrap_err();
        assert!(matches!(err, CoordError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_unit_already_gone_releases_barcode_without_event() {
        let (db, stock) = setup().await;
        let (_product, units) = serialized_with_units(&db, 1).await;
        let unit = &units[0];
        stock
            .registry
            .allocate(&ctx(), EntityType::Unit, &unit.id, None)
            .await
            .unwrap();

        let deleted_events = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&deleted_events);
        let _sub = stock.notifier.subscribe(move |event: &ChangeEvent| -> Result<(), HandlerError> {
            if event.kind == ChangeKind::UnitDeleted {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        });

        // Row removed behind the maintainer's back
        db.units().delete(&unit.id).await.unwrap();

        let removal = stock.remove_unit(&ctx(), unit).await.unwrap();
        assert!(!removal.deleted);
        assert!(removal.barcode_released);
        assert_eq!(deleted_events.load(Ordering::SeqCst), 0);
        assert_eq!(db.barcodes().count().await.unwrap(), 0);

        // A real deletion still announces itself
        let (_other, more) = serialized_with_units_named(&db, "X2").await;
        stock.delete_unit(&ctx(), &more.id).await.unwrap();
        assert_eq!(deleted_events.load(Ordering::SeqCst), 1);
    }

    async fn serialized_with_units_named(db: &Database, model: &str) -> (Product, Unit) {
        let product = Product::from_attrs(generate_id(), "Acme", model, &ProductAttrs::serialized(), Utc::now());
        db.products().insert(&product).await.unwrap();
        let unit = Unit::from_attrs(generate_id(), &product.id, "SN0", &UnitAttrs::default(), Utc::now());
        db.units().insert(&unit).await.unwrap();
        (product, unit)
    }
}
