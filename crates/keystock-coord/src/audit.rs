//! # Integrity Auditor
//!
//! Whole-dataset scan for drift between cached facts and the data they are
//! derived from, plus a deterministic repair pass.
//!
//! ## Scan
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  unit_stats()          ──► InconsistentFlag, StockDrift                │
//! │  missing_barcodes()    ──► MissingBarcode (products, then units)       │
//! │  orphans()             ──► OrphanedUnit                                │
//! │  duplicate_serials()   ──► DuplicateSerial                             │
//! │  stale_entries()       ──► StaleBarcode                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A product reported with an inconsistent flag is not also reported for
//! drift or a missing barcode: both depend on the flag, and the flag repair
//! settles them.
//!
//! ## Repair Order
//! ```text
//! InconsistentFlag ──► StaleBarcode ──► MissingBarcode ──► StockDrift
//!   (flag decides        (frees values     (allocation can     (last: every
//!    what else is         for reuse)        reuse them)         unit settled)
//!    needed)
//! ```
//!
//! Every finding is re-verified against current data before it is acted on;
//! a finding already fixed by someone else is skipped without being counted.
//! Orphaned units and duplicate serials are never touched.

use tracing::{debug, info, warn};

use keystock_core::{
    EntityType, Finding, FindingKind, IntegrityReport, RepairFailure, RepairSummary, Source,
};
use keystock_db::Database;

use crate::context::OpContext;
use crate::error::CoordResult;
use crate::events::{ChangeEvent, ChangeKind, ChangeNotifier};
use crate::registry::BarcodeRegistry;

/// Repair order by finding class.
const REPAIR_ORDER: [FindingKind; 4] = [
    FindingKind::InconsistentFlag,
    FindingKind::StaleBarcode,
    FindingKind::MissingBarcode,
    FindingKind::StockDrift,
];

#[derive(Clone)]
pub struct IntegrityAuditor {
    db: Database,
    registry: BarcodeRegistry,
    notifier: ChangeNotifier,
}

impl IntegrityAuditor {
    pub fn new(db: Database, registry: BarcodeRegistry, notifier: ChangeNotifier) -> Self {
        IntegrityAuditor {
            db,
            registry,
            notifier,
        }
    }

    // =========================================================================
    // Scan
    // =========================================================================

    /// Reports every integrity violation currently present. Read-only.
    pub async fn scan(&self, ctx: &OpContext) -> CoordResult<IntegrityReport> {
        let products = self.db.products().count().await?;
        let units = self.db.units().count().await?;
        let mut report = IntegrityReport::new(products.max(0) as u64, units.max(0) as u64);

        let mut flagged: Vec<String> = Vec::new();
        for stats in self.db.products().unit_stats().await? {
            let inconsistent = if stats.has_serialized_units {
                stats.unit_count == 0 && stats.stock > 0
            } else {
                stats.unit_count > 0
            };

            if inconsistent {
                report.findings.push(Finding::InconsistentFlag {
                    product_id: stats.product_id.clone(),
                    flag: stats.has_serialized_units,
                    unit_count: stats.unit_count,
                });
                flagged.push(stats.product_id);
            } else if stats.has_serialized_units && stats.stock != stats.available_count {
                report.findings.push(Finding::StockDrift {
                    product_id: stats.product_id,
                    recorded: stats.stock,
                    expected: stats.available_count,
                });
            }
        }

        for product_id in self.db.products().missing_barcodes().await? {
            if !flagged.contains(&product_id) {
                report.findings.push(Finding::MissingBarcode {
                    entity_type: EntityType::Product,
                    entity_id: product_id,
                });
            }
        }
        for unit_id in self.db.units().missing_barcodes().await? {
            report.findings.push(Finding::MissingBarcode {
                entity_type: EntityType::Unit,
                entity_id: unit_id,
            });
        }

        for orphan in self.db.units().orphans().await? {
            report.findings.push(Finding::OrphanedUnit {
                unit_id: orphan.unit_id,
                product_id: orphan.product_id,
            });
        }

        for group in self.db.units().duplicate_serials().await? {
            report.findings.push(Finding::DuplicateSerial {
                product_id: group.product_id,
                serial_number: group.serial_number,
                unit_ids: group.unit_ids,
            });
        }

        for entry in self.db.barcodes().stale_entries().await? {
            report.findings.push(Finding::StaleBarcode {
                barcode: entry.barcode,
                entity_type: entry.entity_type,
                entity_id: entry.entity_id,
            });
        }

        if report.is_clean() {
            debug!(products, units, source = %ctx.source, "Integrity scan clean");
        } else {
            let counts: Vec<String> = FindingKind::ALL
                .iter()
                .filter(|kind| report.count(**kind) > 0)
                .map(|kind| format!("{}={}", kind.as_str(), report.count(*kind)))
                .collect();
            info!(products, units, findings = report.findings.len(), counts = %counts.join(","), source = %ctx.source, "Integrity scan found drift");
        }
        Ok(report)
    }

    // =========================================================================
    // Repair
    // =========================================================================

    /// Applies the deterministic fix for every auto-repairable finding in
    /// `report`.
    ///
    /// Never fails as a whole on a single finding: per-finding errors are
    /// collected in [`RepairSummary::failures`].
    pub async fn repair(&self, ctx: &OpContext, report: &IntegrityReport) -> CoordResult<RepairSummary> {
        let ctx = ctx.as_source(Source::Auditor);
        let mut summary = RepairSummary::default();

        for finding in &report.findings {
            if !finding.kind().is_auto_repairable() {
                warn!(kind = finding.kind().as_str(), ?finding, "Finding needs administrative confirmation, skipped");
                summary.skipped.push(finding.clone());
            }
        }

        for kind in REPAIR_ORDER {
            for finding in report.of_kind(kind) {
                if let Err(e) = self.repair_one(&ctx, finding, &mut summary).await {
                    warn!(kind = kind.as_str(), error = %e, "Repair failed");
                    summary.failures.push(RepairFailure {
                        finding: finding.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            barcodes = summary.barcodes_assigned,
            flags = summary.flags_corrected,
            stock = summary.stock_reconciled,
            stale = summary.stale_barcodes_released,
            skipped = summary.skipped.len(),
            failed = summary.failures.len(),
            "Repair pass complete"
        );
        Ok(summary)
    }

    async fn repair_one(
        &self,
        ctx: &OpContext,
        finding: &Finding,
        summary: &mut RepairSummary,
    ) -> CoordResult<()> {
        match finding {
            Finding::InconsistentFlag { product_id, .. } => self.repair_flag(ctx, product_id, summary).await,
            Finding::StaleBarcode { barcode, .. } => {
                // Re-verify: the entity may have been recreated under this value
                let Some(entry) = self.db.barcodes().lookup(barcode).await? else {
                    return Ok(());
                };
                if self.entity_exists(entry.entity_type, &entry.entity_id).await? {
                    return Ok(());
                }
                if self.registry.release_value(ctx, &entry).await? {
                    summary.stale_barcodes_released += 1;
                }
                Ok(())
            }
            Finding::MissingBarcode {
                entity_type,
                entity_id,
            } => {
                if !self.needs_barcode(*entity_type, entity_id).await? {
                    return Ok(());
                }
                let barcode = self.registry.allocate(ctx, *entity_type, entity_id, None).await?;
                info!(%entity_type, entity_id, barcode = %barcode, "Missing barcode repaired");
                summary.barcodes_assigned += 1;
                Ok(())
            }
            Finding::StockDrift { product_id, .. } => {
                if self.recompute(ctx, product_id, FindingKind::StockDrift).await? {
                    summary.stock_reconciled += 1;
                }
                Ok(())
            }
            Finding::OrphanedUnit { .. } | Finding::DuplicateSerial { .. } => Ok(()),
        }
    }

    /// Sets the flag to match whether units exist. A product losing the flag
    /// becomes direct-stock and gets its barcode in the same step.
    async fn repair_flag(&self, ctx: &OpContext, product_id: &str, summary: &mut RepairSummary) -> CoordResult<()> {
        let Some(product) = self.db.products().get_by_id(product_id).await? else {
            return Ok(());
        };
        let unit_count = self.db.units().list_for_product(product_id).await?.len();

        let target = if !product.has_serialized_units && unit_count > 0 {
            true
        } else if product.has_serialized_units && unit_count == 0 && product.stock > 0 {
            false
        } else {
            debug!(product_id, "Flag already consistent");
            return Ok(());
        };

        self.db.products().set_serialized_flag(product_id, target).await?;
        summary.flags_corrected += 1;
        info!(product_id, flag = target, unit_count, "Serialized flag corrected");
        self.notifier.publish(
            &ChangeEvent::new(ChangeKind::ProductUpdated, ctx.source, product_id)
                .repair(FindingKind::InconsistentFlag.as_str()),
        );

        if target {
            self.recompute(ctx, product_id, FindingKind::InconsistentFlag).await?;
        } else {
            self.registry
                .allocate(ctx, EntityType::Product, product_id, None)
                .await?;
            summary.barcodes_assigned += 1;
        }
        Ok(())
    }

    /// Recomputes stock, tagging the event with the finding it repairs.
    /// Returns whether the stored value changed.
    async fn recompute(&self, ctx: &OpContext, product_id: &str, cause: FindingKind) -> CoordResult<bool> {
        match self.db.products().recompute_stock(product_id).await? {
            Some(stock) => {
                info!(product_id, stock, "Stock drift repaired");
                self.notifier.publish(
                    &ChangeEvent::new(ChangeKind::StockUpdated, ctx.source, product_id)
                        .stock(stock)
                        .repair(cause.as_str()),
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn entity_exists(&self, entity_type: EntityType, entity_id: &str) -> CoordResult<bool> {
        Ok(match entity_type {
            EntityType::Product => self.db.products().get_by_id(entity_id).await?.is_some(),
            EntityType::Unit => self.db.units().get_by_id(entity_id).await?.is_some(),
        })
    }

    async fn needs_barcode(&self, entity_type: EntityType, entity_id: &str) -> CoordResult<bool> {
        let column = match entity_type {
            EntityType::Product => match self.db.products().get_by_id(entity_id).await? {
                Some(product) if product.needs_barcode() => product.barcode,
                _ => return Ok(false),
            },
            EntityType::Unit => match self.db.units().get_by_id(entity_id).await? {
                Some(unit) => unit.barcode,
                None => return Ok(false),
            },
        };

        let registered = self.db.barcodes().find_by_entity(entity_type, entity_id).await?;
        Ok(match (column, registered) {
            (Some(value), Some(entry)) => value != entry.barcode,
            _ => true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use keystock_core::{Ean13Symbology, Product, ProductAttrs, Unit, UnitAttrs};
    use keystock_db::repository::generate_id;
    use keystock_db::DbConfig;
    use std::sync::Arc;
    use std::time::Duration;

    fn ctx() -> OpContext {
        OpContext::new(Source::Admin, Duration::from_secs(5))
    }

    async fn setup() -> (Database, IntegrityAuditor) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let notifier = ChangeNotifier::new();
        let registry = BarcodeRegistry::new(
            db.clone(),
            Arc::new(Ean13Symbology::default()),
            8,
            notifier.clone(),
        );
        (db.clone(), IntegrityAuditor::new(db, registry, notifier))
    }

    async fn insert_product(db: &Database, model: &str, attrs: &ProductAttrs) -> Product {
        let product = Product::from_attrs(generate_id(), "Acme", model, attrs, Utc::now());
        db.products().insert(&product).await.unwrap();
        product
    }

    async fn insert_unit(db: &Database, product_id: &str, serial: &str) -> Unit {
        let unit = Unit::from_attrs(generate_id(), product_id, serial, &UnitAttrs::default(), Utc::now());
        db.units().insert(&unit).await.unwrap();
        unit
    }

    #[tokio::test]
    async fn test_empty_database_is_clean() {
        let (_db, auditor) = setup().await;
        let report = auditor.scan(&ctx()).await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.scanned_products, 0);
    }

    #[tokio::test]
    async fn test_drift_and_missing_barcodes_repaired() {
        let (db, auditor) = setup().await;
        let product = insert_product(&db, "X1", &ProductAttrs::serialized()).await;
        insert_unit(&db, &product.id, "SN1").await;
        insert_unit(&db, &product.id, "SN2").await;

        let report = auditor.scan(&ctx()).await.unwrap();
        assert_eq!(report.count(FindingKind::StockDrift), 1);
        assert_eq!(report.count(FindingKind::MissingBarcode), 2);

        let summary = auditor.repair(&ctx(), &report).await.unwrap();
        assert_eq!(summary.stock_reconciled, 1);
        assert_eq!(summary.barcodes_assigned, 2);
        assert!(summary.is_complete());

        assert!(auditor.scan(&ctx()).await.unwrap().is_clean());
        let stored = db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(stored.stock, 2);
    }

    #[tokio::test]
    async fn test_flag_false_with_units_is_flipped() {
        let (db, auditor) = setup().await;
        let product = insert_product(&db, "Cable", &ProductAttrs::default()).await;
        insert_unit(&db, &product.id, "SN1").await;

        let report = auditor.scan(&ctx()).await.unwrap();
        assert!(report.findings.contains(&Finding::InconsistentFlag {
            product_id: product.id.clone(),
            flag: false,
            unit_count: 1,
        }));
        // Flag decides barcode need, so no product MissingBarcode alongside it
        assert!(!report.findings.contains(&Finding::MissingBarcode {
            entity_type: EntityType::Product,
            entity_id: product.id.clone(),
        }));

        auditor.repair(&ctx(), &report).await.unwrap();

        let stored = db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert!(stored.has_serialized_units);
        assert_eq!(stored.stock, 1);
        assert!(auditor.scan(&ctx()).await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_flag_true_without_units_is_cleared() {
        let (db, auditor) = setup().await;
        let product = insert_product(&db, "X1", &ProductAttrs::serialized()).await;
        sqlx::query("UPDATE products SET stock = 5 WHERE id = ?1")
            .bind(&product.id)
            .execute(db.pool())
            .await
            .unwrap();

        let report = auditor.scan(&ctx()).await.unwrap();
        assert_eq!(report.count(FindingKind::InconsistentFlag), 1);
        assert_eq!(report.count(FindingKind::StockDrift), 0);

        let summary = auditor.repair(&ctx(), &report).await.unwrap();
        assert_eq!(summary.flags_corrected, 1);
        assert_eq!(summary.barcodes_assigned, 1);

        let stored = db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert!(!stored.has_serialized_units);
        assert_eq!(stored.stock, 5);
        assert!(stored.barcode.is_some());
        assert!(auditor.scan(&ctx()).await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_stale_barcode_released() {
        let (db, auditor) = setup().await;
        let product = insert_product(&db, "Cable", &ProductAttrs::default()).await;
        let barcode = auditor
            .registry
            .allocate(&ctx(), EntityType::Product, &product.id, None)
            .await
            .unwrap();
        db.products().delete(&product.id).await.unwrap();

        let report = auditor.scan(&ctx()).await.unwrap();
        assert_eq!(report.count(FindingKind::StaleBarcode), 1);

        let summary = auditor.repair(&ctx(), &report).await.unwrap();
        assert_eq!(summary.stale_barcodes_released, 1);
        assert!(db.barcodes().lookup(&barcode).await.unwrap().is_none());

        // Second repair of the same report finds nothing left to do
        let again = auditor.repair(&ctx(), &report).await.unwrap();
        assert_eq!(again.total_repaired(), 0);
    }

    #[tokio::test]
    async fn test_orphans_and_duplicates_are_report_only() {
        let (db, auditor) = setup().await;
        let product = insert_product(&db, "X1", &ProductAttrs::serialized()).await;

        sqlx::query("DROP INDEX idx_units_natural_key")
            .execute(db.pool())
            .await
            .unwrap();
        insert_unit(&db, &product.id, "SN1").await;
        insert_unit(&db, &product.id, "SN1").await;

        sqlx::query("PRAGMA foreign_keys = OFF").execute(db.pool()).await.unwrap();
        let orphan = insert_unit(&db, "deleted-product", "SN9").await;
        sqlx::query("PRAGMA foreign_keys = ON").execute(db.pool()).await.unwrap();

        let report = auditor.scan(&ctx()).await.unwrap();
        assert_eq!(report.count(FindingKind::DuplicateSerial), 1);
        assert!(report.findings.contains(&Finding::OrphanedUnit {
            unit_id: orphan.id.clone(),
            product_id: "deleted-product".into(),
        }));

        let summary = auditor.repair(&ctx(), &report).await.unwrap();
        assert_eq!(summary.skipped.len(), 2);

        let rescan = auditor.scan(&ctx()).await.unwrap();
        assert_eq!(rescan.count(FindingKind::OrphanedUnit), 1);
        assert_eq!(rescan.count(FindingKind::DuplicateSerial), 1);
        assert_eq!(rescan.count(FindingKind::MissingBarcode), 0);
        assert_eq!(rescan.count(FindingKind::StockDrift), 0);
        assert!(db.units().get_by_id(&orphan.id).await.unwrap().is_some());
    }
}
