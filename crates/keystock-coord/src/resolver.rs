//! # Entity Resolver
//!
//! Find-or-create for products (keyed by `(brand, model)`) and units (keyed
//! by `(product_id, serial_number)`), safe under concurrent callers from
//! both write paths.
//!
//! ## Resolve-or-Create
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. SELECT by natural key ──── found ──► (existing, false)              │
//! │           │                              attrs ignored, never merged    │
//! │           ▼ absent                                                      │
//! │  2. INSERT (UNIQUE natural key)                                        │
//! │           │                                                             │
//! │     ┌─────┴──────────────┬──────────────────────────┐                  │
//! │     ▼ ok                 ▼ unique violation          ▼ anything else    │
//! │  publish *_created    lost the race:              FK → Fatal           │
//! │  allocate barcode     re-read once ──► (winner,   busy → Storage-      │
//! │  reconcile stock                        false)           Unavailable   │
//! │  (row, true)                                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! No in-process lock is taken: the two write paths may be separate
//! processes, so the storage constraint is the only arbiter.
//!
//! Follow-up steps after a successful insert (barcode, stock) are logged
//! when they fail rather than turning the creation into an error. What they
//! leave behind is exactly what the auditor reports and repairs.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use keystock_core::validation::{
    validate_natural_key, validate_product_attrs, validate_serial_number, validate_unique_serials,
    validate_unit_attrs,
};
use keystock_core::{EntityType, Product, ProductAttrs, Unit, UnitAttrs};
use keystock_db::repository::generate_id;
use keystock_db::repository::{product, unit};
use keystock_db::Database;

use crate::context::OpContext;
use crate::error::{CoordError, CoordResult};
use crate::events::{ChangeEvent, ChangeKind, ChangeNotifier};
use crate::registry::BarcodeRegistry;
use crate::stock::StockMaintainer;

// =============================================================================
// Intake Types
// =============================================================================

/// One unit of a submitted delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSubmission {
    pub serial_number: String,
    #[serde(default)]
    pub attrs: UnitAttrs,
}

/// A product plus the units delivered with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSubmission {
    pub brand: String,
    pub model: String,
    #[serde(default)]
    pub attrs: ProductAttrs,
    #[serde(default)]
    pub units: Vec<UnitSubmission>,
}

/// A unit the intake could not resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub serial_number: String,
    pub error: String,
    pub retryable: bool,
}

/// Partial-success result of an intake: "N of M units created".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakeReport {
    pub product: Product,
    pub product_created: bool,
    pub created_count: usize,
    pub existing_count: usize,
    pub errors: Vec<UnitFailure>,
}

impl IntakeReport {
    pub fn submitted(&self) -> usize {
        self.created_count + self.existing_count + self.errors.len()
    }

    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

// =============================================================================
// Resolver
// =============================================================================

#[derive(Clone)]
pub struct EntityResolver {
    db: Database,
    registry: BarcodeRegistry,
    stock: StockMaintainer,
    notifier: ChangeNotifier,
}

impl EntityResolver {
    pub fn new(
        db: Database,
        registry: BarcodeRegistry,
        stock: StockMaintainer,
        notifier: ChangeNotifier,
    ) -> Self {
        EntityResolver {
            db,
            registry,
            stock,
            notifier,
        }
    }

    /// Returns the product for `(brand, model)`, creating it if absent.
    ///
    /// `attrs` only apply to a newly created row. An existing product is
    /// returned untouched.
    pub async fn resolve_product(
        &self,
        ctx: &OpContext,
        brand: &str,
        model: &str,
        attrs: &ProductAttrs,
    ) -> CoordResult<(Product, bool)> {
        validate_natural_key(brand, model)?;
        validate_product_attrs(attrs)?;
        self.check_barcode(attrs.barcode.as_deref())?;

        if let Some(existing) = self.db.products().find_by_natural_key(brand, model).await? {
            debug!(brand, model, id = %existing.id, "Product resolved");
            return Ok((existing, false));
        }

        let mut product = Product::from_attrs(generate_id(), brand, model, attrs, Utc::now());

        match self.db.products().insert(&product).await {
            Ok(()) => {}
            Err(e) if e.violates(product::NATURAL_KEY) => {
                let winner = self
                    .db
                    .products()
                    .find_by_natural_key(brand, model)
                    .await?
                    .ok_or_else(|| {
                        CoordError::Fatal(format!(
                            "natural key conflict for {}/{} but no row found",
                            brand, model
                        ))
                    })?;
                debug!(brand, model, id = %winner.id, source = %ctx.source, "Creation race lost, returning winner");
                return Ok((winner, false));
            }
            Err(e) => return Err(e.into()),
        }

        info!(brand, model, id = %product.id, serialized = product.has_serialized_units, source = %ctx.source, "Product created");
        self.notifier
            .publish(&ChangeEvent::new(ChangeKind::ProductCreated, ctx.source, &product.id));

        if product.needs_barcode() {
            match self
                .registry
                .allocate(ctx, EntityType::Product, &product.id, attrs.barcode.as_deref())
                .await
            {
                Ok(barcode) => product.barcode = Some(barcode),
                Err(e) => warn!(id = %product.id, error = %e, "Barcode allocation failed, left for audit"),
            }
        }

        Ok((product, true))
    }

    /// Like [`resolve_product`](Self::resolve_product) for callers holding an
    /// untyped attribute object. Fields outside the writable allow-list are
    /// dropped and logged.
    pub async fn resolve_product_untyped(
        &self,
        ctx: &OpContext,
        brand: &str,
        model: &str,
        attrs: serde_json::Value,
    ) -> CoordResult<(Product, bool)> {
        let (attrs, dropped) = ProductAttrs::from_untyped(attrs)?;
        if !dropped.is_empty() {
            warn!(brand, model, ?dropped, source = %ctx.source, "Dropped non-writable product fields");
        }
        self.resolve_product(ctx, brand, model, &attrs).await
    }

    /// Returns the unit for `(product_id, serial_number)`, creating it if
    /// absent. A created unit gets a barcode and its product's stock is
    /// reconciled before this returns.
    ///
    /// Creating a unit under a product flagged non-serialized flips the flag:
    /// the presence of units is the fact, the flag only caches it.
    pub async fn resolve_unit(
        &self,
        ctx: &OpContext,
        product_id: &str,
        serial_number: &str,
        attrs: &UnitAttrs,
    ) -> CoordResult<(Unit, bool)> {
        validate_serial_number(serial_number)?;
        validate_unit_attrs(attrs)?;
        self.check_barcode(attrs.barcode.as_deref())?;

        if let Some(existing) = self
            .db
            .units()
            .find_by_natural_key(product_id, serial_number)
            .await?
        {
            debug!(product_id, serial_number, id = %existing.id, "Unit resolved");
            return Ok((existing, false));
        }

        let product = self
            .db
            .products()
            .get_by_id(product_id)
            .await?
            .ok_or_else(|| CoordError::not_found("Product", product_id))?;

        let mut unit = Unit::from_attrs(generate_id(), product_id, serial_number, attrs, Utc::now());

        match self.db.units().insert(&unit).await {
            Ok(()) => {}
            Err(e) if e.violates(unit::NATURAL_KEY) => {
                let winner = self
                    .db
                    .units()
                    .find_by_natural_key(product_id, serial_number)
                    .await?
                    .ok_or_else(|| {
                        CoordError::Fatal(format!(
                            "serial conflict for {}/{} but no row found",
                            product_id, serial_number
                        ))
                    })?;
                debug!(product_id, serial_number, id = %winner.id, source = %ctx.source, "Creation race lost, returning winner");
                return Ok((winner, false));
            }
            Err(e) => return Err(e.into()),
        }

        info!(product_id, serial_number, id = %unit.id, source = %ctx.source, "Unit created");
        self.notifier.publish(
            &ChangeEvent::new(ChangeKind::UnitCreated, ctx.source, &unit.id).product(product_id),
        );

        if !product.has_serialized_units {
            self.mark_serialized(ctx, product_id).await;
        }

        match self
            .registry
            .allocate(ctx, EntityType::Unit, &unit.id, attrs.barcode.as_deref())
            .await
        {
            Ok(barcode) => unit.barcode = Some(barcode),
            Err(e) => warn!(id = %unit.id, error = %e, "Barcode allocation failed, left for audit"),
        }

        if let Err(e) = self.stock.reconcile_stock(ctx, product_id).await {
            warn!(product_id, error = %e, "Stock reconciliation failed, left for audit");
        }

        Ok((unit, true))
    }

    /// Resolves a product and every submitted unit.
    ///
    /// The whole submission is validated before the first write; a
    /// duplicate serial inside the batch rejects it outright. After that,
    /// a failing unit is recorded and the rest continue.
    pub async fn intake(&self, ctx: &OpContext, submission: &ProductSubmission) -> CoordResult<IntakeReport> {
        validate_natural_key(&submission.brand, &submission.model)?;
        validate_product_attrs(&submission.attrs)?;
        self.check_barcode(submission.attrs.barcode.as_deref())?;
        validate_unique_serials(submission.units.iter().map(|u| u.serial_number.as_str()))?;
        for unit in &submission.units {
            validate_serial_number(&unit.serial_number)?;
            validate_unit_attrs(&unit.attrs)?;
            self.check_barcode(unit.attrs.barcode.as_deref())?;
        }

        let mut attrs = submission.attrs.clone();
        if !submission.units.is_empty() {
            attrs.has_serialized_units = true;
        }

        let (product, product_created) = self
            .resolve_product(ctx, &submission.brand, &submission.model, &attrs)
            .await?;

        let mut report = IntakeReport {
            product,
            product_created,
            created_count: 0,
            existing_count: 0,
            errors: Vec::new(),
        };

        for submitted in &submission.units {
            match self
                .resolve_unit(ctx, &report.product.id, &submitted.serial_number, &submitted.attrs)
                .await
            {
                Ok((_, true)) => report.created_count += 1,
                Ok((_, false)) => report.existing_count += 1,
                Err(e) => {
                    warn!(serial_number = %submitted.serial_number, error = %e, "Unit intake failed");
                    report.errors.push(UnitFailure {
                        serial_number: submitted.serial_number.clone(),
                        error: e.to_string(),
                        retryable: e.is_retryable(),
                    });
                }
            }
        }

        if let Err(e) = self.stock.reconcile_stock(ctx, &report.product.id).await {
            warn!(product_id = %report.product.id, error = %e, "Final stock reconciliation failed");
        }
        if let Some(current) = self.db.products().get_by_id(&report.product.id).await? {
            report.product = current;
        }

        info!(
            product_id = %report.product.id,
            created = report.created_count,
            existing = report.existing_count,
            failed = report.errors.len(),
            source = %ctx.source,
            "Intake complete"
        );
        Ok(report)
    }

    fn check_barcode(&self, candidate: Option<&str>) -> CoordResult<()> {
        match candidate {
            Some(value) => self.registry.check_candidate(value),
            None => Ok(()),
        }
    }

    async fn mark_serialized(&self, ctx: &OpContext, product_id: &str) {
        match self.db.products().set_serialized_flag(product_id, true).await {
            Ok(()) => {
                info!(product_id, "Product now carries units, marked serialized");
                self.notifier.publish(&ChangeEvent::new(
                    ChangeKind::ProductUpdated,
                    ctx.source,
                    product_id,
                ));
            }
            Err(e) => warn!(product_id, error = %e, "Could not mark product serialized, left for audit"),
        }
    }
}
