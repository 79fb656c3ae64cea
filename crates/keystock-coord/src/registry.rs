//! # Barcode Registry
//!
//! Global barcode → (entity type, entity id) mapping. Uniqueness is enforced
//! by the `barcode_registry` table itself: the literal value is the primary
//! key and each entity may hold at most one row.
//!
//! ## Allocation
//! ```text
//! allocate(entity)
//!   │
//!   ├─ entity already registered? ──────────────► return existing (no-op)
//!   │
//!   ├─ candidates: caller's value, current column value (if it is
//!   │              well-formed), symbology.encode(id, 0..max_attempts)
//!   │
//!   └─ for each candidate:
//!        INSERT registry row
//!          ├─ ok ─────────────────► mirror onto entity row, publish, return
//!          ├─ value taken ────────► next candidate
//!          └─ entity registered ──► concurrent allocation won, return theirs
//! ```

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use keystock_core::validation::validate_barcode;
use keystock_core::{BarcodeEntry, EntityType, Metadata, Symbology, ValidationError};
use keystock_db::repository::barcode::{BARCODE_KEY, ENTITY_KEY};
use keystock_db::{Database, DbError};

use crate::context::OpContext;
use crate::error::{CoordError, CoordResult};
use crate::events::{ChangeEvent, ChangeKind, ChangeNotifier};

/// Registry front-end used by the resolver, the auditor and deletions.
#[derive(Clone)]
pub struct BarcodeRegistry {
    db: Database,
    symbology: Arc<dyn Symbology>,
    max_attempts: u32,
    notifier: ChangeNotifier,
}

impl BarcodeRegistry {
    pub fn new(
        db: Database,
        symbology: Arc<dyn Symbology>,
        max_attempts: u32,
        notifier: ChangeNotifier,
    ) -> Self {
        BarcodeRegistry {
            db,
            symbology,
            max_attempts: max_attempts.max(1),
            notifier,
        }
    }

    pub fn symbology(&self) -> &dyn Symbology {
        self.symbology.as_ref()
    }

    /// Assigns a globally unique barcode to an entity.
    ///
    /// Idempotent: an entity that already holds a registry entry gets that
    /// value back and nothing is written except, if it drifted, the entity's
    /// own barcode column.
    ///
    /// ## Errors
    /// * `NotFound` - the entity does not exist
    /// * `ValidationFailed` - `candidate` is malformed or not in this
    ///   registry's symbology
    /// * `BarcodeExhausted` - every candidate belonged to another entity
    pub async fn allocate(
        &self,
        ctx: &OpContext,
        entity_type: EntityType,
        entity_id: &str,
        candidate: Option<&str>,
    ) -> CoordResult<String> {
        if let Some(value) = candidate {
            self.check_candidate(value)?;
        }

        let column = self.current_column(entity_type, entity_id).await?;

        if let Some(existing) = self.db.barcodes().find_by_entity(entity_type, entity_id).await? {
            debug!(%entity_type, entity_id, barcode = %existing.barcode, "Entity already registered");
            self.mirror(entity_type, entity_id, column.as_deref(), &existing.barcode)
                .await?;
            return Ok(existing.barcode);
        }

        let mut candidates: Vec<String> = Vec::new();
        let column_candidate = column.clone().filter(|value| self.symbology.is_valid(value));
        for preferred in [candidate.map(str::to_string), column_candidate].into_iter().flatten() {
            if !candidates.contains(&preferred) {
                candidates.push(preferred);
            }
        }
        candidates.extend((0..self.max_attempts).map(|attempt| self.symbology.encode(entity_id, attempt)));

        for value in candidates {
            let entry = BarcodeEntry {
                barcode: value,
                entity_type,
                entity_id: entity_id.to_string(),
                format: self.symbology.format().to_string(),
                metadata: Metadata::new().with("allocated_by", ctx.source.as_str())?,
                created_at: Utc::now(),
            };

            match self.db.barcodes().insert(&entry).await {
                Ok(()) => {}
                Err(e) if e.violates(BARCODE_KEY) => {
                    debug!(%entity_type, entity_id, barcode = %entry.barcode, "Barcode taken, trying next candidate");
                    continue;
                }
                Err(e) if e.violates(ENTITY_KEY) => {
                    // Another caller registered this entity first
                    let winner = self
                        .db
                        .barcodes()
                        .find_by_entity(entity_type, entity_id)
                        .await?
                        .ok_or_else(|| {
                            CoordError::Fatal(format!(
                                "registry conflict for {} {} but no entry found",
                                entity_type, entity_id
                            ))
                        })?;
                    debug!(%entity_type, entity_id, barcode = %winner.barcode, "Concurrent allocation resolved");
                    self.mirror(entity_type, entity_id, column.as_deref(), &winner.barcode)
                        .await?;
                    return Ok(winner.barcode);
                }
                Err(e) => return Err(e.into()),
            }

            match self.write_column(entity_type, entity_id, Some(&entry.barcode)).await {
                Ok(()) => {}
                Err(e) if e.is_unique_violation() => {
                    // Column value held by a row the registry does not know about
                    warn!(%entity_type, entity_id, barcode = %entry.barcode, "Barcode column conflict, releasing");
                    self.db.barcodes().release(&entry.barcode).await?;
                    continue;
                }
                Err(e) => {
                    self.db.barcodes().release(&entry.barcode).await?;
                    return Err(e.into());
                }
            }

            info!(%entity_type, entity_id, barcode = %entry.barcode, source = %ctx.source, "Barcode allocated");
            self.notifier.publish(
                &ChangeEvent::new(ChangeKind::BarcodeAllocated, ctx.source, entity_id)
                    .barcode(&entry.barcode),
            );
            return Ok(entry.barcode);
        }

        Err(CoordError::BarcodeExhausted {
            entity_type,
            entity_id: entity_id.to_string(),
            attempts: self.max_attempts,
        })
    }

    /// Rejects a caller-supplied barcode this registry cannot store.
    pub fn check_candidate(&self, value: &str) -> CoordResult<()> {
        validate_barcode(value)?;
        if !self.symbology.is_valid(value) {
            return Err(ValidationError::InvalidFormat {
                field: "barcode".to_string(),
                reason: format!("not a valid {} barcode", self.symbology.format()),
            }
            .into());
        }
        Ok(())
    }

    /// Entity holding `barcode`, if any.
    pub async fn lookup(&self, barcode: &str) -> CoordResult<Option<BarcodeEntry>> {
        Ok(self.db.barcodes().lookup(barcode).await?)
    }

    /// Frees the entity's barcode so the literal value can be reused.
    ///
    /// Clears the entity's column first when the entity still exists.
    pub async fn release(
        &self,
        ctx: &OpContext,
        entity_type: EntityType,
        entity_id: &str,
    ) -> CoordResult<Option<String>> {
        match self.write_column(entity_type, entity_id, None).await {
            Ok(()) | Err(DbError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        let released = self.db.barcodes().release_for_entity(entity_type, entity_id).await?;
        if let Some(barcode) = &released {
            info!(%entity_type, entity_id, barcode = %barcode, source = %ctx.source, "Barcode released");
            self.notifier.publish(
                &ChangeEvent::new(ChangeKind::BarcodeReleased, ctx.source, entity_id).barcode(barcode),
            );
        }
        Ok(released)
    }

    /// Removes a registry entry by value. Used for entries whose entity is gone.
    pub async fn release_value(&self, ctx: &OpContext, entry: &BarcodeEntry) -> CoordResult<bool> {
        let removed = self.db.barcodes().release(&entry.barcode).await?;
        if removed {
            info!(barcode = %entry.barcode, entity_id = %entry.entity_id, source = %ctx.source, "Stale barcode released");
            self.notifier.publish(
                &ChangeEvent::new(ChangeKind::BarcodeReleased, ctx.source, &entry.entity_id)
                    .barcode(&entry.barcode)
                    .repair("stale_barcode"),
            );
        }
        Ok(removed)
    }

    async fn current_column(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> CoordResult<Option<String>> {
        let column = match entity_type {
            EntityType::Product => self
                .db
                .products()
                .get_by_id(entity_id)
                .await?
                .map(|p| p.barcode),
            EntityType::Unit => self.db.units().get_by_id(entity_id).await?.map(|u| u.barcode),
        };
        column.ok_or_else(|| {
            let entity = match entity_type {
                EntityType::Product => "Product",
                EntityType::Unit => "Unit",
            };
            CoordError::not_found(entity, entity_id)
        })
    }

    /// Brings the entity's column in line with its registry entry.
    async fn mirror(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        column: Option<&str>,
        registered: &str,
    ) -> CoordResult<()> {
        if column != Some(registered) {
            debug!(%entity_type, entity_id, ?column, registered, "Mirroring registry barcode onto entity");
            self.write_column(entity_type, entity_id, Some(registered)).await?;
        }
        Ok(())
    }

    async fn write_column(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        barcode: Option<&str>,
    ) -> Result<(), DbError> {
        match entity_type {
            EntityType::Product => self.db.products().set_barcode(entity_id, barcode).await,
            EntityType::Unit => self.db.units().set_barcode(entity_id, barcode).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystock_core::{Ean13Symbology, Product, ProductAttrs, Source, Unit, UnitAttrs};
    use keystock_db::repository::generate_id;
    use keystock_db::DbConfig;
    use std::time::Duration;

    /// Encoder that always proposes the same few values.
    struct FixedSymbology(Vec<&'static str>);

    impl Symbology for FixedSymbology {
        fn format(&self) -> &'static str {
            "fixed"
        }

        fn encode(&self, _entity_id: &str, attempt: u32) -> String {
            self.0[attempt as usize % self.0.len()].to_string()
        }

        fn is_valid(&self, _barcode: &str) -> bool {
            true
        }
    }

    fn ctx() -> OpContext {
        OpContext::new(Source::Supplier, Duration::from_secs(5))
    }

    async fn setup(symbology: Arc<dyn Symbology>, attempts: u32) -> (Database, BarcodeRegistry) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let registry = BarcodeRegistry::new(db.clone(), symbology, attempts, ChangeNotifier::new());
        (db, registry)
    }

    async fn accessory(db: &Database, model: &str) -> Product {
        let product = Product::from_attrs(generate_id(), "Acme", model, &ProductAttrs::default(), Utc::now());
        db.products().insert(&product).await.unwrap();
        product
    }

    #[tokio::test]
    async fn test_allocate_is_idempotent() {
        let (db, registry) = setup(Arc::new(Ean13Symbology::default()), 8).await;
        let product = accessory(&db, "Cable").await;

        let first = registry
            .allocate(&ctx(), EntityType::Product, &product.id, None)
            .await
            .unwrap();
        let second = registry
            .allocate(&ctx(), EntityType::Product, &product.id, None)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert!(registry.symbology().is_valid(&first));
        assert_eq!(db.barcodes().count().await.unwrap(), 1);

        let stored = db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(stored.barcode.as_deref(), Some(first.as_str()));

        let entry = registry.lookup(&first).await.unwrap().unwrap();
        assert_eq!(entry.entity_id, product.id);
        assert_eq!(entry.metadata.get("allocated_by"), Some("supplier"));
    }

    #[tokio::test]
    async fn test_collision_moves_to_next_candidate() {
        let (db, registry) = setup(Arc::new(FixedSymbology(vec!["1111", "2222"])), 2).await;
        let a = accessory(&db, "A").await;
        let b = accessory(&db, "B").await;

        let first = registry.allocate(&ctx(), EntityType::Product, &a.id, None).await.unwrap();
        let second = registry.allocate(&ctx(), EntityType::Product, &b.id, None).await.unwrap();

        assert_eq!(first, "1111");
        assert_eq!(second, "2222");
    }

    #[tokio::test]
    async fn test_exhausted_candidates() {
        let (db, registry) = setup(Arc::new(FixedSymbology(vec!["1111"])), 3).await;
        let a = accessory(&db, "A").await;
        let b = accessory(&db, "B").await;

        registry.allocate(&ctx(), EntityType::Product, &a.id, None).await.unwrap();
        let err = registry
            .allocate(&ctx(), EntityType::Product, &b.id, None)
            .await
            .unwrap_err();

        assert!(matches!(err, CoordError::BarcodeExhausted { attempts: 3, .. }));
        let stored = db.products().get_by_id(&b.id).await.unwrap().unwrap();
        assert!(stored.barcode.is_none());
    }

    #[tokio::test]
    async fn test_candidate_preferred_then_generated() {
        let (db, registry) = setup(Arc::new(Ean13Symbology::default()), 8).await;
        let a = accessory(&db, "A").await;
        let b = accessory(&db, "B").await;

        let first = registry
            .allocate(&ctx(), EntityType::Product, &a.id, Some("4006381333931"))
            .await
            .unwrap();
        assert_eq!(first, "4006381333931");

        // Same literal requested for a different entity: falls back to generation
        let second = registry
            .allocate(&ctx(), EntityType::Product, &b.id, Some("4006381333931"))
            .await
            .unwrap();
        assert_ne!(second, first);

        let err = registry
            .allocate(&ctx(), EntityType::Product, &b.id, Some("bad code!"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn test_candidate_outside_symbology_is_rejected() {
        let (db, registry) = setup(Arc::new(Ean13Symbology::default()), 8).await;
        let a = accessory(&db, "A").await;

        for value in ["ABC-1", "4006381333932", "400638133393"] {
            let err = registry
                .allocate(&ctx(), EntityType::Product, &a.id, Some(value))
                .await
                .unwrap_err();
            assert!(matches!(err, CoordError::ValidationFailed(_)), "{}", value);
            assert!(registry.lookup(value).await.unwrap().is_none());
        }
        assert!(db.barcodes().find_by_entity(EntityType::Product, &a.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_column_value_is_not_registered() {
        let (db, registry) = setup(Arc::new(Ean13Symbology::default()), 8).await;
        let a = accessory(&db, "A").await;
        db.products().set_barcode(&a.id, Some("ABC-1")).await.unwrap();

        let barcode = registry.allocate(&ctx(), EntityType::Product, &a.id, None).await.unwrap();

        assert_ne!(barcode, "ABC-1");
        assert!(registry.symbology().is_valid(&barcode));
        let entry = registry.lookup(&barcode).await.unwrap().unwrap();
        assert_eq!(entry.format, "ean13");
        let stored = db.products().get_by_id(&a.id).await.unwrap().unwrap();
        assert_eq!(stored.barcode.as_deref(), Some(barcode.as_str()));
    }

    #[tokio::test]
    async fn test_release_frees_value() {
        let (db, registry) = setup(Arc::new(FixedSymbology(vec!["1111"])), 1).await;
        let product = Product::from_attrs(generate_id(), "Acme", "X1", &ProductAttrs::serialized(), Utc::now());
        db.products().insert(&product).await.unwrap();
        let unit = Unit::from_attrs(generate_id(), &product.id, "SN1", &UnitAttrs::default(), Utc::now());
        db.units().insert(&unit).await.unwrap();
        let other = accessory(&db, "Cable").await;

        registry.allocate(&ctx(), EntityType::Unit, &unit.id, None).await.unwrap();
        let released = registry.release(&ctx(), EntityType::Unit, &unit.id).await.unwrap();
        assert_eq!(released.as_deref(), Some("1111"));
        assert!(db.units().get_by_id(&unit.id).await.unwrap().unwrap().barcode.is_none());

        let reused = registry
            .allocate(&ctx(), EntityType::Product, &other.id, None)
            .await
            .unwrap();
        assert_eq!(reused, "1111");
    }

    #[tokio::test]
    async fn test_allocate_for_missing_entity() {
        let (_db, registry) = setup(Arc::new(Ean13Symbology::default()), 8).await;
        let err = registry
            .allocate(&ctx(), EntityType::Unit, "nope", None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordError::NotFound { .. }));
    }
}
