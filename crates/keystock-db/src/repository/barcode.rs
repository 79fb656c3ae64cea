//! # Barcode Registry Repository
//!
//! The global `barcode → (entity_type, entity_id)` table.
//!
//! Two constraints do all the work:
//! - `barcode` primary key: a literal value belongs to at most one entity
//! - `UNIQUE(entity_type, entity_id)`: an entity holds at most one barcode

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use keystock_core::{BarcodeEntry, EntityType, Metadata};

#[derive(Debug, sqlx::FromRow)]
struct BarcodeRow {
    barcode: String,
    entity_type: EntityType,
    entity_id: String,
    format: String,
    metadata: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<BarcodeRow> for BarcodeEntry {
    type Error = DbError;

    fn try_from(row: BarcodeRow) -> Result<Self, Self::Error> {
        let metadata = Metadata::from_json(&row.metadata)
            .map_err(|e| DbError::corrupt("barcode", &row.barcode, e))?;

        Ok(BarcodeEntry {
            barcode: row.barcode,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            format: row.format,
            metadata,
            created_at: row.created_at,
        })
    }
}

/// Column name SQLite reports when the literal barcode is taken.
pub const BARCODE_KEY: &str = "barcode_registry.barcode";

/// Column name SQLite reports when the entity already holds a barcode.
pub const ENTITY_KEY: &str = "barcode_registry.entity_id";

/// Repository for the barcode registry.
#[derive(Debug, Clone)]
pub struct BarcodeRepository {
    pool: SqlitePool,
}

impl BarcodeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        BarcodeRepository { pool }
    }

    /// Inserts an entry.
    ///
    /// ## Returns
    /// * `Err(DbError::UniqueViolation)` naming [`BARCODE_KEY`] - value taken
    /// * `Err(DbError::UniqueViolation)` naming [`ENTITY_KEY`] - entity already registered
    pub async fn insert(&self, entry: &BarcodeEntry) -> DbResult<()> {
        debug!(
            barcode = %entry.barcode,
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            "Registering barcode"
        );

        let metadata = entry
            .metadata
            .to_json()
            .map_err(|e| DbError::corrupt("barcode", &entry.barcode, e))?;

        sqlx::query(
            r#"
            INSERT INTO barcode_registry (barcode, entity_type, entity_id, format, metadata, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&entry.barcode)
        .bind(entry.entity_type)
        .bind(&entry.entity_id)
        .bind(&entry.format)
        .bind(metadata)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Looks up the entity holding `barcode`.
    pub async fn lookup(&self, barcode: &str) -> DbResult<Option<BarcodeEntry>> {
        let row = sqlx::query_as::<_, BarcodeRow>(
            r#"
            SELECT barcode, entity_type, entity_id, format, metadata, created_at
            FROM barcode_registry
            WHERE barcode = ?1
            "#,
        )
        .bind(barcode)
        .fetch_optional(&self.pool)
        .await?;

        row.map(BarcodeEntry::try_from).transpose()
    }

    /// Looks up the barcode held by an entity.
    pub async fn find_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> DbResult<Option<BarcodeEntry>> {
        let row = sqlx::query_as::<_, BarcodeRow>(
            r#"
            SELECT barcode, entity_type, entity_id, format, metadata, created_at
            FROM barcode_registry
            WHERE entity_type = ?1 AND entity_id = ?2
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(BarcodeEntry::try_from).transpose()
    }

    /// Removes the entity's entry, returning the released value.
    pub async fn release_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> DbResult<Option<String>> {
        let released: Option<String> = sqlx::query_scalar(
            "DELETE FROM barcode_registry WHERE entity_type = ?1 AND entity_id = ?2 RETURNING barcode",
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;

        debug!(%entity_type, entity_id = %entity_id, ?released, "Released barcode for entity");
        Ok(released)
    }

    /// Removes an entry by value. Returns false if there was none.
    pub async fn release(&self, barcode: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM barcode_registry WHERE barcode = ?1")
            .bind(barcode)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Counts entries.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM barcode_registry")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Entries whose entity no longer exists.
    pub async fn stale_entries(&self) -> DbResult<Vec<BarcodeEntry>> {
        let rows = sqlx::query_as::<_, BarcodeRow>(
            r#"
            SELECT r.barcode, r.entity_type, r.entity_id, r.format, r.metadata, r.created_at
            FROM barcode_registry r
            WHERE (r.entity_type = 'product'
                   AND NOT EXISTS (SELECT 1 FROM products p WHERE p.id = r.entity_id))
               OR (r.entity_type = 'unit'
                   AND NOT EXISTS (SELECT 1 FROM units u WHERE u.id = r.entity_id))
            ORDER BY r.created_at, r.barcode
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(BarcodeEntry::try_from).collect()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    fn entry(barcode: &str, entity_type: EntityType, entity_id: &str) -> BarcodeEntry {
        BarcodeEntry {
            barcode: barcode.to_string(),
            entity_type,
            entity_id: entity_id.to_string(),
            format: "ean13".to_string(),
            metadata: Metadata::default(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.barcodes();
        repo.insert(&entry("2000000000008", EntityType::Unit, "u1"))
            .await
            .unwrap();

        let found = repo.lookup("2000000000008").await.unwrap().unwrap();
        assert_eq!(found.entity_type, EntityType::Unit);
        assert_eq!(found.entity_id, "u1");

        let by_entity = repo.find_by_entity(EntityType::Unit, "u1").await.unwrap();
        assert_eq!(by_entity.map(|e| e.barcode), Some("2000000000008".to_string()));
        assert!(repo.find_by_entity(EntityType::Product, "u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_constraint_names() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.barcodes();
        repo.insert(&entry("A1", EntityType::Unit, "u1")).await.unwrap();

        let taken = repo
            .insert(&entry("A1", EntityType::Unit, "u2"))
            .await
            .unwrap_err();
        assert!(taken.violates(BARCODE_KEY));

        let second = repo
            .insert(&entry("B2", EntityType::Unit, "u1"))
            .await
            .unwrap_err();
        assert!(second.violates(ENTITY_KEY));
    }

    #[tokio::test]
    async fn test_release_and_stale_entries() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.barcodes();
        repo.insert(&entry("A1", EntityType::Product, "gone")).await.unwrap();

        let stale = repo.stale_entries().await.unwrap();
        assert_eq!(stale.len(), 1);

        assert_eq!(
            repo.release_for_entity(EntityType::Product, "gone").await.unwrap(),
            Some("A1".to_string())
        );
        assert!(!repo.release("A1").await.unwrap());
        assert_eq!(repo.count().await.unwrap(), 0);
    }
}
