//! # Product Repository
//!
//! Database operations for products.
//!
//! ## Key Operations
//! - Natural-key lookup `(brand, model)`
//! - Unique-constrained insert
//! - Stock recomputation from units in a single statement
//! - Per-product unit statistics for the auditor
//!
//! ## Stock Recomputation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    How stock is derived                                 │
//! │                                                                         │
//! │  ❌ WRONG: counters (drift from partial writes, double counting)       │
//! │     UPDATE products SET stock = stock - 1 WHERE id = ?                 │
//! │                                                                         │
//! │  ✅ CORRECT: recount in one statement                                  │
//! │     UPDATE products                                                    │
//! │     SET stock = (SELECT COUNT(*) FROM units                            │
//! │                  WHERE product_id = ? AND status = 'available')        │
//! │                                                                         │
//! │  Idempotent: calling it twice, or from two writers, converges.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use keystock_core::{Metadata, Pricing, Product};

// =============================================================================
// Row Mapping
// =============================================================================

const PRODUCT_COLUMNS: &str = r#"
    id, brand, model, has_serialized_units, stock, threshold,
    price_cents, min_price_cents, max_price_cents,
    barcode, category, description, supplier, year, metadata,
    created_at, updated_at
"#;

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: String,
    brand: String,
    model: String,
    has_serialized_units: bool,
    stock: i64,
    threshold: i64,
    price_cents: Option<i64>,
    min_price_cents: Option<i64>,
    max_price_cents: Option<i64>,
    barcode: Option<String>,
    category: Option<String>,
    description: Option<String>,
    supplier: Option<String>,
    year: Option<i32>,
    metadata: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProductRow> for Product {
    type Error = DbError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        let metadata =
            Metadata::from_json(&row.metadata).map_err(|e| DbError::corrupt("product", &row.id, e))?;

        Ok(Product {
            pricing: Pricing::from_cents(row.price_cents, row.min_price_cents, row.max_price_cents),
            id: row.id,
            brand: row.brand,
            model: row.model,
            has_serialized_units: row.has_serialized_units,
            stock: row.stock,
            threshold: row.threshold,
            barcode: row.barcode,
            category: row.category,
            description: row.description,
            supplier: row.supplier,
            year: row.year,
            metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Column SQLite reports when `(brand, model)` is already taken.
pub const NATURAL_KEY: &str = "products.model";

/// Unit counts for one product, as seen by the auditor.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ProductUnitStats {
    pub product_id: String,
    pub has_serialized_units: bool,
    pub stock: i64,
    pub unit_count: i64,
    pub available_count: i64,
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for product database operations.
///
/// ## Usage
/// ```rust,ignore
/// let repo = ProductRepository::new(pool);
///
/// let existing = repo.find_by_natural_key("Acme", "X1").await?;
/// let new_stock = repo.recompute_stock(&product_id).await?;
/// ```
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Inserts a new product.
    ///
    /// ## Returns
    /// * `Ok(())` - Inserted
    /// * `Err(DbError::UniqueViolation)` - `(brand, model)` or barcode taken
    pub async fn insert(&self, product: &Product) -> DbResult<()> {
        debug!(brand = %product.brand, model = %product.model, "Inserting product");

        let metadata = product
            .metadata
            .to_json()
            .map_err(|e| DbError::corrupt("product", &product.id, e))?;

        sqlx::query(
            r#"
            INSERT INTO products (
                id, brand, model, has_serialized_units, stock, threshold,
                price_cents, min_price_cents, max_price_cents,
                barcode, category, description, supplier, year, metadata,
                created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6,
                ?7, ?8, ?9,
                ?10, ?11, ?12, ?13, ?14, ?15,
                ?16, ?17
            )
            "#,
        )
        .bind(&product.id)
        .bind(&product.brand)
        .bind(&product.model)
        .bind(product.has_serialized_units)
        .bind(product.stock)
        .bind(product.threshold)
        .bind(product.pricing.price.map(|m| m.cents()))
        .bind(product.pricing.min_price.map(|m| m.cents()))
        .bind(product.pricing.max_price.map(|m| m.cents()))
        .bind(&product.barcode)
        .bind(&product.category)
        .bind(&product.description)
        .bind(&product.supplier)
        .bind(product.year)
        .bind(metadata)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets a product by its ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1");
        let row = sqlx::query_as::<_, ProductRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Product::try_from).transpose()
    }

    /// Gets a product by its natural key. Case-sensitive exact match.
    pub async fn find_by_natural_key(&self, brand: &str, model: &str) -> DbResult<Option<Product>> {
        debug!(brand = %brand, model = %model, "Looking up product by natural key");

        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE brand = ?1 AND model = ?2");
        let row = sqlx::query_as::<_, ProductRow>(&sql)
            .bind(brand)
            .bind(model)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Product::try_from).transpose()
    }

    /// Lists every product, oldest first.
    pub async fn list_all(&self) -> DbResult<Vec<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products ORDER BY created_at, id");
        let rows = sqlx::query_as::<_, ProductRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Product::try_from).collect()
    }

    /// Counts products.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Sets the `has_serialized_units` flag.
    pub async fn set_serialized_flag(&self, id: &str, flag: bool) -> DbResult<()> {
        debug!(id = %id, flag, "Setting serialized flag");

        let result = sqlx::query(
            "UPDATE products SET has_serialized_units = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(flag)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", id));
        }
        Ok(())
    }

    /// Writes a caller-supplied stock level.
    ///
    /// Only applies to non-serialized products: the flag is part of the
    /// `WHERE` clause so a concurrent flip to serialized wins.
    ///
    /// ## Returns
    /// * `Ok(true)` - Stock written
    /// * `Ok(false)` - Product missing or serialized
    pub async fn set_direct_stock(&self, id: &str, stock: i64) -> DbResult<bool> {
        debug!(id = %id, stock, "Setting direct stock");

        let result = sqlx::query(
            r#"
            UPDATE products
            SET stock = ?2, updated_at = ?3
            WHERE id = ?1 AND has_serialized_units = 0
            "#,
        )
        .bind(id)
        .bind(stock)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Recomputes a serialized product's stock from its available units.
    ///
    /// ## Returns
    /// * `Ok(Some(stock))` - The stored value changed to `stock`
    /// * `Ok(None)` - Already correct, product not serialized, or missing
    pub async fn recompute_stock(&self, id: &str) -> DbResult<Option<i64>> {
        let new_stock: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET stock = (
                    SELECT COUNT(*) FROM units
                    WHERE units.product_id = products.id AND units.status = 'available'
                ),
                updated_at = ?2
            WHERE id = ?1
              AND has_serialized_units = 1
              AND stock != (
                    SELECT COUNT(*) FROM units
                    WHERE units.product_id = products.id AND units.status = 'available'
                )
            RETURNING stock
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        debug!(id = %id, ?new_stock, "Recomputed stock");
        Ok(new_stock)
    }

    /// Sets (or clears) the product's barcode column.
    pub async fn set_barcode(&self, id: &str, barcode: Option<&str>) -> DbResult<()> {
        let result = sqlx::query("UPDATE products SET barcode = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(barcode)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", id));
        }
        Ok(())
    }

    /// Deletes a product.
    ///
    /// ## Returns
    /// * `Err(DbError::ForeignKeyViolation)` - Product still owns units
    /// * `Err(DbError::NotFound)` - No such product
    pub async fn delete(&self, id: &str) -> DbResult<()> {
        debug!(id = %id, "Deleting product");

        let result = sqlx::query("DELETE FROM products WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", id));
        }
        Ok(())
    }

    /// Non-serialized products whose barcode column is empty or disagrees
    /// with the registry.
    pub async fn missing_barcodes(&self) -> DbResult<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT p.id
            FROM products p
            LEFT JOIN barcode_registry r
                   ON r.entity_type = 'product' AND r.entity_id = p.id
            WHERE p.has_serialized_units = 0
              AND (p.barcode IS NULL OR r.barcode IS NULL OR r.barcode != p.barcode)
            ORDER BY p.created_at, p.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// Unit statistics for every product, in one pass.
    pub async fn unit_stats(&self) -> DbResult<Vec<ProductUnitStats>> {
        let stats = sqlx::query_as::<_, ProductUnitStats>(
            r#"
            SELECT
                p.id AS product_id,
                p.has_serialized_units,
                p.stock,
                COUNT(u.id) AS unit_count,
                COALESCE(SUM(CASE WHEN u.status = 'available' THEN 1 ELSE 0 END), 0) AS available_count
            FROM products p
            LEFT JOIN units u ON u.product_id = p.id
            GROUP BY p.id
            ORDER BY p.created_at, p.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(stats)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::generate_id;
    use crate::{Database, DbConfig};
    use keystock_core::ProductAttrs;

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn product(brand: &str, model: &str, attrs: &ProductAttrs) -> Product {
        Product::from_attrs(generate_id(), brand, model, attrs, Utc::now())
    }

    #[tokio::test]
    async fn test_insert_and_find_by_natural_key() {
        let db = db().await;
        let repo = db.products();
        let attrs = ProductAttrs {
            category: Some("phones".to_string()),
            price_cents: Some(49_900),
            ..ProductAttrs::default()
        };
        let p = product("Acme", "X1", &attrs);
        repo.insert(&p).await.unwrap();

        let found = repo.find_by_natural_key("Acme", "X1").await.unwrap().unwrap();
        assert_eq!(found.id, p.id);
        assert_eq!(found.category.as_deref(), Some("phones"));
        assert_eq!(found.pricing, p.pricing);

        // Case-sensitive
        assert!(repo.find_by_natural_key("acme", "X1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_natural_key_is_unique_violation() {
        let db = db().await;
        let repo = db.products();
        repo.insert(&product("Acme", "X1", &ProductAttrs::default()))
            .await
            .unwrap();

        let err = repo
            .insert(&product("Acme", "X1", &ProductAttrs::default()))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
        assert!(err.violates(NATURAL_KEY));
    }

    #[tokio::test]
    async fn test_direct_stock_only_for_non_serialized() {
        let db = db().await;
        let repo = db.products();

        let plain = product("Acme", "Cable", &ProductAttrs::default());
        let serialized = product("Acme", "Phone", &ProductAttrs::serialized());
        repo.insert(&plain).await.unwrap();
        repo.insert(&serialized).await.unwrap();

        assert!(repo.set_direct_stock(&plain.id, 40).await.unwrap());
        assert!(!repo.set_direct_stock(&serialized.id, 40).await.unwrap());
        assert!(!repo.set_direct_stock("missing", 40).await.unwrap());

        assert_eq!(repo.get_by_id(&plain.id).await.unwrap().unwrap().stock, 40);
        assert_eq!(repo.get_by_id(&serialized.id).await.unwrap().unwrap().stock, 0);
    }

    #[tokio::test]
    async fn test_recompute_stock_ignores_non_serialized() {
        let db = db().await;
        let repo = db.products();
        let plain = product("Acme", "Cable", &ProductAttrs {
            stock: 7,
            ..ProductAttrs::default()
        });
        repo.insert(&plain).await.unwrap();

        assert_eq!(repo.recompute_stock(&plain.id).await.unwrap(), None);
        assert_eq!(repo.get_by_id(&plain.id).await.unwrap().unwrap().stock, 7);
    }

    #[tokio::test]
    async fn test_missing_barcodes_lists_plain_products_only() {
        let db = db().await;
        let repo = db.products();
        let plain = product("Acme", "Cable", &ProductAttrs::default());
        let serialized = product("Acme", "Phone", &ProductAttrs::serialized());
        repo.insert(&plain).await.unwrap();
        repo.insert(&serialized).await.unwrap();

        assert_eq!(repo.missing_barcodes().await.unwrap(), vec![plain.id.clone()]);
    }

    #[tokio::test]
    async fn test_delete_missing_product() {
        let db = db().await;
        let err = db.products().delete("nope").await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }
}
