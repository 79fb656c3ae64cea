//! # Unit Repository
//!
//! Database operations for serialized units.
//!
//! ## Status Updates
//! Status changes are compare-and-set: the `UPDATE` names the status the
//! caller last read, so two writers moving the same unit cannot both win.
//!
//! ```text
//! Writer A (sell):    read reserved ─► UPDATE ... WHERE status='reserved' ✓ 1 row
//! Writer B (release): read reserved ─► UPDATE ... WHERE status='reserved' ✗ 0 rows
//!                                        └─► re-read: sold, release invalid
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use keystock_core::{Money, Pricing, Unit, UnitStatus};

// =============================================================================
// Row Mapping
// =============================================================================

const UNIT_COLUMNS: &str = r#"
    id, product_id, serial_number, barcode, status,
    color, storage_gb, ram_gb, battery_level,
    price_cents, min_price_cents, max_price_cents,
    supplier_id, purchase_cost_cents,
    created_at, updated_at
"#;

#[derive(Debug, sqlx::FromRow)]
struct UnitRow {
    id: String,
    product_id: String,
    serial_number: String,
    barcode: Option<String>,
    status: UnitStatus,
    color: Option<String>,
    storage_gb: Option<i32>,
    ram_gb: Option<i32>,
    battery_level: Option<i32>,
    price_cents: Option<i64>,
    min_price_cents: Option<i64>,
    max_price_cents: Option<i64>,
    supplier_id: Option<String>,
    purchase_cost_cents: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UnitRow> for Unit {
    fn from(row: UnitRow) -> Self {
        Unit {
            id: row.id,
            product_id: row.product_id,
            serial_number: row.serial_number,
            barcode: row.barcode,
            status: row.status,
            color: row.color,
            storage_gb: row.storage_gb,
            ram_gb: row.ram_gb,
            battery_level: row.battery_level,
            pricing: Pricing::from_cents(row.price_cents, row.min_price_cents, row.max_price_cents),
            supplier_id: row.supplier_id,
            purchase_cost: row.purchase_cost_cents.map(Money::from_cents),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Column SQLite reports when `(product_id, serial_number)` is already taken.
pub const NATURAL_KEY: &str = "units.serial_number";

/// Units sharing one `(product_id, serial_number)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateSerialGroup {
    pub product_id: String,
    pub serial_number: String,
    pub unit_ids: Vec<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct DuplicateSerialRow {
    product_id: String,
    serial_number: String,
    unit_ids: String,
}

/// A unit whose product row is gone.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct OrphanedUnitRow {
    pub unit_id: String,
    pub product_id: String,
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for unit database operations.
#[derive(Debug, Clone)]
pub struct UnitRepository {
    pool: SqlitePool,
}

impl UnitRepository {
    /// Creates a new UnitRepository.
    pub fn new(pool: SqlitePool) -> Self {
        UnitRepository { pool }
    }

    /// Inserts a new unit.
    ///
    /// ## Returns
    /// * `Err(DbError::UniqueViolation)` - `(product_id, serial_number)` or barcode taken
    /// * `Err(DbError::ForeignKeyViolation)` - Product does not exist
    pub async fn insert(&self, unit: &Unit) -> DbResult<()> {
        debug!(
            product_id = %unit.product_id,
            serial = %unit.serial_number,
            "Inserting unit"
        );

        sqlx::query(
            r#"
            INSERT INTO units (
                id, product_id, serial_number, barcode, status,
                color, storage_gb, ram_gb, battery_level,
                price_cents, min_price_cents, max_price_cents,
                supplier_id, purchase_cost_cents,
                created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5,
                ?6, ?7, ?8, ?9,
                ?10, ?11, ?12,
                ?13, ?14,
                ?15, ?16
            )
            "#,
        )
        .bind(&unit.id)
        .bind(&unit.product_id)
        .bind(&unit.serial_number)
        .bind(&unit.barcode)
        .bind(unit.status)
        .bind(&unit.color)
        .bind(unit.storage_gb)
        .bind(unit.ram_gb)
        .bind(unit.battery_level)
        .bind(unit.pricing.price.map(|m| m.cents()))
        .bind(unit.pricing.min_price.map(|m| m.cents()))
        .bind(unit.pricing.max_price.map(|m| m.cents()))
        .bind(&unit.supplier_id)
        .bind(unit.purchase_cost.map(|m| m.cents()))
        .bind(unit.created_at)
        .bind(unit.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets a unit by its ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Unit>> {
        let sql = format!("SELECT {UNIT_COLUMNS} FROM units WHERE id = ?1");
        let row = sqlx::query_as::<_, UnitRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Unit::from))
    }

    /// Gets a unit by its natural key.
    pub async fn find_by_natural_key(
        &self,
        product_id: &str,
        serial_number: &str,
    ) -> DbResult<Option<Unit>> {
        debug!(product_id = %product_id, serial = %serial_number, "Looking up unit by natural key");

        let sql = format!(
            "SELECT {UNIT_COLUMNS} FROM units WHERE product_id = ?1 AND serial_number = ?2"
        );
        let row = sqlx::query_as::<_, UnitRow>(&sql)
            .bind(product_id)
            .bind(serial_number)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Unit::from))
    }

    /// Lists a product's units, oldest first.
    pub async fn list_for_product(&self, product_id: &str) -> DbResult<Vec<Unit>> {
        let sql = format!(
            "SELECT {UNIT_COLUMNS} FROM units WHERE product_id = ?1 ORDER BY created_at, id"
        );
        let rows = sqlx::query_as::<_, UnitRow>(&sql)
            .bind(product_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Unit::from).collect())
    }

    /// Counts every unit.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM units")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Counts a product's units in `available`.
    pub async fn count_available(&self, product_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM units WHERE product_id = ?1 AND status = 'available'",
        )
        .bind(product_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Moves a unit from `from` to `to` if it is still in `from`.
    ///
    /// ## Returns
    /// * `Ok(true)` - Status changed
    /// * `Ok(false)` - Unit missing or no longer in `from`
    pub async fn compare_and_set_status(
        &self,
        id: &str,
        from: UnitStatus,
        to: UnitStatus,
    ) -> DbResult<bool> {
        debug!(id = %id, %from, %to, "Updating unit status");

        let result = sqlx::query(
            "UPDATE units SET status = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?2",
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Sets (or clears) the unit's barcode column.
    pub async fn set_barcode(&self, id: &str, barcode: Option<&str>) -> DbResult<()> {
        let result = sqlx::query("UPDATE units SET barcode = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(barcode)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Unit", id));
        }
        Ok(())
    }

    /// Deletes a unit.
    pub async fn delete(&self, id: &str) -> DbResult<()> {
        debug!(id = %id, "Deleting unit");

        let result = sqlx::query("DELETE FROM units WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Unit", id));
        }
        Ok(())
    }

    // =========================================================================
    // Audit Queries
    // =========================================================================

    /// Units whose barcode column is empty or disagrees with the registry.
    pub async fn missing_barcodes(&self) -> DbResult<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT u.id
            FROM units u
            LEFT JOIN barcode_registry r
                   ON r.entity_type = 'unit' AND r.entity_id = u.id
            WHERE u.barcode IS NULL OR r.barcode IS NULL OR r.barcode != u.barcode
            ORDER BY u.created_at, u.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// Groups of units sharing `(product_id, serial_number)`.
    pub async fn duplicate_serials(&self) -> DbResult<Vec<DuplicateSerialGroup>> {
        let rows = sqlx::query_as::<_, DuplicateSerialRow>(
            r#"
            SELECT product_id, serial_number, GROUP_CONCAT(id, ',') AS unit_ids
            FROM units
            GROUP BY product_id, serial_number
            HAVING COUNT(*) > 1
            ORDER BY product_id, serial_number
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let mut unit_ids: Vec<String> =
                    row.unit_ids.split(',').map(str::to_string).collect();
                unit_ids.sort();
                DuplicateSerialGroup {
                    product_id: row.product_id,
                    serial_number: row.serial_number,
                    unit_ids,
                }
            })
            .collect())
    }

    /// Units whose product no longer exists.
    pub async fn orphans(&self) -> DbResult<Vec<OrphanedUnitRow>> {
        let rows = sqlx::query_as::<_, OrphanedUnitRow>(
            r#"
            SELECT u.id AS unit_id, u.product_id
            FROM units u
            LEFT JOIN products p ON p.id = u.product_id
            WHERE p.id IS NULL
            ORDER BY u.created_at, u.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
