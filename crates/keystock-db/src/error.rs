//! # Database Error Types
//!
//! Error types for database operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError (this module) ← Classifies constraint / transient / other     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  CoordError (keystock-coord)                                           │
//! │  ├── UniqueViolation on insert  → race lost, re-read the winner        │
//! │  ├── transient                  → StorageUnavailable (retryable)       │
//! │  └── anything else              → Fatal                                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    ///
    /// ## When This Occurs
    /// - An update or delete matched no row
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Two callers racing to create the same `(brand, model)`
    /// - Two callers racing to create the same `(product_id, serial_number)`
    /// - A barcode already held by another entity
    ///
    /// `constraint` holds the columns SQLite reports, e.g.
    /// `units.product_id, units.serial_number`.
    #[error("Unique constraint failed: {constraint}")]
    UniqueViolation { constraint: String },

    /// Foreign key constraint violation.
    ///
    /// ## When This Occurs
    /// - Inserting a unit for a product id that does not exist
    /// - Deleting a product that still owns units
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// Database connection failed.
    ///
    /// ## When This Occurs
    /// - Database file can't be created or opened
    /// - File permissions issue, disk full, I/O error
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The database is busy or locked by another writer.
    #[error("Database busy: {0}")]
    Busy(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed for a reason other than a constraint.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// A stored row could not be turned into a domain value.
    ///
    /// ## When This Occurs
    /// - Metadata column holds a key outside the allow-list
    /// - Status column holds an unknown state
    #[error("Corrupt {entity} row {id}: {reason}")]
    Corrupt {
        entity: String,
        id: String,
        reason: String,
    },

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn corrupt(
        entity: impl Into<String>,
        id: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        DbError::Corrupt {
            entity: entity.into(),
            id: id.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this is a unique-constraint failure.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, DbError::UniqueViolation { .. })
    }

    /// Whether this is a unique-constraint failure naming `column`
    /// (e.g. `"barcode_registry.barcode"`).
    pub fn violates(&self, column: &str) -> bool {
        match self {
            DbError::UniqueViolation { constraint } => {
                constraint.split(", ").any(|c| c.trim() == column)
            }
            _ => false,
        }
    }

    pub fn is_foreign_key_violation(&self) -> bool {
        matches!(self, DbError::ForeignKeyViolation { .. })
    }

    /// Whether the same call could succeed if retried later.
    ///
    /// ## Transient
    /// - Pool exhausted or closed, I/O failures
    /// - `SQLITE_BUSY` / `SQLITE_LOCKED`
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DbError::PoolExhausted | DbError::ConnectionFailed(_) | DbError::Busy(_)
        )
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::Database (unique)      → DbError::UniqueViolation
/// sqlx::Error::Database (foreign key) → DbError::ForeignKeyViolation
/// sqlx::Error::Database (busy/locked) → DbError::Busy
/// sqlx::Error::PoolTimedOut           → DbError::PoolExhausted
/// sqlx::Error::PoolClosed / Io        → DbError::ConnectionFailed
/// Other                               → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message().to_string();

                if db_err.is_unique_violation() || msg.contains("UNIQUE constraint failed") {
                    // "UNIQUE constraint failed: units.product_id, units.serial_number"
                    let constraint = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation { constraint }
                } else if db_err.is_foreign_key_violation()
                    || msg.contains("FOREIGN KEY constraint failed")
                {
                    DbError::ForeignKeyViolation { message: msg }
                } else if is_busy_code(db_err.code().as_deref()) || msg.contains("database is locked")
                {
                    DbError::Busy(msg)
                } else {
                    DbError::QueryFailed(msg)
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            sqlx::Error::Io(io) => DbError::ConnectionFailed(io.to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

/// SQLITE_BUSY (5) and SQLITE_LOCKED (6), including extended codes.
fn is_busy_code(code: Option<&str>) -> bool {
    code.and_then(|c| c.parse::<i32>().ok())
        .map(|c| matches!(c & 0xff, 5 | 6))
        .unwrap_or(false)
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violates_matches_reported_columns() {
        let err = DbError::UniqueViolation {
            constraint: "units.product_id, units.serial_number".to_string(),
        };
        assert!(err.is_unique_violation());
        assert!(err.violates("units.serial_number"));
        assert!(!err.violates("units.barcode"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(DbError::PoolExhausted.is_transient());
        assert!(DbError::Busy("database is locked".into()).is_transient());
        assert!(!DbError::QueryFailed("syntax".into()).is_transient());
        assert!(!DbError::ForeignKeyViolation { message: "fk".into() }.is_transient());
    }

    #[test]
    fn test_busy_codes() {
        assert!(is_busy_code(Some("5")));
        assert!(is_busy_code(Some("517")));
        assert!(is_busy_code(Some("6")));
        assert!(!is_busy_code(Some("19")));
        assert!(!is_busy_code(None));
    }
}
