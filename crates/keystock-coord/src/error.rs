//! # Coordinator Error Types
//!
//! What the two write paths see when a coordinator call fails.
//!
//! ## Error Taxonomy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Coordinator Error Categories                        │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Caller input  │  │   Transient     │  │     Fatal               │ │
//! │  │                 │  │   (retryable)   │  │                         │ │
//! │  │ ValidationFailed│  │ StorageUnavail. │  │ Fatal (constraint other │ │
//! │  │ NotFound        │  │ ConcurrentMod.  │  │  than the expected race)│ │
//! │  │ InvalidTransit. │  │ DeadlineExceeded│  │ BarcodeExhausted        │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  Not errors:                                                            │
//! │  • a lost creation race (handled internally, winner returned)          │
//! │  • integrity violations (reported as findings by the auditor)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use thiserror::Error;

use keystock_core::{CoreError, EntityType, UnitStatus, ValidationError};
use keystock_db::DbError;

/// Result type alias for coordinator operations.
pub type CoordResult<T> = Result<T, CoordError>;

/// Coordinator error type.
#[derive(Debug, Error)]
pub enum CoordError {
    // =========================================================================
    // Caller Input
    // =========================================================================
    /// Bad input, rejected before any write.
    ///
    /// ## When This Occurs
    /// - Duplicate serial inside one submitted batch
    /// - Empty brand/model, battery level above 100, min price >= max price
    /// - Direct stock write on a serialized product
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// The entity an operation names does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A unit status change the state machine rejects.
    #[error("{0}")]
    InvalidTransition(CoreError),

    // =========================================================================
    // Transient
    // =========================================================================
    /// Storage could not be reached. The caller owns the retry policy.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The entity kept changing underneath a compare-and-set.
    #[error("Unit {unit_id} changed concurrently (now {observed})")]
    ConcurrentModification {
        unit_id: String,
        observed: UnitStatus,
    },

    /// The operation's deadline passed before it finished.
    #[error("Deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    // =========================================================================
    // Fatal
    // =========================================================================
    /// A constraint failure other than the expected uniqueness race, or a
    /// state the coordinator's contract says cannot happen.
    ///
    /// ## When This Occurs
    /// - Foreign key violation (unit for a missing product)
    /// - Uniqueness violation whose winner cannot be re-read
    /// - Corrupt stored row
    #[error("Fatal: {0}")]
    Fatal(String),

    /// Every barcode candidate collided with another entity.
    #[error("No free barcode for {entity_type} {entity_id} after {attempts} attempts")]
    BarcodeExhausted {
        entity_type: EntityType,
        entity_id: String,
        attempts: u32,
    },

    // =========================================================================
    // Setup
    // =========================================================================
    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CoordError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        CoordError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Returns true if the same call may succeed when retried.
    ///
    /// ## Retryable Errors
    /// - Storage unavailable (busy, pool exhausted, I/O)
    /// - Concurrent modification
    /// - Deadline exceeded
    ///
    /// ## Non-Retryable Errors
    /// - Validation, invalid transitions, not found
    /// - Fatal constraint failures, barcode exhaustion, configuration
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordError::StorageUnavailable(_)
                | CoordError::ConcurrentModification { .. }
                | CoordError::DeadlineExceeded(_)
        )
    }

    /// Returns true if the caller supplied something wrong.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            CoordError::ValidationFailed(_)
                | CoordError::NotFound { .. }
                | CoordError::InvalidTransition(_)
        )
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

/// Storage errors reaching this point were not handled as an expected race.
///
/// ```text
/// transient (busy, pool, I/O) → StorageUnavailable
/// NotFound                    → NotFound
/// everything else             → Fatal
/// ```
impl From<DbError> for CoordError {
    fn from(err: DbError) -> Self {
        if err.is_transient() {
            return CoordError::StorageUnavailable(err.to_string());
        }
        match err {
            DbError::NotFound { entity, id } => CoordError::NotFound { entity, id },
            other => CoordError::Fatal(other.to_string()),
        }
    }
}

impl From<CoreError> for CoordError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(v) => CoordError::ValidationFailed(v.to_string()),
            CoreError::DerivedStock { .. } => CoordError::ValidationFailed(err.to_string()),
            transition => CoordError::InvalidTransition(transition),
        }
    }
}

impl From<ValidationError> for CoordError {
    fn from(err: ValidationError) -> Self {
        CoordError::ValidationFailed(err.to_string())
    }
}

impl From<std::io::Error> for CoordError {
    fn from(err: std::io::Error) -> Self {
        CoordError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for CoordError {
    fn from(err: toml::de::Error) -> Self {
        CoordError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for CoordError {
    fn from(err: toml::ser::Error) -> Self {
        CoordError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(CoordError::StorageUnavailable("busy".into()).is_retryable());
        assert!(CoordError::DeadlineExceeded(Duration::from_millis(50)).is_retryable());
        assert!(CoordError::ConcurrentModification {
            unit_id: "u1".into(),
            observed: UnitStatus::Sold,
        }
        .is_retryable());

        assert!(!CoordError::ValidationFailed("dup".into()).is_retryable());
        assert!(!CoordError::Fatal("fk".into()).is_retryable());
    }

    #[test]
    fn test_db_error_mapping() {
        let transient: CoordError = DbError::PoolExhausted.into();
        assert!(matches!(transient, CoordError::StorageUnavailable(_)));

        let fk: CoordError = DbError::ForeignKeyViolation {
            message: "FOREIGN KEY constraint failed".into(),
        }
        .into();
        assert!(matches!(fk, CoordError::Fatal(_)));

        let missing: CoordError = DbError::not_found("Unit", "u1").into();
        assert!(matches!(missing, CoordError::NotFound { .. }));
    }

    #[test]
    fn test_core_error_mapping() {
        let err: CoordError = CoreError::InvalidTransition {
            from: UnitStatus::Sold,
            to: UnitStatus::Available,
        }
        .into();
        assert!(matches!(err, CoordError::InvalidTransition(_)));
        assert!(err.is_caller_error());
        assert_eq!(err.to_string(), "Cannot move unit from sold to available");

        let err: CoordError = ValidationError::Required {
            field: "brand".into(),
        }
        .into();
        assert!(matches!(err, CoordError::ValidationFailed(_)));
    }
}
