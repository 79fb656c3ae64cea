//! # Error Types
//!
//! Domain-specific error types for keystock-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  keystock-core errors (this file)                                      │
//! │  ├── CoreError        - Domain rule violations                         │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  keystock-db errors (separate crate)                                   │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  keystock-coord errors                                                 │
//! │  └── CoordError       - What the write paths see                       │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → CoordError ← DbError              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::types::UnitStatus;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A unit status change that the state machine does not allow.
    ///
    /// ## When This Occurs
    /// - Anything leaving `sold` (terminal)
    /// - `reserved → damaged`, `damaged → sold`, ...
    /// - Self-transitions (`available → available`)
    #[error("Cannot move unit from {from} to {to}")]
    InvalidTransition { from: UnitStatus, to: UnitStatus },

    /// A transition that exists but needs administrative authority.
    ///
    /// ## When This Occurs
    /// - `damaged → available` (repair) requested by a regular write path
    #[error("Moving unit from {from} to {to} requires administrative authority")]
    AdministrativeOnly { from: UnitStatus, to: UnitStatus },

    /// Stock cannot be set directly on a product whose stock is derived.
    #[error("Stock of product {product_id} is derived from its units and cannot be set directly")]
    DerivedStock { product_id: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any write so a rejected submission leaves storage untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Invalid format (e.g., invalid UUID, whitespace in a serial).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    /// Duplicate value inside a single submission.
    #[error("{field} '{value}' appears more than once")]
    Duplicate { field: String, value: String },

    /// Minimum price must be strictly below maximum price.
    #[error("min price {min} must be lower than max price {max}")]
    PriceRange { min: i64, max: i64 },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_error_messages() {
        let err = CoreError::InvalidTransition {
            from: UnitStatus::Sold,
            to: UnitStatus::Available,
        };
        assert_eq!(err.to_string(), "Cannot move unit from sold to available");

        let err = CoreError::AdministrativeOnly {
            from: UnitStatus::Damaged,
            to: UnitStatus::Available,
        };
        assert!(err.to_string().contains("administrative"));
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "brand".to_string(),
        };
        assert_eq!(err.to_string(), "brand is required");

        let err = ValidationError::Duplicate {
            field: "serial_number".to_string(),
            value: "SN1".to_string(),
        };
        assert_eq!(err.to_string(), "serial_number 'SN1' appears more than once");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "model".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
