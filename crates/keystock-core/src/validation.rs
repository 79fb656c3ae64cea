//! # Validation Module
//!
//! Input checks run by the coordinator before it touches storage.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Write path (supplier / inventory)                            │
//! │  └── Form-level checks, outside this repository                        │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Coordinator (Rust)                                           │
//! │  ├── Attribute allow-list (ProductAttrs::from_untyped)                 │
//! │  └── THIS MODULE: field and batch rules                                │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── UNIQUE(brand, model), UNIQUE(product_id, serial_number)           │
//! │  ├── UNIQUE(barcode) on units and the registry                         │
//! │  └── Foreign key units.product_id → products.id                        │
//! │                                                                         │
//! │  A submission rejected here leaves storage untouched.                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust,no_run
//! use keystock_core::validation::{validate_natural_key, validate_unique_serials};
//!
//! validate_natural_key("Acme", "X1").unwrap();
//! validate_unique_serials(["SN1", "SN2"]).unwrap();
//! ```

use std::collections::HashSet;

use crate::error::ValidationError;
use crate::types::{ProductAttrs, UnitAttrs};
use crate::{MAX_BATCH_UNITS, MAX_BATTERY_LEVEL};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Maximum length of brand and model.
pub const MAX_KEY_LEN: usize = 120;

/// Maximum length of a serial number.
pub const MAX_SERIAL_LEN: usize = 64;

/// Maximum length of a caller-supplied barcode candidate.
pub const MAX_BARCODE_LEN: usize = 48;

// =============================================================================
// Natural Keys
// =============================================================================

fn validate_key_part(field: &str, value: &str, max: usize) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.len() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }

    // Keys are compared byte-exact, so padding would create look-alike rows
    if value.trim() != value {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must not start or end with whitespace".to_string(),
        });
    }

    Ok(())
}

/// Validates a product natural key `(brand, model)`.
///
/// ## Rules
/// - Both parts required and at most [`MAX_KEY_LEN`] bytes
/// - No leading/trailing whitespace (matching is case-sensitive and exact)
///
/// ## Example
/// ```rust
/// use keystock_core::validation::validate_natural_key;
///
/// assert!(validate_natural_key("Acme", "X1").is_ok());
/// assert!(validate_natural_key("", "X1").is_err());
/// assert!(validate_natural_key("Acme", " X1").is_err());
/// ```
pub fn validate_natural_key(brand: &str, model: &str) -> ValidationResult<()> {
    validate_key_part("brand", brand, MAX_KEY_LEN)?;
    validate_key_part("model", model, MAX_KEY_LEN)
}

/// Validates a unit serial number.
///
/// ## Rules
/// - Required, at most [`MAX_SERIAL_LEN`] bytes
/// - No whitespace anywhere
pub fn validate_serial_number(serial: &str) -> ValidationResult<()> {
    validate_key_part("serial_number", serial, MAX_SERIAL_LEN)?;

    if serial.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidFormat {
            field: "serial_number".to_string(),
            reason: "must not contain whitespace".to_string(),
        });
    }

    Ok(())
}

/// Validates a caller-supplied barcode candidate.
///
/// Symbology-specific checks belong to the encoder; this only rejects values
/// that could never be a barcode.
pub fn validate_barcode(barcode: &str) -> ValidationResult<()> {
    if barcode.is_empty() {
        return Err(ValidationError::Required {
            field: "barcode".to_string(),
        });
    }

    if barcode.len() > MAX_BARCODE_LEN {
        return Err(ValidationError::TooLong {
            field: "barcode".to_string(),
            max: MAX_BARCODE_LEN,
        });
    }

    if !barcode.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(ValidationError::InvalidFormat {
            field: "barcode".to_string(),
            reason: "must contain only ASCII letters, digits and hyphens".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

fn validate_non_negative(field: &str, value: i64) -> ValidationResult<()> {
    if value < 0 {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: i64::MAX,
        });
    }
    Ok(())
}

/// Stock must be >= 0.
pub fn validate_stock(stock: i64) -> ValidationResult<()> {
    validate_non_negative("stock", stock)
}

/// Threshold must be >= 0.
pub fn validate_threshold(threshold: i64) -> ValidationResult<()> {
    validate_non_negative("threshold", threshold)
}

/// Battery level must be within 0..=100.
///
/// ## Example
/// ```rust
/// use keystock_core::validation::validate_battery_level;
///
/// assert!(validate_battery_level(87).is_ok());
/// assert!(validate_battery_level(101).is_err());
/// ```
pub fn validate_battery_level(level: i32) -> ValidationResult<()> {
    if !(0..=MAX_BATTERY_LEVEL).contains(&level) {
        return Err(ValidationError::OutOfRange {
            field: "battery_level".to_string(),
            min: 0,
            max: MAX_BATTERY_LEVEL as i64,
        });
    }
    Ok(())
}

// =============================================================================
// Attribute Validators
// =============================================================================

/// Validates creation-time product attributes.
pub fn validate_product_attrs(attrs: &ProductAttrs) -> ValidationResult<()> {
    validate_stock(attrs.stock)?;
    validate_threshold(attrs.threshold)?;
    attrs.pricing().validate()?;

    if let Some(barcode) = &attrs.barcode {
        validate_barcode(barcode)?;
    }

    if let Some(year) = attrs.year {
        if !(1900..=9999).contains(&year) {
            return Err(ValidationError::OutOfRange {
                field: "year".to_string(),
                min: 1900,
                max: 9999,
            });
        }
    }

    Ok(())
}

/// Validates creation-time unit attributes.
pub fn validate_unit_attrs(attrs: &UnitAttrs) -> ValidationResult<()> {
    if let Some(level) = attrs.battery_level {
        validate_battery_level(level)?;
    }

    for (field, value) in [("storage_gb", attrs.storage_gb), ("ram_gb", attrs.ram_gb)] {
        if let Some(v) = value {
            validate_non_negative(field, v as i64)?;
        }
    }

    if let Some(cost) = attrs.purchase_cost_cents {
        validate_non_negative("purchase_cost", cost)?;
    }

    attrs.pricing().validate()?;

    if let Some(barcode) = &attrs.barcode {
        validate_barcode(barcode)?;
    }

    Ok(())
}

// =============================================================================
// Collection Validators
// =============================================================================

/// Rejects a batch whose serials repeat, or which exceeds [`MAX_BATCH_UNITS`].
///
/// Runs before the first write of an intake so a malformed delivery never
/// half-lands.
///
/// ## Example
/// ```rust
/// use keystock_core::validation::validate_unique_serials;
///
/// assert!(validate_unique_serials(["SN1", "SN2"]).is_ok());
/// assert!(validate_unique_serials(["SN1", "SN1"]).is_err());
/// ```
pub fn validate_unique_serials<'a, I>(serials: I) -> ValidationResult<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();

    for serial in serials {
        if seen.len() >= MAX_BATCH_UNITS {
            return Err(ValidationError::OutOfRange {
                field: "units".to_string(),
                min: 0,
                max: MAX_BATCH_UNITS as i64,
            });
        }
        if !seen.insert(serial) {
            return Err(ValidationError::Duplicate {
                field: "serial_number".to_string(),
                value: serial.to_string(),
            });
        }
    }

    Ok(())
}

// =============================================================================
// UUID Validators
// =============================================================================

/// Validates a UUID string format.
///
/// ## Example
/// ```rust
/// use keystock_core::validation::validate_uuid;
///
/// assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_uuid("not-a-uuid").is_err());
/// ```
pub fn validate_uuid(id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "id".to_string(),
        });
    }

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: "id".to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
