//! # Domain Types
//!
//! Core domain types shared by the resolver, the registry and the auditor.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────────┐        ┌─────────────────────┐                 │
//! │  │      Product        │ 1    * │        Unit         │                 │
//! │  │  ─────────────────  │◄───────│  ─────────────────  │                 │
//! │  │  id (UUID)          │        │  id (UUID)          │                 │
//! │  │  (brand, model) key │        │  product_id (owner) │                 │
//! │  │  has_serialized_... │        │  serial_number      │                 │
//! │  │  stock (derived?)   │        │  status             │                 │
//! │  │  barcode?           │        │  barcode            │                 │
//! │  └─────────────────────┘        └─────────────────────┘                 │
//! │             ▲                              ▲                            │
//! │             └──────────────┬───────────────┘                            │
//! │                 ┌──────────┴──────────┐                                 │
//! │                 │    BarcodeEntry     │  barcode → (entity type, id)    │
//! │                 └─────────────────────┘                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every entity has:
//! - `id`: UUID v4 - opaque, assigned at creation, used for relations
//! - Natural key: `(brand, model)` for products, `(product_id, serial_number)`
//!   for units - used for idempotent resolution

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::{Money, Pricing};
use crate::METADATA_KEYS;

// =============================================================================
// Unit Status
// =============================================================================

/// Lifecycle state of a serialized unit.
///
/// ## State Machine
/// ```text
///                 ┌──────────── release ────────────┐
///                 ▼                                 │
///   ┌─────────────────────┐    reserve    ┌─────────┴─────────┐
///   │      available      │──────────────►│     reserved      │
///   │      (initial)      │               └─────────┬─────────┘
///   └──┬──────────────┬───┘                         │ sell
///      │ sell         │ damage                      ▼
///      │              ▼                   ┌───────────────────┐
///      │    ┌───────────────────┐         │       sold        │
///      │    │      damaged      │         │    (terminal)     │
///      │    └─────────┬─────────┘         └───────────────────┘
///      │              │ repair (administrative only)     ▲
///      │              └──────────► available             │
///      └─────────────────────────────────────────────────┘
/// ```
///
/// Only `available` units count toward a serialized product's stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// On the shelf and sellable.
    Available,
    /// Held for a customer.
    Reserved,
    /// Sold. Terminal under normal operation.
    Sold,
    /// Out of circulation until repaired.
    Damaged,
}

impl Default for UnitStatus {
    fn default() -> Self {
        UnitStatus::Available
    }
}

impl UnitStatus {
    /// All states, in declaration order.
    pub const ALL: [UnitStatus; 4] = [
        UnitStatus::Available,
        UnitStatus::Reserved,
        UnitStatus::Sold,
        UnitStatus::Damaged,
    ];

    /// Lowercase name, as stored in the database.
    pub const fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Available => "available",
            UnitStatus::Reserved => "reserved",
            UnitStatus::Sold => "sold",
            UnitStatus::Damaged => "damaged",
        }
    }

    /// Returns true if a unit in this state counts toward derived stock.
    #[inline]
    pub const fn counts_toward_stock(&self) -> bool {
        matches!(self, UnitStatus::Available)
    }

    /// Returns true if no transition leaves this state.
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, UnitStatus::Sold)
    }

    /// Authority required for `self → to`, or `None` if the edge does not exist.
    pub const fn required_authority(&self, to: UnitStatus) -> Option<Authority> {
        use UnitStatus::*;
        match (*self, to) {
            (Available, Reserved) | (Available, Sold) | (Available, Damaged) => {
                Some(Authority::Operational)
            }
            (Reserved, Available) | (Reserved, Sold) => Some(Authority::Operational),
            (Damaged, Available) => Some(Authority::Administrative),
            _ => None,
        }
    }

    /// Checks a transition against the state machine.
    ///
    /// ## Example
    /// ```rust
    /// use keystock_core::{Authority, UnitStatus};
    ///
    /// assert!(UnitStatus::Reserved.check_transition(UnitStatus::Available, Authority::Operational).is_ok());
    /// assert!(UnitStatus::Damaged.check_transition(UnitStatus::Available, Authority::Operational).is_err());
    /// assert!(UnitStatus::Damaged.check_transition(UnitStatus::Available, Authority::Administrative).is_ok());
    /// ```
    pub fn check_transition(&self, to: UnitStatus, authority: Authority) -> CoreResult<()> {
        match self.required_authority(to) {
            None => Err(CoreError::InvalidTransition { from: *self, to }),
            Some(required) if authority < required => {
                Err(CoreError::AdministrativeOnly { from: *self, to })
            }
            Some(_) => Ok(()),
        }
    }

    /// Boolean form of [`UnitStatus::check_transition`].
    pub fn can_transition_to(&self, to: UnitStatus, authority: Authority) -> bool {
        self.check_transition(to, authority).is_ok()
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UnitStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| ValidationError::NotAllowed {
                field: "status".to_string(),
                allowed: UnitStatus::ALL.iter().map(|s| s.as_str().to_string()).collect(),
            })
    }
}

// =============================================================================
// Authority
// =============================================================================

/// Who is asking for a status transition.
///
/// Ordered: `Administrative` may do everything `Operational` may.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Authority {
    /// Regular write paths (supplier intake, inventory management).
    Operational,
    /// Explicit administrative action (repairs, compensations).
    Administrative,
}

// =============================================================================
// Entity Type
// =============================================================================

/// Kind of entity a barcode can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Product,
    Unit,
}

impl EntityType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            EntityType::Product => "product",
            EntityType::Unit => "unit",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Source
// =============================================================================

/// Which write path produced a call (and therefore an event).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Supplier acquisition workflow.
    Supplier,
    /// Inventory management workflow.
    Inventory,
    /// The integrity auditor's repair pass.
    Auditor,
    /// Explicit administrative action.
    Admin,
}

impl Source {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Source::Supplier => "supplier",
            Source::Inventory => "inventory",
            Source::Auditor => "auditor",
            Source::Admin => "admin",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "supplier" => Ok(Source::Supplier),
            "inventory" => Ok(Source::Inventory),
            "auditor" => Ok(Source::Auditor),
            "admin" => Ok(Source::Admin),
            _ => Err(ValidationError::NotAllowed {
                field: "source".to_string(),
                allowed: vec![
                    "supplier".to_string(),
                    "inventory".to_string(),
                    "auditor".to_string(),
                    "admin".to_string(),
                ],
            }),
        }
    }
}

// =============================================================================
// Metadata
// =============================================================================

/// Maximum length of a single metadata value.
pub const MAX_METADATA_VALUE_LEN: usize = 500;

/// String key/value bag whose keys must belong to [`METADATA_KEYS`].
///
/// Deserialization goes through the same check as [`Metadata::insert`], so a
/// stored row can never carry a key outside the allow-list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    pub fn new() -> Self {
        Metadata::default()
    }

    /// Inserts a value after checking the key against the allow-list.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ValidationError> {
        let key = key.into();
        let value = value.into();

        if !METADATA_KEYS.contains(&key.as_str()) {
            return Err(ValidationError::NotAllowed {
                field: format!("metadata.{}", key),
                allowed: METADATA_KEYS.iter().map(|k| k.to_string()).collect(),
            });
        }
        if value.len() > MAX_METADATA_VALUE_LEN {
            return Err(ValidationError::TooLong {
                field: format!("metadata.{}", key),
                max: MAX_METADATA_VALUE_LEN,
            });
        }

        self.0.insert(key, value);
        Ok(())
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Result<Self, ValidationError> {
        self.insert(key, value)?;
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// JSON text for a TEXT column.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.0)
    }

    /// Parses a TEXT column. Empty text is an empty bag.
    pub fn from_json(raw: &str) -> Result<Self, ValidationError> {
        if raw.trim().is_empty() {
            return Ok(Metadata::default());
        }
        let map: BTreeMap<String, String> =
            serde_json::from_str(raw).map_err(|e| ValidationError::InvalidFormat {
                field: "metadata".to_string(),
                reason: e.to_string(),
            })?;
        Metadata::try_from(map)
    }
}

impl TryFrom<BTreeMap<String, String>> for Metadata {
    type Error = ValidationError;

    fn try_from(map: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        let mut metadata = Metadata::default();
        for (key, value) in map {
            metadata.insert(key, value)?;
        }
        Ok(metadata)
    }
}

impl From<Metadata> for BTreeMap<String, String> {
    fn from(metadata: Metadata) -> Self {
        metadata.0
    }
}

// =============================================================================
// Product
// =============================================================================

/// A catalog product, identified naturally by `(brand, model)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Product {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Natural key, part 1. Case-sensitive.
    pub brand: String,

    /// Natural key, part 2. Case-sensitive.
    pub model: String,

    /// When true, `stock` is derived from available units.
    pub has_serialized_units: bool,

    /// Stock level. Authoritative only for non-serialized products.
    pub stock: i64,

    /// Low-stock threshold.
    pub threshold: i64,

    /// Default pricing inherited by units.
    pub pricing: Pricing,

    /// Barcode. Only meaningful for non-serialized products.
    pub barcode: Option<String>,

    pub category: Option<String>,
    pub description: Option<String>,
    pub supplier: Option<String>,
    pub year: Option<i32>,

    #[ts(type = "Record<string, string>")]
    pub metadata: Metadata,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Builds a new product from resolution-time attributes.
    ///
    /// The attribute barcode is not copied here: barcodes are only ever
    /// written through the registry. A serialized product starts with zero
    /// stock because its stock is derived.
    pub fn from_attrs(
        id: String,
        brand: &str,
        model: &str,
        attrs: &ProductAttrs,
        now: DateTime<Utc>,
    ) -> Self {
        Product {
            id,
            brand: brand.to_string(),
            model: model.to_string(),
            has_serialized_units: attrs.has_serialized_units,
            stock: if attrs.has_serialized_units { 0 } else { attrs.stock },
            threshold: attrs.threshold,
            pricing: attrs.pricing(),
            barcode: None,
            category: attrs.category.clone(),
            description: attrs.description.clone(),
            supplier: attrs.supplier.clone(),
            year: attrs.year,
            metadata: attrs.metadata.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this product must carry its own barcode.
    ///
    /// Serialized products are scanned per unit, so only non-serialized
    /// products need one.
    #[inline]
    pub fn needs_barcode(&self) -> bool {
        !self.has_serialized_units
    }

    /// Whether the stock level has fallen to or below the threshold.
    pub fn is_low_stock(&self) -> bool {
        self.stock <= self.threshold
    }
}

// =============================================================================
// Unit
// =============================================================================

/// A single serialized item owned by exactly one product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Unit {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Owning product. Never changes.
    pub product_id: String,

    /// Unique within `product_id`, not globally.
    pub serial_number: String,

    /// Globally unique once assigned.
    pub barcode: Option<String>,

    pub status: UnitStatus,

    pub color: Option<String>,
    pub storage_gb: Option<i32>,
    pub ram_gb: Option<i32>,
    /// 0-100.
    pub battery_level: Option<i32>,

    /// Overrides; unset fields fall back to the product's pricing.
    pub pricing: Pricing,

    /// Provenance, write-once in practice.
    pub supplier_id: Option<String>,
    pub purchase_cost: Option<Money>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Unit {
    /// Builds a new `available` unit from resolution-time attributes.
    pub fn from_attrs(
        id: String,
        product_id: &str,
        serial_number: &str,
        attrs: &UnitAttrs,
        now: DateTime<Utc>,
    ) -> Self {
        Unit {
            id,
            product_id: product_id.to_string(),
            serial_number: serial_number.to_string(),
            barcode: None,
            status: UnitStatus::Available,
            color: attrs.color.clone(),
            storage_gb: attrs.storage_gb,
            ram_gb: attrs.ram_gb,
            battery_level: attrs.battery_level,
            pricing: attrs.pricing(),
            supplier_id: attrs.supplier_id.clone(),
            purchase_cost: attrs.purchase_cost_cents.map(Money::from_cents),
            created_at: now,
            updated_at: now,
        }
    }

    /// Unit pricing with every unset field inherited from `product`.
    pub fn effective_pricing(&self, product: &Product) -> Pricing {
        self.pricing.or(&product.pricing)
    }
}

// =============================================================================
// Barcode Registry Entry
// =============================================================================

/// One row of the global barcode registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BarcodeEntry {
    /// Globally unique literal value.
    pub barcode: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    /// Symbology name, fixed per deployment.
    pub format: String,
    #[ts(type = "Record<string, string>")]
    pub metadata: Metadata,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Resolution Attributes
// =============================================================================

/// Product fields a caller may supply when resolving a product.
///
/// Used only when the product is created; an existing match is never
/// overwritten with these values.
pub const WRITABLE_PRODUCT_FIELDS: &[&str] = &[
    "has_serialized_units",
    "stock",
    "threshold",
    "price_cents",
    "min_price_cents",
    "max_price_cents",
    "barcode",
    "category",
    "description",
    "supplier",
    "year",
    "metadata",
];

/// Creation-time product attributes (allow-listed).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(default)]
pub struct ProductAttrs {
    pub has_serialized_units: bool,
    pub stock: i64,
    pub threshold: i64,
    pub price_cents: Option<i64>,
    pub min_price_cents: Option<i64>,
    pub max_price_cents: Option<i64>,
    /// Barcode candidate handed to the registry after creation.
    pub barcode: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub supplier: Option<String>,
    pub year: Option<i32>,
    #[ts(type = "Record<string, string>")]
    pub metadata: Metadata,
}

impl ProductAttrs {
    /// Attributes for a serialized product with everything else defaulted.
    pub fn serialized() -> Self {
        ProductAttrs {
            has_serialized_units: true,
            ..ProductAttrs::default()
        }
    }

    /// Filters an untyped JSON object down to [`WRITABLE_PRODUCT_FIELDS`].
    ///
    /// Returns the typed attributes and the names of the dropped fields.
    ///
    /// ## Example
    /// ```rust
    /// use keystock_core::ProductAttrs;
    /// use serde_json::json;
    ///
    /// let (attrs, dropped) = ProductAttrs::from_untyped(json!({
    ///     "category": "phones",
    ///     "threshold": 2,
    ///     "internal_flag": true,
    /// })).unwrap();
    ///
    /// assert_eq!(attrs.category.as_deref(), Some("phones"));
    /// assert_eq!(dropped, vec!["internal_flag".to_string()]);
    /// ```
    pub fn from_untyped(
        value: serde_json::Value,
    ) -> Result<(ProductAttrs, Vec<String>), ValidationError> {
        let serde_json::Value::Object(map) = value else {
            return Err(ValidationError::InvalidFormat {
                field: "attrs".to_string(),
                reason: "expected a JSON object".to_string(),
            });
        };

        let mut kept = serde_json::Map::new();
        let mut dropped = Vec::new();
        for (key, value) in map {
            if WRITABLE_PRODUCT_FIELDS.contains(&key.as_str()) {
                kept.insert(key, value);
            } else {
                dropped.push(key);
            }
        }

        let attrs = serde_json::from_value(serde_json::Value::Object(kept)).map_err(|e| {
            ValidationError::InvalidFormat {
                field: "attrs".to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok((attrs, dropped))
    }

    pub fn pricing(&self) -> Pricing {
        Pricing::from_cents(self.price_cents, self.min_price_cents, self.max_price_cents)
    }
}

/// Creation-time unit attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(default)]
pub struct UnitAttrs {
    pub color: Option<String>,
    pub storage_gb: Option<i32>,
    pub ram_gb: Option<i32>,
    pub battery_level: Option<i32>,
    pub price_cents: Option<i64>,
    pub min_price_cents: Option<i64>,
    pub max_price_cents: Option<i64>,
    /// Barcode candidate handed to the registry after creation.
    pub barcode: Option<String>,
    pub supplier_id: Option<String>,
    pub purchase_cost_cents: Option<i64>,
}

impl UnitAttrs {
    pub fn pricing(&self) -> Pricing {
        Pricing::from_cents(self.price_cents, self.min_price_cents, self.max_price_cents)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
