//! # Integrity Findings
//!
//! Value types produced by the integrity auditor's scan and repair passes.
//!
//! ## Finding Classes
//! ```text
//! ┌──────────────────────┬───────────────────────────────┬─────────────────┐
//! │ Finding              │ Detected when                 │ Repair          │
//! ├──────────────────────┼───────────────────────────────┼─────────────────┤
//! │ MissingBarcode       │ entity needs one, has none    │ allocate        │
//! │ InconsistentFlag     │ flag disagrees with units     │ flip flag       │
//! │ StockDrift           │ stored ≠ available count      │ reconcile       │
//! │ StaleBarcode         │ registry entry, no entity     │ release entry   │
//! │ OrphanedUnit         │ unit's product is gone        │ report only     │
//! │ DuplicateSerial      │ (product, serial) repeated    │ report only     │
//! └──────────────────────┴───────────────────────────────┴─────────────────┘
//! ```
//!
//! Findings are data, never errors: a scan that finds drift succeeded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::types::EntityType;

// =============================================================================
// Finding
// =============================================================================

/// One detected integrity violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    /// A product or unit that should carry a barcode but has none.
    MissingBarcode {
        entity_type: EntityType,
        entity_id: String,
    },

    /// A unit whose product no longer exists.
    OrphanedUnit { unit_id: String, product_id: String },

    /// Two or more units sharing `(product_id, serial_number)`.
    DuplicateSerial {
        product_id: String,
        serial_number: String,
        unit_ids: Vec<String>,
    },

    /// `has_serialized_units` disagrees with the units actually owned.
    InconsistentFlag {
        product_id: String,
        /// The flag value currently stored.
        flag: bool,
        unit_count: i64,
    },

    /// A serialized product whose stored stock differs from its available units.
    StockDrift {
        product_id: String,
        recorded: i64,
        expected: i64,
    },

    /// A registry entry whose entity no longer exists.
    StaleBarcode {
        barcode: String,
        entity_type: EntityType,
        entity_id: String,
    },
}

/// Discriminant of [`Finding`], used for per-class counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    MissingBarcode,
    OrphanedUnit,
    DuplicateSerial,
    InconsistentFlag,
    StockDrift,
    StaleBarcode,
}

impl FindingKind {
    pub const ALL: [FindingKind; 6] = [
        FindingKind::MissingBarcode,
        FindingKind::OrphanedUnit,
        FindingKind::DuplicateSerial,
        FindingKind::InconsistentFlag,
        FindingKind::StockDrift,
        FindingKind::StaleBarcode,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            FindingKind::MissingBarcode => "missing_barcode",
            FindingKind::OrphanedUnit => "orphaned_unit",
            FindingKind::DuplicateSerial => "duplicate_serial",
            FindingKind::InconsistentFlag => "inconsistent_flag",
            FindingKind::StockDrift => "stock_drift",
            FindingKind::StaleBarcode => "stale_barcode",
        }
    }

    /// Whether repair may fix this class without administrative confirmation.
    pub const fn is_auto_repairable(&self) -> bool {
        !matches!(self, FindingKind::OrphanedUnit | FindingKind::DuplicateSerial)
    }
}

impl Finding {
    pub fn kind(&self) -> FindingKind {
        match self {
            Finding::MissingBarcode { .. } => FindingKind::MissingBarcode,
            Finding::OrphanedUnit { .. } => FindingKind::OrphanedUnit,
            Finding::DuplicateSerial { .. } => FindingKind::DuplicateSerial,
            Finding::InconsistentFlag { .. } => FindingKind::InconsistentFlag,
            Finding::StockDrift { .. } => FindingKind::StockDrift,
            Finding::StaleBarcode { .. } => FindingKind::StaleBarcode,
        }
    }
}

// =============================================================================
// Integrity Report
// =============================================================================

/// Output of a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct IntegrityReport {
    pub findings: Vec<Finding>,
    pub scanned_products: u64,
    pub scanned_units: u64,
    #[ts(as = "String")]
    pub scanned_at: DateTime<Utc>,
}

impl IntegrityReport {
    pub fn new(scanned_products: u64, scanned_units: u64) -> Self {
        IntegrityReport {
            findings: Vec::new(),
            scanned_products,
            scanned_units,
            scanned_at: Utc::now(),
        }
    }

    /// Number of findings of one class.
    pub fn count(&self, kind: FindingKind) -> usize {
        self.findings.iter().filter(|f| f.kind() == kind).count()
    }

    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    /// Findings of one class, in scan order.
    pub fn of_kind(&self, kind: FindingKind) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.kind() == kind)
    }
}

// =============================================================================
// Repair Summary
// =============================================================================

/// A finding repair could not apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RepairFailure {
    pub finding: Finding,
    pub error: String,
}

/// Output of a repair pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RepairSummary {
    pub barcodes_assigned: u64,
    pub flags_corrected: u64,
    pub stock_reconciled: u64,
    pub stale_barcodes_released: u64,
    /// Reported but left alone; needs administrative confirmation.
    pub skipped: Vec<Finding>,
    pub failures: Vec<RepairFailure>,
}

impl RepairSummary {
    pub fn total_repaired(&self) -> u64 {
        self.barcodes_assigned
            + self.flags_corrected
            + self.stock_reconciled
            + self.stale_barcodes_released
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report() -> IntegrityReport {
        let mut report = IntegrityReport::new(3, 5);
        report.findings.push(Finding::MissingBarcode {
            entity_type: EntityType::Unit,
            entity_id: "u1".to_string(),
        });
        report.findings.push(Finding::OrphanedUnit {
            unit_id: "u2".to_string(),
            product_id: "gone".to_string(),
        });
        report.findings.push(Finding::MissingBarcode {
            entity_type: EntityType::Product,
            entity_id: "p1".to_string(),
        });
        report
    }

    #[test]
    fn test_report_counts() {
        let report = sample_report();
        assert_eq!(report.count(FindingKind::MissingBarcode), 2);
        assert_eq!(report.count(FindingKind::OrphanedUnit), 1);
        assert_eq!(report.count(FindingKind::StockDrift), 0);
        assert!(!report.is_clean());
        assert!(IntegrityReport::new(0, 0).is_clean());
    }

    #[test]
    fn test_auto_repairable_classes() {
        assert!(!FindingKind::OrphanedUnit.is_auto_repairable());
        assert!(!FindingKind::DuplicateSerial.is_auto_repairable());
        assert!(FindingKind::MissingBarcode.is_auto_repairable());
        assert!(FindingKind::StaleBarcode.is_auto_repairable());
    }

    #[test]
    fn test_finding_serializes_with_kind_tag() {
        let finding = Finding::StockDrift {
            product_id: "p1".to_string(),
            recorded: 4,
            expected: 2,
        };
        let json = serde_json::to_value(&finding).unwrap();
        assert_eq!(json["kind"], "stock_drift");
        assert_eq!(json["expected"], 2);
    }

    #[test]
    fn test_repair_summary_totals() {
        let summary = RepairSummary {
            barcodes_assigned: 2,
            flags_corrected: 1,
            stock_reconciled: 3,
            ..RepairSummary::default()
        };
        assert_eq!(summary.total_repaired(), 6);
        assert!(summary.is_complete());
    }
}
