//! # Barcode Symbology
//!
//! Pure encoders that turn an entity id into a barcode candidate.
//!
//! ## Candidate Generation
//! ```text
//! entity_id ──┐
//!             ├──► UUID v5 (fixed namespace) ──► u128 mod 10^10 ──┐
//! attempt  ───┘                                                   │
//!                                                                 ▼
//!                        "20" prefix + 10 body digits + check digit = EAN-13
//! ```
//!
//! The same `(entity_id, attempt)` always yields the same candidate, so a
//! retried allocation converges on the value a crashed attempt may already
//! have written. Bumping `attempt` walks to the next candidate after a
//! collision with a different entity.

use uuid::Uuid;

/// Namespace for deterministic barcode candidates.
const CANDIDATE_NAMESPACE: Uuid = Uuid::from_u128(0x6b65_7973_746f_636b_2d62_6172_636f_6465);

/// A barcode symbology the registry can allocate in.
///
/// Implementations must be deterministic: the registry relies on
/// `encode(id, n)` being stable across processes.
pub trait Symbology: Send + Sync {
    /// Format name stored on every registry entry.
    fn format(&self) -> &'static str;

    /// Candidate barcode for `entity_id` on allocation attempt `attempt`.
    fn encode(&self, entity_id: &str, attempt: u32) -> String;

    /// Whether `barcode` is well-formed in this symbology.
    fn is_valid(&self, barcode: &str) -> bool;
}

// =============================================================================
// EAN-13
// =============================================================================

/// EAN-13 inside a GS1 restricted-circulation prefix (20-29).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ean13Symbology {
    prefix: u8,
}

impl Ean13Symbology {
    pub const DEFAULT_PREFIX: u8 = 20;

    /// Creates an encoder with a two-digit prefix. Values above 99 are clamped.
    pub fn new(prefix: u8) -> Self {
        Ean13Symbology {
            prefix: prefix.min(99),
        }
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// EAN-13 check digit for the first 12 digits.
    ///
    /// ## Example
    /// ```rust
    /// use keystock_core::symbology::Ean13Symbology;
    ///
    /// assert_eq!(Ean13Symbology::check_digit("400638133393"), Some(1));
    /// assert_eq!(Ean13Symbology::check_digit("12345"), None);
    /// ```
    pub fn check_digit(first_twelve: &str) -> Option<u32> {
        if first_twelve.len() != 12 {
            return None;
        }

        let mut sum = 0;
        for (i, c) in first_twelve.chars().enumerate() {
            let digit = c.to_digit(10)?;
            // Positions are 1-based: odd ×1, even ×3
            sum += if i % 2 == 0 { digit } else { digit * 3 };
        }

        Some((10 - sum % 10) % 10)
    }
}

impl Default for Ean13Symbology {
    fn default() -> Self {
        Ean13Symbology::new(Self::DEFAULT_PREFIX)
    }
}

impl Symbology for Ean13Symbology {
    fn format(&self) -> &'static str {
        "ean13"
    }

    fn encode(&self, entity_id: &str, attempt: u32) -> String {
        let seed = format!("{entity_id}:{attempt}");
        let hash = Uuid::new_v5(&CANDIDATE_NAMESPACE, seed.as_bytes()).as_u128();
        let body = hash % 10_000_000_000;

        let first_twelve = format!("{:02}{:010}", self.prefix, body);
        // Twelve ASCII digits by construction
        let check = Self::check_digit(&first_twelve).unwrap_or(0);

        format!("{first_twelve}{check}")
    }

    fn is_valid(&self, barcode: &str) -> bool {
        if barcode.len() != 13 {
            return false;
        }
        let (first_twelve, last) = barcode.split_at(12);
        match (Self::check_digit(first_twelve), last.chars().next().and_then(|c| c.to_digit(10))) {
            (Some(expected), Some(actual)) => expected == actual,
            _ => false,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_known_check_digits() {
        assert_eq!(Ean13Symbology::check_digit("400638133393"), Some(1));
        assert_eq!(Ean13Symbology::check_digit("590123412345"), Some(7));
        assert_eq!(Ean13Symbology::check_digit("59012341234a"), None);
    }

    #[test]
    fn test_encode_is_deterministic() {
        let ean = Ean13Symbology::default();
        let a = ean.encode("550e8400-e29b-41d4-a716-446655440000", 0);
        let b = ean.encode("550e8400-e29b-41d4-a716-446655440000", 0);
        assert_eq!(a, b);
        assert_eq!(a.len(), 13);
        assert!(a.starts_with("20"));
        assert!(ean.is_valid(&a));
    }

    #[test]
    fn test_attempts_produce_distinct_candidates() {
        let ean = Ean13Symbology::default();
        let candidates: HashSet<_> = (0..16).map(|n| ean.encode("entity-1", n)).collect();
        assert_eq!(candidates.len(), 16);
    }

    #[test]
    fn test_is_valid_rejects_bad_input() {
        let ean = Ean13Symbology::default();
        assert!(ean.is_valid("4006381333931"));
        assert!(!ean.is_valid("4006381333932"));
        assert!(!ean.is_valid("400638133393"));
        assert!(!ean.is_valid("40063813339a1"));
    }

    #[test]
    fn test_prefix_is_clamped() {
        let ean = Ean13Symbology::new(250);
        assert_eq!(ean.prefix(), 99);
        assert!(ean.encode("x", 0).starts_with("99"));
    }
}
