//! Shared primitive types used across the entire engine.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A fiscal profit year. Independent of the calendar transaction date.
pub type ProfitYear = u16;

/// Currency amount, 2 fractional digits at rest.
pub type Amount = Decimal;

/// Opaque ledger row identity assigned by the persistence collaborator.
pub type TransactionId = String;

/// Participant key.
///
/// Treated as an opaque, stable identifier. `Display` and `Debug` only
/// ever show the masked form; use [`Ssn::raw`] on audit and
/// persistence paths.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ssn(u32);

impl Ssn {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Unmasked value. Audit and storage only.
    pub const fn raw(&self) -> u32 {
        self.0
    }

    pub fn masked(&self) -> String {
        format!("XXX-XX-{:04}", self.0 % 10_000)
    }
}

impl fmt::Display for Ssn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

impl fmt::Debug for Ssn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ssn({})", self.masked())
    }
}

/// Whether the participant has an employee history or only holds an
/// account as a beneficiary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantKind {
    Employee,
    Beneficiary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssn_never_displays_unmasked() {
        let ssn = Ssn::new(123_456_789);
        assert_eq!(ssn.to_string(), "XXX-XX-6789");
        assert_eq!(format!("{ssn:?}"), "Ssn(XXX-XX-6789)");
        assert_eq!(ssn.raw(), 123_456_789);
    }

    #[test]
    fn short_ssn_is_zero_padded() {
        assert_eq!(Ssn::new(42).masked(), "XXX-XX-0042");
    }
}
