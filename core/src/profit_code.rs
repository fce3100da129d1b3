//! Profit code taxonomy.
//!
//! RULE: Nothing outside this module compares raw profit code ids.
//! Engine logic branches on `ProfitCodeCategory`; the id → category
//! mapping is reference data held by `ProfitCodeTaxonomy` and can be
//! extended from configuration without touching consumers.

use crate::error::{EngineError, EngineResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfitCodeId(pub u8);

impl ProfitCodeId {
    pub const INCOMING_CONTRIBUTIONS: Self = Self(0);
    pub const OUTGOING_PARTIAL_WITHDRAWAL: Self = Self(1);
    pub const OUTGOING_FORFEITURES: Self = Self(2);
    pub const OUTGOING_DIRECT_PAYMENTS: Self = Self(3);
    pub const OUTGOING_XFER_BENEFICIARY: Self = Self(5);
    pub const INCOMING_QDRO_BENEFICIARY: Self = Self(6);
    pub const INCOMING_100_PERCENT_VESTED_EARNINGS: Self = Self(8);
    pub const OUTGOING_100_PERCENT_VESTED_PAYMENT: Self = Self(9);
}

impl fmt::Display for ProfitCodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// Closed set of transaction categories.
/// Variants may be appended, never removed or reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfitCodeCategory {
    IncomingContribution,
    Incoming100PercentVestedEarnings,
    IncomingQdroBeneficiary,
    OutgoingForfeiture,
    OutgoingPartialWithdrawal,
    OutgoingDirectPayment,
    Outgoing100PercentVestedPayment,
    OutgoingTransferToBeneficiary,
}

impl ProfitCodeCategory {
    pub fn direction(&self) -> Direction {
        match self {
            Self::IncomingContribution
            | Self::Incoming100PercentVestedEarnings
            | Self::IncomingQdroBeneficiary => Direction::Incoming,
            _ => Direction::Outgoing,
        }
    }

    /// Money leaving the account to a payee (not a forfeiture).
    /// These are the rows a distribution filter decides on.
    pub fn is_payment(&self) -> bool {
        matches!(
            self,
            Self::OutgoingPartialWithdrawal
                | Self::OutgoingDirectPayment
                | Self::Outgoing100PercentVestedPayment
                | Self::OutgoingTransferToBeneficiary
        )
    }

    /// The one field that moves the 100% vested portion (ETVA) on this
    /// category, if any. Other fields on the same row leave ETVA alone.
    pub fn etva_field(&self) -> Option<LedgerField> {
        match self {
            Self::IncomingQdroBeneficiary => Some(LedgerField::Contribution),
            Self::Incoming100PercentVestedEarnings => Some(LedgerField::Earnings),
            Self::Outgoing100PercentVestedPayment => Some(LedgerField::Forfeiture),
            _ => None,
        }
    }

    /// Contributions on this category count toward service years and
    /// new-plan detection.
    pub fn is_service_contribution(&self) -> bool {
        matches!(self, Self::IncomingContribution)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerField {
    Contribution,
    Earnings,
    Forfeiture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sign {
    Positive,
    Negative,
}

impl Sign {
    pub fn as_i8(&self) -> i8 {
        match self {
            Self::Positive => 1,
            Self::Negative => -1,
        }
    }

    pub fn apply(&self, amount: Decimal) -> Decimal {
        match self {
            Self::Positive => amount,
            Self::Negative => -amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfitCodeEntry {
    pub id: ProfitCodeId,
    pub name: String,
    pub category: ProfitCodeCategory,
    pub contribution: Sign,
    pub earnings: Sign,
    pub forfeiture: Sign,
}

impl ProfitCodeEntry {
    pub fn sign_for(&self, field: LedgerField) -> Sign {
        match field {
            LedgerField::Contribution => self.contribution,
            LedgerField::Earnings => self.earnings,
            LedgerField::Forfeiture => self.forfeiture,
        }
    }
}

/// Read-only id → entry lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfitCodeTaxonomy {
    entries: BTreeMap<ProfitCodeId, ProfitCodeEntry>,
}

impl ProfitCodeTaxonomy {
    pub fn from_entries(entries: Vec<ProfitCodeEntry>) -> EngineResult<Self> {
        let mut map = BTreeMap::new();
        for entry in entries {
            let id = entry.id;
            if map.insert(id, entry).is_some() {
                return Err(EngineError::InvalidConfig(format!(
                    "duplicate profit code {id}"
                )));
            }
        }
        if map.is_empty() {
            return Err(EngineError::InvalidConfig("empty profit code table".into()));
        }
        Ok(Self { entries: map })
    }

    /// The plan's published code table.
    pub fn standard() -> Self {
        use ProfitCodeCategory as C;
        use Sign::{Negative as N, Positive as P};

        let row = |id: ProfitCodeId, name: &str, category, c, e, f| ProfitCodeEntry {
            id,
            name: name.to_string(),
            category,
            contribution: c,
            earnings: e,
            forfeiture: f,
        };
        let entries = [
            row(ProfitCodeId::INCOMING_CONTRIBUTIONS, "Incoming contributions, forfeitures, earnings", C::IncomingContribution, P, P, P),
            row(ProfitCodeId::OUTGOING_PARTIAL_WITHDRAWAL, "Outgoing payments (partial withdrawal)", C::OutgoingPartialWithdrawal, P, P, N),
            row(ProfitCodeId::OUTGOING_FORFEITURES, "Outgoing forfeitures", C::OutgoingForfeiture, P, P, N),
            row(ProfitCodeId::OUTGOING_DIRECT_PAYMENTS, "Outgoing direct payments / rollover", C::OutgoingDirectPayment, P, P, N),
            row(ProfitCodeId::OUTGOING_XFER_BENEFICIARY, "Outgoing transfer to beneficiary / QDRO", C::OutgoingTransferToBeneficiary, P, P, N),
            row(ProfitCodeId::INCOMING_QDRO_BENEFICIARY, "Incoming QDRO beneficiary allocation", C::IncomingQdroBeneficiary, P, P, P),
            row(ProfitCodeId::INCOMING_100_PERCENT_VESTED_EARNINGS, "Incoming 100% vested earnings", C::Incoming100PercentVestedEarnings, P, P, P),
            row(ProfitCodeId::OUTGOING_100_PERCENT_VESTED_PAYMENT, "Outgoing payment from 100% vested amount", C::Outgoing100PercentVestedPayment, P, P, N),
        ];
        Self {
            entries: entries.into_iter().map(|e| (e.id, e)).collect(),
        }
    }

    pub fn entry(&self, code: ProfitCodeId) -> EngineResult<&ProfitCodeEntry> {
        self.entries
            .get(&code)
            .ok_or(EngineError::UnknownProfitCode { code })
    }

    pub fn category(&self, code: ProfitCodeId) -> EngineResult<ProfitCodeCategory> {
        self.entry(code).map(|e| e.category)
    }

    pub fn sign_for(&self, code: ProfitCodeId, field: LedgerField) -> EngineResult<Sign> {
        self.entry(code).map(|e| e.sign_for(field))
    }

    /// Every code mapped to `category`, ascending.
    pub fn codes_in(&self, category: ProfitCodeCategory) -> Vec<ProfitCodeId> {
        self.entries
            .values()
            .filter(|e| e.category == category)
            .map(|e| e.id)
            .collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &ProfitCodeEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ProfitCodeTaxonomy {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_table_covers_every_named_code() {
        let t = ProfitCodeTaxonomy::standard();
        let named = [
            (ProfitCodeId::INCOMING_CONTRIBUTIONS, ProfitCodeCategory::IncomingContribution),
            (ProfitCodeId::OUTGOING_PARTIAL_WITHDRAWAL, ProfitCodeCategory::OutgoingPartialWithdrawal),
            (ProfitCodeId::OUTGOING_FORFEITURES, ProfitCodeCategory::OutgoingForfeiture),
            (ProfitCodeId::OUTGOING_DIRECT_PAYMENTS, ProfitCodeCategory::OutgoingDirectPayment),
            (ProfitCodeId::OUTGOING_XFER_BENEFICIARY, ProfitCodeCategory::OutgoingTransferToBeneficiary),
            (ProfitCodeId::INCOMING_QDRO_BENEFICIARY, ProfitCodeCategory::IncomingQdroBeneficiary),
            (ProfitCodeId::INCOMING_100_PERCENT_VESTED_EARNINGS, ProfitCodeCategory::Incoming100PercentVestedEarnings),
            (ProfitCodeId::OUTGOING_100_PERCENT_VESTED_PAYMENT, ProfitCodeCategory::Outgoing100PercentVestedPayment),
        ];
        for (code, category) in named {
            assert_eq!(t.category(code).unwrap(), category, "code {code}");
        }
        assert_eq!(t.len(), named.len());
    }

    #[test]
    fn outgoing_codes_subtract_forfeiture_field() {
        let t = ProfitCodeTaxonomy::standard();
        for entry in t.entries() {
            let expected = match entry.category.direction() {
                Direction::Incoming => Sign::Positive,
                Direction::Outgoing => Sign::Negative,
            };
            assert_eq!(entry.sign_for(LedgerField::Forfeiture), expected, "code {}", entry.id);
        }
    }

    #[test]
    fn unknown_code_is_an_error() {
        let t = ProfitCodeTaxonomy::standard();
        let err = t.category(ProfitCodeId(4)).unwrap_err();
        assert!(matches!(err, EngineError::UnknownProfitCode { code } if code == ProfitCodeId(4)));
    }

    #[test]
    fn duplicate_entries_are_rejected() {
        let entry = ProfitCodeTaxonomy::standard()
            .entry(ProfitCodeId::INCOMING_CONTRIBUTIONS)
            .unwrap()
            .clone();
        let err = ProfitCodeTaxonomy::from_entries(vec![entry.clone(), entry]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[test]
    fn new_codes_are_data_not_code() {
        let mut entries: Vec<_> = ProfitCodeTaxonomy::standard().entries().cloned().collect();
        entries.push(ProfitCodeEntry {
            id: ProfitCodeId(4),
            name: "Outgoing hardship".into(),
            category: ProfitCodeCategory::OutgoingPartialWithdrawal,
            contribution: Sign::Positive,
            earnings: Sign::Positive,
            forfeiture: Sign::Negative,
        });
        let t = ProfitCodeTaxonomy::from_entries(entries).unwrap();
        assert_eq!(
            t.codes_in(ProfitCodeCategory::OutgoingPartialWithdrawal),
            vec![ProfitCodeId::OUTGOING_PARTIAL_WITHDRAWAL, ProfitCodeId(4)]
        );
    }
}
