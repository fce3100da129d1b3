//! Ledger transaction model and the persistence collaborator contract.
//!
//! RULE: The engine never mutates a transaction. Corrections arrive as
//! new rows. Everything the engine knows about a participant flows in
//! through `LedgerSource`.

use crate::{
    error::EngineResult,
    profit_code::ProfitCodeId,
    types::{Amount, ParticipantKind, ProfitYear, Ssn, TransactionId},
    vesting::{ParticipantVestingState, VestingSchedule},
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentType {
    Hardship,
    Distribution,
    Payoff,
    Rollover,
    TransferIn,
    TransferOut,
    QdroIn,
    QdroOut,
    Forfeit,
    Military,
    ClassAction,
    OneHundredPercentEarnings,
    Reversal,
    Other,
}

/// Which run of the year-end process produced a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YearIteration {
    #[default]
    Regular,
    Military,
    ClassActionFund,
}

/// One immutable profit-sharing ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub ssn: Ssn,
    pub profit_year: ProfitYear,
    #[serde(default)]
    pub iteration: YearIteration,
    pub profit_code: ProfitCodeId,
    #[serde(default)]
    pub comment_type: Option<CommentType>,
    #[serde(default)]
    pub contribution: Amount,
    #[serde(default)]
    pub earnings: Amount,
    #[serde(default)]
    pub forfeiture: Amount,
    #[serde(default)]
    pub federal_taxes: Amount,
    #[serde(default)]
    pub state_taxes: Amount,
    pub transaction_date: NaiveDate,
    #[serde(default)]
    pub month_to_date: u8,
    #[serde(default)]
    pub year_to_date: u16,
    #[serde(default)]
    pub years_of_service_credit: u8,
}

impl Transaction {
    /// A zero-amount row. Amounts are set with the `with_*` builders.
    pub fn new(
        id: impl Into<TransactionId>,
        ssn: Ssn,
        profit_year: ProfitYear,
        profit_code: ProfitCodeId,
        transaction_date: NaiveDate,
    ) -> Self {
        Self {
            id: id.into(),
            ssn,
            profit_year,
            iteration: YearIteration::Regular,
            profit_code,
            comment_type: None,
            contribution: Decimal::ZERO,
            earnings: Decimal::ZERO,
            forfeiture: Decimal::ZERO,
            federal_taxes: Decimal::ZERO,
            state_taxes: Decimal::ZERO,
            transaction_date,
            month_to_date: 0,
            year_to_date: profit_year,
            years_of_service_credit: 0,
        }
    }

    pub fn with_contribution(mut self, amount: Amount) -> Self {
        self.contribution = amount;
        self
    }

    pub fn with_earnings(mut self, amount: Amount) -> Self {
        self.earnings = amount;
        self
    }

    pub fn with_forfeiture(mut self, amount: Amount) -> Self {
        self.forfeiture = amount;
        self
    }

    pub fn with_taxes(mut self, federal: Amount, state: Amount) -> Self {
        self.federal_taxes = federal;
        self.state_taxes = state;
        self
    }

    pub fn with_comment(mut self, comment: CommentType) -> Self {
        self.comment_type = Some(comment);
        self
    }

    pub fn with_iteration(mut self, iteration: YearIteration) -> Self {
        self.iteration = iteration;
        self
    }

    pub fn with_service_credit(mut self, years: u8) -> Self {
        self.years_of_service_credit = years;
        self
    }

    pub fn with_markers(mut self, month_to_date: u8, year_to_date: u16) -> Self {
        self.month_to_date = month_to_date;
        self.year_to_date = year_to_date;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroContributionReason {
    Normal,
    Under21WithOver1000Hours,
    TerminatedOver1000HoursGetsYearVested,
    SixtyFiveAndOverFirstContributionMoreThan5YearsAgo,
    SixtyFourFirstContributionMoreThan5YearsAgo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Termination {
    pub date: NaiveDate,
    pub deceased: bool,
}

/// Demographic and pay facts about a participant, as supplied by the
/// persistence collaborator. Absent for pure beneficiaries in many
/// stores; the engine treats a missing profile as "no history".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantProfile {
    pub ssn: Ssn,
    pub kind: ParticipantKind,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub termination: Option<Termination>,
    #[serde(default)]
    pub zero_contribution_reason: Option<ZeroContributionReason>,
    /// Plan-enrollment indicator. Overrides schedule detection.
    #[serde(default)]
    pub enrollment: Option<VestingSchedule>,
    /// Hours worked per profit year.
    #[serde(default)]
    pub hours: BTreeMap<ProfitYear, Decimal>,
}

impl ParticipantProfile {
    pub fn employee(ssn: Ssn, date_of_birth: NaiveDate) -> Self {
        Self {
            ssn,
            kind: ParticipantKind::Employee,
            date_of_birth: Some(date_of_birth),
            termination: None,
            zero_contribution_reason: None,
            enrollment: None,
            hours: BTreeMap::new(),
        }
    }

    pub fn beneficiary(ssn: Ssn) -> Self {
        Self {
            ssn,
            kind: ParticipantKind::Beneficiary,
            date_of_birth: None,
            termination: None,
            zero_contribution_reason: None,
            enrollment: None,
            hours: BTreeMap::new(),
        }
    }

    pub fn with_hours(mut self, year: ProfitYear, hours: Decimal) -> Self {
        self.hours.insert(year, hours);
        self
    }

    pub fn hours_in(&self, year: ProfitYear) -> Decimal {
        self.hours.get(&year).copied().unwrap_or(Decimal::ZERO)
    }
}

/// Profit-year bound pushed to storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YearBound {
    /// profit_year <= year
    Through(ProfitYear),
    /// profit_year == year
    Exactly(ProfitYear),
}

impl YearBound {
    pub fn contains(&self, profit_year: ProfitYear) -> bool {
        match *self {
            Self::Through(y) => profit_year <= y,
            Self::Exactly(y) => profit_year == y,
        }
    }
}

/// Everything the engine reads for one participant. Owned by the
/// computation that requested it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParticipantLedger {
    pub profile: Option<ParticipantProfile>,
    pub transactions: Vec<Transaction>,
}

impl ParticipantLedger {
    pub fn new(profile: Option<ParticipantProfile>, mut transactions: Vec<Transaction>) -> Self {
        sort_ledger(&mut transactions);
        Self {
            profile,
            transactions,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

/// Canonical ledger order: profit year, then date, then id.
pub fn sort_ledger(rows: &mut [Transaction]) {
    rows.sort_by(|a, b| {
        a.profit_year
            .cmp(&b.profit_year)
            .then(a.transaction_date.cmp(&b.transaction_date))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// The inbound query capability the engine consumes.
///
/// Implementations return rows in canonical ledger order. Paging or
/// filtering pushed to storage is an optimisation only.
pub trait LedgerSource {
    fn transactions(&self, ssn: Ssn, bound: YearBound) -> EngineResult<Vec<Transaction>>;

    fn participant(&self, ssn: Ssn) -> EngineResult<Option<ParticipantProfile>>;

    /// Every participant key known to the source, ascending.
    fn participants(&self) -> EngineResult<Vec<Ssn>>;

    fn transactions_for(
        &self,
        ssns: &[Ssn],
        bound: YearBound,
    ) -> EngineResult<BTreeMap<Ssn, Vec<Transaction>>> {
        let mut out = BTreeMap::new();
        for &ssn in ssns {
            out.insert(ssn, self.transactions(ssn, bound)?);
        }
        Ok(out)
    }

    fn ledger(&self, ssn: Ssn, bound: YearBound) -> EngineResult<ParticipantLedger> {
        Ok(ParticipantLedger::new(
            self.participant(ssn)?,
            self.transactions(ssn, bound)?,
        ))
    }

    /// Latest persisted vesting state at or before `profit_year`.
    /// Sources without vesting persistence return `None`.
    fn prior_vesting_state(
        &self,
        _ssn: Ssn,
        _profit_year: ProfitYear,
    ) -> EngineResult<Option<ParticipantVestingState>> {
        Ok(None)
    }
}

/// In-memory ledger for tests and callers that already hold rows.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    rows: BTreeMap<Ssn, Vec<Transaction>>,
    profiles: BTreeMap<Ssn, ParticipantProfile>,
    vesting: BTreeMap<(Ssn, ProfitYear), ParticipantVestingState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tx: Transaction) {
        let rows = self.rows.entry(tx.ssn).or_default();
        rows.push(tx);
        sort_ledger(rows);
    }

    pub fn extend(&mut self, rows: impl IntoIterator<Item = Transaction>) {
        for tx in rows {
            self.insert(tx);
        }
    }

    pub fn insert_participant(&mut self, profile: ParticipantProfile) {
        self.profiles.insert(profile.ssn, profile);
    }

    pub fn record_vesting_state(&mut self, state: ParticipantVestingState) {
        self.vesting.insert((state.ssn, state.profit_year), state);
    }
}

impl LedgerSource for MemoryLedger {
    fn transactions(&self, ssn: Ssn, bound: YearBound) -> EngineResult<Vec<Transaction>> {
        Ok(self
            .rows
            .get(&ssn)
            .map(|rows| {
                rows.iter()
                    .filter(|t| bound.contains(t.profit_year))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn participant(&self, ssn: Ssn) -> EngineResult<Option<ParticipantProfile>> {
        Ok(self.profiles.get(&ssn).cloned())
    }

    fn participants(&self) -> EngineResult<Vec<Ssn>> {
        let mut keys: Vec<Ssn> = self.rows.keys().chain(self.profiles.keys()).copied().collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    fn prior_vesting_state(
        &self,
        ssn: Ssn,
        profit_year: ProfitYear,
    ) -> EngineResult<Option<ParticipantVestingState>> {
        Ok(self
            .vesting
            .range((ssn, 0)..=(ssn, profit_year))
            .next_back()
            .map(|(_, state)| state.clone()))
    }
}
