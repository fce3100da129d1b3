//! Vesting schedule resolution.
//!
//! Step tables are plan data. The resolver only looks years up in
//! them and applies the full-vesting overrides and the sticky 100%
//! rule carried on `ParticipantVestingState`.

use crate::{
    error::{EngineError, EngineResult},
    ledger::{ParticipantLedger, ZeroContributionReason},
    profit_code::{ProfitCodeCategory, ProfitCodeTaxonomy},
    types::{ParticipantKind, ProfitYear, Ssn},
};
use chrono::{Datelike, Months, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

pub const FULLY_VESTED: Decimal = dec!(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VestingSchedule {
    OldPlan,
    NewPlan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VestingStep {
    pub min_years: u8,
    pub percent:   Decimal,
}

/// Monotonic step function from years-in-plan to vesting percent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepTable {
    steps: Vec<VestingStep>,
}

impl StepTable {
    pub fn new(steps: Vec<VestingStep>) -> EngineResult<Self> {
        let table = Self { steps };
        table.validate()?;
        Ok(table)
    }

    /// Seven years to full vesting.
    pub fn old_plan() -> Self {
        Self::from_pairs(&[(0, dec!(0)), (3, dec!(20)), (4, dec!(40)), (5, dec!(60)), (6, dec!(80)), (7, dec!(100))])
    }

    /// Six years to full vesting.
    pub fn new_plan() -> Self {
        Self::from_pairs(&[(0, dec!(0)), (2, dec!(20)), (3, dec!(40)), (4, dec!(60)), (5, dec!(80)), (6, dec!(100))])
    }

    fn from_pairs(pairs: &[(u8, Decimal)]) -> Self {
        Self {
            steps: pairs
                .iter()
                .map(|&(min_years, percent)| VestingStep { min_years, percent })
                .collect(),
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        let first = self
            .steps
            .first()
            .ok_or_else(|| EngineError::InvalidConfig("empty vesting step table".into()))?;
        if first.min_years != 0 {
            return Err(EngineError::InvalidConfig(
                "vesting step table must start at 0 years".into(),
            ));
        }
        for step in &self.steps {
            if step.percent < Decimal::ZERO || step.percent > FULLY_VESTED {
                return Err(EngineError::InvalidConfig(format!(
                    "vesting percent {} outside 0-100",
                    step.percent
                )));
            }
        }
        for pair in self.steps.windows(2) {
            if pair[1].min_years <= pair[0].min_years || pair[1].percent < pair[0].percent {
                return Err(EngineError::InvalidConfig(format!(
                    "vesting step table not monotonic at {} years",
                    pair[1].min_years
                )));
            }
        }
        Ok(())
    }

    pub fn percent_for(&self, years_in_plan: u8) -> Decimal {
        self.steps
            .iter()
            .take_while(|s| s.min_years <= years_in_plan)
            .last()
            .map(|s| s.percent)
            .unwrap_or(Decimal::ZERO)
    }

    /// Percent at zero years of service.
    pub fn base_percent(&self) -> Decimal {
        self.percent_for(0)
    }

    pub fn years_to_full_vesting(&self) -> Option<u8> {
        self.steps
            .iter()
            .find(|s| s.percent >= FULLY_VESTED)
            .map(|s| s.min_years)
    }

    pub fn steps(&self) -> &[VestingStep] {
        &self.steps
    }
}

/// What happens to accumulated service after a cash-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakInServicePolicy {
    Preserve,
    ResetWhenCashedOutUnvested,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VestingConfig {
    pub old_plan: StepTable,
    pub new_plan: StepTable,
    /// First profit year whose contributions move a participant onto
    /// the new plan.
    pub new_plan_effective_year: ProfitYear,
    pub old_plan_break_in_service: BreakInServicePolicy,
    pub new_plan_break_in_service: BreakInServicePolicy,
    pub normal_retirement_age: u8,
    /// Years since first contribution required by the normal
    /// retirement age rule.
    pub retirement_contribution_years: u8,
}

impl VestingConfig {
    pub fn table(&self, schedule: VestingSchedule) -> &StepTable {
        match schedule {
            VestingSchedule::OldPlan => &self.old_plan,
            VestingSchedule::NewPlan => &self.new_plan,
        }
    }

    pub fn break_in_service(&self, schedule: VestingSchedule) -> BreakInServicePolicy {
        match schedule {
            VestingSchedule::OldPlan => self.old_plan_break_in_service,
            VestingSchedule::NewPlan => self.new_plan_break_in_service,
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        self.old_plan.validate()?;
        self.new_plan.validate()
    }
}

impl Default for VestingConfig {
    fn default() -> Self {
        Self {
            old_plan: StepTable::old_plan(),
            new_plan: StepTable::new_plan(),
            new_plan_effective_year: 2007,
            old_plan_break_in_service: BreakInServicePolicy::Preserve,
            new_plan_break_in_service: BreakInServicePolicy::ResetWhenCashedOutUnvested,
            normal_retirement_age: 65,
            retirement_contribution_years: 5,
        }
    }
}

/// Why a participant is 100% vested regardless of the step table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FullVestingReason {
    Beneficiary,
    Deceased,
    ForfeitureEnrollment,
    ZeroContributionRetirement,
    NormalRetirementAge,
    /// Reached 100% in an earlier computation.
    PreviouslyFullyVested,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantVestingState {
    pub ssn: Ssn,
    pub profit_year: ProfitYear,
    pub years_in_plan: u8,
    pub schedule: VestingSchedule,
    pub vesting_percent: Decimal,
    pub has_forfeited: bool,
    /// Sticky: once true it is carried into every later computation.
    pub ever_fully_vested: bool,
    pub full_vesting_reason: Option<FullVestingReason>,
}

impl ParticipantVestingState {
    pub fn is_fully_vested(&self) -> bool {
        self.vesting_percent >= FULLY_VESTED
    }
}

#[derive(Debug, Clone)]
pub struct VestingInput<'a> {
    pub ssn: Ssn,
    pub profit_year: ProfitYear,
    pub years_in_plan: u8,
    pub has_forfeited: bool,
    pub schedule: VestingSchedule,
    pub override_reason: Option<FullVestingReason>,
    pub prior: Option<&'a ParticipantVestingState>,
}

pub struct VestingResolver<'a> {
    config: &'a VestingConfig,
}

impl<'a> VestingResolver<'a> {
    pub fn new(config: &'a VestingConfig) -> Self {
        Self { config }
    }

    pub fn percent_for(&self, schedule: VestingSchedule, years_in_plan: u8) -> Decimal {
        self.config.table(schedule).percent_for(years_in_plan)
    }

    pub fn resolve(&self, input: VestingInput<'_>) -> ParticipantVestingState {
        let stepped = self.percent_for(input.schedule, input.years_in_plan);

        let sticky = input
            .prior
            .filter(|p| p.ssn == input.ssn && p.profit_year <= input.profit_year)
            .is_some_and(|p| p.ever_fully_vested);

        let (vesting_percent, full_vesting_reason) = match input.override_reason {
            Some(reason) => (FULLY_VESTED, Some(reason)),
            None if stepped >= FULLY_VESTED => (stepped, None),
            None if sticky => {
                log::warn!(
                    "{} year {}: {} years would vest {stepped}%, holding prior 100%",
                    input.ssn,
                    input.profit_year,
                    input.years_in_plan
                );
                (FULLY_VESTED, Some(FullVestingReason::PreviouslyFullyVested))
            }
            None => (stepped, None),
        };

        ParticipantVestingState {
            ssn: input.ssn,
            profit_year: input.profit_year,
            years_in_plan: input.years_in_plan,
            schedule: input.schedule,
            vesting_percent,
            has_forfeited: input.has_forfeited,
            ever_fully_vested: sticky || vesting_percent >= FULLY_VESTED,
            full_vesting_reason,
        }
    }
}

// ── Participant facts derived from the ledger ──────────────────────

/// New plan once any regular contribution lands in or after the
/// effective year; old plan otherwise.
pub fn detect_schedule(
    ledger: &ParticipantLedger,
    taxonomy: &ProfitCodeTaxonomy,
    new_plan_effective_year: ProfitYear,
) -> EngineResult<VestingSchedule> {
    for tx in &ledger.transactions {
        let category = taxonomy.category(tx.profit_code)?;
        if category.is_service_contribution()
            && tx.profit_year >= new_plan_effective_year
            && tx.contribution > Decimal::ZERO
        {
            return Ok(VestingSchedule::NewPlan);
        }
    }
    Ok(VestingSchedule::OldPlan)
}

pub fn has_forfeited(ledger: &ParticipantLedger, taxonomy: &ProfitCodeTaxonomy) -> EngineResult<bool> {
    for tx in &ledger.transactions {
        if taxonomy.category(tx.profit_code)? == ProfitCodeCategory::OutgoingForfeiture
            && !tx.forfeiture.is_zero()
        {
            return Ok(true);
        }
    }
    Ok(false)
}

/// First profit year with a non-zero regular contribution.
pub fn initial_contribution_year(
    ledger: &ParticipantLedger,
    taxonomy: &ProfitCodeTaxonomy,
) -> EngineResult<Option<ProfitYear>> {
    let mut first = None;
    for tx in &ledger.transactions {
        if taxonomy.category(tx.profit_code)?.is_service_contribution() && !tx.contribution.is_zero() {
            first = Some(first.map_or(tx.profit_year, |y: ProfitYear| y.min(tx.profit_year)));
        }
    }
    Ok(first)
}

/// Overrides evaluated before the step table, first match wins.
pub fn full_vesting_reason(
    ledger: &ParticipantLedger,
    taxonomy: &ProfitCodeTaxonomy,
    config: &VestingConfig,
    as_of: NaiveDate,
) -> EngineResult<Option<FullVestingReason>> {
    let Some(profile) = ledger.profile.as_ref() else {
        return Ok(has_forfeited(ledger, taxonomy)?.then_some(FullVestingReason::ForfeitureEnrollment));
    };

    if profile.kind == ParticipantKind::Beneficiary {
        return Ok(Some(FullVestingReason::Beneficiary));
    }
    if profile
        .termination
        .is_some_and(|t| t.deceased && t.date < as_of)
    {
        return Ok(Some(FullVestingReason::Deceased));
    }
    if has_forfeited(ledger, taxonomy)? {
        return Ok(Some(FullVestingReason::ForfeitureEnrollment));
    }
    if profile.zero_contribution_reason
        == Some(ZeroContributionReason::SixtyFiveAndOverFirstContributionMoreThan5YearsAgo)
    {
        return Ok(Some(FullVestingReason::ZeroContributionRetirement));
    }

    let still_employed = profile.termination.map_or(true, |t| t.date > as_of);
    // strictly past the birthday on which retirement age is reached
    let retirement_age = profile.date_of_birth.is_some_and(|dob| {
        as_of
            .checked_sub_months(Months::new(12 * u32::from(config.normal_retirement_age)))
            .is_some_and(|cutoff| dob < cutoff)
    });
    if still_employed && retirement_age {
        let cutoff = as_of.year() - i32::from(config.retirement_contribution_years);
        if initial_contribution_year(ledger, taxonomy)?.is_some_and(|y| i32::from(y) < cutoff) {
            return Ok(Some(FullVestingReason::NormalRetirementAge));
        }
    }
    Ok(None)
}
