//! Years-of-service calculator.
//!
//! A profit year qualifies when the ledger shows a service contribution
//! for it or the participant worked the minimum hours at service age.
//! The count is exact; callers do their own banding.

use crate::{
    calendar::{age_on, FiscalCalendar},
    error::EngineResult,
    ledger::{CommentType, ParticipantLedger, YearIteration},
    profit_code::{ProfitCodeCategory, ProfitCodeTaxonomy},
    types::ProfitYear,
    vesting::{BreakInServicePolicy, VestingConfig, VestingSchedule},
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub minimum_hours_for_contribution: Decimal,
    pub minimum_service_age: u8,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            minimum_hours_for_contribution: dec!(1000),
            minimum_service_age: 18,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct YearFacts {
    contributed: bool,
    cashed_out: bool,
}

pub struct YearsOfServiceCalculator<'a> {
    taxonomy: &'a ProfitCodeTaxonomy,
    vesting:  &'a VestingConfig,
    service:  &'a ServiceConfig,
    calendar: &'a FiscalCalendar,
}

impl<'a> YearsOfServiceCalculator<'a> {
    pub fn new(
        taxonomy: &'a ProfitCodeTaxonomy,
        vesting: &'a VestingConfig,
        service: &'a ServiceConfig,
        calendar: &'a FiscalCalendar,
    ) -> Self {
        Self { taxonomy, vesting, service, calendar }
    }

    /// Qualifying years up to and including `target_year`.
    ///
    /// Target-year rows dated after `as_of` are ignored. Without
    /// `as_of` every target-year row counts, whatever its posting date.
    pub fn years_in_plan(
        &self,
        ledger: &ParticipantLedger,
        schedule: VestingSchedule,
        target_year: ProfitYear,
        as_of: Option<NaiveDate>,
    ) -> EngineResult<u8> {
        let facts = self.year_facts(ledger, target_year, as_of)?;

        let mut years: Vec<ProfitYear> = facts.keys().copied().collect();
        if let Some(profile) = &ledger.profile {
            years.extend(profile.hours.keys().copied().filter(|y| *y <= target_year));
        }
        years.sort_unstable();
        years.dedup();

        let policy = self.vesting.break_in_service(schedule);
        let table = self.vesting.table(schedule);
        let mut count: u8 = 0;

        for year in years {
            let f = facts.get(&year).copied().unwrap_or_default();
            if f.contributed || self.worked_qualifying_hours(ledger, year, target_year, as_of) {
                count = count.saturating_add(1);
            }
            if f.cashed_out
                && policy == BreakInServicePolicy::ResetWhenCashedOutUnvested
                && table.percent_for(count).is_zero()
            {
                log::debug!(
                    "{} cashed out unvested in {year}, resetting {count} years of service",
                    ledger_key(ledger)
                );
                count = 0;
            }
        }

        log::debug!("{} years in plan through {target_year}: {count}", ledger_key(ledger));
        Ok(count)
    }

    fn year_facts(
        &self,
        ledger: &ParticipantLedger,
        target_year: ProfitYear,
        as_of: Option<NaiveDate>,
    ) -> EngineResult<BTreeMap<ProfitYear, YearFacts>> {
        let mut facts: BTreeMap<ProfitYear, YearFacts> = BTreeMap::new();
        for tx in &ledger.transactions {
            if tx.profit_year > target_year
                || (tx.profit_year == target_year && as_of.is_some_and(|d| tx.transaction_date > d))
            {
                continue;
            }
            let category = self.taxonomy.category(tx.profit_code)?;
            let entry = facts.entry(tx.profit_year).or_default();

            if category.is_service_contribution() {
                let regular = tx.iteration == YearIteration::Regular
                    && (!tx.contribution.is_zero() || tx.years_of_service_credit > 0);
                let military = tx.iteration == YearIteration::Military
                    && tx.comment_type == Some(CommentType::Military);
                entry.contributed |= regular || military;
            }
            let outgoing = category.is_payment() || category == ProfitCodeCategory::OutgoingForfeiture;
            if outgoing && !tx.forfeiture.is_zero() {
                entry.cashed_out = true;
            }
        }
        Ok(facts)
    }

    fn worked_qualifying_hours(
        &self,
        ledger: &ParticipantLedger,
        year: ProfitYear,
        target_year: ProfitYear,
        as_of: Option<NaiveDate>,
    ) -> bool {
        let Some(profile) = &ledger.profile else {
            return false;
        };
        if profile.hours_in(year) < self.service.minimum_hours_for_contribution {
            return false;
        }
        let year_end = self.calendar.fiscal_year_end(year);
        let reference = match as_of {
            Some(d) if year == target_year => d.min(year_end),
            _ => year_end,
        };
        profile
            .date_of_birth
            .map_or(true, |dob| age_on(dob, reference) >= self.service.minimum_service_age)
    }
}

fn ledger_key(ledger: &ParticipantLedger) -> String {
    ledger
        .profile
        .as_ref()
        .map(|p| p.ssn)
        .or_else(|| ledger.transactions.first().map(|t| t.ssn))
        .map(|ssn| ssn.to_string())
        .unwrap_or_else(|| "<empty ledger>".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ledger::{ParticipantProfile, Transaction},
        profit_code::ProfitCodeId,
        types::Ssn,
    };

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn contribution(ssn: Ssn, year: ProfitYear) -> Transaction {
        Transaction::new(format!("c{year}"), ssn, year, ProfitCodeId::INCOMING_CONTRIBUTIONS, date(i32::from(year), 12, 31))
            .with_contribution(dec!(500))
    }

    fn years(ledger: &ParticipantLedger, schedule: VestingSchedule, target: ProfitYear) -> u8 {
        let taxonomy = ProfitCodeTaxonomy::standard();
        let vesting = VestingConfig::default();
        let service = ServiceConfig::default();
        let calendar = FiscalCalendar::default();
        YearsOfServiceCalculator::new(&taxonomy, &vesting, &service, &calendar)
            .years_in_plan(ledger, schedule, target, None)
            .unwrap()
    }

    #[test]
    fn empty_ledger_has_no_service() {
        assert_eq!(years(&ParticipantLedger::default(), VestingSchedule::NewPlan, 2024), 0);
    }

    #[test]
    fn counts_distinct_contribution_years() {
        let ssn = Ssn::new(5);
        let mut rows: Vec<_> = (2018..=2021).map(|y| contribution(ssn, y)).collect();
        rows.push(
            Transaction::new("extra", ssn, 2021, ProfitCodeId::INCOMING_CONTRIBUTIONS, date(2021, 6, 1))
                .with_contribution(dec!(10)),
        );
        let ledger = ParticipantLedger::new(None, rows);
        assert_eq!(years(&ledger, VestingSchedule::NewPlan, 2021), 4);
        assert_eq!(years(&ledger, VestingSchedule::NewPlan, 2019), 2);
    }

    #[test]
    fn hours_qualify_only_at_service_age() {
        let ssn = Ssn::new(6);
        let profile = ParticipantProfile::employee(ssn, date(2003, 6, 1))
            .with_hours(2020, dec!(1200))
            .with_hours(2021, dec!(1200))
            .with_hours(2022, dec!(999));
        let ledger = ParticipantLedger::new(Some(profile), vec![]);
        // 17 at the end of 2020, 18 at the end of 2021, too few hours in 2022.
        assert_eq!(years(&ledger, VestingSchedule::NewPlan, 2022), 1);
    }

    #[test]
    fn unvested_cash_out_resets_new_plan_only() {
        let ssn = Ssn::new(8);
        let rows = vec![
            contribution(ssn, 2019),
            Transaction::new("f", ssn, 2019, ProfitCodeId::OUTGOING_FORFEITURES, date(2020, 2, 1))
                .with_forfeiture(dec!(500)),
            contribution(ssn, 2020),
        ];
        let ledger = ParticipantLedger::new(None, rows);
        assert_eq!(years(&ledger, VestingSchedule::NewPlan, 2020), 1);
        assert_eq!(years(&ledger, VestingSchedule::OldPlan, 2020), 2);
    }
}
