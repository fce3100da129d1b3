//! Balance aggregation.
//!
//! RULE: Signs come from the taxonomy once, when a row is bucketed.
//! Every total below is already signed; the balance is their plain sum.
//!
//! A snapshot is either cumulative (profit_year <= Y) or a single-year
//! delta (profit_year == Y). Rows of year Y dated after the as-of date
//! are left out in both modes.

use crate::{
    calendar::FiscalCalendar,
    error::{EngineError, EngineResult},
    ledger::{CommentType, ParticipantLedger, Transaction, YearBound, YearIteration},
    profit_code::{Direction, LedgerField, ProfitCodeCategory, ProfitCodeTaxonomy},
    types::{Amount, ProfitYear, Ssn},
    vesting::{ParticipantVestingState, VestingSchedule},
};
use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, sync::Arc};

/// Currency rounding: 2 places, half away from zero.
pub fn round_currency(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    #[default]
    Cumulative,
    Delta,
}

pub type DistributionPredicate = dyn Fn(&Transaction, ProfitCodeCategory) -> bool + Send + Sync;

/// Decides which payment rows count as distributions. Rejected payment
/// rows still move the balance, as transfers out or QDRO out.
#[derive(Clone, Default)]
pub enum DistributionFilter {
    #[default]
    AllPayments,
    /// Beneficiary transfers and 100%-vested payments tagged as a
    /// transfer or QDRO out are paid allocations, not distributions.
    ExcludeTransfersAndQdro,
    Custom(Arc<DistributionPredicate>),
}

impl DistributionFilter {
    pub fn custom(f: impl Fn(&Transaction, ProfitCodeCategory) -> bool + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    pub fn is_distribution(&self, tx: &Transaction, category: ProfitCodeCategory) -> bool {
        match self {
            Self::AllPayments => true,
            Self::ExcludeTransfersAndQdro => match category {
                ProfitCodeCategory::OutgoingTransferToBeneficiary => false,
                ProfitCodeCategory::Outgoing100PercentVestedPayment => !matches!(
                    tx.comment_type,
                    Some(CommentType::TransferOut | CommentType::QdroOut)
                ),
                _ => true,
            },
            Self::Custom(f) => f(tx, category),
        }
    }
}

impl fmt::Debug for DistributionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllPayments => f.write_str("AllPayments"),
            Self::ExcludeTransfersAndQdro => f.write_str("ExcludeTransfersAndQdro"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BalanceRequest {
    pub profit_year: ProfitYear,
    /// Defaults to the fiscal year end of `profit_year`.
    pub as_of: Option<NaiveDate>,
    pub mode: AggregationMode,
    pub distribution_filter: DistributionFilter,
}

impl BalanceRequest {
    pub fn cumulative(profit_year: ProfitYear) -> Self {
        Self {
            profit_year,
            ..Self::default()
        }
    }

    pub fn delta(profit_year: ProfitYear) -> Self {
        Self {
            profit_year,
            mode: AggregationMode::Delta,
            ..Self::default()
        }
    }

    pub fn as_of(mut self, date: NaiveDate) -> Self {
        self.as_of = Some(date);
        self
    }

    pub fn with_filter(mut self, filter: DistributionFilter) -> Self {
        self.distribution_filter = filter;
        self
    }

    pub fn bound(&self) -> YearBound {
        match self.mode {
            AggregationMode::Cumulative => YearBound::Through(self.profit_year),
            AggregationMode::Delta => YearBound::Exactly(self.profit_year),
        }
    }

    pub fn effective_as_of(&self, calendar: &FiscalCalendar) -> NaiveDate {
        self.as_of
            .unwrap_or_else(|| calendar.fiscal_year_end(self.profit_year))
    }

    /// Whether `tx` is in scope for this request.
    pub fn includes(&self, tx: &Transaction) -> bool {
        if !self.bound().contains(tx.profit_year) {
            return false;
        }
        match self.as_of {
            Some(as_of) if tx.profit_year == self.profit_year => tx.transaction_date <= as_of,
            _ => true,
        }
    }
}

/// Signed per-category totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryTotals {
    pub contributions: Amount,
    pub earnings: Amount,
    /// Forfeitures of other participants allocated to this account.
    pub forfeiture_allocations: Amount,
    pub forfeitures: Amount,
    pub distributions: Amount,
    pub transfers_in: Amount,
    pub transfers_out: Amount,
    pub qdro_in: Amount,
    pub qdro_out: Amount,
    pub vested_earnings: Amount,
}

impl CategoryTotals {
    pub fn balance(&self) -> Amount {
        self.contributions
            + self.earnings
            + self.forfeiture_allocations
            + self.forfeitures
            + self.distributions
            + self.transfers_in
            + self.transfers_out
            + self.qdro_in
            + self.qdro_out
            + self.vested_earnings
    }

    /// Allocations paid out to another account (negative).
    pub fn paid_allocations(&self) -> Amount {
        self.transfers_out + self.qdro_out
    }

    /// Allocations received from another account.
    pub fn allocations(&self) -> Amount {
        self.transfers_in + self.qdro_in
    }

    fn add(
        &mut self,
        tx: &Transaction,
        category: ProfitCodeCategory,
        field: LedgerField,
        signed: Amount,
        filter: &DistributionFilter,
    ) {
        use ProfitCodeCategory as C;
        let bucket = match field {
            LedgerField::Contribution => match category {
                C::IncomingQdroBeneficiary if tx.comment_type == Some(CommentType::TransferIn) => &mut self.transfers_in,
                C::IncomingQdroBeneficiary => &mut self.qdro_in,
                _ => &mut self.contributions,
            },
            LedgerField::Earnings => match category {
                C::Incoming100PercentVestedEarnings => &mut self.vested_earnings,
                _ => &mut self.earnings,
            },
            LedgerField::Forfeiture if category.is_payment() => {
                if filter.is_distribution(tx, category) {
                    &mut self.distributions
                } else if tx.comment_type == Some(CommentType::QdroOut) {
                    &mut self.qdro_out
                } else {
                    &mut self.transfers_out
                }
            }
            LedgerField::Forfeiture => match category.direction() {
                Direction::Incoming => &mut self.forfeiture_allocations,
                Direction::Outgoing => &mut self.forfeitures,
            },
        };
        *bucket += signed;
    }
}

/// Activity inside the requested profit year only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfitYearActivity {
    /// Absolute forfeiture-field amounts on outgoing rows.
    pub payments: Amount,
    pub military_contributions: Amount,
    pub class_action_earnings: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub ssn: Ssn,
    pub profit_year: ProfitYear,
    pub as_of: NaiveDate,
    pub mode: AggregationMode,
    pub totals: CategoryTotals,
    pub current_balance: Amount,
    /// 100%-vested amount. Informational.
    pub etva: Amount,
    pub vested_balance: Amount,
    pub vesting_percent: Decimal,
    pub years_in_plan: u8,
    pub schedule: VestingSchedule,
    pub activity: ProfitYearActivity,
}

impl BalanceSnapshot {
    /// Balance considered for earnings, in hundreds, half away from zero.
    pub fn earning_points(&self) -> Decimal {
        let considered = self.current_balance
            - self.activity.military_contributions
            - self.activity.class_action_earnings;
        (considered / dec!(100)).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
    }

    pub fn is_zero(&self) -> bool {
        self.current_balance.is_zero()
    }
}

/// Withholding-aware net balance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetBalance {
    pub ssn: Option<Ssn>,
    pub profit_year: ProfitYear,
    pub contributions: Amount,
    pub earnings: Amount,
    pub forfeiture_allocations: Amount,
    pub payments: Amount,
    pub federal_taxes: Amount,
    pub state_taxes: Amount,
    pub net: Amount,
}

pub struct BalanceAggregator<'a> {
    taxonomy: &'a ProfitCodeTaxonomy,
    calendar: &'a FiscalCalendar,
}

impl<'a> BalanceAggregator<'a> {
    pub fn new(taxonomy: &'a ProfitCodeTaxonomy, calendar: &'a FiscalCalendar) -> Self {
        Self { taxonomy, calendar }
    }

    /// Fold the in-scope rows of `ledger` into a snapshot.
    ///
    /// Every row is classified before anything is summed, so an unknown
    /// profit code fails the whole snapshot.
    pub fn snapshot(
        &self,
        ssn: Ssn,
        ledger: &ParticipantLedger,
        request: &BalanceRequest,
        vesting: &ParticipantVestingState,
    ) -> EngineResult<BalanceSnapshot> {
        let rows = self.classify(ledger, request)?;

        let mut totals = CategoryTotals::default();
        let mut etva = Decimal::ZERO;
        let mut activity = ProfitYearActivity::default();
        // raw (unsigned) totals per category, for the integrity guard
        let mut gross: BTreeMap<ProfitCodeCategory, Amount> = BTreeMap::new();

        for (tx, category) in &rows {
            let entry = self.taxonomy.entry(tx.profit_code)?;
            for (field, raw) in [
                (LedgerField::Contribution, tx.contribution),
                (LedgerField::Earnings, tx.earnings),
                (LedgerField::Forfeiture, tx.forfeiture),
            ] {
                if raw.is_zero() {
                    continue;
                }
                let signed = entry.sign_for(field).apply(raw);
                totals.add(tx, *category, field, signed, &request.distribution_filter);
                if category.etva_field() == Some(field) {
                    etva += signed;
                }
            }

            match category.direction() {
                Direction::Outgoing => *gross.entry(*category).or_default() += tx.forfeiture,
                Direction::Incoming if *category == ProfitCodeCategory::IncomingQdroBeneficiary => {
                    *gross.entry(*category).or_default() += tx.contribution
                }
                Direction::Incoming => {}
            }

            if tx.profit_year == request.profit_year {
                let contribution = entry.sign_for(LedgerField::Contribution).apply(tx.contribution);
                let earnings = entry.sign_for(LedgerField::Earnings).apply(tx.earnings);
                record_activity(&mut activity, tx, *category, contribution, earnings);
            }
        }

        if request.mode == AggregationMode::Cumulative {
            if let Some((category, total)) = gross.into_iter().find(|(_, total)| *total < Decimal::ZERO) {
                return Err(EngineError::InconsistentLedger {
                    ssn,
                    profit_year: request.profit_year,
                    category,
                    total,
                });
            }
        }

        let current_balance = totals.balance();
        let vested_balance = round_currency(current_balance * vesting.vesting_percent / dec!(100));

        log::debug!(
            "{ssn} {:?} {}: balance {current_balance} vested {vested_balance} ({}%) over {} rows",
            request.mode,
            request.profit_year,
            vesting.vesting_percent,
            rows.len()
        );

        Ok(BalanceSnapshot {
            ssn,
            profit_year: request.profit_year,
            as_of: request.effective_as_of(self.calendar),
            mode: request.mode,
            totals,
            current_balance,
            etva,
            vested_balance,
            vesting_percent: vesting.vesting_percent,
            years_in_plan: vesting.years_in_plan,
            schedule: vesting.schedule,
            activity,
        })
    }

    /// Net of withholding, cumulative through the request's year.
    pub fn net_balance(
        &self,
        ssn: Ssn,
        ledger: &ParticipantLedger,
        request: &BalanceRequest,
    ) -> EngineResult<NetBalance> {
        let rows = self.classify(ledger, request)?;
        let mut net = NetBalance {
            ssn: Some(ssn),
            profit_year: request.profit_year,
            ..NetBalance::default()
        };
        for (tx, category) in rows {
            net.contributions += tx.contribution;
            net.earnings += tx.earnings;
            match category.direction() {
                Direction::Incoming => net.forfeiture_allocations += tx.forfeiture,
                Direction::Outgoing => net.payments += tx.forfeiture,
            }
            net.federal_taxes += tx.federal_taxes;
            net.state_taxes += tx.state_taxes;
        }
        net.net = net.contributions + net.earnings + net.forfeiture_allocations - net.payments;
        Ok(net)
    }

    fn classify<'l>(
        &self,
        ledger: &'l ParticipantLedger,
        request: &BalanceRequest,
    ) -> EngineResult<Vec<(&'l Transaction, ProfitCodeCategory)>> {
        ledger
            .transactions
            .iter()
            .filter(|tx| request.includes(tx))
            .map(|tx| self.taxonomy.category(tx.profit_code).map(|c| (tx, c)))
            .collect()
    }
}

fn record_activity(
    activity: &mut ProfitYearActivity,
    tx: &Transaction,
    category: ProfitCodeCategory,
    signed_contribution: Amount,
    signed_earnings: Amount,
) {
    if category.direction() == Direction::Outgoing {
        activity.payments += tx.forfeiture.abs();
    }
    if tx.iteration == YearIteration::Military || tx.comment_type == Some(CommentType::Military) {
        activity.military_contributions += signed_contribution;
    }
    if tx.iteration == YearIteration::ClassActionFund || tx.comment_type == Some(CommentType::ClassAction) {
        activity.class_action_earnings += signed_earnings;
    }
}
