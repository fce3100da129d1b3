//! Year-over-year balance equation.
//!
//!   ending = beginning + contributions + allocations − distributions
//!            − paid allocations + earnings − forfeitures
//!
//! Distributions, paid allocations and forfeitures are carried signed
//! on `CategoryTotals`, so every term is added.

use crate::{
    balance::{AggregationMode, BalanceSnapshot},
    error::{EngineError, EngineResult},
    types::{Amount, ProfitYear, Ssn},
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

pub const PENNY_TOLERANCE: Decimal = dec!(0.01);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceEquation {
    pub ssn: Ssn,
    pub profit_year: ProfitYear,
    pub beginning: Amount,
    pub contributions: Amount,
    pub allocations: Amount,
    pub distributions: Amount,
    pub paid_allocations: Amount,
    pub earnings: Amount,
    pub forfeitures: Amount,
    pub calculated_ending: Amount,
    pub actual_ending: Amount,
    pub variance: Amount,
    pub is_balanced: bool,
}

impl BalanceEquation {
    /// Reconcile `delta` (year Y) against the cumulative snapshots for
    /// Y − 1 and Y.
    pub fn check(
        prior: &BalanceSnapshot,
        delta: &BalanceSnapshot,
        current: &BalanceSnapshot,
    ) -> EngineResult<Self> {
        if prior.mode != AggregationMode::Cumulative
            || current.mode != AggregationMode::Cumulative
            || delta.mode != AggregationMode::Delta
        {
            return Err(EngineError::InvalidConfig(
                "balance equation needs cumulative, delta, cumulative snapshots".into(),
            ));
        }
        if prior.ssn != delta.ssn || delta.ssn != current.ssn {
            return Err(EngineError::InvalidConfig(
                "balance equation snapshots belong to different participants".into(),
            ));
        }

        let t = &delta.totals;
        let contributions = t.contributions;
        let allocations = t.allocations();
        let earnings = t.earnings + t.vested_earnings;
        let forfeitures = t.forfeitures + t.forfeiture_allocations;
        let calculated_ending = prior.current_balance
            + contributions
            + allocations
            + t.distributions
            + t.paid_allocations()
            + earnings
            + forfeitures;
        let variance = current.current_balance - calculated_ending;
        let is_balanced = variance.abs() < PENNY_TOLERANCE;

        if !is_balanced {
            log::warn!(
                "{} year {}: balance equation off by {variance} (calculated {calculated_ending}, actual {})",
                current.ssn,
                current.profit_year,
                current.current_balance
            );
        }

        Ok(Self {
            ssn: current.ssn,
            profit_year: current.profit_year,
            beginning: prior.current_balance,
            contributions,
            allocations,
            distributions: -t.distributions,
            paid_allocations: -t.paid_allocations(),
            earnings,
            forfeitures: -forfeitures,
            calculated_ending,
            actual_ending: current.current_balance,
            variance,
            is_balanced,
        })
    }
}
