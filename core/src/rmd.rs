//! Required minimum distribution.
//!
//! RULE: A missing factor is an error. An age past the end of the
//! table uses the last factor; an age before its start, or a gap
//! inside it, fails with `UnknownAgeFactor`.

use crate::{
    balance::{round_currency, BalanceSnapshot},
    error::{EngineError, EngineResult},
    types::{Amount, ProfitYear, Ssn},
};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RmdFactorTable {
    factors: BTreeMap<u8, Decimal>,
}

impl RmdFactorTable {
    pub fn new(factors: BTreeMap<u8, Decimal>) -> EngineResult<Self> {
        let table = Self { factors };
        table.validate()?;
        Ok(table)
    }

    /// IRS Uniform Lifetime Table, ages 73 through 99.
    pub fn irs_uniform_lifetime() -> Self {
        let factors = [
            dec!(26.5), dec!(25.5), dec!(24.6), dec!(23.7), dec!(22.9), dec!(22.0), dec!(21.1),
            dec!(20.2), dec!(19.4), dec!(18.5), dec!(17.7), dec!(16.8), dec!(16.0), dec!(15.2),
            dec!(14.4), dec!(13.7), dec!(12.9), dec!(12.2), dec!(11.5), dec!(10.8), dec!(10.1),
            dec!(9.5), dec!(8.9), dec!(8.4), dec!(7.8), dec!(7.3), dec!(6.8),
        ];
        Self {
            factors: (73u8..).zip(factors).collect(),
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.factors.is_empty() {
            return Err(EngineError::InvalidConfig("empty RMD factor table".into()));
        }
        if let Some((age, factor)) = self.factors.iter().find(|(_, f)| **f <= Decimal::ZERO) {
            return Err(EngineError::InvalidConfig(format!(
                "RMD factor {factor} for age {age} must be positive"
            )));
        }
        Ok(())
    }

    pub fn min_age(&self) -> Option<u8> {
        self.factors.keys().next().copied()
    }

    pub fn max_age(&self) -> Option<u8> {
        self.factors.keys().next_back().copied()
    }

    pub fn factor_for(&self, age: u8) -> EngineResult<Decimal> {
        if let Some(factor) = self.factors.get(&age) {
            return Ok(*factor);
        }
        match self.factors.iter().next_back() {
            Some((&max, &factor)) if age > max => Ok(factor),
            _ => Err(EngineError::UnknownAgeFactor { age }),
        }
    }
}

impl Default for RmdFactorTable {
    fn default() -> Self {
        Self::irs_uniform_lifetime()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RmdConfig {
    pub starting_age: u8,
    /// At or below this balance the whole account is paid out.
    pub de_minimis_threshold: Amount,
    pub factors: RmdFactorTable,
}

impl Default for RmdConfig {
    fn default() -> Self {
        Self {
            starting_age: 73,
            de_minimis_threshold: dec!(1000),
            factors: RmdFactorTable::irs_uniform_lifetime(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RmdRecord {
    pub ssn: Ssn,
    pub profit_year: ProfitYear,
    pub age: u8,
    pub factor: Decimal,
    pub balance: Amount,
    pub rmd: Amount,
    pub payments_in_year: Amount,
    pub suggested_check: Amount,
}

impl RmdRecord {
    pub fn is_full_liquidation(&self) -> bool {
        self.suggested_check == self.balance && !self.balance.is_zero()
    }
}

pub struct RmdCalculator<'a> {
    config: &'a RmdConfig,
}

impl<'a> RmdCalculator<'a> {
    pub fn new(config: &'a RmdConfig) -> Self {
        Self { config }
    }

    pub fn calculate(
        &self,
        snapshot: &BalanceSnapshot,
        age: u8,
        payments_in_year: Amount,
    ) -> EngineResult<RmdRecord> {
        let factor = self.config.factors.factor_for(age)?;
        let balance = snapshot.current_balance;
        // an overdrawn account owes nothing
        let payable = balance.max(Decimal::ZERO);
        let rmd = if factor > Decimal::ZERO {
            (payable / factor).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        } else {
            Decimal::ZERO
        };

        let suggested_check = if payable <= self.config.de_minimis_threshold {
            payable
        } else {
            round_currency((rmd - payments_in_year).max(Decimal::ZERO))
        };

        log::debug!(
            "{} RMD {}: age {age} factor {factor} rmd {rmd} paid {payments_in_year} check {suggested_check}",
            snapshot.ssn,
            snapshot.profit_year
        );

        Ok(RmdRecord {
            ssn: snapshot.ssn,
            profit_year: snapshot.profit_year,
            age,
            factor,
            balance,
            rmd,
            payments_in_year,
            suggested_check,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn irs_table_spans_73_to_99() {
        let t = RmdFactorTable::irs_uniform_lifetime();
        assert_eq!(t.min_age(), Some(73));
        assert_eq!(t.max_age(), Some(99));
        assert_eq!(t.factor_for(73).unwrap(), dec!(26.5));
        assert_eq!(t.factor_for(99).unwrap(), dec!(6.8));
    }

    #[test]
    fn ages_past_the_table_use_last_factor() {
        let t = RmdFactorTable::irs_uniform_lifetime();
        assert_eq!(t.factor_for(104).unwrap(), dec!(6.8));
    }

    #[test]
    fn age_below_table_is_an_error() {
        let t = RmdFactorTable::irs_uniform_lifetime();
        assert!(matches!(t.factor_for(72), Err(EngineError::UnknownAgeFactor { age: 72 })));
    }

    #[test]
    fn gap_in_table_is_an_error() {
        let mut factors = BTreeMap::new();
        factors.insert(73, dec!(26.5));
        factors.insert(75, dec!(24.6));
        let t = RmdFactorTable::new(factors).unwrap();
        assert!(matches!(t.factor_for(74), Err(EngineError::UnknownAgeFactor { age: 74 })));
    }

    #[test]
    fn non_positive_factor_is_rejected() {
        let mut factors = BTreeMap::new();
        factors.insert(73, Decimal::ZERO);
        assert!(RmdFactorTable::new(factors).is_err());
        assert!(RmdFactorTable::new(BTreeMap::new()).is_err());
    }
}
