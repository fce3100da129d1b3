//! Plan calendar: fiscal year boundaries and participant age.

use crate::types::ProfitYear;
use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FiscalCalendar {
    pub year_end_month: u32,
    pub year_end_day:   u32,
}

impl FiscalCalendar {
    pub const CALENDAR_YEAR: Self = Self {
        year_end_month: 12,
        year_end_day:   31,
    };

    pub fn is_valid(&self) -> bool {
        NaiveDate::from_ymd_opt(2001, self.year_end_month, self.year_end_day).is_some()
    }

    /// Last day of the profit year. Falls back to December 31 if the
    /// configured day does not exist in that year.
    pub fn fiscal_year_end(&self, year: ProfitYear) -> NaiveDate {
        let y = i32::from(year);
        NaiveDate::from_ymd_opt(y, self.year_end_month, self.year_end_day)
            .or_else(|| NaiveDate::from_ymd_opt(y, 12, 31))
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn fiscal_year_start(&self, year: ProfitYear) -> NaiveDate {
        let prior_end = self.fiscal_year_end(year.saturating_sub(1));
        prior_end.checked_add_days(Days::new(1)).unwrap_or(prior_end)
    }
}

impl Default for FiscalCalendar {
    fn default() -> Self {
        Self::CALENDAR_YEAR
    }
}

/// Whole years completed on `on`. Zero if `on` precedes birth.
pub fn age_on(date_of_birth: NaiveDate, on: NaiveDate) -> u8 {
    if on < date_of_birth {
        return 0;
    }
    let mut years = on.year() - date_of_birth.year();
    if (on.month(), on.day()) < (date_of_birth.month(), date_of_birth.day()) {
        years -= 1;
    }
    u8::try_from(years.max(0)).unwrap_or(u8::MAX)
}
