use super::{date_text, enum_text, parse_date, parse_decimal, parse_enum, parse_int, LedgerStore};
use crate::{
    error::EngineResult,
    ledger::{ParticipantProfile, Termination},
    types::{ProfitYear, Ssn},
};
use rust_decimal::Decimal;
use rusqlite::{params, OptionalExtension};
use std::collections::BTreeMap;

impl LedgerStore {
    // ── Participant ───────────────────────────────────────────────

    /// Insert or replace a participant with its hours.
    pub fn insert_participant(&self, profile: &ParticipantProfile) -> EngineResult<()> {
        let ssn = i64::from(profile.ssn.raw());
        self.conn.execute(
            "INSERT OR REPLACE INTO participant
             (ssn, kind, date_of_birth, termination_date, deceased, zero_contribution_reason, enrollment)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                ssn,
                enum_text(&profile.kind)?,
                profile.date_of_birth.map(date_text),
                profile.termination.map(|t| date_text(t.date)),
                profile.termination.is_some_and(|t| t.deceased) as i32,
                profile.zero_contribution_reason.as_ref().map(enum_text).transpose()?,
                profile.enrollment.as_ref().map(enum_text).transpose()?,
            ],
        )?;
        for (year, hours) in &profile.hours {
            self.record_hours(profile.ssn, *year, *hours)?;
        }
        Ok(())
    }

    pub fn record_hours(&self, ssn: Ssn, profit_year: ProfitYear, hours: Decimal) -> EngineResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO participant_hours (ssn, profit_year, hours) VALUES (?1, ?2, ?3)",
            params![i64::from(ssn.raw()), i64::from(profit_year), hours.to_string()],
        )?;
        Ok(())
    }

    pub(super) fn load_participant(&self, ssn: Ssn) -> EngineResult<Option<ParticipantProfile>> {
        let raw = self
            .conn
            .query_row(
                "SELECT kind, date_of_birth, termination_date, deceased, zero_contribution_reason, enrollment
                 FROM participant WHERE ssn = ?1",
                params![i64::from(ssn.raw())],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, i32>(3)? != 0,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                },
            )
            .optional()?;
        let Some((kind, dob, terminated, deceased, reason, enrollment)) = raw else {
            return Ok(None);
        };

        let termination = terminated
            .as_deref()
            .map(|d| parse_date("termination_date", d))
            .transpose()?
            .map(|date| Termination { date, deceased });

        Ok(Some(ParticipantProfile {
            ssn,
            kind: parse_enum(&kind)?,
            date_of_birth: dob.as_deref().map(|d| parse_date("date_of_birth", d)).transpose()?,
            termination,
            zero_contribution_reason: reason.as_deref().map(parse_enum).transpose()?,
            enrollment: enrollment.as_deref().map(parse_enum).transpose()?,
            hours: self.hours_for(ssn)?,
        }))
    }

    fn hours_for(&self, ssn: Ssn) -> EngineResult<BTreeMap<ProfitYear, Decimal>> {
        let mut stmt = self.conn.prepare(
            "SELECT profit_year, hours FROM participant_hours WHERE ssn = ?1 ORDER BY profit_year",
        )?;
        let raw = stmt
            .query_map(params![i64::from(ssn.raw())], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter()
            .map(|(year, hours)| -> EngineResult<(ProfitYear, Decimal)> {
                Ok((parse_int("profit_year", year)?, parse_decimal("hours", &hours)?))
            })
            .collect()
    }

    pub(super) fn participant_keys(&self) -> EngineResult<Vec<Ssn>> {
        let mut stmt = self.conn.prepare(
            "SELECT ssn FROM participant UNION SELECT ssn FROM profit_detail ORDER BY 1",
        )?;
        let keys = stmt
            .query_map(params![], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        keys.into_iter()
            .map(|k| Ok(Ssn::new(parse_int("ssn", k)?)))
            .collect()
    }
}
