use super::{date_text, enum_text, parse_date, parse_decimal, parse_enum, parse_int, LedgerStore};
use crate::{
    error::EngineResult,
    ledger::{sort_ledger, Transaction, YearBound},
    profit_code::ProfitCodeId,
    types::{ProfitYear, Ssn},
};
use rusqlite::{params, Row};
use std::collections::{BTreeMap, BTreeSet};

const COLUMNS: &str = "id, ssn, profit_year, iteration, profit_code, comment_type,
     contribution, earnings, forfeiture, federal_taxes, state_taxes,
     transaction_date, month_to_date, year_to_date, years_of_service_credit";

/// Column values as stored, before decimal/date/enum parsing.
struct RawTransaction {
    id: String,
    ssn: i64,
    profit_year: i64,
    iteration: String,
    profit_code: i64,
    comment_type: Option<String>,
    amounts: [String; 5],
    transaction_date: String,
    month_to_date: i64,
    year_to_date: i64,
    years_of_service_credit: i64,
}

impl RawTransaction {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            ssn: row.get(1)?,
            profit_year: row.get(2)?,
            iteration: row.get(3)?,
            profit_code: row.get(4)?,
            comment_type: row.get(5)?,
            amounts: [row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?, row.get(10)?],
            transaction_date: row.get(11)?,
            month_to_date: row.get(12)?,
            year_to_date: row.get(13)?,
            years_of_service_credit: row.get(14)?,
        })
    }

    fn into_transaction(self) -> EngineResult<Transaction> {
        let [contribution, earnings, forfeiture, federal, state] = self.amounts;
        Ok(Transaction {
            ssn: Ssn::new(parse_int("ssn", self.ssn)?),
            profit_year: parse_int::<ProfitYear>("profit_year", self.profit_year)?,
            iteration: parse_enum(&self.iteration)?,
            profit_code: ProfitCodeId(parse_int("profit_code", self.profit_code)?),
            comment_type: self.comment_type.as_deref().map(parse_enum).transpose()?,
            contribution: parse_decimal("contribution", &contribution)?,
            earnings: parse_decimal("earnings", &earnings)?,
            forfeiture: parse_decimal("forfeiture", &forfeiture)?,
            federal_taxes: parse_decimal("federal_taxes", &federal)?,
            state_taxes: parse_decimal("state_taxes", &state)?,
            transaction_date: parse_date("transaction_date", &self.transaction_date)?,
            month_to_date: parse_int("month_to_date", self.month_to_date)?,
            year_to_date: parse_int("year_to_date", self.year_to_date)?,
            years_of_service_credit: parse_int("years_of_service_credit", self.years_of_service_credit)?,
            id: self.id,
        })
    }
}

fn bound_clause(bound: YearBound) -> (&'static str, i64) {
    match bound {
        YearBound::Through(y) => ("profit_year <= ?", i64::from(y)),
        YearBound::Exactly(y) => ("profit_year = ?", i64::from(y)),
    }
}

impl LedgerStore {
    // ── Profit detail ─────────────────────────────────────────────

    pub fn insert_transaction(&self, tx: &Transaction) -> EngineResult<()> {
        let comment = tx.comment_type.as_ref().map(enum_text).transpose()?;
        self.conn.execute(
            &format!("INSERT INTO profit_detail ({COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"),
            params![
                tx.id,
                i64::from(tx.ssn.raw()),
                i64::from(tx.profit_year),
                enum_text(&tx.iteration)?,
                i64::from(tx.profit_code.0),
                comment,
                tx.contribution.to_string(),
                tx.earnings.to_string(),
                tx.forfeiture.to_string(),
                tx.federal_taxes.to_string(),
                tx.state_taxes.to_string(),
                date_text(tx.transaction_date),
                i64::from(tx.month_to_date),
                i64::from(tx.year_to_date),
                i64::from(tx.years_of_service_credit),
            ],
        )?;
        Ok(())
    }

    pub(super) fn transactions_by_ssn(&self, ssn: Ssn, bound: YearBound) -> EngineResult<Vec<Transaction>> {
        let (clause, year) = bound_clause(bound);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM profit_detail
             WHERE ssn = ?1 AND {}
             ORDER BY profit_year, transaction_date, id",
            clause.replace('?', "?2")
        ))?;
        let raw = stmt
            .query_map(params![i64::from(ssn.raw()), year], RawTransaction::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        let mut rows = raw
            .into_iter()
            .map(RawTransaction::into_transaction)
            .collect::<EngineResult<Vec<_>>>()?;
        sort_ledger(&mut rows);
        Ok(rows)
    }

    pub(super) fn transactions_grouped(
        &self,
        ssns: &[Ssn],
        bound: YearBound,
    ) -> EngineResult<BTreeMap<Ssn, Vec<Transaction>>> {
        let wanted: BTreeSet<Ssn> = ssns.iter().copied().collect();
        let (clause, year) = bound_clause(bound);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM profit_detail
             WHERE {}
             ORDER BY ssn, profit_year, transaction_date, id",
            clause.replace('?', "?1")
        ))?;
        let raw = stmt
            .query_map(params![year], RawTransaction::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut out: BTreeMap<Ssn, Vec<Transaction>> =
            wanted.iter().map(|ssn| (*ssn, Vec::new())).collect();
        for r in raw {
            let ssn = Ssn::new(parse_int("ssn", r.ssn)?);
            if let Some(rows) = out.get_mut(&ssn) {
                rows.push(r.into_transaction()?);
            }
        }
        for rows in out.values_mut() {
            sort_ledger(rows);
        }
        Ok(out)
    }
}
