//! SQLite ledger store.
//!
//! RULE: Only the store talks to the database. The engine reads it
//! through `LedgerSource` and never executes SQL directly.

mod participants;
mod transactions;
mod vesting;

use crate::{
    error::{EngineError, EngineResult},
    ledger::{LedgerSource, ParticipantProfile, Transaction, YearBound},
    synthetic::SyntheticPlan,
    types::{ProfitYear, Ssn},
    vesting::ParticipantVestingState,
};
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Serialize};
use std::{collections::BTreeMap, str::FromStr};

pub struct LedgerStore {
    conn: Connection,
    path: Option<String>, // None for :memory:
}

impl LedgerStore {
    pub fn open(path: &str) -> EngineResult<Self> {
        let conn = Connection::open(path)?;
        // WAL only matters for real files.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> EngineResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_ledger.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_vesting_state.sql"))?;
        Ok(())
    }

    /// Bulk-load a generated plan inside one transaction.
    pub fn load_plan(&self, plan: &SyntheticPlan) -> EngineResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        for profile in &plan.participants {
            self.insert_participant(profile)?;
        }
        for row in &plan.transactions {
            self.insert_transaction(row)?;
        }
        tx.commit()?;
        log::info!(
            "Loaded {} participants and {} ledger rows",
            plan.participants.len(),
            plan.transactions.len()
        );
        Ok(())
    }

    pub fn transaction_count(&self) -> EngineResult<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM profit_detail", params![], |row| row.get(0))?;
        parse_int("count", n)
    }
}

impl LedgerSource for LedgerStore {
    fn transactions(&self, ssn: Ssn, bound: YearBound) -> EngineResult<Vec<Transaction>> {
        self.transactions_by_ssn(ssn, bound)
    }

    fn participant(&self, ssn: Ssn) -> EngineResult<Option<ParticipantProfile>> {
        self.load_participant(ssn)
    }

    fn participants(&self) -> EngineResult<Vec<Ssn>> {
        self.participant_keys()
    }

    fn transactions_for(
        &self,
        ssns: &[Ssn],
        bound: YearBound,
    ) -> EngineResult<BTreeMap<Ssn, Vec<Transaction>>> {
        self.transactions_grouped(ssns, bound)
    }

    fn prior_vesting_state(
        &self,
        ssn: Ssn,
        profit_year: ProfitYear,
    ) -> EngineResult<Option<ParticipantVestingState>> {
        self.latest_vesting_state(ssn, profit_year)
    }
}

// ── Column codecs ──────────────────────────────────────────────────

/// snake_case name of a unit enum variant.
fn enum_text<T: Serialize>(value: &T) -> EngineResult<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(EngineError::Other(anyhow::anyhow!(
            "expected a unit variant, got {other}"
        ))),
    }
}

fn parse_enum<T: DeserializeOwned>(text: &str) -> EngineResult<T> {
    Ok(serde_json::from_value(serde_json::Value::String(text.to_string()))?)
}

fn parse_decimal(column: &str, text: &str) -> EngineResult<Decimal> {
    Decimal::from_str(text)
        .map_err(|e| EngineError::Other(anyhow::anyhow!("Bad decimal in {column}: {text}: {e}")))
}

fn parse_date(column: &str, text: &str) -> EngineResult<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map_err(|e| EngineError::Other(anyhow::anyhow!("Bad date in {column}: {text}: {e}")))
}

fn parse_int<T: TryFrom<i64>>(column: &str, value: i64) -> EngineResult<T> {
    T::try_from(value)
        .map_err(|_| EngineError::Other(anyhow::anyhow!("Out of range {column}: {value}")))
}

fn date_text(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
