use super::LedgerStore;
use crate::{
    error::EngineResult,
    types::{ProfitYear, Ssn},
    vesting::ParticipantVestingState,
};
use rusqlite::{params, OptionalExtension};

impl LedgerStore {
    // ── Vesting state ─────────────────────────────────────────────

    pub fn save_vesting_state(&self, state: &ParticipantVestingState) -> EngineResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO vesting_state
             (ssn, profit_year, vesting_percent, ever_fully_vested, state_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                i64::from(state.ssn.raw()),
                i64::from(state.profit_year),
                state.vesting_percent.to_string(),
                state.ever_fully_vested as i32,
                serde_json::to_string(state)?,
            ],
        )?;
        Ok(())
    }

    /// Latest saved state at or before `profit_year`.
    pub fn latest_vesting_state(
        &self,
        ssn: Ssn,
        profit_year: ProfitYear,
    ) -> EngineResult<Option<ParticipantVestingState>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT state_json FROM vesting_state
                 WHERE ssn = ?1 AND profit_year <= ?2
                 ORDER BY profit_year DESC LIMIT 1",
                params![i64::from(ssn.raw()), i64::from(profit_year)],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(j) => Ok(Some(serde_json::from_str::<ParticipantVestingState>(&j)?)),
            None => Ok(None),
        }
    }
}
