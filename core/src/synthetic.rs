//! Seeded synthetic plan ledgers.
//!
//! Amounts are drawn as whole cents so every generated value is exact
//! at 2 decimal places.

use crate::{
    ledger::{
        CommentType, MemoryLedger, ParticipantProfile, Termination, Transaction, YearIteration,
    },
    profit_code::ProfitCodeId,
    rng::{PlanRng, StreamSlot},
    types::{ProfitYear, Ssn},
};
use chrono::NaiveDate;
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct SyntheticLedgerConfig {
    pub participants: usize,
    pub first_year: ProfitYear,
    pub last_year: ProfitYear,
}

impl Default for SyntheticLedgerConfig {
    fn default() -> Self {
        Self {
            participants: 200,
            first_year: 2000,
            last_year: 2024,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyntheticPlan {
    pub participants: Vec<ParticipantProfile>,
    pub transactions: Vec<Transaction>,
}

impl SyntheticPlan {
    pub fn ssns(&self) -> Vec<Ssn> {
        self.participants.iter().map(|p| p.ssn).collect()
    }

    pub fn into_memory(self) -> MemoryLedger {
        let mut ledger = MemoryLedger::new();
        for profile in self.participants {
            ledger.insert_participant(profile);
        }
        ledger.extend(self.transactions);
        ledger
    }
}

fn cents(v: i64) -> Decimal {
    Decimal::new(v, 2)
}

fn year_end(year: ProfitYear) -> NaiveDate {
    NaiveDate::from_ymd_opt(i32::from(year), 12, 31).unwrap_or(NaiveDate::MIN)
}

fn mid_year(rng: &mut PlanRng, year: ProfitYear) -> NaiveDate {
    let ordinal = rng.between(15, 350) as u32;
    NaiveDate::from_yo_opt(i32::from(year), ordinal).unwrap_or_else(|| year_end(year))
}

struct RowIds {
    ssn: Ssn,
    next: u32,
}

impl RowIds {
    fn next(&mut self, year: ProfitYear) -> String {
        self.next += 1;
        format!("{}-{year}-{:03}", self.ssn.raw(), self.next)
    }
}

pub fn generate(seed: u64, config: &SyntheticLedgerConfig) -> SyntheticPlan {
    let mut people = PlanRng::new(seed, StreamSlot::Participants);
    let mut money = PlanRng::new(seed, StreamSlot::Contributions);
    let mut payouts = PlanRng::new(seed, StreamSlot::Payments);
    let mut transfers = PlanRng::new(seed, StreamSlot::Transfers);

    let mut plan = SyntheticPlan::default();
    let first = config.first_year;
    let last = config.last_year.max(first);

    for i in 0..config.participants {
        let ssn = Ssn::new(100_000_001 + (i as u32).wrapping_mul(37));
        let mut ids = RowIds { ssn, next: 0 };

        // One in ten accounts is a beneficiary funded by a QDRO transfer.
        if people.chance(0.1) {
            let year = people.between(i64::from(first), i64::from(last)) as ProfitYear;
            let amount = cents(transfers.between(50_000, 2_500_000));
            let comment = if transfers.chance(0.5) { CommentType::QdroIn } else { CommentType::TransferIn };
            plan.transactions.push(
                Transaction::new(ids.next(year), ssn, year, ProfitCodeId::INCOMING_QDRO_BENEFICIARY, mid_year(&mut transfers, year))
                    .with_contribution(amount)
                    .with_comment(comment),
            );
            for y in year..=last {
                let earned = amount * Decimal::new(transfers.between(-300, 900), 4);
                plan.transactions.push(
                    Transaction::new(ids.next(y), ssn, y, ProfitCodeId::INCOMING_100_PERCENT_VESTED_EARNINGS, year_end(y))
                        .with_earnings(earned.round_dp(2))
                        .with_comment(CommentType::OneHundredPercentEarnings),
                );
            }
            plan.participants.push(ParticipantProfile::beneficiary(ssn));
            continue;
        }

        let birth_year = people.between(1935, 2004) as i32;
        let dob = NaiveDate::from_ymd_opt(birth_year, people.between(1, 12) as u32, people.between(1, 28) as u32)
            .unwrap_or_else(|| year_end(first));
        let hire = people.between(i64::from(first), i64::from(last)) as ProfitYear;
        let leave = if people.chance(0.3) {
            Some(people.between(i64::from(hire), i64::from(last)) as ProfitYear)
        } else {
            None
        };
        let mut profile = ParticipantProfile::employee(ssn, dob);
        let mut balance: i64 = 0;

        for year in hire..=leave.unwrap_or(last) {
            let hours = Decimal::from(people.between(400, 2400));
            profile = profile.with_hours(year, hours);
            if hours < Decimal::from(1000) {
                continue;
            }
            let contribution = money.between(20_000, 600_000);
            let earnings = balance * money.between(-400, 1_200) / 10_000;
            let allocation = if money.chance(0.25) { money.between(100, 20_000) } else { 0 };
            let mut tx = Transaction::new(ids.next(year), ssn, year, ProfitCodeId::INCOMING_CONTRIBUTIONS, year_end(year))
                .with_contribution(cents(contribution))
                .with_earnings(cents(earnings))
                .with_forfeiture(cents(allocation))
                .with_markers(12, year);
            if money.chance(0.02) {
                tx = tx.with_iteration(YearIteration::Military).with_comment(CommentType::Military);
            }
            plan.transactions.push(tx);
            balance += contribution + earnings + allocation;

            if balance > 100_000 && payouts.chance(0.05) {
                let withdrawn = balance * payouts.between(5, 30) / 100;
                let code = *payouts
                    .pick(&[ProfitCodeId::OUTGOING_PARTIAL_WITHDRAWAL, ProfitCodeId::OUTGOING_DIRECT_PAYMENTS])
                    .unwrap_or(&ProfitCodeId::OUTGOING_PARTIAL_WITHDRAWAL);
                let comment = if code == ProfitCodeId::OUTGOING_DIRECT_PAYMENTS { CommentType::Rollover } else { CommentType::Hardship };
                let federal = withdrawn / 5;
                plan.transactions.push(
                    Transaction::new(ids.next(year), ssn, year, code, mid_year(&mut payouts, year))
                        .with_forfeiture(cents(withdrawn))
                        .with_taxes(cents(federal), cents(federal / 4))
                        .with_comment(comment),
                );
                balance -= withdrawn;
            }
        }

        if let Some(left) = leave {
            let tenure = left.saturating_sub(hire);
            let deceased = people.chance(0.05);
            profile.termination = Some(Termination { date: mid_year(&mut people, left), deceased });
            // Short-tenure leavers forfeit part of the account.
            if tenure < 5 && balance > 0 && !deceased {
                let forfeited = balance * (100 - i64::from(tenure) * 20) / 100;
                if forfeited > 0 {
                    let year = left.saturating_add(1).min(last);
                    plan.transactions.push(
                        Transaction::new(ids.next(year), ssn, year, ProfitCodeId::OUTGOING_FORFEITURES, mid_year(&mut payouts, year))
                            .with_forfeiture(cents(forfeited))
                            .with_comment(CommentType::Forfeit),
                    );
                }
            }
        }
        plan.participants.push(profile);
    }

    plan
}
