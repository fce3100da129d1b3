//! The balance engine.
//!
//! EXECUTION ORDER (per participant, strictly sequential):
//!   1. Bound the ledger to the requested year and as-of date
//!   2. Detect the vesting schedule (or take the enrollment indicator)
//!   3. Years of service
//!   4. Full-vesting overrides, then the step table, then sticky 100%
//!   5. Aggregate balances and apply the vesting percent
//!
//! RULES:
//!   - `compute` and `vesting_for` are pure. They read one ledger slice
//!     and return a fresh value.
//!   - Source-backed methods fetch first, then compute. Nothing is
//!     written back; persisting vesting state is the caller's job.
//!   - Cancellation is checked before each participant starts.

use crate::{
    balance::{
        AggregationMode, BalanceAggregator, BalanceRequest, BalanceSnapshot, DistributionFilter,
        NetBalance,
    },
    calendar::age_on,
    cancel::CancellationToken,
    config::PlanConfig,
    error::{EngineError, EngineResult},
    ledger::{LedgerSource, ParticipantLedger, YearBound},
    reconcile::BalanceEquation,
    rmd::{RmdCalculator, RmdRecord},
    types::{Amount, ProfitYear, Ssn},
    vesting::{
        detect_schedule, full_vesting_reason, has_forfeited, ParticipantVestingState,
        VestingInput, VestingResolver, VestingSchedule,
    },
    years_of_service::YearsOfServiceCalculator,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{num::NonZeroUsize, thread};

/// Plan-wide sums over a batch of snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanTotals {
    pub profit_year: ProfitYear,
    pub participants: usize,
    pub current_balance: Amount,
    pub vested_balance: Amount,
    pub etva: Amount,
    pub fully_vested: usize,
}

pub struct BalanceEngine {
    config:  PlanConfig,
    workers: usize,
}

impl BalanceEngine {
    pub fn new(config: PlanConfig) -> EngineResult<Self> {
        config.validate()?;
        let workers = thread::available_parallelism().map_or(1, NonZeroUsize::get);
        Ok(Self { config, workers })
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn config(&self) -> &PlanConfig {
        &self.config
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    // ── Pure computation ───────────────────────────────────────

    /// Vesting state in `profit_year`, from `ledger` alone.
    ///
    /// With `as_of`, target-year rows dated later are ignored. Without
    /// it every row of the year counts, exactly as the balance does;
    /// the fiscal year end is then only the reference date for ages
    /// and terminations.
    pub fn vesting_for(
        &self,
        ssn: Ssn,
        ledger: &ParticipantLedger,
        profit_year: ProfitYear,
        as_of: Option<NaiveDate>,
        prior: Option<&ParticipantVestingState>,
    ) -> EngineResult<ParticipantVestingState> {
        let c = &self.config;
        let bounded = bound_ledger(ledger, profit_year, as_of);
        let reference = as_of.unwrap_or_else(|| c.calendar.fiscal_year_end(profit_year));

        let schedule = self.schedule_for(&bounded)?;
        let years_in_plan = YearsOfServiceCalculator::new(&c.taxonomy, &c.vesting, &c.service, &c.calendar)
            .years_in_plan(&bounded, schedule, profit_year, as_of)?;
        let override_reason = full_vesting_reason(&bounded, &c.taxonomy, &c.vesting, reference)?;
        let forfeited = has_forfeited(&bounded, &c.taxonomy)?;

        let state = VestingResolver::new(&c.vesting).resolve(VestingInput {
            ssn,
            profit_year,
            years_in_plan,
            has_forfeited: forfeited,
            schedule,
            override_reason,
            prior,
        });
        log::debug!(
            "{ssn} vesting {profit_year}: {:?} {} years -> {}% ({:?})",
            state.schedule,
            state.years_in_plan,
            state.vesting_percent,
            state.full_vesting_reason
        );
        Ok(state)
    }

    /// Enrollment indicator if the profile has one, else detected.
    pub fn schedule_for(&self, ledger: &ParticipantLedger) -> EngineResult<VestingSchedule> {
        match ledger.profile.as_ref().and_then(|p| p.enrollment) {
            Some(enrolled) => Ok(enrolled),
            None => detect_schedule(ledger, &self.config.taxonomy, self.config.vesting.new_plan_effective_year),
        }
    }

    /// Snapshot for one participant from an already-fetched ledger.
    pub fn compute(
        &self,
        ssn: Ssn,
        ledger: &ParticipantLedger,
        request: &BalanceRequest,
        prior: Option<&ParticipantVestingState>,
    ) -> EngineResult<BalanceSnapshot> {
        let vesting = self.vesting_for(ssn, ledger, request.profit_year, request.as_of, prior)?;
        BalanceAggregator::new(&self.config.taxonomy, &self.config.calendar)
            .snapshot(ssn, ledger, request, &vesting)
    }

    pub fn rmd(&self, snapshot: &BalanceSnapshot, age: u8, payments_in_year: Amount) -> EngineResult<RmdRecord> {
        RmdCalculator::new(&self.config.rmd).calculate(snapshot, age, payments_in_year)
    }

    // ── Source-backed operations ───────────────────────────────

    pub fn years_of_service<S: LedgerSource + ?Sized>(
        &self,
        source: &S,
        ssn: Ssn,
        profit_year: ProfitYear,
        as_of: Option<NaiveDate>,
        cancel: &CancellationToken,
    ) -> EngineResult<u8> {
        cancel.check(ssn)?;
        let c = &self.config;
        let ledger = bound_ledger(&source.ledger(ssn, YearBound::Through(profit_year))?, profit_year, as_of);
        let schedule = self.schedule_for(&ledger)?;
        YearsOfServiceCalculator::new(&c.taxonomy, &c.vesting, &c.service, &c.calendar)
            .years_in_plan(&ledger, schedule, profit_year, as_of)
    }

    pub fn vesting_state<S: LedgerSource + ?Sized>(
        &self,
        source: &S,
        ssn: Ssn,
        profit_year: ProfitYear,
        as_of: Option<NaiveDate>,
        cancel: &CancellationToken,
    ) -> EngineResult<ParticipantVestingState> {
        cancel.check(ssn)?;
        let ledger = source.ledger(ssn, YearBound::Through(profit_year))?;
        let prior = source.prior_vesting_state(ssn, profit_year)?;
        self.vesting_for(ssn, &ledger, profit_year, as_of, prior.as_ref())
    }

    pub fn snapshot<S: LedgerSource + ?Sized>(
        &self,
        source: &S,
        ssn: Ssn,
        request: &BalanceRequest,
        cancel: &CancellationToken,
    ) -> EngineResult<BalanceSnapshot> {
        cancel.check(ssn)?;
        // vesting always needs the full history, even for a delta
        let ledger = source.ledger(ssn, YearBound::Through(request.profit_year))?;
        let prior = source.prior_vesting_state(ssn, request.profit_year)?;
        self.compute(ssn, &ledger, request, prior.as_ref())
    }

    /// Snapshots for many participants, ordered by SSN.
    ///
    /// Ledger slices are fetched up front on the calling thread; the
    /// pure computation fans out over scoped worker threads.
    pub fn snapshots<S: LedgerSource + ?Sized>(
        &self,
        source: &S,
        ssns: &[Ssn],
        request: &BalanceRequest,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<BalanceSnapshot>> {
        let mut keys = ssns.to_vec();
        keys.sort_unstable();
        keys.dedup();
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        log::info!(
            "Computing {} {:?} snapshots for {} on {} workers",
            keys.len(),
            request.mode,
            request.profit_year,
            self.workers
        );

        let mut rows = source.transactions_for(&keys, YearBound::Through(request.profit_year))?;
        let mut work = Vec::with_capacity(keys.len());
        for ssn in keys {
            let ledger = ParticipantLedger::new(source.participant(ssn)?, rows.remove(&ssn).unwrap_or_default());
            let prior = source.prior_vesting_state(ssn, request.profit_year)?;
            work.push((ssn, ledger, prior));
        }

        let chunk_size = work.len().div_ceil(self.workers);
        let results: Vec<EngineResult<Vec<BalanceSnapshot>>> = thread::scope(|scope| {
            let handles: Vec<_> = work
                .chunks(chunk_size)
                .map(|chunk| {
                    scope.spawn(move || {
                        chunk
                            .iter()
                            .map(|(ssn, ledger, prior)| {
                                cancel.check(*ssn)?;
                                self.compute(*ssn, ledger, request, prior.as_ref())
                            })
                            .collect::<EngineResult<Vec<_>>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| {
                        Err(EngineError::Other(anyhow::anyhow!("snapshot worker panicked")))
                    })
                })
                .collect()
        });

        let mut out = Vec::with_capacity(work.len());
        for chunk in results {
            out.extend(chunk?);
        }
        log::info!("Computed {} snapshots for {}", out.len(), request.profit_year);
        Ok(out)
    }

    /// Single-year activity with transfers and QDRO payments split out
    /// of distributions.
    pub fn profit_year_rollup<S: LedgerSource + ?Sized>(
        &self,
        source: &S,
        ssn: Ssn,
        profit_year: ProfitYear,
        cancel: &CancellationToken,
    ) -> EngineResult<BalanceSnapshot> {
        let request = BalanceRequest::delta(profit_year)
            .with_filter(DistributionFilter::ExcludeTransfersAndQdro);
        self.snapshot(source, ssn, &request, cancel)
    }

    pub fn net_balance<S: LedgerSource + ?Sized>(
        &self,
        source: &S,
        ssn: Ssn,
        profit_year: ProfitYear,
        cancel: &CancellationToken,
    ) -> EngineResult<NetBalance> {
        cancel.check(ssn)?;
        let ledger = source.ledger(ssn, YearBound::Through(profit_year))?;
        BalanceAggregator::new(&self.config.taxonomy, &self.config.calendar)
            .net_balance(ssn, &ledger, &BalanceRequest::cumulative(profit_year))
    }

    /// Year-by-year vesting, carrying the sticky state forward.
    pub fn vesting_history<S: LedgerSource + ?Sized>(
        &self,
        source: &S,
        ssn: Ssn,
        from: ProfitYear,
        to: ProfitYear,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<ParticipantVestingState>> {
        if from > to {
            return Ok(Vec::new());
        }
        let ledger = source.ledger(ssn, YearBound::Through(to))?;
        let mut prior = source.prior_vesting_state(ssn, from.saturating_sub(1))?;
        let mut history = Vec::with_capacity(usize::from(to - from) + 1);
        for year in from..=to {
            cancel.check(ssn)?;
            let state = self.vesting_for(ssn, &ledger, year, None, prior.as_ref())?;
            prior = Some(state.clone());
            history.push(state);
        }
        Ok(history)
    }

    /// Balance equation for `profit_year` against the prior year end.
    pub fn reconcile_year<S: LedgerSource + ?Sized>(
        &self,
        source: &S,
        ssn: Ssn,
        profit_year: ProfitYear,
        cancel: &CancellationToken,
    ) -> EngineResult<BalanceEquation> {
        cancel.check(ssn)?;
        let ledger = source.ledger(ssn, YearBound::Through(profit_year))?;
        let prior_state = source.prior_vesting_state(ssn, profit_year)?;
        let prior_year = profit_year.saturating_sub(1);

        let beginning = self.compute(ssn, &ledger, &BalanceRequest::cumulative(prior_year), None)?;
        let delta = self.compute(ssn, &ledger, &BalanceRequest::delta(profit_year), prior_state.as_ref())?;
        let ending = self.compute(ssn, &ledger, &BalanceRequest::cumulative(profit_year), prior_state.as_ref())?;
        BalanceEquation::check(&beginning, &delta, &ending)
    }

    /// RMD for one participant. `None` when the birth date is unknown,
    /// the participant is younger than the starting age on
    /// `reference_date`, or the balance is not positive.
    pub fn rmd_record<S: LedgerSource + ?Sized>(
        &self,
        source: &S,
        ssn: Ssn,
        profit_year: ProfitYear,
        reference_date: NaiveDate,
        cancel: &CancellationToken,
    ) -> EngineResult<Option<RmdRecord>> {
        cancel.check(ssn)?;
        let ledger = source.ledger(ssn, YearBound::Through(profit_year))?;
        let Some(dob) = ledger.profile.as_ref().and_then(|p| p.date_of_birth) else {
            return Ok(None);
        };
        let age = age_on(dob, reference_date);
        if age < self.config.rmd.starting_age {
            return Ok(None);
        }
        let prior = source.prior_vesting_state(ssn, profit_year)?;
        let snapshot = self.compute(ssn, &ledger, &BalanceRequest::cumulative(profit_year), prior.as_ref())?;
        if snapshot.current_balance <= Decimal::ZERO {
            log::debug!("{ssn} RMD {profit_year}: no positive balance, skipped");
            return Ok(None);
        }
        self.rmd(&snapshot, age, snapshot.activity.payments).map(Some)
    }

    pub fn rmd_records<S: LedgerSource + ?Sized>(
        &self,
        source: &S,
        ssns: &[Ssn],
        profit_year: ProfitYear,
        reference_date: NaiveDate,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<RmdRecord>> {
        let mut records = Vec::new();
        for &ssn in ssns {
            if let Some(record) = self.rmd_record(source, ssn, profit_year, reference_date, cancel)? {
                records.push(record);
            }
        }
        log::info!(
            "RMD {profit_year}: {} of {} participants at or over age {}",
            records.len(),
            ssns.len(),
            self.config.rmd.starting_age
        );
        Ok(records)
    }

    /// Cumulative totals across every participant known to `source`.
    pub fn plan_totals<S: LedgerSource + ?Sized>(
        &self,
        source: &S,
        profit_year: ProfitYear,
        cancel: &CancellationToken,
    ) -> EngineResult<PlanTotals> {
        let ssns = source.participants()?;
        let snapshots = self.snapshots(source, &ssns, &BalanceRequest::cumulative(profit_year), cancel)?;
        Ok(summarize(profit_year, &snapshots))
    }
}

pub fn summarize(profit_year: ProfitYear, snapshots: &[BalanceSnapshot]) -> PlanTotals {
    let mut totals = PlanTotals {
        profit_year,
        ..PlanTotals::default()
    };
    for s in snapshots.iter().filter(|s| s.mode == AggregationMode::Cumulative) {
        totals.participants += 1;
        totals.current_balance += s.current_balance;
        totals.vested_balance += s.vested_balance;
        totals.etva += s.etva;
        if s.vesting_percent >= Decimal::ONE_HUNDRED {
            totals.fully_vested += 1;
        }
    }
    totals
}

/// Rows visible in `profit_year`: earlier years in full, the target
/// year up to `as_of` when one is given.
fn bound_ledger(ledger: &ParticipantLedger, profit_year: ProfitYear, as_of: Option<NaiveDate>) -> ParticipantLedger {
    ParticipantLedger {
        profile: ledger.profile.clone(),
        transactions: ledger
            .transactions
            .iter()
            .filter(|t| {
                t.profit_year < profit_year
                    || (t.profit_year == profit_year && as_of.map_or(true, |d| t.transaction_date <= d))
            })
            .cloned()
            .collect(),
    }
}
