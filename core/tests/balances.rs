//! Balance aggregation: signs, modes, filters, rounding and the
//! year-over-year balance equation.

use chrono::NaiveDate;
use plan_core::{
    balance::{round_currency, BalanceAggregator, BalanceRequest, DistributionFilter},
    calendar::FiscalCalendar,
    cancel::CancellationToken,
    config::PlanConfig,
    engine::BalanceEngine,
    error::EngineError,
    ledger::{CommentType, MemoryLedger, ParticipantLedger, ParticipantProfile, Transaction},
    profit_code::{ProfitCodeCategory, ProfitCodeId, ProfitCodeTaxonomy},
    types::{ProfitYear, Ssn},
    vesting::{ParticipantVestingState, VestingSchedule},
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn engine() -> BalanceEngine {
    BalanceEngine::new(PlanConfig::default_plan()).expect("engine")
}

fn vested_at(ssn: Ssn, percent: Decimal) -> ParticipantVestingState {
    ParticipantVestingState {
        ssn,
        profit_year: 2024,
        years_in_plan: 3,
        schedule: VestingSchedule::NewPlan,
        vesting_percent: percent,
        has_forfeited: false,
        ever_fully_vested: percent >= dec!(100),
        full_vesting_reason: None,
    }
}

fn row(id: &str, ssn: Ssn, year: ProfitYear, code: ProfitCodeId) -> Transaction {
    Transaction::new(id, ssn, year, code, date(i32::from(year), 6, 30))
}

// ── Worked examples ────────────────────────────────────────────────

#[test]
fn contribution_earnings_and_forfeiture() {
    let ssn = Ssn::new(100);
    let ledger = ParticipantLedger::new(
        Some(ParticipantProfile::employee(ssn, date(1980, 1, 1))),
        vec![
            row("a", ssn, 2020, ProfitCodeId::INCOMING_CONTRIBUTIONS)
                .with_contribution(dec!(1000))
                .with_earnings(dec!(50)),
            row("b", ssn, 2021, ProfitCodeId::OUTGOING_FORFEITURES).with_forfeiture(dec!(200)),
        ],
    );
    let snap = engine()
        .compute(ssn, &ledger, &BalanceRequest::cumulative(2021), None)
        .expect("snapshot");

    assert_eq!(snap.totals.contributions, dec!(1000));
    assert_eq!(snap.totals.earnings, dec!(50));
    assert_eq!(snap.totals.forfeitures, dec!(-200));
    assert_eq!(snap.current_balance, dec!(850));
    assert_eq!(snap.vesting_percent, dec!(100), "a forfeiture row forces full vesting");
    assert_eq!(snap.vested_balance, dec!(850));
}

#[test]
fn etva_tracks_fully_vested_categories() {
    let ssn = Ssn::new(101);
    let ledger = ParticipantLedger::new(
        Some(ParticipantProfile::beneficiary(ssn)),
        vec![
            row("q", ssn, 2022, ProfitCodeId::INCOMING_QDRO_BENEFICIARY)
                .with_contribution(dec!(500))
                .with_comment(CommentType::QdroIn),
            row("e", ssn, 2023, ProfitCodeId::INCOMING_100_PERCENT_VESTED_EARNINGS).with_earnings(dec!(20)),
            row("p", ssn, 2024, ProfitCodeId::OUTGOING_100_PERCENT_VESTED_PAYMENT).with_forfeiture(dec!(100)),
        ],
    );
    let snap = engine()
        .compute(ssn, &ledger, &BalanceRequest::cumulative(2024), None)
        .expect("snapshot");
    assert_eq!(snap.etva, dec!(420));
    assert_eq!(snap.current_balance, dec!(420));
    assert_eq!(snap.totals.qdro_in, dec!(500));
    assert_eq!(snap.totals.vested_earnings, dec!(20));
    assert_eq!(snap.vested_balance, dec!(420));
}

#[test]
fn etva_only_moves_on_the_vested_field_of_each_category() {
    let ssn = Ssn::new(106);
    let ledger = ParticipantLedger::new(
        Some(ParticipantProfile::beneficiary(ssn)),
        vec![
            row("q", ssn, 2022, ProfitCodeId::INCOMING_QDRO_BENEFICIARY)
                .with_contribution(dec!(500))
                .with_earnings(dec!(30)),
            row("e", ssn, 2023, ProfitCodeId::INCOMING_100_PERCENT_VESTED_EARNINGS)
                .with_contribution(dec!(5))
                .with_earnings(dec!(20)),
        ],
    );
    let snap = engine()
        .compute(ssn, &ledger, &BalanceRequest::cumulative(2023), None)
        .expect("snapshot");
    assert_eq!(snap.current_balance, dec!(555));
    assert_eq!(snap.etva, dec!(520));
}

#[test]
fn transfer_in_is_split_from_qdro_in() {
    let ssn = Ssn::new(102);
    let ledger = ParticipantLedger::new(
        None,
        vec![
            row("t", ssn, 2022, ProfitCodeId::INCOMING_QDRO_BENEFICIARY)
                .with_contribution(dec!(300))
                .with_comment(CommentType::TransferIn),
            row("q", ssn, 2022, ProfitCodeId::INCOMING_QDRO_BENEFICIARY).with_contribution(dec!(200)),
        ],
    );
    let snap = engine()
        .compute(ssn, &ledger, &BalanceRequest::cumulative(2022), None)
        .expect("snapshot");
    assert_eq!(snap.totals.transfers_in, dec!(300));
    assert_eq!(snap.totals.qdro_in, dec!(200));
    assert_eq!(snap.totals.allocations(), dec!(500));
}

#[test]
fn unknown_participant_is_a_zero_snapshot() {
    let ssn = Ssn::new(99);
    let snap = engine()
        .snapshot(&MemoryLedger::new(), ssn, &BalanceRequest::cumulative(2024), &CancellationToken::new())
        .expect("empty snapshot");
    assert!(snap.is_zero());
    assert_eq!(snap.vested_balance, Decimal::ZERO);
    assert_eq!(snap.etva, Decimal::ZERO);
    assert_eq!(snap.years_in_plan, 0);
    assert_eq!(snap.vesting_percent, PlanConfig::default_plan().vesting.old_plan.base_percent());
}

// ── Modes and as-of ────────────────────────────────────────────────

#[test]
fn as_of_excludes_later_rows_of_the_same_year() {
    let ssn = Ssn::new(103);
    let ledger = ParticipantLedger::new(
        None,
        vec![
            Transaction::new("early", ssn, 2024, ProfitCodeId::INCOMING_CONTRIBUTIONS, date(2024, 3, 1))
                .with_contribution(dec!(400)),
            Transaction::new("late", ssn, 2024, ProfitCodeId::INCOMING_CONTRIBUTIONS, date(2024, 9, 1))
                .with_contribution(dec!(600)),
        ],
    );
    let engine = engine();
    let mid = engine
        .compute(ssn, &ledger, &BalanceRequest::cumulative(2024).as_of(date(2024, 6, 30)), None)
        .expect("mid-year");
    assert_eq!(mid.current_balance, dec!(400));
    assert_eq!(mid.as_of, date(2024, 6, 30));

    let full = engine
        .compute(ssn, &ledger, &BalanceRequest::cumulative(2024), None)
        .expect("year end");
    assert_eq!(full.current_balance, dec!(1000));
    assert_eq!(full.as_of, date(2024, 12, 31));
}

#[test]
fn delta_only_counts_the_requested_year() {
    let ssn = Ssn::new(104);
    let ledger = ParticipantLedger::new(
        None,
        vec![
            row("a", ssn, 2022, ProfitCodeId::INCOMING_CONTRIBUTIONS).with_contribution(dec!(1000)),
            row("b", ssn, 2023, ProfitCodeId::INCOMING_CONTRIBUTIONS).with_contribution(dec!(700)),
            row("c", ssn, 2023, ProfitCodeId::OUTGOING_PARTIAL_WITHDRAWAL).with_forfeiture(dec!(250)),
        ],
    );
    let snap = engine()
        .compute(ssn, &ledger, &BalanceRequest::delta(2023), None)
        .expect("delta");
    assert_eq!(snap.current_balance, dec!(450));
    assert_eq!(snap.years_in_plan, 2, "vesting still sees the full history");
}

// ── Distribution filters ───────────────────────────────────────────

#[test]
fn transfer_filter_moves_payments_to_paid_allocations() {
    let ssn = Ssn::new(105);
    let rows = vec![
        row("c", ssn, 2023, ProfitCodeId::INCOMING_CONTRIBUTIONS).with_contribution(dec!(2000)),
        row("x", ssn, 2023, ProfitCodeId::OUTGOING_XFER_BENEFICIARY)
            .with_forfeiture(dec!(300))
            .with_comment(CommentType::TransferOut),
        row("q", ssn, 2023, ProfitCodeId::OUTGOING_100_PERCENT_VESTED_PAYMENT)
            .with_forfeiture(dec!(100))
            .with_comment(CommentType::QdroOut),
        row("d", ssn, 2023, ProfitCodeId::OUTGOING_DIRECT_PAYMENTS).with_forfeiture(dec!(50)),
    ];
    let ledger = ParticipantLedger::new(None, rows);
    let engine = engine();

    let all = engine
        .compute(ssn, &ledger, &BalanceRequest::cumulative(2023), None)
        .expect("all payments");
    assert_eq!(all.totals.distributions, dec!(-450));
    assert_eq!(all.totals.paid_allocations(), Decimal::ZERO);

    let split = engine
        .compute(
            ssn,
            &ledger,
            &BalanceRequest::cumulative(2023).with_filter(DistributionFilter::ExcludeTransfersAndQdro),
            None,
        )
        .expect("split");
    assert_eq!(split.totals.distributions, dec!(-50));
    assert_eq!(split.totals.transfers_out, dec!(-300));
    assert_eq!(split.totals.qdro_out, dec!(-100));
    assert_eq!(split.current_balance, all.current_balance, "the filter never changes the balance");
}

#[test]
fn custom_filter_decides_per_row() {
    let ssn = Ssn::new(106);
    let ledger = ParticipantLedger::new(
        None,
        vec![
            row("c", ssn, 2023, ProfitCodeId::INCOMING_CONTRIBUTIONS).with_contribution(dec!(900)),
            row("h", ssn, 2023, ProfitCodeId::OUTGOING_PARTIAL_WITHDRAWAL)
                .with_forfeiture(dec!(100))
                .with_comment(CommentType::Hardship),
            row("r", ssn, 2023, ProfitCodeId::OUTGOING_DIRECT_PAYMENTS)
                .with_forfeiture(dec!(200))
                .with_comment(CommentType::Rollover),
        ],
    );
    let filter = DistributionFilter::custom(|tx, category| {
        category == ProfitCodeCategory::OutgoingPartialWithdrawal
            && tx.comment_type == Some(CommentType::Hardship)
    });
    let snap = engine()
        .compute(ssn, &ledger, &BalanceRequest::cumulative(2023).with_filter(filter), None)
        .expect("snapshot");
    assert_eq!(snap.totals.distributions, dec!(-100));
    assert_eq!(snap.totals.transfers_out, dec!(-200));
    assert_eq!(snap.current_balance, dec!(600));
}

// ── Integrity guard ────────────────────────────────────────────────

#[test]
fn negative_gross_outgoing_is_inconsistent_in_cumulative_mode_only() {
    let ssn = Ssn::new(107);
    let ledger = ParticipantLedger::new(
        None,
        vec![
            row("c", ssn, 2023, ProfitCodeId::INCOMING_CONTRIBUTIONS).with_contribution(dec!(100)),
            row("w", ssn, 2023, ProfitCodeId::OUTGOING_PARTIAL_WITHDRAWAL).with_forfeiture(dec!(-40)),
        ],
    );
    let engine = engine();
    let err = engine
        .compute(ssn, &ledger, &BalanceRequest::cumulative(2023), None)
        .expect_err("inconsistent");
    assert!(matches!(
        err,
        EngineError::InconsistentLedger { category: ProfitCodeCategory::OutgoingPartialWithdrawal, .. }
    ));

    let delta = engine
        .compute(ssn, &ledger, &BalanceRequest::delta(2023), None)
        .expect("delta skips the guard");
    assert_eq!(delta.current_balance, dec!(140));
}

// ── Rounding ───────────────────────────────────────────────────────

#[test]
fn half_cent_rounds_away_from_zero() {
    let ssn = Ssn::new(108);
    let taxonomy = ProfitCodeTaxonomy::standard();
    let calendar = FiscalCalendar::default();
    let aggregator = BalanceAggregator::new(&taxonomy, &calendar);
    let request = BalanceRequest::cumulative(2024);

    let positive = ParticipantLedger::new(
        None,
        vec![row("c", ssn, 2024, ProfitCodeId::INCOMING_CONTRIBUTIONS).with_contribution(dec!(10.01))],
    );
    let snap = aggregator
        .snapshot(ssn, &positive, &request, &vested_at(ssn, dec!(50)))
        .expect("positive");
    assert_eq!(snap.vested_balance, dec!(5.01));

    let negative = ParticipantLedger::new(
        None,
        vec![row("p", ssn, 2024, ProfitCodeId::OUTGOING_PARTIAL_WITHDRAWAL).with_forfeiture(dec!(10.01))],
    );
    let snap = aggregator
        .snapshot(ssn, &negative, &request, &vested_at(ssn, dec!(50)))
        .expect("negative");
    assert_eq!(snap.current_balance, dec!(-10.01));
    assert_eq!(snap.vested_balance, dec!(-5.01));
}

// ── Balance equation ───────────────────────────────────────────────

#[test]
fn year_over_year_equation_balances() {
    let ssn = Ssn::new(109);
    let mut source = MemoryLedger::new();
    source.extend([
        row("a", ssn, 2022, ProfitCodeId::INCOMING_CONTRIBUTIONS)
            .with_contribution(dec!(1500))
            .with_earnings(dec!(75.25)),
        row("b", ssn, 2023, ProfitCodeId::INCOMING_CONTRIBUTIONS)
            .with_contribution(dec!(1200))
            .with_earnings(dec!(-33.10))
            .with_forfeiture(dec!(12.40)),
        row("c", ssn, 2023, ProfitCodeId::OUTGOING_PARTIAL_WITHDRAWAL)
            .with_forfeiture(dec!(400))
            .with_taxes(dec!(80), dec!(20)),
        row("d", ssn, 2023, ProfitCodeId::INCOMING_QDRO_BENEFICIARY)
            .with_contribution(dec!(250))
            .with_comment(CommentType::QdroIn),
    ]);
    let eq = engine()
        .reconcile_year(&source, ssn, 2023, &CancellationToken::new())
        .expect("reconcile");
    assert!(eq.is_balanced, "variance {}", eq.variance);
    assert_eq!(eq.beginning, dec!(1575.25));
    assert_eq!(eq.actual_ending, dec!(2604.55));
}

#[test]
fn net_balance_reports_withholding() {
    let ssn = Ssn::new(110);
    let mut source = MemoryLedger::new();
    source.extend([
        row("a", ssn, 2023, ProfitCodeId::INCOMING_CONTRIBUTIONS).with_contribution(dec!(1000)),
        row("b", ssn, 2023, ProfitCodeId::OUTGOING_DIRECT_PAYMENTS)
            .with_forfeiture(dec!(300))
            .with_taxes(dec!(60), dec!(15)),
    ]);
    let net = engine()
        .net_balance(&source, ssn, 2023, &CancellationToken::new())
        .expect("net");
    assert_eq!(net.payments, dec!(300));
    assert_eq!(net.federal_taxes, dec!(60));
    assert_eq!(net.state_taxes, dec!(15));
    assert_eq!(net.net, dec!(700));
}

// ── Properties ─────────────────────────────────────────────────────

fn arb_row(ssn: Ssn) -> impl Strategy<Value = Transaction> {
    let codes = prop_oneof![
        Just(ProfitCodeId::INCOMING_CONTRIBUTIONS),
        Just(ProfitCodeId::OUTGOING_PARTIAL_WITHDRAWAL),
        Just(ProfitCodeId::OUTGOING_DIRECT_PAYMENTS),
        Just(ProfitCodeId::INCOMING_100_PERCENT_VESTED_EARNINGS),
    ];
    (codes, 2018u16..=2024, 1u32..=12, 0i64..500_000, 0i64..50_000, 0i64..100_000).prop_map(
        move |(code, year, month, contribution, earnings, forfeiture)| {
            let amount = |cents: i64| Decimal::new(cents, 2);
            let tx = Transaction::new(
                format!("{year}-{month}-{contribution}-{forfeiture}"),
                ssn,
                year,
                code,
                date(i32::from(year), month, 15),
            );
            match code {
                ProfitCodeId::INCOMING_CONTRIBUTIONS => tx
                    .with_contribution(amount(contribution))
                    .with_earnings(amount(earnings)),
                ProfitCodeId::INCOMING_100_PERCENT_VESTED_EARNINGS => tx.with_earnings(amount(earnings)),
                _ => tx.with_forfeiture(amount(forfeiture)),
            }
        },
    )
}

proptest! {
    #[test]
    fn delta_is_difference_of_cumulatives(
        rows in proptest::collection::vec(arb_row(Ssn::new(111)), 0..30),
        year in 2019u16..=2024,
    ) {
        let ssn = Ssn::new(111);
        let ledger = ParticipantLedger::new(None, rows);
        let engine = engine();
        let current = engine.compute(ssn, &ledger, &BalanceRequest::cumulative(year), None).expect("current");
        let prior = engine.compute(ssn, &ledger, &BalanceRequest::cumulative(year - 1), None).expect("prior");
        let delta = engine.compute(ssn, &ledger, &BalanceRequest::delta(year), None).expect("delta");
        prop_assert_eq!(delta.current_balance, current.current_balance - prior.current_balance);

        let again = engine.compute(ssn, &ledger, &BalanceRequest::cumulative(year), None).expect("again");
        prop_assert_eq!(again, current);
    }

    #[test]
    fn vested_balance_is_rounded_share(
        rows in proptest::collection::vec(arb_row(Ssn::new(112)), 0..20),
        percent in 0u32..=100,
    ) {
        let ssn = Ssn::new(112);
        let taxonomy = ProfitCodeTaxonomy::standard();
        let calendar = FiscalCalendar::default();
        let ledger = ParticipantLedger::new(None, rows);
        let pct = Decimal::from(percent);
        let snap = BalanceAggregator::new(&taxonomy, &calendar)
            .snapshot(ssn, &ledger, &BalanceRequest::cumulative(2024), &vested_at(ssn, pct))
            .expect("snapshot");
        prop_assert_eq!(snap.vested_balance, round_currency(snap.current_balance * pct / dec!(100)));
        prop_assert!(snap.vested_balance.abs() <= snap.current_balance.abs());
        prop_assert!(snap.vested_balance.scale() <= 2);
    }
}
