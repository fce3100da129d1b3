//! Same seed, same ledger, same numbers.
//!
//! Two engines over the same synthetic plan must produce byte-identical
//! snapshot output, regardless of worker count. Any divergence is a
//! blocker.

use plan_core::{
    balance::BalanceRequest,
    cancel::CancellationToken,
    config::PlanConfig,
    engine::BalanceEngine,
    ledger::MemoryLedger,
    synthetic::{generate, SyntheticLedgerConfig},
    types::Ssn,
};

fn build_plan(seed: u64) -> (Vec<Ssn>, MemoryLedger) {
    let plan = generate(seed, &SyntheticLedgerConfig { participants: 120, ..Default::default() });
    (plan.ssns(), plan.into_memory())
}

fn snapshot_log(seed: u64, workers: usize, request: &BalanceRequest) -> Vec<String> {
    let (ssns, source) = build_plan(seed);
    let engine = BalanceEngine::new(PlanConfig::default_plan())
        .expect("engine")
        .with_workers(workers);
    engine
        .snapshots(&source, &ssns, request, &CancellationToken::new())
        .expect("snapshots")
        .iter()
        .map(|s| serde_json::to_string(s).expect("serialize snapshot"))
        .collect()
}

#[test]
fn same_seed_produces_identical_snapshots() {
    const SEED: u64 = 0xDEAD_BEEF_CAFE_1234;

    for request in [BalanceRequest::cumulative(2024), BalanceRequest::delta(2019)] {
        let log_a = snapshot_log(SEED, 1, &request);
        let log_b = snapshot_log(SEED, 8, &request);

        assert_eq!(
            log_a.len(), log_b.len(),
            "Snapshot counts differ: {} vs {}",
            log_a.len(), log_b.len()
        );
        for (i, (a, b)) in log_a.iter().zip(log_b.iter()).enumerate() {
            assert_eq!(a, b, "Snapshot output diverged at entry {i}:\n  A: {a}\n  B: {b}");
        }
    }
}

#[test]
fn different_seeds_produce_different_plans() {
    let request = BalanceRequest::cumulative(2024);
    assert_ne!(snapshot_log(1, 2, &request), snapshot_log(2, 2, &request));
}
