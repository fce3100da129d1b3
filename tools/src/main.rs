//! plan-runner: headless balance/vesting runner.
//!
//! Usage:
//!   plan-runner --seed 12345 --participants 500 --year 2024
//!   plan-runner --db plan.db --year 2024 --mode delta --json
//!   plan-runner --db plan.db --year 2024 --rmd
//!   plan-runner --db plan.db --serve

use anyhow::Result;
use chrono::NaiveDate;
use plan_core::{
    balance::{AggregationMode, BalanceRequest, DistributionFilter},
    cancel::CancellationToken,
    config::PlanConfig,
    engine::{summarize, BalanceEngine},
    ledger::LedgerSource,
    store::LedgerStore,
    synthetic::{generate, SyntheticLedgerConfig},
    types::{ProfitYear, Ssn},
};
use rust_decimal::Decimal;
use std::env;
use std::io::{self, BufRead, Write};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RunnerRequest {
    Snapshot {
        ssn: u32,
        year: ProfitYear,
        #[serde(default)]
        mode: AggregationMode,
    },
    Rollup {
        ssn: u32,
        year: ProfitYear,
    },
    Vesting {
        ssn: u32,
        year: ProfitYear,
    },
    NetBalance {
        ssn: u32,
        year: ProfitYear,
    },
    Reconcile {
        ssn: u32,
        year: ProfitYear,
    },
    Totals {
        year: ProfitYear,
    },
    Quit,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let participants = parse_arg(&args, "--participants", 200usize);
    let year = parse_arg(&args, "--year", 2024 as ProfitYear);
    let workers = parse_arg(&args, "--workers", 0usize);
    let json = args.iter().any(|a| a == "--json");
    let rmd = args.iter().any(|a| a == "--rmd");
    let serve = args.iter().any(|a| a == "--serve");
    let persist_vesting = args.iter().any(|a| a == "--persist-vesting");
    let db = flag_value(&args, "--db").unwrap_or(":memory:");
    let data_dir = flag_value(&args, "--data-dir");
    let mode = match flag_value(&args, "--mode") {
        Some("delta") => AggregationMode::Delta,
        _ => AggregationMode::Cumulative,
    };

    if !serve && !json {
        println!("plan-runner");
        println!("  seed:          {seed}");
        println!("  year:          {year}");
        println!("  mode:          {mode:?}");
        println!("  db:            {db}");
        println!("  data_dir:      {}", data_dir.unwrap_or("<built-in plan>"));
        println!();
    }

    let store = LedgerStore::open(db)?;
    store.migrate()?;
    if store.transaction_count()? == 0 {
        let synthetic = SyntheticLedgerConfig {
            participants,
            first_year: year.saturating_sub(24),
            last_year: year,
        };
        store.load_plan(&generate(seed, &synthetic))?;
    }

    let config = match data_dir {
        Some(dir) => PlanConfig::load(dir)?,
        None => PlanConfig::default_plan(),
    };
    let mut engine = BalanceEngine::new(config)?;
    if workers > 0 {
        engine = engine.with_workers(workers);
    }
    let cancel = CancellationToken::new();

    if serve {
        return run_request_loop(&engine, &store, &cancel);
    }

    let ssns = store.participants()?;
    if rmd {
        let reference = NaiveDate::from_ymd_opt(i32::from(year), 12, 31)
            .ok_or_else(|| anyhow::anyhow!("Bad year {year}"))?;
        let records = engine.rmd_records(&store, &ssns, year, reference, &cancel)?;
        for r in &records {
            if json {
                println!("{}", serde_json::to_string(r)?);
            } else {
                println!(
                    "  {}  age {:>3}  balance {:>12}  rmd {:>10}  paid {:>10}  check {:>10}",
                    r.ssn, r.age, r.balance, r.rmd, r.payments_in_year, r.suggested_check
                );
            }
        }
        return Ok(());
    }

    let request = BalanceRequest {
        profit_year: year,
        mode,
        ..BalanceRequest::default()
    };
    let snapshots = engine.snapshots(&store, &ssns, &request, &cancel)?;

    if persist_vesting {
        for ssn in &ssns {
            let state = engine.vesting_state(&store, *ssn, year, None, &cancel)?;
            store.save_vesting_state(&state)?;
        }
    }

    if json {
        for s in &snapshots {
            println!("{}", serde_json::to_string(s)?);
        }
        return Ok(());
    }

    print_summary(year, mode, &snapshots)
}

fn print_summary(
    year: ProfitYear,
    mode: AggregationMode,
    snapshots: &[plan_core::balance::BalanceSnapshot],
) -> Result<()> {
    let mut bands = [0usize; 4];
    for s in snapshots {
        let band = match s.years_in_plan {
            0 => 0,
            1..=2 => 1,
            3..=5 => 2,
            _ => 3,
        };
        bands[band] += 1;
    }
    let balance: Decimal = snapshots.iter().map(|s| s.current_balance).sum();
    let vested: Decimal = snapshots.iter().map(|s| s.vested_balance).sum();

    println!("═══════════════════════════════════════");
    println!("  PLAN SUMMARY {year} ({mode:?})");
    println!("═══════════════════════════════════════");
    println!("  Participants:        {}", snapshots.len());
    println!("  Balance:             {balance}");
    println!("  Vested balance:      {vested}");
    if mode == AggregationMode::Cumulative {
        let totals = summarize(year, snapshots);
        println!("  ETVA:                {}", totals.etva);
        println!("  Fully vested:        {}", totals.fully_vested);
    }
    println!("  Years in plan 0:     {}", bands[0]);
    println!("  Years in plan 1-2:   {}", bands[1]);
    println!("  Years in plan 3-5:   {}", bands[2]);
    println!("  Years in plan 6+:    {}", bands[3]);
    println!("═══════════════════════════════════════");
    Ok(())
}

/// One JSON request per stdin line, one JSON response per stdout line.
fn run_request_loop(engine: &BalanceEngine, store: &LedgerStore, cancel: &CancellationToken) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }

        let request: RunnerRequest = match serde_json::from_str(&buffer) {
            Ok(r) => r,
            Err(e) => {
                writeln!(stdout, "{}", serde_json::json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };

        let response = match request {
            RunnerRequest::Quit => break,
            RunnerRequest::Snapshot { ssn, year, mode } => {
                let request = BalanceRequest {
                    profit_year: year,
                    mode,
                    distribution_filter: DistributionFilter::AllPayments,
                    as_of: None,
                };
                engine
                    .snapshot(store, Ssn::new(ssn), &request, cancel)
                    .map(|s| serde_json::to_value(s))
            }
            RunnerRequest::Rollup { ssn, year } => engine
                .profit_year_rollup(store, Ssn::new(ssn), year, cancel)
                .map(|s| serde_json::to_value(s)),
            RunnerRequest::Vesting { ssn, year } => engine
                .vesting_state(store, Ssn::new(ssn), year, None, cancel)
                .map(|s| serde_json::to_value(s)),
            RunnerRequest::NetBalance { ssn, year } => engine
                .net_balance(store, Ssn::new(ssn), year, cancel)
                .map(|s| serde_json::to_value(s)),
            RunnerRequest::Reconcile { ssn, year } => engine
                .reconcile_year(store, Ssn::new(ssn), year, cancel)
                .map(|s| serde_json::to_value(s)),
            RunnerRequest::Totals { year } => engine
                .plan_totals(store, year, cancel)
                .map(|s| serde_json::to_value(s)),
        };

        let line = match response {
            Ok(value) => value?,
            Err(e) => serde_json::json!({ "error": e.to_string() }),
        };
        writeln!(stdout, "{line}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
