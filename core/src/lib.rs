//! Profit-sharing balance and vesting engine.
//!
//! Turns a code-tagged transaction ledger into point-in-time balances,
//! vested amounts, years of service and RMD records per participant.

pub mod balance;
pub mod calendar;
pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod profit_code;
pub mod reconcile;
pub mod rmd;
pub mod rng;
pub mod store;
pub mod synthetic;
pub mod types;
pub mod vesting;
pub mod years_of_service;

pub use balance::{AggregationMode, BalanceRequest, BalanceSnapshot, DistributionFilter};
pub use cancel::CancellationToken;
pub use config::PlanConfig;
pub use engine::BalanceEngine;
pub use error::{EngineError, EngineResult};
pub use ledger::{LedgerSource, MemoryLedger, Transaction};
pub use store::LedgerStore;
pub use types::{ProfitYear, Ssn};
