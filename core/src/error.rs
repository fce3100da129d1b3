use crate::{
    profit_code::{ProfitCodeCategory, ProfitCodeId},
    types::{ProfitYear, Ssn},
};
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Unknown profit code {code}")]
    UnknownProfitCode { code: ProfitCodeId },

    #[error("No RMD factor for age {age}")]
    UnknownAgeFactor { age: u8 },

    #[error(
        "Inconsistent ledger for {ssn} as of {profit_year}: {category:?} total {total} violates its sign convention"
    )]
    InconsistentLedger {
        ssn: Ssn,
        profit_year: ProfitYear,
        category: ProfitCodeCategory,
        total: Decimal,
    },

    #[error("Computation cancelled before participant {ssn}")]
    Cancelled { ssn: Ssn },

    #[error("Invalid plan configuration: {0}")]
    InvalidConfig(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
