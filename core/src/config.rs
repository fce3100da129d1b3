use crate::{
    calendar::FiscalCalendar,
    error::{EngineError, EngineResult},
    profit_code::{ProfitCodeEntry, ProfitCodeTaxonomy},
    rmd::RmdConfig,
    vesting::VestingConfig,
    years_of_service::ServiceConfig,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
struct ProfitCodesFile {
    codes: Vec<ProfitCodeEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlanFile {
    #[serde(default)]
    service: ServiceConfig,
    #[serde(default)]
    calendar: FiscalCalendar,
}

/// Every plan rule the engine reads. Built once, injected into
/// `BalanceEngine`, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanConfig {
    pub taxonomy: ProfitCodeTaxonomy,
    pub vesting: VestingConfig,
    pub service: ServiceConfig,
    pub rmd: RmdConfig,
    pub calendar: FiscalCalendar,
}

impl PlanConfig {
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let codes_path = format!("{data_dir}/profit_codes.json");
        let codes_content = std::fs::read_to_string(&codes_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {codes_path}: {e}"))?;
        let codes_file: ProfitCodesFile = serde_json::from_str(&codes_content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {codes_path}: {e}"))?;
        let taxonomy = ProfitCodeTaxonomy::from_entries(codes_file.codes)?;

        let vesting_path = format!("{data_dir}/vesting.json");
        let vesting_content = std::fs::read_to_string(&vesting_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {vesting_path}: {e}"))?;
        let vesting: VestingConfig = serde_json::from_str(&vesting_content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {vesting_path}: {e}"))?;

        let rmd_path = format!("{data_dir}/rmd_factors.json");
        let rmd_content = std::fs::read_to_string(&rmd_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {rmd_path}: {e}"))?;
        let rmd: RmdConfig = serde_json::from_str(&rmd_content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {rmd_path}: {e}"))?;

        let plan_path = format!("{data_dir}/plan.json");
        let plan_content = std::fs::read_to_string(&plan_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {plan_path}: {e}"))?;
        let plan: PlanFile = serde_json::from_str(&plan_content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {plan_path}: {e}"))?;

        let config = Self {
            taxonomy,
            vesting,
            service: plan.service,
            rmd,
            calendar: plan.calendar,
        };
        config.validate()?;
        log::info!(
            "Loaded plan config from {data_dir}: {} profit codes",
            config.taxonomy.len()
        );
        Ok(config)
    }

    /// Built-in plan rules.
    pub fn default_plan() -> Self {
        Self {
            taxonomy: ProfitCodeTaxonomy::standard(),
            vesting: VestingConfig::default(),
            service: ServiceConfig::default(),
            rmd: RmdConfig::default(),
            calendar: FiscalCalendar::default(),
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.taxonomy.is_empty() {
            return Err(EngineError::InvalidConfig("empty profit code table".into()));
        }
        self.vesting.validate()?;
        self.rmd.factors.validate()?;
        if self.rmd.de_minimis_threshold < Decimal::ZERO {
            return Err(EngineError::InvalidConfig(
                "de minimis threshold must not be negative".into(),
            ));
        }
        if self.service.minimum_hours_for_contribution < Decimal::ZERO {
            return Err(EngineError::InvalidConfig(
                "minimum hours must not be negative".into(),
            ));
        }
        if !self.calendar.is_valid() {
            return Err(EngineError::InvalidConfig(format!(
                "fiscal year end {}/{} is not a date",
                self.calendar.year_end_month, self.calendar.year_end_day
            )));
        }
        Ok(())
    }

    pub fn minimum_hours_for_contribution(&self) -> Decimal {
        self.service.minimum_hours_for_contribution
    }
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self::default_plan()
    }
}
