use serde::{Deserialize, Serialize};

use super::error::SimulationError;

pub const BUFFER_YEARS: f64 = 2.0;
pub const DEPLETION_THRESHOLD: f64 = 0.01;
pub const SUCCESS_EPSILON: f64 = 1.0;
// years
pub const MAX_TIME_HORIZON: u32 = 150;

pub const DEFAULT_SIMULATIONS: u32 = 10_000;
pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_FRICTION_RATE: f64 = 0.0005;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    #[serde(alias = "BUCKET")]
    Bucket,
    #[serde(alias = "CONSERVATIVE")]
    Conservative,
    #[serde(alias = "AGGRESSIVE")]
    Aggressive,
    #[serde(alias = "CUSTOM")]
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationRequest {
    pub initial_cash: f64,
    pub initial_investments: f64,
    pub annual_spend: f64,
    pub time_horizon: u32,
    // Rates below are percents, e.g. 3.0 for 3%.
    pub inflation_rate: f64,
    pub management_fee: f64,
    pub custom_stock_allocation: f64,
    pub strategy: Strategy,
}

impl SimulationRequest {
    pub fn start_total(&self) -> f64 {
        self.initial_cash + self.initial_investments
    }

    pub fn fee_rate(&self) -> f64 {
        self.management_fee / 100.0
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        if self.time_horizon == 0 || self.time_horizon > MAX_TIME_HORIZON {
            return Err(SimulationError::invalid(
                "timeHorizon",
                format!("must be between 1 and {MAX_TIME_HORIZON}"),
            ));
        }

        for (field, value) in [
            ("initialCash", self.initial_cash),
            ("initialInvestments", self.initial_investments),
            ("annualSpend", self.annual_spend),
            ("managementFee", self.management_fee),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(SimulationError::invalid(field, "must be a finite value >= 0"));
            }
        }

        if !self.start_total().is_finite() {
            return Err(SimulationError::invalid(
                "initialInvestments",
                "combined with initialCash must stay finite",
            ));
        }

        if !(0.0..=100.0).contains(&self.custom_stock_allocation) {
            return Err(SimulationError::invalid(
                "customStockAllocation",
                "must be between 0 and 100",
            ));
        }

        if !self.inflation_rate.is_finite() || self.inflation_rate <= -100.0 {
            return Err(SimulationError::invalid("inflationRate", "must be > -100"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub simulations: u32,
    pub seed: u64,
    pub friction_rate: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            simulations: DEFAULT_SIMULATIONS,
            seed: DEFAULT_SEED,
            friction_rate: DEFAULT_FRICTION_RATE,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), SimulationError> {
        if self.simulations == 0 {
            return Err(SimulationError::Configuration(
                "simulations must be > 0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.friction_rate) {
            return Err(SimulationError::Configuration(
                "friction rate must be in [0, 1)".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetWeights {
    pub stock: f64,
    pub bond: f64,
    pub cash: f64,
}

impl TargetWeights {
    pub fn for_request(request: &SimulationRequest) -> Self {
        match request.strategy {
            Strategy::Conservative => Self::stock_bond(0.60),
            Strategy::Aggressive => Self::stock_bond(0.70),
            Strategy::Custom => Self::stock_bond(request.custom_stock_allocation / 100.0),
            Strategy::Bucket => {
                let total = request.start_total();
                let cash = if total > 0.0 {
                    (BUFFER_YEARS * request.annual_spend / total).min(1.0)
                } else {
                    1.0
                };
                Self {
                    stock: 1.0 - cash,
                    bond: 0.0,
                    cash,
                }
            }
        }
    }

    fn stock_bond(stock: f64) -> Self {
        Self {
            stock,
            bond: 1.0 - stock,
            cash: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayAllocation {
    pub stock_percent: f64,
    pub bond_percent: f64,
    pub cash_percent: f64,
}

impl From<TargetWeights> for DisplayAllocation {
    fn from(weights: TargetWeights) -> Self {
        Self {
            stock_percent: weights.stock * 100.0,
            bond_percent: weights.bond * 100.0,
            cash_percent: weights.cash * 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnualReturn {
    pub stock: f64,
    pub bond: f64,
    pub cash: f64,
}

#[derive(Debug, Clone)]
pub struct SimulationRun {
    pub id: u32,
    pub final_balance: f64,
    pub trajectory: Vec<f64>,
    pub returns: Vec<AnnualReturn>,
    pub volatility: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChartPoint {
    pub year: u32,
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRow {
    pub year: u32,
    pub start_cash: f64,
    pub start_stock: f64,
    pub start_bond: f64,
    pub stock_return: f64,
    pub bond_return: f64,
    pub cash_return: f64,
    pub growth: f64,
    pub fees: f64,
    pub action: String,
    pub withdrawal: f64,
    pub end_total: f64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Band {
    Downturn,
    BelowAverage,
    Average,
}

impl Band {
    pub const ALL: [Band; 3] = [Band::Downturn, Band::BelowAverage, Band::Average];

    pub fn percentile(self) -> f64 {
        match self {
            Band::Downturn => 0.10,
            Band::BelowAverage => 0.25,
            Band::Average => 0.50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepresentativeRun {
    pub band: Band,
    pub run_id: u32,
    pub final_balance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogs {
    pub downturn: Vec<AuditRow>,
    pub below_average: Vec<AuditRow>,
    pub average: Vec<AuditRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub percentile_curve: Vec<ChartPoint>,
    pub audit_logs: AuditLogs,
    pub representative_runs: Vec<RepresentativeRun>,
    pub success_rate: f64,
    pub final_median_value: f64,
    // Percent, averaged over per-run stddevs.
    pub volatility: f64,
    pub display_allocation: DisplayAllocation,
    pub simulations: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-12;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_request(strategy: Strategy) -> SimulationRequest {
        SimulationRequest {
            initial_cash: 50_000.0,
            initial_investments: 950_000.0,
            annual_spend: 40_000.0,
            time_horizon: 30,
            inflation_rate: 3.0,
            management_fee: 0.5,
            custom_stock_allocation: 80.0,
            strategy,
        }
    }

    #[test]
    fn fixed_strategies_use_constant_weights() {
        let conservative = TargetWeights::for_request(&sample_request(Strategy::Conservative));
        assert_approx(conservative.stock, 0.60);
        assert_approx(conservative.bond, 0.40);
        assert_approx(conservative.cash, 0.0);

        let aggressive = TargetWeights::for_request(&sample_request(Strategy::Aggressive));
        assert_approx(aggressive.stock, 0.70);
        assert_approx(aggressive.bond, 0.30);
    }

    #[test]
    fn custom_weights_sum_to_one() {
        let weights = TargetWeights::for_request(&sample_request(Strategy::Custom));
        assert_approx(weights.stock, 0.80);
        assert_approx(weights.stock + weights.bond + weights.cash, 1.0);
    }

    #[test]
    fn bucket_weights_hold_two_years_cash_and_no_bonds() {
        let weights = TargetWeights::for_request(&sample_request(Strategy::Bucket));
        assert_approx(weights.bond, 0.0);
        assert_approx(weights.cash, 80_000.0 / 1_000_000.0);
        assert_approx(weights.stock, 1.0 - 0.08);

        let mut small = sample_request(Strategy::Bucket);
        small.initial_cash = 0.0;
        small.initial_investments = 50_000.0;
        let weights = TargetWeights::for_request(&small);
        assert_approx(weights.cash, 1.0);
        assert_approx(weights.stock, 0.0);
    }

    #[test]
    fn validate_rejects_zero_horizon() {
        let mut request = sample_request(Strategy::Conservative);
        request.time_horizon = 0;
        let err = request.validate().expect_err("must reject zero horizon");
        assert!(err.to_string().contains("timeHorizon"));
    }

    #[test]
    fn validate_rejects_horizon_above_cap() {
        let mut request = sample_request(Strategy::Conservative);
        request.time_horizon = MAX_TIME_HORIZON;
        assert!(request.validate().is_ok());
        request.time_horizon = u32::MAX;
        let err = request.validate().expect_err("must reject runaway horizon");
        assert!(err.to_string().contains("timeHorizon"));
    }

    #[test]
    fn validate_rejects_overflowing_start_total() {
        let mut request = sample_request(Strategy::Custom);
        request.initial_cash = 1e308;
        request.initial_investments = 1e308;
        request.custom_stock_allocation = 100.0;
        assert!(request.initial_cash.is_finite() && request.start_total().is_infinite());
        assert!(matches!(
            request.validate(),
            Err(SimulationError::InvalidInput { .. })
        ));
    }

    #[test]
    fn validate_rejects_negative_amounts() {
        for field in ["initialCash", "initialInvestments", "annualSpend"] {
            let mut request = sample_request(Strategy::Bucket);
            match field {
                "initialCash" => request.initial_cash = -1.0,
                "initialInvestments" => request.initial_investments = -1.0,
                _ => request.annual_spend = -1.0,
            }
            let err = request.validate().expect_err("must reject negative amount");
            assert!(err.to_string().contains(field), "{err}");
        }
    }

    #[test]
    fn validate_rejects_custom_allocation_out_of_range() {
        let mut request = sample_request(Strategy::Custom);
        request.custom_stock_allocation = 100.5;
        assert!(request.validate().is_err());
        request.custom_stock_allocation = -0.1;
        assert!(request.validate().is_err());
        request.custom_stock_allocation = 100.0;
        assert!(request.validate().is_ok());
    }

    #[test]
    fn strategy_parses_upper_and_kebab_case() {
        let upper: Strategy = serde_json::from_str("\"BUCKET\"").expect("upper case");
        let lower: Strategy = serde_json::from_str("\"aggressive\"").expect("kebab case");
        assert_eq!(upper, Strategy::Bucket);
        assert_eq!(lower, Strategy::Aggressive);
    }

    #[test]
    fn engine_config_rejects_zero_simulations() {
        let config = EngineConfig {
            simulations: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SimulationError::Configuration(_))
        ));
    }
}
