use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use tracing::{debug, info};

use super::aggregate::{select_representatives, summarize};
use super::audit::build_audit_log;
use super::error::SimulationError;
use super::market::{AssetAssumptions, CorrelatedReturns, CorrelationModel, ReturnSource};
use super::transition::{PortfolioState, TransitionParams, advance_year};
use super::types::{
    AuditLogs, Band, EngineConfig, SimulationRequest, SimulationResult, SimulationRun,
    TargetWeights,
};

#[derive(Debug, Clone, Default)]
pub struct BatchToken(Arc<AtomicBool>);

impl BatchToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct Engine {
    correlation: CorrelationModel,
    nominal: AssetAssumptions,
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, SimulationError> {
        config.validate()?;
        Ok(Self {
            correlation: CorrelationModel::standard()?,
            nominal: AssetAssumptions::nominal(),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn run_simulation(
        &self,
        request: &SimulationRequest,
    ) -> Result<SimulationResult, SimulationError> {
        self.run_simulation_with_token(request, &BatchToken::new())
    }

    pub fn run_simulation_with_token(
        &self,
        request: &SimulationRequest,
        token: &BatchToken,
    ) -> Result<SimulationResult, SimulationError> {
        request.validate()?;
        let started = Instant::now();
        let weights = TargetWeights::for_request(request);
        let params = TransitionParams::new(request, weights, self.config.friction_rate);

        info!(
            simulations = self.config.simulations,
            horizon = request.time_horizon,
            strategy = ?request.strategy,
            "starting simulation batch"
        );

        let runs = self.run_batch(request, &params, token)?;
        let summary = summarize(&runs, request.time_horizon, request.start_total());
        let representatives = select_representatives(&runs);

        let ledger_for = |band: Band| {
            representatives
                .iter()
                .find(|r| r.band == band)
                .map(|r| build_audit_log(request, &params, &runs[r.run_id as usize].returns))
                .unwrap_or_default()
        };
        let audit_logs = AuditLogs {
            downturn: ledger_for(Band::Downturn),
            below_average: ledger_for(Band::BelowAverage),
            average: ledger_for(Band::Average),
        };

        info!(
            success_rate = summary.success_rate,
            final_median = summary.final_median_value,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "simulation batch complete"
        );

        Ok(SimulationResult {
            percentile_curve: summary.percentile_curve,
            audit_logs,
            representative_runs: representatives,
            success_rate: summary.success_rate,
            final_median_value: summary.final_median_value,
            volatility: summary.volatility,
            display_allocation: weights.into(),
            simulations: self.config.simulations,
        })
    }

    // runs[id].id == id on success.
    pub(crate) fn run_batch(
        &self,
        request: &SimulationRequest,
        params: &TransitionParams,
        token: &BatchToken,
    ) -> Result<Vec<SimulationRun>, SimulationError> {
        let real = self.nominal.deflate(request.inflation_rate);
        let result = (0..self.config.simulations)
            .into_par_iter()
            .map(|id| {
                if token.is_cancelled() {
                    return Err(SimulationError::Cancelled);
                }
                let rng = StdRng::seed_from_u64(derive_seed(self.config.seed, id));
                let mut source = CorrelatedReturns::new(&self.correlation, &real, rng);
                Ok(simulate_run(id, request, params, &mut source))
            })
            .collect::<Result<Vec<_>, _>>();

        if matches!(result, Err(SimulationError::Cancelled)) {
            debug!("simulation batch cancelled");
        }
        result
    }
}

pub fn simulate_run<S: ReturnSource + ?Sized>(
    id: u32,
    request: &SimulationRequest,
    params: &TransitionParams,
    source: &mut S,
) -> SimulationRun {
    let horizon = request.time_horizon as usize;
    let mut state = PortfolioState::initial(request, params.weights);
    let mut trajectory = Vec::with_capacity(horizon);
    let mut returns = Vec::with_capacity(horizon);
    let mut performance = Vec::with_capacity(horizon);

    for _ in 0..horizon {
        let sample = source.next_return();
        let start = state.total();
        let outcome = advance_year(&state, &sample, params);
        let end = outcome.next.total();
        if start > 0.0 {
            performance.push((end + outcome.withdrawal) / start - 1.0);
        }

        trajectory.push(end);
        returns.push(sample);
        state = outcome.next;
    }

    SimulationRun {
        id,
        final_balance: state.total(),
        trajectory,
        returns,
        volatility: population_std_dev(&performance),
    }
}

fn population_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    var.sqrt()
}

fn derive_seed(base_seed: u64, run_id: u32) -> u64 {
    splitmix64(base_seed ^ (run_id as u64).rotate_left(32))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::market::FixedReturns;
    use crate::core::types::{AnnualReturn, Strategy};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn small_engine(simulations: u32) -> Engine {
        Engine::new(EngineConfig {
            simulations,
            ..EngineConfig::default()
        })
        .expect("valid engine config")
    }

    fn sample_request(strategy: Strategy) -> SimulationRequest {
        SimulationRequest {
            initial_cash: 40_000.0,
            initial_investments: 760_000.0,
            annual_spend: 32_000.0,
            time_horizon: 25,
            inflation_rate: 2.5,
            management_fee: 0.4,
            custom_stock_allocation: 85.0,
            strategy,
        }
    }

    fn one_year(strategy: Strategy, investments: f64, spend: f64) -> SimulationRequest {
        SimulationRequest {
            initial_cash: 0.0,
            initial_investments: investments,
            annual_spend: spend,
            time_horizon: 1,
            inflation_rate: 0.0,
            management_fee: 0.0,
            custom_stock_allocation: 0.0,
            strategy,
        }
    }

    fn run_fixed(request: &SimulationRequest, returns: AnnualReturn) -> SimulationRun {
        let weights = TargetWeights::for_request(request);
        let params = TransitionParams::new(request, weights, EngineConfig::default().friction_rate);
        simulate_run(0, request, &params, &mut FixedReturns::constant(returns))
    }

    #[test]
    fn conservative_zero_variance_year_matches_hand_calculation() {
        let run = run_fixed(
            &one_year(Strategy::Conservative, 100_000.0, 0.0),
            AnnualReturn {
                stock: 0.085,
                bond: 0.04,
                cash: 0.0,
            },
        );
        assert_eq!(run.trajectory.len(), 1);
        assert_approx(run.final_balance, 106_646.65);
    }

    #[test]
    fn bucket_zero_return_year_spends_buffer() {
        let run = run_fixed(
            &one_year(Strategy::Bucket, 12_000.0, 6_000.0),
            AnnualReturn {
                stock: 0.0,
                bond: 0.0,
                cash: 0.0,
            },
        );
        assert_approx(run.final_balance, 6_000.0);
    }

    #[test]
    fn total_loss_year_depletes() {
        let run = run_fixed(
            &one_year(Strategy::Conservative, 1_000.0, 2_000.0),
            AnnualReturn {
                stock: -1.0,
                bond: -1.0,
                cash: 0.0,
            },
        );
        assert_eq!(run.final_balance, 0.0);
        assert_eq!(run.trajectory, vec![0.0]);
    }

    #[test]
    fn depleted_runs_never_recover() {
        let mut request = one_year(Strategy::Aggressive, 10_000.0, 6_000.0);
        request.time_horizon = 10;
        let run = run_fixed(
            &request,
            AnnualReturn {
                stock: 0.0,
                bond: 0.0,
                cash: 0.0,
            },
        );
        let first_zero = run
            .trajectory
            .iter()
            .position(|v| *v == 0.0)
            .expect("spending must exhaust the portfolio");
        assert!(run.trajectory[first_zero..].iter().all(|v| *v == 0.0));
        assert_eq!(run.trajectory.len(), 10);
    }

    #[test]
    fn run_records_full_horizon_of_returns() {
        let engine = small_engine(8);
        let request = sample_request(Strategy::Bucket);
        let weights = TargetWeights::for_request(&request);
        let params = TransitionParams::new(&request, weights, engine.config().friction_rate);
        let runs = engine
            .run_batch(&request, &params, &BatchToken::new())
            .expect("batch should complete");
        assert_eq!(runs.len(), 8);
        for (idx, run) in runs.iter().enumerate() {
            assert_eq!(run.id as usize, idx);
            assert_eq!(run.trajectory.len(), 25);
            assert_eq!(run.returns.len(), 25);
            assert_eq!(run.final_balance, *run.trajectory.last().expect("non-empty"));
        }
    }

    #[test]
    fn batch_is_reproducible_for_same_seed() {
        let engine = small_engine(300);
        let request = sample_request(Strategy::Aggressive);
        let a = engine.run_simulation(&request).expect("valid request");
        let b = engine.run_simulation(&request).expect("valid request");
        assert_eq!(a, b);
    }

    #[test]
    fn different_seeds_give_different_paths() {
        let request = sample_request(Strategy::Conservative);
        let a = small_engine(200).run_simulation(&request).expect("valid");
        let b = Engine::new(EngineConfig {
            simulations: 200,
            seed: 43,
            ..EngineConfig::default()
        })
        .expect("valid engine config")
        .run_simulation(&request)
        .expect("valid");
        assert_ne!(a.percentile_curve, b.percentile_curve);
    }

    #[test]
    fn batch_result_satisfies_output_contract() {
        let engine = small_engine(500);
        for strategy in [
            Strategy::Bucket,
            Strategy::Conservative,
            Strategy::Aggressive,
            Strategy::Custom,
        ] {
            let request = sample_request(strategy);
            let result = engine.run_simulation(&request).expect("valid request");

            assert_eq!(result.percentile_curve.len(), 26);
            let origin = result.percentile_curve[0];
            assert_eq!(origin.year, 0);
            assert_approx(origin.p10, 800_000.0);
            assert_approx(origin.p25, 800_000.0);
            assert_approx(origin.p50, 800_000.0);

            for point in &result.percentile_curve {
                assert!(point.p10 <= point.p25 && point.p25 <= point.p50);
            }
            assert!((0.0..=100.0).contains(&result.success_rate));
            assert!(result.volatility >= 0.0);
            assert_eq!(result.audit_logs.downturn.len(), 25);
            assert_eq!(result.audit_logs.below_average.len(), 25);
            assert_eq!(result.audit_logs.average.len(), 25);
            assert_eq!(result.representative_runs.len(), 3);
        }
    }

    #[test]
    fn invalid_request_is_rejected_before_simulation() {
        let engine = small_engine(10);
        let mut request = sample_request(Strategy::Custom);
        request.custom_stock_allocation = 120.0;
        let err = engine.run_simulation(&request).expect_err("must reject");
        assert!(matches!(
            err,
            SimulationError::InvalidInput {
                field: "customStockAllocation",
                ..
            }
        ));
    }

    #[test]
    fn cancelled_token_abandons_batch() {
        let engine = small_engine(1_000);
        let token = BatchToken::new();
        token.cancel();
        let err = engine
            .run_simulation_with_token(&sample_request(Strategy::Bucket), &token)
            .expect_err("cancelled batch must not produce a result");
        assert_eq!(err, SimulationError::Cancelled);
    }

    #[test]
    fn every_run_depleting_is_not_an_error() {
        let engine = small_engine(200);
        let mut request = sample_request(Strategy::Conservative);
        request.initial_cash = 0.0;
        request.initial_investments = 50_000.0;
        request.annual_spend = 100_000.0;
        request.time_horizon = 5;

        let result = engine.run_simulation(&request).expect("depletion is an outcome");
        assert_eq!(result.success_rate, 0.0);
        assert_eq!(result.final_median_value, 0.0);
        for point in &result.percentile_curve[1..] {
            assert_eq!(point.p50, 0.0);
        }
        assert_eq!(
            result.audit_logs.average[0].action,
            "Portfolio Depleted".to_string()
        );
    }

    #[test]
    fn splitmix_streams_differ_per_run() {
        let a = derive_seed(42, 0);
        let b = derive_seed(42, 1);
        let c = derive_seed(43, 0);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn population_std_dev_of_constant_series_is_zero() {
        assert_eq!(population_std_dev(&[0.05, 0.05, 0.05]), 0.0);
        assert_eq!(population_std_dev(&[0.1]), 0.0);
        assert_approx(population_std_dev(&[0.0, 0.2]), 0.1);
    }
}
