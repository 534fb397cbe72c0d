mod aggregate;
mod audit;
mod engine;
mod error;
mod market;
mod transition;
mod types;

pub use aggregate::{BatchSummary, percentile_index, select_representatives, summarize};
pub use audit::build_audit_log;
pub use engine::{BatchToken, Engine, simulate_run};
pub use error::SimulationError;
pub use market::{
    ASSET_CORRELATION, AssetAssumption, AssetAssumptions, CorrelatedReturns, CorrelationModel,
    FixedReturns, LogNormalParams, ReturnSource,
};
pub use transition::{PortfolioState, TransitionParams, YearAction, YearOutcome, advance_year};
pub use types::{
    AnnualReturn, AuditLogs, AuditRow, BUFFER_YEARS, Band, ChartPoint, DEFAULT_FRICTION_RATE,
    DEFAULT_SEED, DEFAULT_SIMULATIONS, DEPLETION_THRESHOLD, DisplayAllocation, EngineConfig,
    MAX_TIME_HORIZON, RepresentativeRun, SUCCESS_EPSILON, SimulationRequest, SimulationResult,
    SimulationRun, Strategy, TargetWeights,
};
