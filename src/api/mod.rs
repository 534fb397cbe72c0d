mod service;

use axum::{
    Router,
    extract::{Json, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub use service::{PendingBatch, PublishedResult, ServiceError, SimulationService};

use crate::core::{
    DEFAULT_FRICTION_RATE, DEFAULT_SEED, DEFAULT_SIMULATIONS, Engine, EngineConfig,
    SimulationError, SimulationRequest, Strategy,
};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Simulation(#[from] SimulationError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not encode result: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliStrategy {
    Bucket,
    Conservative,
    Aggressive,
    Custom,
}

impl From<CliStrategy> for Strategy {
    fn from(value: CliStrategy) -> Self {
        match value {
            CliStrategy::Bucket => Strategy::Bucket,
            CliStrategy::Conservative => Strategy::Conservative,
            CliStrategy::Aggressive => Strategy::Aggressive,
            CliStrategy::Custom => Strategy::Custom,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "retirement-mc",
    version,
    about = "Monte Carlo retirement portfolio survival estimator (bucket and fixed-allocation strategies)"
)]
pub struct Cli {
    #[command(flatten)]
    engine: EngineArgs,
    #[arg(
        long,
        global = true,
        env = "RETIREMENT_MC_LOG",
        default_value = "info",
        help = "Log filter used when RUST_LOG is unset"
    )]
    pub log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone, Copy)]
struct EngineArgs {
    #[arg(
        long,
        global = true,
        env = "RETIREMENT_MC_SIMULATIONS",
        default_value_t = DEFAULT_SIMULATIONS
    )]
    simulations: u32,
    #[arg(
        long,
        global = true,
        env = "RETIREMENT_MC_SEED",
        default_value_t = DEFAULT_SEED
    )]
    seed: u64,
    #[arg(
        long,
        global = true,
        env = "RETIREMENT_MC_FRICTION_RATE",
        default_value_t = DEFAULT_FRICTION_RATE * 100.0,
        help = "Transaction cost / rebalancing drag in percent"
    )]
    friction_rate: f64,
}

impl From<EngineArgs> for EngineConfig {
    fn from(args: EngineArgs) -> Self {
        EngineConfig {
            simulations: args.simulations,
            seed: args.seed,
            friction_rate: args.friction_rate / 100.0,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Serve the JSON API over HTTP")]
    Serve {
        #[arg(long, env = "RETIREMENT_MC_PORT", default_value_t = 8080)]
        port: u16,
    },
    #[command(about = "Run one batch and print the result as JSON")]
    Simulate(RequestArgs),
}

#[derive(Args, Debug, Clone)]
struct RequestArgs {
    #[arg(long, default_value_t = 0.0)]
    initial_cash: f64,
    #[arg(long)]
    initial_investments: f64,
    #[arg(long)]
    annual_spend: f64,
    #[arg(long, default_value_t = 30)]
    time_horizon: u32,
    #[arg(long, default_value_t = 3.0, help = "Inflation in percent per year")]
    inflation_rate: f64,
    #[arg(long, default_value_t = 0.5, help = "Management fee in percent per year")]
    management_fee: f64,
    #[arg(
        long,
        default_value_t = 60.0,
        help = "Stock percent for the custom strategy"
    )]
    custom_stock_allocation: f64,
    #[arg(long, value_enum, default_value_t = CliStrategy::Conservative)]
    strategy: CliStrategy,
}

impl From<RequestArgs> for SimulationRequest {
    fn from(args: RequestArgs) -> Self {
        SimulationRequest {
            initial_cash: args.initial_cash,
            initial_investments: args.initial_investments,
            annual_spend: args.annual_spend,
            time_horizon: args.time_horizon,
            inflation_rate: args.inflation_rate,
            management_fee: args.management_fee,
            custom_stock_allocation: args.custom_stock_allocation,
            strategy: args.strategy.into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    #[serde(alias = "cash")]
    initial_cash: Option<f64>,
    #[serde(alias = "investments")]
    initial_investments: Option<f64>,
    #[serde(alias = "spend")]
    annual_spend: Option<f64>,
    #[serde(alias = "years")]
    time_horizon: Option<u32>,
    #[serde(alias = "inflation")]
    inflation_rate: Option<f64>,
    #[serde(alias = "fee")]
    management_fee: Option<f64>,
    #[serde(alias = "stockAllocation")]
    custom_stock_allocation: Option<f64>,
    strategy: Option<Strategy>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub async fn run(cli: Cli) -> Result<(), ApiError> {
    let engine = Engine::new(cli.engine.into())?;
    match cli.command {
        Command::Serve { port } => run_http_server(port, engine).await?,
        Command::Simulate(args) => {
            let request: SimulationRequest = args.into();
            let result = tokio::task::spawn_blocking(move || engine.run_simulation(&request))
                .await
                .map_err(std::io::Error::other)??;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }
    Ok(())
}

pub fn router(service: SimulationService) -> Router {
    Router::new()
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .route("/api/results/latest", get(latest_handler))
        .fallback(not_found_handler)
        .with_state(service)
}

pub async fn run_http_server(port: u16, engine: Engine) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let simulations = engine.config().simulations;
    let app = router(SimulationService::new(engine));

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, simulations, "retirement simulation API listening");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_get_handler(
    State(service): State<SimulationService>,
    Query(payload): Query<SimulatePayload>,
) -> Response {
    simulate_handler_impl(service, payload).await
}

async fn simulate_post_handler(
    State(service): State<SimulationService>,
    Json(payload): Json<SimulatePayload>,
) -> Response {
    simulate_handler_impl(service, payload).await
}

async fn simulate_handler_impl(service: SimulationService, payload: SimulatePayload) -> Response {
    let request = request_from_payload(payload);
    match service.submit(request).await {
        Ok(published) => json_response(StatusCode::OK, published.as_ref()),
        Err(err) => {
            let status = status_for(&err);
            warn!(%status, error = %err, "simulation request failed");
            error_response(status, &err.to_string())
        }
    }
}

async fn latest_handler(State(service): State<SimulationService>) -> Response {
    match service.latest() {
        Some(published) => json_response(StatusCode::OK, published.as_ref()),
        None => error_response(StatusCode::NOT_FOUND, "No simulation has completed yet"),
    }
}

fn status_for(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::Simulation(SimulationError::InvalidInput { .. }) => StatusCode::BAD_REQUEST,
        ServiceError::Simulation(SimulationError::Cancelled) => StatusCode::CONFLICT,
        ServiceError::Simulation(SimulationError::Configuration(_)) | ServiceError::Worker(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        "no-store".parse().expect("valid header"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

fn request_from_payload(payload: SimulatePayload) -> SimulationRequest {
    let defaults = default_request();
    SimulationRequest {
        initial_cash: payload.initial_cash.unwrap_or(defaults.initial_cash),
        initial_investments: payload
            .initial_investments
            .unwrap_or(defaults.initial_investments),
        annual_spend: payload.annual_spend.unwrap_or(defaults.annual_spend),
        time_horizon: payload.time_horizon.unwrap_or(defaults.time_horizon),
        inflation_rate: payload.inflation_rate.unwrap_or(defaults.inflation_rate),
        management_fee: payload.management_fee.unwrap_or(defaults.management_fee),
        custom_stock_allocation: payload
            .custom_stock_allocation
            .unwrap_or(defaults.custom_stock_allocation),
        strategy: payload.strategy.unwrap_or(defaults.strategy),
    }
}

fn default_request() -> SimulationRequest {
    SimulationRequest {
        initial_cash: 50_000.0,
        initial_investments: 950_000.0,
        annual_spend: 40_000.0,
        time_horizon: 30,
        inflation_rate: 3.0,
        management_fee: 0.5,
        custom_stock_allocation: 60.0,
        strategy: Strategy::Conservative,
    }
}
