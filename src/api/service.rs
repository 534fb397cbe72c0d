use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::core::{BatchToken, Engine, SimulationError, SimulationRequest, SimulationResult};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Simulation(#[from] SimulationError),

    #[error("simulation worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedResult {
    pub generation: u64,
    pub request: SimulationRequest,
    pub result: SimulationResult,
}

#[derive(Default)]
struct ServiceState {
    next_generation: u64,
    in_flight: Option<BatchToken>,
    published: Option<Arc<PublishedResult>>,
}

/// Starting a batch cancels whichever batch was in flight. A batch that
/// finishes after being superseded is dropped, so readers of [`latest`]
/// only ever see the most recent completed request.
///
/// [`latest`]: SimulationService::latest
#[derive(Clone)]
pub struct SimulationService {
    engine: Arc<Engine>,
    state: Arc<Mutex<ServiceState>>,
}

pub struct PendingBatch {
    service: SimulationService,
    generation: u64,
    token: BatchToken,
    request: SimulationRequest,
}

impl SimulationService {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine: Arc::new(engine),
            state: Arc::new(Mutex::new(ServiceState::default())),
        }
    }

    pub fn latest(&self) -> Option<Arc<PublishedResult>> {
        self.lock().published.clone()
    }

    pub async fn submit(
        &self,
        request: SimulationRequest,
    ) -> Result<Arc<PublishedResult>, ServiceError> {
        self.begin(request).run().await
    }

    pub fn begin(&self, request: SimulationRequest) -> PendingBatch {
        let token = BatchToken::new();
        let mut state = self.lock();
        state.next_generation += 1;
        if let Some(previous) = state.in_flight.replace(token.clone()) {
            previous.cancel();
        }
        debug!(generation = state.next_generation, "simulation batch queued");

        PendingBatch {
            service: self.clone(),
            generation: state.next_generation,
            token,
            request,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PendingBatch {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub async fn run(self) -> Result<Arc<PublishedResult>, ServiceError> {
        let engine = Arc::clone(&self.service.engine);
        let token = self.token.clone();
        let request = self.request.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            engine.run_simulation_with_token(&request, &token)
        })
        .await
        .map_err(|e| ServiceError::Worker(e.to_string()))?;

        let mut state = self.service.lock();
        if self.token.is_cancelled() {
            debug!(generation = self.generation, "dropping superseded batch");
            return Err(SimulationError::Cancelled.into());
        }
        if state.next_generation == self.generation {
            state.in_flight = None;
        }
        let result = outcome?;

        if state
            .published
            .as_ref()
            .is_some_and(|p| p.generation > self.generation)
        {
            return Err(SimulationError::Cancelled.into());
        }

        let published = Arc::new(PublishedResult {
            generation: self.generation,
            request: self.request,
            result,
        });
        state.published = Some(Arc::clone(&published));
        info!(generation = self.generation, "published simulation result");
        Ok(published)
    }
}
