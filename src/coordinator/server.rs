//! Coordinator HTTP server
//!
//! Serves claim and report requests from workers over a shared registry.
//! Storage failures stop the server: once the registry is unreliable,
//! answering claims could grant the same key twice.

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::protocol::{
    ClaimResponse, ErrorKind, ErrorResponse, OwnershipResponse, ReportResponse, StoredResponse,
};
use crate::models::{ExecutionId, OwnerId, TerminalStatus, TestResult, WorkItemKey};
use crate::registry::{
    Backend, MemoryRegistry, RegistryError, ResultStore, WorkRegistry, DEFAULT_TTL,
};
use crate::results::aggregate_all;

/// How often expired in-memory records are purged
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

type Params = HashMap<String, String>;

/// Coordinator service over a registry backend
pub struct Coordinator {
    backend: Backend,
    memory: Option<Arc<MemoryRegistry>>,
    execution: ExecutionId,
    ttl: Duration,
}

impl Coordinator {
    /// Coordinator over an in-process registry, swept periodically
    pub fn in_memory(execution: ExecutionId, ttl: Duration) -> Self {
        let memory = Arc::new(MemoryRegistry::new());
        Self {
            backend: Backend::memory(memory.clone()),
            memory: Some(memory),
            execution,
            ttl,
        }
    }

    /// Coordinator fronting an already connected backend (e.g. Redis)
    pub fn with_backend(backend: Backend, execution: ExecutionId) -> Self {
        Self {
            backend,
            memory: None,
            execution,
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Router plus the receiving end of the fatal-error channel
    pub fn router(&self) -> (Router, mpsc::UnboundedReceiver<RegistryError>) {
        let (fatal, fatal_rx) = mpsc::unbounded_channel();
        let state = CoordinatorState {
            registry: self.backend.registry.clone(),
            results: self.backend.results.clone(),
            execution: self.execution.clone(),
            ttl: self.ttl,
            fatal,
        };
        (build_router(state), fatal_rx)
    }

    /// Serve until `shutdown` resolves or the registry fails
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (router, mut fatal_rx) = self.router();
        let (failure_tx, failure_rx) = oneshot::channel::<RegistryError>();

        let sweeper = self.memory.clone().map(|memory| tokio::spawn(sweep(memory)));

        let addr = listener.local_addr().context("Failed to read listen address")?;
        info!(
            "Coordinator listening on {} (execution {}, ttl {}s)",
            addr,
            self.execution,
            self.ttl.as_secs()
        );

        let signal = async move {
            tokio::select! {
                Some(err) = fatal_rx.recv() => {
                    error!("Registry failure, shutting down coordinator: {}", err);
                    let _ = failure_tx.send(err);
                }
                _ = shutdown => info!("Coordinator shutting down"),
            }
        };

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .await;

        if let Some(handle) = sweeper {
            handle.abort();
        }
        served.context("Coordinator server error")?;

        match failure_rx.await {
            Ok(err) => Err(anyhow::Error::new(err).context("Coordinator registry failed")),
            Err(_) => Ok(()),
        }
    }
}

async fn sweep(memory: Arc<MemoryRegistry>) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    interval.tick().await;
    loop {
        interval.tick().await;
        match memory.purge_expired() {
            Ok(0) => {}
            Ok(n) => debug!("Purged {} expired registry entries", n),
            Err(e) => warn!("Registry sweep failed: {}", e),
        }
    }
}

/// Shared handler state
#[derive(Clone)]
pub struct CoordinatorState {
    pub registry: Arc<dyn WorkRegistry>,
    pub results: Arc<dyn ResultStore>,
    pub execution: ExecutionId,
    pub ttl: Duration,
    pub fatal: mpsc::UnboundedSender<RegistryError>,
}

impl CoordinatorState {
    fn execution(&self, params: &Params) -> ExecutionId {
        params
            .get("execution")
            .filter(|e| !e.is_empty())
            .map(ExecutionId::new)
            .unwrap_or_else(|| self.execution.clone())
    }

    fn ttl(&self, params: &Params) -> Duration {
        params
            .get("ttl")
            .and_then(|t| t.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(self.ttl)
    }

    /// Log a registry error and escalate it when the store is in doubt
    fn registry_error(&self, err: RegistryError) -> ErrorKind {
        if err.is_indeterminate() {
            error!("Registry failure: {}", err);
            let _ = self.fatal.send(err.clone());
        } else {
            debug!("Rejected request: {}", err);
        }
        ErrorKind::from(&err)
    }
}

pub fn build_router(state: CoordinatorState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/report", get(report))
        .route("/runner/{runner}", get(missing_action))
        .route("/runner/{runner}/{action}", get(runner_get).post(runner_post))
        .fallback(invalid_request)
        .with_state(state)
}

fn error(kind: ErrorKind) -> Response {
    Json(ErrorResponse::new(kind)).into_response()
}

fn test_key(params: &Params) -> Option<WorkItemKey> {
    params
        .get("test")
        .and_then(|raw| WorkItemKey::parse(raw.as_str()).ok())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "testfleet-coordinator"
    }))
}

async fn invalid_request() -> Response {
    error(ErrorKind::InvalidRequest)
}

async fn missing_action() -> Response {
    error(ErrorKind::InvalidRequestAction)
}

async fn runner_get(
    State(state): State<CoordinatorState>,
    Path((runner, action)): Path<(String, String)>,
    Query(params): Query<Params>,
) -> Response {
    let runner = OwnerId::new(runner);
    match action.as_str() {
        "should-run" => should_run(&state, runner, &params).await,
        "result" => runner_result(&state, runner, &params).await,
        "ownership" => ownership(&state, &params).await,
        other => {
            warn!("Invalid action {:?} from runner {}", other, runner);
            error(ErrorKind::InvalidRequestAction)
        }
    }
}

async fn runner_post(
    State(state): State<CoordinatorState>,
    Path((runner, action)): Path<(String, String)>,
    Query(params): Query<Params>,
    body: Bytes,
) -> Response {
    if action != "test-result" {
        warn!("Invalid action {:?} from runner {}", action, runner);
        return error(ErrorKind::InvalidRequestAction);
    }

    let result: TestResult = match serde_json::from_slice(&body) {
        Ok(result) => result,
        Err(e) => {
            debug!("Undecodable test result from {}: {}", runner, e);
            return error(ErrorKind::InvalidRequest);
        }
    };

    let execution = state.execution(&params);
    match state
        .results
        .append_result(&execution, &result, state.ttl)
        .await
    {
        Ok(()) => {
            debug!("Stored result {} from {}", result.joined_path(), runner);
            Json(StoredResponse::stored()).into_response()
        }
        Err(e) => error(state.registry_error(e)),
    }
}

async fn should_run(state: &CoordinatorState, runner: OwnerId, params: &Params) -> Response {
    let Some(key) = test_key(params) else {
        return Json(ClaimResponse::skip(ErrorKind::InvalidTestId, None)).into_response();
    };
    let execution = state.execution(params);

    match state
        .registry
        .try_claim(&execution, &key, &runner, state.ttl(params))
        .await
    {
        Ok(outcome) if outcome.granted => {
            debug!("Granted {} to {} (retries {})", key, runner, outcome.retry_count);
            Json(ClaimResponse::run(outcome.retry_count)).into_response()
        }
        Ok(outcome) => {
            debug!("Denied {} to {}, owned by {}", key, runner, outcome.owner);
            Json(ClaimResponse::skip(
                ErrorKind::AlreadyRunning,
                Some(outcome.owner),
            ))
            .into_response()
        }
        Err(e) => Json(ClaimResponse::skip(state.registry_error(e), None)).into_response(),
    }
}

async fn runner_result(state: &CoordinatorState, runner: OwnerId, params: &Params) -> Response {
    let Some(key) = test_key(params) else {
        return error(ErrorKind::InvalidTestId);
    };
    let status = TerminalStatus::from_str(params.get("status").map(String::as_str).unwrap_or(""));
    let execution = state.execution(params);

    match state
        .registry
        .report_status(&execution, &key, &runner, status)
        .await
    {
        Ok(record) => {
            info!("{} finished {} ({})", runner, key, status);
            Json(ReportResponse {
                status: record.status,
                record,
            })
            .into_response()
        }
        Err(e) => error(state.registry_error(e)),
    }
}

async fn ownership(state: &CoordinatorState, params: &Params) -> Response {
    let Some(key) = test_key(params) else {
        return error(ErrorKind::InvalidTestId);
    };
    let execution = state.execution(params);

    match state.registry.get(&execution, &key).await {
        Ok(record) => Json(OwnershipResponse { record }).into_response(),
        Err(e) => error(state.registry_error(e)),
    }
}

async fn report(State(state): State<CoordinatorState>, Query(params): Query<Params>) -> Response {
    let filter = params.get("execution").filter(|e| !e.is_empty()).cloned();

    match state.results.load_results().await {
        Ok(mut all) => {
            if let Some(execution) = filter {
                all.retain(|(id, _)| id.as_str() == execution);
            }
            Json(aggregate_all(all)).into_response()
        }
        Err(e) => error(state.registry_error(e)),
    }
}
