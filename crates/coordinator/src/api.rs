//! HTTP surface of the coordinator
//!
//! Thin axum handlers over [`Coordinator`]. Every error leaves as an
//! [`ErrorBody`] with the status derived from the error kind.

use crate::service::Coordinator;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use hydra_common::{HydraError, METRICS};
use hydra_proto::{
    paths, BalanceResponse, ErrorBody, HealthResponse, QueryRequest, QueryResponse,
    RegisterResponse, SubmitResultRequest, SubmitResultResponse, TaskAssignment,
    TransactionsResponse, WorkerRequest,
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared handler state
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
}

/// Error wrapper rendered as a JSON [`ErrorBody`]
#[derive(Debug)]
pub struct ApiError(pub HydraError);

impl From<HydraError> for ApiError {
    fn from(err: HydraError) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(HydraError::invalid_input(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if self.0.is_expected() {
            debug!("{}", self.0);
        } else if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected: {}", self.0);
        }

        let body = ErrorBody {
            code: self.0.code().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Run a coordinator call on the blocking pool
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> hydra_common::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError(HydraError::internal(format!("Handler task failed: {}", e))))?
        .map_err(ApiError)
}

/// Build the router; `/metrics` is only mounted when `expose_metrics` is set.
///
/// Request bodies are capped at [`Coordinator::max_request_bytes`] so a full
/// model update fits.
pub fn router(coordinator: Arc<Coordinator>, expose_metrics: bool) -> Router {
    let body_limit = coordinator.max_request_bytes();
    debug!("Request body limit: {} bytes", body_limit);
    let state = Arc::new(AppState { coordinator });

    let mut app = Router::new()
        .route(paths::HEALTH, get(health))
        .route(paths::REGISTER, post(register))
        .route(paths::GET_TASK, post(get_task))
        .route(paths::SUBMIT_RESULT, post(submit_result))
        .route(paths::GET_BALANCE, post(get_balance))
        .route(paths::QUERY_MODEL, post(query_model))
        .route(paths::TRANSACTIONS, post(transactions));

    if expose_metrics {
        app = app.route(paths::METRICS, get(metrics));
    }

    app.layer(DefaultBodyLimit::max(body_limit)).with_state(state)
}

/// Serve `app` on `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> hydra_common::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("Coordinator listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health(State(state): State<Arc<AppState>>) -> ApiResult<HealthResponse> {
    let coordinator = Arc::clone(&state.coordinator);
    Ok(Json(blocking(move || coordinator.health()).await?))
}

async fn metrics() -> String {
    METRICS.gather()
}

async fn register(
    State(state): State<Arc<AppState>>,
    body: Result<Json<WorkerRequest>, JsonRejection>,
) -> ApiResult<RegisterResponse> {
    let Json(request) = body?;
    let coordinator = Arc::clone(&state.coordinator);
    Ok(Json(blocking(move || coordinator.register(&request.worker_id)).await?))
}

async fn get_task(
    State(state): State<Arc<AppState>>,
    body: Result<Json<WorkerRequest>, JsonRejection>,
) -> ApiResult<TaskAssignment> {
    let Json(request) = body?;
    let coordinator = Arc::clone(&state.coordinator);

    blocking(move || coordinator.request_task(&request.worker_id))
        .await?
        .map(Json)
        .ok_or(ApiError(HydraError::NoTasksAvailable))
}

async fn submit_result(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SubmitResultRequest>, JsonRejection>,
) -> ApiResult<SubmitResultResponse> {
    let Json(request) = body?;
    let coordinator = Arc::clone(&state.coordinator);

    Ok(Json(
        blocking(move || {
            coordinator.submit_result(&request.worker_id, &request.task_id, &request.update)
        })
        .await?,
    ))
}

async fn get_balance(
    State(state): State<Arc<AppState>>,
    body: Result<Json<WorkerRequest>, JsonRejection>,
) -> ApiResult<BalanceResponse> {
    let Json(request) = body?;
    let coordinator = Arc::clone(&state.coordinator);
    Ok(Json(blocking(move || coordinator.balance(&request.worker_id)).await?))
}

async fn query_model(
    State(state): State<Arc<AppState>>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> ApiResult<QueryResponse> {
    let Json(request) = body?;
    let coordinator = Arc::clone(&state.coordinator);

    Ok(Json(
        blocking(move || coordinator.paid_query(&request.worker_id, &request.prompt)).await?,
    ))
}

async fn transactions(
    State(state): State<Arc<AppState>>,
    body: Result<Json<WorkerRequest>, JsonRejection>,
) -> ApiResult<TransactionsResponse> {
    let Json(request) = body?;
    let coordinator = Arc::clone(&state.coordinator);
    Ok(Json(blocking(move || coordinator.transactions(&request.worker_id)).await?))
}
